mod dashboard;
mod error;
mod types;

pub use dashboard::*;
pub use error::*;
pub use types::*;
