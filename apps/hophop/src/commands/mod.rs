pub mod exec;
pub mod install;
pub mod screen;
pub mod service;
pub mod status;
pub mod up;
