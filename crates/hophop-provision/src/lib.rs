pub mod errors;

pub mod fetch;
pub mod files;
pub mod framework;
pub mod installer;
pub mod plugins;
pub mod preflight;
pub mod screen;
pub mod service;
pub mod system;

pub use errors::ProvisionError;
pub use installer::{InstallSummary, Installer};
pub use plugins::PluginStore;
pub use screen::ScreenSession;
pub use service::{UnitSpec, build_unit_file, install_unit, resolve_service_user};
pub use system::{HostSystem, ServiceAction, ServiceStatus, SystemController};
