mod envfile;
mod owners;
mod server;

pub use envfile::{EnvMap, parse_env, read_env_file, render_env, write_env_file};
pub use owners::{Owner, OwnerList};
pub use server::{Branch, ConfigLayers, RunMode, ServerConfig};
