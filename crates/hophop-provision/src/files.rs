use std::path::Path;

use hophop_core::config::OwnerList;

use crate::errors::ProvisionError;

pub const DOORSTOP_DEBUG_ADDRESS: &str = "127.0.0.1:5337";

pub fn render_doorstop_config() -> String {
    let mut ini = String::new();
    ini.push_str("[UnityMono]\n");
    ini.push_str("debug_enabled=true\n");
    ini.push_str("debug_suspend=true\n");
    ini.push_str(&format!("debug_address={DOORSTOP_DEBUG_ADDRESS}\n"));
    ini
}

pub fn write_doorstop_config(path: &Path) -> Result<(), ProvisionError> {
    write_with_parents(path, &render_doorstop_config())
}

/// Regenerates the owner list wholesale.
pub fn write_owner_list(path: &Path, owners: &OwnerList) -> Result<usize, ProvisionError> {
    let mut body = owners.render();
    if !body.is_empty() {
        body.push('\n');
    }
    write_with_parents(path, &body)?;
    Ok(owners.owners.len())
}

fn write_with_parents(path: &Path, body: &str) -> Result<(), ProvisionError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, body)?;
    Ok(())
}
