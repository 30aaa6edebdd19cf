use std::path::Path;

use tracing::info;

use crate::errors::ProvisionError;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Free space on the filesystem holding `path`, in GiB.
pub fn available_gb(path: &Path) -> Result<f64, ProvisionError> {
    let bytes = fs2::available_space(path)?;
    Ok(bytes as f64 / GIB)
}

pub fn check_disk_space(path: &Path, required_gb: u64) -> Result<f64, ProvisionError> {
    let available_gb = available_gb(path)?;
    if available_gb < required_gb as f64 {
        return Err(ProvisionError::InsufficientDiskSpace {
            required_gb,
            available_gb,
        });
    }
    info!("disk space check passed: {available_gb:.2}GB available");
    Ok(available_gb)
}
