use fs2::FileExt;
use std::{fs::File, fs::OpenOptions, path::Path};

/// Held for the daemon's lifetime; the OS drops the lock with the file.
pub struct LockGuard {
    _file: File,
}

/// Fails with `WouldBlock` when another daemon owns the project.
pub fn acquire_lock(path: &Path) -> std::io::Result<LockGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;

    file.try_lock_exclusive()?;
    Ok(LockGuard { _file: file })
}

#[cfg(test)]
mod tests {
    use super::acquire_lock;

    #[test]
    fn second_holder_is_refused_until_release() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!("hophop-lock-{nanos}"));
        let path = dir.join("tmp/hophopd.lock");

        let first = acquire_lock(&path).expect("first lock");
        let err = acquire_lock(&path).err().expect("second lock must fail");
        assert_eq!(err.kind(), fs2::lock_contended_error().kind());

        drop(first);
        acquire_lock(&path).expect("lock after release");
        let _ = std::fs::remove_dir_all(dir);
    }
}
