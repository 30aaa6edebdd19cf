use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::info;

use crate::errors::ProvisionError;

pub const STEAMCMD_URL: &str =
    "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz";

pub fn http_client() -> Result<Client, ProvisionError> {
    Client::builder()
        .user_agent(concat!("hophop/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|err| ProvisionError::Invalid(format!("http client: {err}")))
}

/// Streams `url` into `dest`. The body lands in a sibling `.tmp` file first so
/// a failed transfer never leaves a truncated archive behind.
pub async fn download_to(client: &Client, url: &str, dest: &Path) -> Result<u64, ProvisionError> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut resp = client
        .get(url)
        .send()
        .await
        .map_err(|err| ProvisionError::download(url, err))?
        .error_for_status()
        .map_err(|err| ProvisionError::download(url, err))?;

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path).await?;
    let mut written = 0u64;

    loop {
        let chunk = match resp.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(err) => {
                drop(file);
                let _ = tokio::fs::remove_file(&tmp_path).await;
                return Err(ProvisionError::download(url, err));
            }
        };
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest).await?;
    info!("downloaded {url} ({written} bytes)");
    Ok(written)
}

/// Unpacks a `.tar.gz` over `dest`, keeping whatever is already there.
pub async fn extract_tar_gz(archive: &Path, dest: &Path) -> Result<(), ProvisionError> {
    let archive_owned = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();
    tokio::task::spawn_blocking(move || unpack(&archive_owned, &dest_owned))
        .await
        .map_err(|err| ProvisionError::Extract {
            archive: archive.display().to_string(),
            message: format!("extract task failed: {err}"),
        })?
}

fn unpack(archive_path: &Path, dest: &Path) -> Result<(), ProvisionError> {
    fs::create_dir_all(dest)?;
    let file = fs::File::open(archive_path)?;
    let decoder = GzDecoder::new(std::io::BufReader::new(file));
    let mut archive = tar::Archive::new(decoder);
    archive.set_preserve_permissions(true);
    archive
        .unpack(dest)
        .map_err(|err| ProvisionError::Extract {
            archive: archive_path.display().to_string(),
            message: err.to_string(),
        })
}

/// Makes sure `steamcmd.sh` exists under `dir`, bootstrapping it from Valve's
/// tarball on first use.
pub async fn ensure_steamcmd(client: &Client, dir: &Path) -> Result<PathBuf, ProvisionError> {
    let script = dir.join("steamcmd.sh");
    if tokio::fs::try_exists(&script).await? {
        return Ok(script);
    }

    info!("bootstrapping steamcmd into {}", dir.display());
    let archive = dir.join("steamcmd_linux.tar.gz");
    download_to(client, STEAMCMD_URL, &archive).await?;
    extract_tar_gz(&archive, dir).await?;
    let _ = tokio::fs::remove_file(&archive).await;

    if !tokio::fs::try_exists(&script).await? {
        return Err(ProvisionError::Invalid(format!(
            "steamcmd bootstrap failed: {} not found",
            script.display()
        )));
    }
    Ok(script)
}
