use std::path::{Path, PathBuf};

use anyhow::Result;
use tokio::fs;

use crate::encode::safe_name;

/// Location of the published challenge response: the webroot, the
/// well-known fragment, and the sanitized token, joined literally.
pub fn challenge_file_path(webroot: &Path, well_known_path: &str, token: &str) -> PathBuf {
    let token = safe_name(token, false);
    PathBuf::from(format!("{}{well_known_path}{token}", webroot.display()))
}

/// Writes the key authorization where the web server will serve it.
///
/// # Errors
/// Returns an error if the challenge directory cannot be created or the
/// file cannot be written.
pub async fn write_challenge_file(path: &Path, key_authorization: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(|e| {
            anyhow::anyhow!("Failed to create challenge dir {}: {e}", parent.display())
        })?;
    }
    fs::write(path, key_authorization)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write challenge file {}: {e}", path.display()))?;
    Ok(())
}

/// Reads the DER certificate signing request produced by the key tool.
///
/// # Errors
/// Returns an error if the file cannot be read.
pub async fn read_csr(path: &Path) -> Result<Vec<u8>> {
    fs::read(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read CSR {}: {e}", path.display()))
}

/// Writes the issued DER certificate.
///
/// # Errors
/// Returns an error if the file cannot be written.
pub async fn write_certificate(path: &Path, der: &[u8]) -> Result<()> {
    fs::write(path, der)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to write certificate {}: {e}", path.display()))?;
    Ok(())
}
