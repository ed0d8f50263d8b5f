/// Saving a colorized result to disk

use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::codec::{CodecError, EncodedImage};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image payload could not be decoded: {0}")]
    Payload(#[from] CodecError),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Default file name, e.g. `colorized_20260118_154233.png`
pub fn default_file_name(at: DateTime<Local>) -> String {
    format!("colorized_{}.png", at.format("%Y%m%d_%H%M%S"))
}

/// Where the save dialog opens by default
pub fn default_directory() -> Option<PathBuf> {
    dirs::picture_dir()
        .or_else(dirs::download_dir)
        .or_else(dirs::home_dir)
}

/// Write the binary payload of `image` to `path`, creating parent directories
pub async fn save_image(path: PathBuf, image: EncodedImage) -> Result<PathBuf, ExportError> {
    let bytes = image.payload_bytes()?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir(parent).await?;
    }

    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|source| ExportError::Write {
            path: path.clone(),
            source,
        })?;

    tracing::info!(
        "saved colorized {} ({} bytes) to {}",
        image.mime_type(),
        bytes.len(),
        path.display()
    );
    Ok(path)
}

async fn create_dir(dir: &Path) -> Result<(), ExportError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|source| ExportError::Write {
            path: dir.to_path_buf(),
            source,
        })
}
