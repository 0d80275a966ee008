use async_trait::async_trait;
use axum::body::Bytes;
use nanoid::nanoid;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// Stores uploaded event images and hands back a public URL for them.
#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn upload(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<String, AppError>;

    /// Deletes an image previously returned by `upload`.
    async fn remove(&self, url: &str) -> Result<(), AppError>;
}

/// Writes images into a directory that the server exposes under `/uploads`.
pub struct LocalImageStore {
    dir: PathBuf,
    public_base_url: String,
}

impl LocalImageStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

fn extension(file_name: Option<&str>, content_type: Option<&str>) -> &'static str {
    let from_name = file_name
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase());

    let by_name = match from_name.as_deref() {
        Some("png") => Some("png"),
        Some("jpg" | "jpeg") => Some("jpg"),
        Some("gif") => Some("gif"),
        Some("webp") => Some("webp"),
        Some("svg") => Some("svg"),
        _ => None,
    };

    by_name.unwrap_or(match content_type {
        Some("image/png") => "png",
        Some("image/jpeg") => "jpg",
        Some("image/gif") => "gif",
        Some("image/webp") => "webp",
        Some("image/svg+xml") => "svg",
        _ => "bin",
    })
}

#[async_trait]
impl ImageStore for LocalImageStore {
    async fn upload(
        &self,
        file_name: Option<&str>,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> Result<String, AppError> {
        let name = format!("{}.{}", nanoid!(16), extension(file_name, content_type));

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| AppError::Upload(format!("creating {}: {e}", self.dir.display())))?;
        tokio::fs::write(self.dir.join(&name), &bytes)
            .await
            .map_err(|e| AppError::Upload(format!("writing {name}: {e}")))?;

        tracing::debug!(%name, size = bytes.len(), "stored image");
        Ok(format!("{}/uploads/{}", self.public_base_url, name))
    }

    async fn remove(&self, url: &str) -> Result<(), AppError> {
        let name = url
            .strip_prefix(&self.public_base_url)
            .and_then(|rest| rest.strip_prefix("/uploads/"))
            .filter(|name| !name.is_empty() && !name.contains(['/', '\\']) && name != &"..")
            .ok_or_else(|| AppError::Upload(format!("{url} is not a stored image")))?;

        tokio::fs::remove_file(self.dir.join(name))
            .await
            .map_err(|e| AppError::Upload(format!("removing {name}: {e}")))?;
        tracing::debug!(%name, "removed image");
        Ok(())
    }
}
