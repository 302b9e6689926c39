use std::path::Path;
use uuid::Uuid;

/// Post images live under this directory of the media root
pub const POST_IMAGES_DIR: &str = "posts_images";

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Debug, PartialEq)]
pub enum UploadError {
    UnsupportedExtension,
    Empty,
    Io(String),
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadError::UnsupportedExtension => write!(
                f,
                "Upload a valid image. Allowed extensions: {}",
                ALLOWED_EXTENSIONS.join(", ")
            ),
            UploadError::Empty => write!(f, "The submitted file is empty."),
            UploadError::Io(e) => write!(f, "Failed to store the file: {}", e),
        }
    }
}

/// Lower-cased extension of `filename` if it is an accepted image type
pub fn image_extension(filename: &str) -> Result<String, UploadError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .ok_or(UploadError::UnsupportedExtension)?;

    if ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        Ok(extension)
    } else {
        Err(UploadError::UnsupportedExtension)
    }
}

/// Write an uploaded image under `media_root` with a random file name
///
/// Returns the path relative to `media_root`, which is what the post row stores
/// and what `/media/` serves.
pub async fn save_image(
    media_root: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<String, UploadError> {
    let extension = image_extension(filename)?;
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }

    let dir = media_root.join(POST_IMAGES_DIR);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| UploadError::Io(e.to_string()))?;

    let name = format!("{}.{}", Uuid::new_v4().simple(), extension);
    tokio::fs::write(dir.join(&name), bytes)
        .await
        .map_err(|e| UploadError::Io(e.to_string()))?;

    tracing::debug!(file = %name, size = bytes.len(), "Stored post image");
    Ok(format!("{}/{}", POST_IMAGES_DIR, name))
}

/// Delete a stored image given its path relative to `media_root`
pub async fn remove_image(media_root: &Path, relative: &str) {
    if let Err(e) = tokio::fs::remove_file(media_root.join(relative)).await {
        tracing::warn!(file = %relative, "Failed to remove post image: {}", e);
    }
}
