//! Input image discovery.

use std::path::{Path, PathBuf};

/// Fewest images the engine can reconstruct from.
pub const MIN_INPUT_IMAGES: usize = 3;

/// Accepted image extensions, lowercase and without the dot.
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("Image files not found")]
    Missing,

    #[error("Insufficient images for processing (minimum 3)")]
    Insufficient { found: usize },

    #[error("Failed to read images: {0}")]
    Io(#[from] std::io::Error),
}

/// Whether `name` carries one of [`IMAGE_EXTENSIONS`] (case-insensitive).
pub fn is_supported_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
}

/// List the supported images in `images_dir`, sorted by path.
///
/// Fails when the directory does not exist or holds fewer than
/// [`MIN_INPUT_IMAGES`] images.
pub async fn collect_input_images(images_dir: &Path) -> Result<Vec<PathBuf>, AssetError> {
    let mut entries = match tokio::fs::read_dir(images_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AssetError::Missing),
        Err(e) => return Err(e.into()),
    };

    let mut images = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let supported = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_supported_image);
        if supported {
            images.push(path);
        }
    }

    if images.len() < MIN_INPUT_IMAGES {
        return Err(AssetError::Insufficient {
            found: images.len(),
        });
    }

    images.sort();
    Ok(images)
}
