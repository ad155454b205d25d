use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::IntakeError;
use crate::job::ImageUpload;

/// Extensions accepted when a file carries no usable MIME type.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "bmp", "gif"];

const FALLBACK_MIME_TYPE: &str = "image/png";

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// True if the file is plausibly an image: an `image/*` MIME type, or one of
/// [`IMAGE_EXTENSIONS`].
pub fn is_image_file(file_name: &str, mime_type: Option<&str>) -> bool {
    if mime_type.is_some_and(|m| m.starts_with("image/")) {
        return true;
    }
    extension_of(file_name).is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

/// MIME type sent to the extraction gateway.
///
/// Uses the reported type when present, otherwise guesses from the extension and
/// falls back to `image/png`.
pub fn resolve_mime_type(file_name: &str, mime_type: Option<&str>) -> String {
    if let Some(mime) = mime_type.filter(|m| !m.is_empty()) {
        return mime.to_string();
    }

    match extension_of(file_name).as_deref() {
        Some("heic") => return "image/heic".to_string(),
        Some("heif") => return "image/heif".to_string(),
        _ => {}
    }

    mime_guess::from_path(file_name)
        .first()
        .filter(|m| m.type_() == mime_guess::mime::IMAGE)
        .map(|m| m.to_string())
        .unwrap_or_else(|| FALLBACK_MIME_TYPE.to_string())
}

/// Drops everything that is not an image.
pub fn filter_images(uploads: Vec<ImageUpload>) -> Vec<ImageUpload> {
    uploads
        .into_iter()
        .filter(|u| {
            let keep = is_image_file(&u.file_name, u.mime_type.as_deref());
            if !keep {
                debug!("Skipping non-image file: {}", u.file_name);
            }
            keep
        })
        .collect()
}

fn read_upload(path: &Path) -> Result<ImageUpload, IntakeError> {
    let bytes = std::fs::read(path).map_err(|e| IntakeError::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());
    Ok(ImageUpload::new(file_name, bytes))
}

/// Recursively collects image files below `root`, ordered by path.
pub fn scan_directory<P: AsRef<Path>>(root: P) -> Result<Vec<ImageUpload>, IntakeError> {
    let root = root.as_ref();
    let mut uploads = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| IntakeError::ScanFailed {
            path: root.to_path_buf(),
            source: e,
        })?;

        if !entry.file_type().is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy();
        if !is_image_file(&name, None) {
            debug!("Skipping non-image file: {}", entry.path().display());
            continue;
        }

        uploads.push(read_upload(entry.path())?);
    }

    info!("Found {} images in {}", uploads.len(), root.display());
    Ok(uploads)
}

/// Reads the given paths, expanding directories and skipping non-images.
pub fn collect_uploads(paths: &[PathBuf]) -> Result<Vec<ImageUpload>, IntakeError> {
    let mut uploads = Vec::new();
    for path in paths {
        if path.is_dir() {
            uploads.extend(scan_directory(path)?);
        } else {
            let upload = read_upload(path)?;
            if is_image_file(&upload.file_name, None) {
                uploads.push(upload);
            } else {
                debug!("Skipping non-image file: {}", path.display());
            }
        }
    }
    Ok(uploads)
}
