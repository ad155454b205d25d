//! Registry of image handles owned by jobs.
//!
//! A handle is acquired when a job is created and must be released exactly
//! once, when the caller clears the batch. Nothing is released implicitly.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, warn};
use serde::Serialize;

use crate::intake::resolve_mime_type;
use crate::job::ImageUpload;

/// Opaque handle to an image held by the [`ImageStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    fn generate() -> Self {
        Self(format!("image-{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ImageRef {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Image bytes plus what the gateway needs to send them.
#[derive(Debug)]
pub struct ImageData {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Arc<[u8]>,
}

#[derive(Default)]
pub struct ImageStore {
    entries: RwLock<HashMap<ImageRef, Arc<ImageData>>>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl ImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<ImageRef, Arc<ImageData>>> {
        match self.entries.read() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Image store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<ImageRef, Arc<ImageData>>> {
        match self.entries.write() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Image store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Takes ownership of the upload's bytes and hands back a handle.
    pub fn acquire(&self, upload: ImageUpload) -> ImageRef {
        let mime_type = resolve_mime_type(&upload.file_name, upload.mime_type.as_deref());
        let data = ImageData {
            file_name: upload.file_name,
            mime_type,
            bytes: Arc::from(upload.bytes),
        };
        let image = ImageRef::generate();
        debug!("Acquired {} for {}", image, data.file_name);

        self.write_entries().insert(image.clone(), Arc::new(data));
        self.acquired.fetch_add(1, Ordering::Relaxed);
        image
    }

    /// Looks up a live handle. Returns `None` once it has been released.
    pub fn resolve(&self, image: &ImageRef) -> Option<Arc<ImageData>> {
        self.read_entries().get(image).cloned()
    }

    /// Releases a handle. Returns `false` if it was unknown or already released.
    pub fn release(&self, image: &ImageRef) -> bool {
        let removed = self.write_entries().remove(image).is_some();
        if removed {
            self.released.fetch_add(1, Ordering::Relaxed);
            debug!("Released {}", image);
        } else {
            warn!("Release of unknown or already released image {}", image);
        }
        removed
    }

    /// Number of handles acquired but not yet released.
    pub fn live_count(&self) -> usize {
        self.read_entries().len()
    }

    pub fn acquired_total(&self) -> usize {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn released_total(&self) -> usize {
        self.released.load(Ordering::Relaxed)
    }
}
