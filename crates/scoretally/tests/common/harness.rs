//! Test harness for isolated test execution.

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use scoretally::intake::collect_uploads;
use scoretally::{Config, ExtractionGateway, ImageUpload, Session};

/// Temp directories plus a session wired to a mock gateway.
pub struct TestHarness {
    temp_dir: TempDir,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub session: Session,
}

impl TestHarness {
    pub fn new(gateway: Arc<dyn ExtractionGateway>) -> Self {
        Self::with_config(Config::default(), gateway)
    }

    pub fn with_config(config: Config, gateway: Arc<dyn ExtractionGateway>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let input_dir = temp_dir.path().join("input");
        let output_dir = temp_dir.path().join("output");
        fs::create_dir_all(&input_dir).expect("Failed to create input dir");
        fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            input_dir,
            output_dir,
            session: Session::new(&config, gateway).expect("Failed to build session"),
        }
    }

    /// Writes a placeholder file into the input directory.
    pub fn add_file(&self, relative: &str) -> PathBuf {
        let path = self.input_dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dir");
        }
        fs::write(&path, relative.as_bytes()).expect("Failed to write file");
        path
    }

    /// Everything under the input directory that intake accepts.
    pub fn uploads(&self) -> Vec<ImageUpload> {
        collect_uploads(&[self.input_dir.clone()]).expect("Failed to collect uploads")
    }
}

/// In-memory uploads with the given names.
pub fn uploads(names: &[&str]) -> Vec<ImageUpload> {
    names
        .iter()
        .map(|n| ImageUpload::new(*n, n.as_bytes().to_vec()))
        .collect()
}
