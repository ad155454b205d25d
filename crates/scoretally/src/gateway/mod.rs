//! Extraction gateway: turns one screenshot into zero or more records.

pub mod gemini;
pub mod parse;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::images::ImageData;
use crate::job::ExtractedRecord;

pub use gemini::GeminiGateway;
pub use parse::{parse_extraction_response, strip_code_fence, UNKNOWN_ACCOUNT};

/// Default deadline for a single extraction call.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[async_trait]
pub trait ExtractionGateway: Send + Sync {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError>;
}

#[async_trait]
impl<G: ExtractionGateway + ?Sized> ExtractionGateway for Arc<G> {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError> {
        (**self).extract(image).await
    }
}

/// Wraps a gateway so every call fails with [`GatewayError::Timeout`] once
/// the deadline passes.
pub struct DeadlineGateway<G> {
    inner: G,
    deadline: Duration,
}

impl<G> DeadlineGateway<G> {
    pub fn new(inner: G, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }
}

#[async_trait]
impl<G: ExtractionGateway> ExtractionGateway for DeadlineGateway<G> {
    async fn extract(&self, image: &ImageData) -> Result<Vec<ExtractedRecord>, GatewayError> {
        match tokio::time::timeout(self.deadline, self.inner.extract(image)).await {
            Ok(result) => result,
            Err(_) => {
                log::warn!(
                    "Extraction of {} exceeded {:?}",
                    image.file_name,
                    self.deadline
                );
                Err(GatewayError::Timeout)
            }
        }
    }
}
