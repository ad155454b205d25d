pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod images;
pub mod intake;
pub mod job;
pub mod report;
pub mod scheduler;
pub mod secrets;
pub mod session;
pub mod store;

pub use config::{load_config, load_config_or_default, Config, ExportConfig, GatewayConfig};
pub use error::{ConfigError, ExportError, GatewayError, IntakeError, Result, ScoreTallyError};
pub use export::{export_csv, format_timestamp, write_export, ReportLocale};
pub use gateway::{DeadlineGateway, ExtractionGateway, GeminiGateway};
pub use images::{ImageData, ImageRef, ImageStore};
pub use job::{ExtractedRecord, ImageUpload, Job, JobState};
pub use report::{build_report, build_report_in, DisplayRow, ReportSummary};
pub use scheduler::{BatchControl, BatchHandle, BatchScheduler, BatchSummary};
pub use secrets::{resolve_secret, SecretError};
pub use session::Session;
pub use store::{JobStore, JobUpdate, Progress, StoreEvent, StoreSnapshot};
