//! CSV projection of the report.
//!
//! Only successful rows are exported, in report order, with the columns
//! Account, DateTime, Score and Note. Fields are quoted only when needed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use csv::{QuoteStyle, Terminator, WriterBuilder};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::config::ExportConfig;
use crate::error::ExportError;
use crate::report::{successful_rows, DisplayRow};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Shown instead of a timestamp that could not be read.
pub const MISSING_TIMESTAMP: &str = "N/A";

/// Language of the header row, notes and timestamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLocale {
    #[default]
    Ja,
    En,
}

impl ReportLocale {
    pub fn header(&self) -> [&'static str; 4] {
        match self {
            ReportLocale::Ja => ["アカウント", "日時", "点数", "備考"],
            ReportLocale::En => ["Account", "DateTime", "Score", "Note"],
        }
    }

    pub fn repeat_note(&self, count: usize) -> String {
        match self {
            ReportLocale::Ja => format!("{count}回出た"),
            ReportLocale::En => format!("{count} occurrences"),
        }
    }

    pub fn date_format(&self) -> &'static str {
        match self {
            ReportLocale::Ja => "%Y/%m/%d %H:%M:%S",
            ReportLocale::En => "%Y-%m-%d %H:%M:%S",
        }
    }

    pub fn default_file_name(&self) -> &'static str {
        match self {
            ReportLocale::Ja => "集計結果.csv",
            ReportLocale::En => "score_report.csv",
        }
    }
}

/// Renders a timestamp in `offset`, or [`MISSING_TIMESTAMP`].
pub fn format_timestamp(
    at: Option<DateTime<Utc>>,
    locale: ReportLocale,
    offset: FixedOffset,
) -> String {
    match at {
        Some(at) => at
            .with_timezone(&offset)
            .format(locale.date_format())
            .to_string(),
        None => MISSING_TIMESTAMP.to_string(),
    }
}

/// Whole scores print without a fractional part.
pub fn format_score(score: f64) -> String {
    if score.fract() == 0.0 && score.abs() < 1e15 {
        format!("{}", score as i64)
    } else {
        score.to_string()
    }
}

fn note(row: &DisplayRow, locale: ReportLocale) -> String {
    if row.is_repeated_account() {
        locale.repeat_note(row.duplicate_count)
    } else {
        String::new()
    }
}

/// The configured display offset, or UTC when it does not parse.
pub fn display_offset(config: &ExportConfig) -> FixedOffset {
    config.display_offset().unwrap_or_else(|| {
        warn!(
            "Invalid export.utc_offset '{}', using UTC",
            config.utc_offset
        );
        Utc.fix()
    })
}

/// Renders the CSV document, including the byte-order mark when enabled.
pub fn export_csv(rows: &[DisplayRow], config: &ExportConfig) -> Result<Vec<u8>, ExportError> {
    let locale = config.locale;
    let offset = display_offset(config);

    let mut buf = Vec::new();
    if config.bom {
        buf.extend_from_slice(UTF8_BOM);
    }

    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Necessary)
        .terminator(Terminator::Any(b'\n'))
        .from_writer(buf);

    writer.write_record(locale.header())?;
    for row in successful_rows(rows) {
        let time = match row.occurred_at {
            Some(_) => format_timestamp(row.occurred_at, locale, offset),
            None => String::new(),
        };
        writer.write_record([
            row.account.as_str(),
            time.as_str(),
            format_score(row.score).as_str(),
            note(row, locale).as_str(),
        ])?;
    }

    writer
        .into_inner()
        .map_err(|e| ExportError::Csv(e.into_error().into()))
}

/// Writes the export into `dir` under the configured file name.
pub fn write_export(
    rows: &[DisplayRow],
    config: &ExportConfig,
    dir: &Path,
) -> Result<PathBuf, ExportError> {
    let bytes = export_csv(rows, config)?;
    let path = dir.join(config.file_name());
    fs::write(&path, bytes).map_err(|e| ExportError::WriteFile {
        path: path.clone(),
        source: e,
    })?;
    info!("Exported report to {}", path.display());
    Ok(path)
}
