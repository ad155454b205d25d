//! Aggregation of jobs into an ordered, annotated report.
//!
//! [`build_report`] is a pure function of the current jobs: it flattens them
//! into rows, counts repeated accounts among successful rows and sorts the
//! result (successful rows first, then by ascending timestamp, stable).

use std::collections::HashMap;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use serde::Serialize;

use crate::images::ImageRef;
use crate::job::{Job, JobState};

/// Account shown on rows that stand for a whole job rather than a record.
pub const PLACEHOLDER_ACCOUNT: &str = "-";

const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

/// One line of the report. Identity is `(job_id, index)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayRow {
    pub job_id: String,
    /// Position of the record within its job; 0 for placeholder rows.
    pub index: usize,
    pub source_name: String,
    pub image: ImageRef,
    pub account: String,
    /// `None` when the timestamp was missing or unreadable.
    pub occurred_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
    /// Number of successful rows sharing this account; 0 when not counted.
    pub duplicate_count: usize,
    pub placeholder: bool,
}

impl DisplayRow {
    pub fn row_id(&self) -> String {
        format!("{}-{}", self.job_id, self.index)
    }

    pub fn is_success(&self) -> bool {
        self.state == JobState::Success
    }

    /// Milliseconds since the epoch. Unknown and pre-epoch timestamps are 0.
    pub fn sort_key(&self) -> i64 {
        self.occurred_at.map_or(0, |t| t.timestamp_millis().max(0))
    }

    /// Only accounts seen more than once are flagged.
    pub fn is_repeated_account(&self) -> bool {
        self.duplicate_count > 1
    }

    fn placeholder(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            index: 0,
            source_name: job.source_name.clone(),
            image: job.image.clone(),
            account: PLACEHOLDER_ACCOUNT.to_string(),
            occurred_at: None,
            score: 0.0,
            state: job.state,
            error_detail: job.error_detail.clone(),
            duplicate_count: 0,
            placeholder: true,
        }
    }
}

/// Parses a gateway timestamp. Unparseable values and the epoch itself map to
/// `None`. Timestamps without an offset are wall-clock times in `local`.
pub fn normalize_timestamp(raw: &str, local: FixedOffset) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let parsed = match DateTime::parse_from_rfc3339(raw) {
        Ok(dt) => dt.with_timezone(&Utc),
        Err(_) => parse_naive(raw)?
            .and_local_timezone(local)
            .single()?
            .with_timezone(&Utc),
    };

    if parsed.timestamp_millis() == 0 {
        None
    } else {
        Some(parsed)
    }
}

fn parse_naive(raw: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            DATE_FORMATS
                .iter()
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

fn flatten(jobs: &[Job], local: FixedOffset) -> Vec<DisplayRow> {
    let mut rows = Vec::with_capacity(jobs.len());
    for job in jobs {
        if job.state == JobState::Success && !job.records.is_empty() {
            rows.extend(job.records.iter().enumerate().map(|(index, record)| DisplayRow {
                job_id: job.id.clone(),
                index,
                source_name: job.source_name.clone(),
                image: job.image.clone(),
                account: record.account.clone(),
                occurred_at: normalize_timestamp(&record.time, local),
                score: record.score,
                state: JobState::Success,
                error_detail: None,
                duplicate_count: 0,
                placeholder: false,
            }));
        } else {
            rows.push(DisplayRow::placeholder(job));
        }
    }
    rows
}

fn counts_toward_duplicates(row: &DisplayRow) -> bool {
    row.is_success()
        && !row.placeholder
        && !row.account.is_empty()
        && row.account != PLACEHOLDER_ACCOUNT
}

/// Builds the report with offset-less timestamps read as UTC.
pub fn build_report(jobs: &[Job]) -> Vec<DisplayRow> {
    build_report_in(jobs, Utc.fix())
}

/// Builds the report with offset-less timestamps read in `local`.
pub fn build_report_in(jobs: &[Job], local: FixedOffset) -> Vec<DisplayRow> {
    let mut rows = flatten(jobs, local);

    let mut counts: HashMap<String, usize> = HashMap::new();
    for row in rows.iter().filter(|r| counts_toward_duplicates(r)) {
        *counts.entry(row.account.clone()).or_default() += 1;
    }
    for row in rows.iter_mut() {
        if counts_toward_duplicates(row) {
            row.duplicate_count = counts.get(&row.account).copied().unwrap_or(0);
        }
    }

    // Stable: ties keep insertion order.
    rows.sort_by_key(|r| (!r.is_success(), r.sort_key()));
    rows
}

/// Successful rows in report order; these are the rows that get exported.
pub fn successful_rows(rows: &[DisplayRow]) -> impl Iterator<Item = &DisplayRow> {
    rows.iter().filter(|r| r.is_success())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub rows: usize,
    pub successful: usize,
    pub failed: usize,
    pub in_progress: usize,
}

pub fn summarize(rows: &[DisplayRow]) -> ReportSummary {
    rows.iter().fold(ReportSummary::default(), |mut acc, row| {
        acc.rows += 1;
        match row.state {
            JobState::Success => acc.successful += 1,
            JobState::Error => acc.failed += 1,
            JobState::Pending | JobState::Processing => acc.in_progress += 1,
        }
        acc
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ExtractedRecord;
    use chrono::TimeZone;

    fn job(name: &str) -> Job {
        Job::new(name, ImageRef::from(name))
    }

    fn succeeded(name: &str, records: Vec<ExtractedRecord>) -> Job {
        let mut job = job(name);
        job.start().unwrap();
        job.succeed(records).unwrap();
        job
    }

    fn failed(name: &str, error: &str) -> Job {
        let mut job = job(name);
        job.start().unwrap();
        job.fail(error).unwrap();
        job
    }

    #[test]
    fn test_normalize_timestamp() {
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(normalize_timestamp("2024-01-01T10:00:00", Utc.fix()), Some(expected));
        assert_eq!(normalize_timestamp("2024-01-01T10:00:00Z", Utc.fix()), Some(expected));
        assert_eq!(
            normalize_timestamp("2024-01-01T19:00:00+09:00", Utc.fix()),
            Some(expected)
        );
        assert_eq!(normalize_timestamp("2024/01/01 10:00:00", Utc.fix()), Some(expected));
        assert_eq!(
            normalize_timestamp("2024-01-01", Utc.fix()),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_normalize_unreadable() {
        assert_eq!(normalize_timestamp("", Utc.fix()), None);
        assert_eq!(normalize_timestamp("Unknown", Utc.fix()), None);
        assert_eq!(normalize_timestamp("2024-13-45T99:00:00", Utc.fix()), None);
        assert_eq!(normalize_timestamp("1970-01-01T00:00:00Z", Utc.fix()), None);
    }

    #[test]
    fn test_naive_timestamp_read_in_local_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        assert_eq!(normalize_timestamp("2024-01-01T10:00:00", tokyo), Some(expected));
        assert_eq!(normalize_timestamp("2024/01/01 10:00:00", tokyo), Some(expected));
        assert_eq!(
            normalize_timestamp("2024-01-01", tokyo),
            Some(Utc.with_ymd_and_hms(2023, 12, 31, 15, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_explicit_zone_ignores_local_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        assert_eq!(normalize_timestamp("2024-01-01T10:00:00Z", tokyo), Some(expected));
        assert_eq!(
            normalize_timestamp("2024-01-01T05:00:00-05:00", tokyo),
            Some(expected)
        );
    }

    #[test]
    fn test_build_report_in_offset() {
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        let jobs = vec![succeeded(
            "a.png",
            vec![ExtractedRecord::new("A", "2024-01-01T10:00:00", 5.0)],
        )];
        let rows = build_report_in(&jobs, tokyo);
        assert_eq!(
            rows[0].occurred_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap())
        );
        assert_eq!(
            rows[0].occurred_at.map(|t| t.with_timezone(&tokyo).naive_local()),
            NaiveDateTime::parse_from_str("2024-01-01 10:00:00", "%Y-%m-%d %H:%M:%S").ok()
        );
    }

    #[test]
    fn test_pre_epoch_sorts_with_unknown() {
        let jobs = vec![
            succeeded("a.png", vec![ExtractedRecord::new("late", "2024-01-01T00:00:00", 1.0)]),
            succeeded("b.png", vec![ExtractedRecord::new("undated", "", 1.0)]),
            succeeded("c.png", vec![ExtractedRecord::new("old", "1900-01-01T00:00:00", 1.0)]),
        ];
        let rows = build_report(&jobs);
        assert!(rows[1].occurred_at.is_some());
        assert_eq!(rows[1].sort_key(), 0);
        let order: Vec<_> = rows.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(order, vec!["undated", "old", "late"]);
    }

    #[test]
    fn test_empty_jobs() {
        assert!(build_report(&[]).is_empty());
    }

    #[test]
    fn test_success_without_records_is_one_placeholder() {
        let rows = build_report(&[succeeded("empty.png", vec![])]);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].placeholder);
        assert_eq!(rows[0].account, PLACEHOLDER_ACCOUNT);
        assert_eq!(rows[0].score, 0.0);
        assert_eq!(rows[0].state, JobState::Success);
        assert_eq!(rows[0].duplicate_count, 0);
    }

    #[test]
    fn test_one_row_per_record_in_order() {
        let job = succeeded(
            "list.png",
            vec![
                ExtractedRecord::new("A", "", 1.0),
                ExtractedRecord::new("B", "", 2.0),
                ExtractedRecord::new("C", "", 3.0),
            ],
        );
        let rows = build_report(&[job.clone()]);
        assert_eq!(rows.len(), 3);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row.index, i);
            assert_eq!(row.job_id, job.id);
            assert_eq!(row.row_id(), format!("{}-{}", job.id, i));
        }
        let accounts: Vec<_> = rows.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(accounts, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_pending_and_processing_render_as_placeholders() {
        let pending = job("wait.png");
        let mut processing = job("busy.png");
        processing.start().unwrap();

        let rows = build_report(&[pending, processing]);
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.placeholder && !r.is_success()));
        assert_eq!(rows[0].state, JobState::Pending);
        assert_eq!(rows[1].state, JobState::Processing);
    }

    #[test]
    fn test_duplicate_counts() {
        let jobs = vec![
            succeeded(
                "1.png",
                vec![
                    ExtractedRecord::new("Taro", "2024-01-01T10:00:00", 1.0),
                    ExtractedRecord::new("Hanako", "2024-01-01T11:00:00", 2.0),
                ],
            ),
            succeeded("2.png", vec![ExtractedRecord::new("Taro", "", 3.0)]),
            succeeded("3.png", vec![ExtractedRecord::new("Taro", "", 4.0)]),
            succeeded("4.png", vec![]),
            failed("5.png", "boom"),
        ];
        let rows = build_report(&jobs);

        for row in rows.iter().filter(|r| r.account == "Taro") {
            assert_eq!(row.duplicate_count, 3);
            assert!(row.is_repeated_account());
        }
        let hanako = rows.iter().find(|r| r.account == "Hanako").unwrap();
        assert_eq!(hanako.duplicate_count, 1);
        assert!(!hanako.is_repeated_account());

        for row in rows.iter().filter(|r| r.placeholder) {
            assert_eq!(row.duplicate_count, 0);
        }
    }

    #[test]
    fn test_empty_account_not_counted() {
        let rows = build_report(&[succeeded(
            "1.png",
            vec![
                ExtractedRecord::new("", "", 1.0),
                ExtractedRecord::new("", "", 2.0),
                ExtractedRecord::new("-", "", 3.0),
            ],
        )]);
        assert!(rows.iter().all(|r| r.duplicate_count == 0));
    }

    #[test]
    fn test_sort_success_first_then_time() {
        let jobs = vec![
            failed("err.png", "boom"),
            succeeded(
                "late.png",
                vec![ExtractedRecord::new("L", "2024-03-01T00:00:00", 1.0)],
            ),
            succeeded(
                "early.png",
                vec![ExtractedRecord::new("E", "2024-01-01T00:00:00", 1.0)],
            ),
            succeeded("undated.png", vec![ExtractedRecord::new("U", "n/a", 1.0)]),
        ];
        let rows = build_report(&jobs);
        let order: Vec<_> = rows.iter().map(|r| r.source_name.as_str()).collect();
        assert_eq!(order, vec!["undated.png", "early.png", "late.png", "err.png"]);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let jobs: Vec<Job> = (0..5)
            .map(|i| {
                succeeded(
                    &format!("{i}.png"),
                    vec![ExtractedRecord::new(format!("p{i}"), "2024-01-01T00:00:00", 1.0)],
                )
            })
            .collect();
        let rows = build_report(&jobs);
        let order: Vec<_> = rows.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(order, vec!["p0", "p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn test_report_is_idempotent() {
        let jobs = vec![
            succeeded("a.png", vec![ExtractedRecord::new("A", "2024-02-01T00:00:00", 1.0)]),
            job("pending.png"),
            succeeded("b.png", vec![ExtractedRecord::new("A", "", 2.0)]),
        ];
        assert_eq!(build_report(&jobs), build_report(&jobs));
    }

    #[test]
    fn test_summarize() {
        let jobs = vec![
            succeeded("a.png", vec![ExtractedRecord::new("A", "", 1.0)]),
            failed("b.png", "x"),
            job("c.png"),
        ];
        let summary = summarize(&build_report(&jobs));
        assert_eq!(
            summary,
            ReportSummary {
                rows: 3,
                successful: 1,
                failed: 1,
                in_progress: 1
            }
        );
        assert_eq!(successful_rows(&build_report(&jobs)).count(), 1);
    }
}
