//! Financial report lookups used for prompt building.
//!
//! The coordinator consumes reports through the [`ReportStore`] trait so the
//! backing store (document database, filesystem, fixture data in tests) stays
//! swappable. [`InMemoryReportStore`] ships for tests and small deployments.

use async_trait::async_trait;
use std::sync::RwLock;

/// Separator between individual reports in the combined text handed to the
/// prompt builder.
const REPORT_SEPARATOR: &str = "\n\n---\n\n";

/// Read side of a financial report store.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Combined report text for the symbol, or `None` when nothing matches.
    /// `period` narrows the lookup (e.g. `"annual"`, `"Q1 2026"`) when given.
    async fn report_content(&self, symbol: &str, period: Option<&str>) -> Option<String>;
}

struct StoredReport {
    symbol: String,
    period: String,
    content: String,
}

/// Simple in-memory [`ReportStore`], newest insertions first.
#[derive(Default)]
pub struct InMemoryReportStore {
    reports: RwLock<Vec<StoredReport>>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a report. Later insertions surface before earlier ones in the
    /// combined content.
    pub fn insert(
        &self,
        symbol: impl Into<String>,
        period: impl Into<String>,
        content: impl Into<String>,
    ) {
        let mut reports = self.reports.write().unwrap();
        reports.insert(
            0,
            StoredReport {
                symbol: symbol.into(),
                period: period.into(),
                content: content.into(),
            },
        );
    }
}

#[async_trait]
impl ReportStore for InMemoryReportStore {
    async fn report_content(&self, symbol: &str, period: Option<&str>) -> Option<String> {
        let reports = self.reports.read().unwrap();
        let matching: Vec<&StoredReport> = reports
            .iter()
            .filter(|report| report.symbol.eq_ignore_ascii_case(symbol))
            .filter(|report| match period {
                Some(period) => report.period.eq_ignore_ascii_case(period),
                None => true,
            })
            .collect();
        if matching.is_empty() {
            return None;
        }
        Some(
            matching
                .iter()
                .map(|report| report.content.as_str())
                .collect::<Vec<_>>()
                .join(REPORT_SEPARATOR),
        )
    }
}
