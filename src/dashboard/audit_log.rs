//! Historical audit record for the active asset.
//!
//! Every pull replaces the contents wholesale. Entries are kept ascending by
//! calendar date and unique by date; a failed pull leaves the store empty.
//! Pulls carry the sequence number they were issued with; one that lands
//! after a later pull has been applied is dropped.

use std::collections::BTreeMap;

use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{AuditEntry, AuditReport, Verdict};

#[derive(Debug, Clone, Default)]
pub struct AuditLogRepository {
    entries: Vec<AuditEntry>,
    issued: u64,
    applied: u64,
}

/// Totals over the current log, matching the oracle's report fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AuditSummary {
    pub total_days: usize,
    pub average_pr: f64,
    pub compliant_days: usize,
    pub penalty_days: usize,
    pub unpublished_days: usize,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
}

impl AuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number the next pull.
    pub fn begin_pull(&mut self) -> u64 {
        self.issued += 1;
        self.issued
    }

    /// Apply pull `seq` unless a later one has already been applied.
    pub fn apply_pull_seq(&mut self, seq: u64, pulled: Result<AuditReport>) -> bool {
        if seq <= self.applied {
            return false;
        }
        self.applied = seq;
        self.apply_pull(pulled);
        true
    }

    /// Apply the outcome of a pull. Errors empty the store.
    pub fn apply_pull(&mut self, pulled: Result<AuditReport>) {
        match pulled {
            Ok(report) => self.replace(report.audit_log),
            Err(_) => self.clear(),
        }
    }

    /// Replace contents, sort by date and keep the last entry seen per date.
    pub fn replace(&mut self, entries: Vec<AuditEntry>) {
        let mut by_date: BTreeMap<NaiveDate, AuditEntry> = BTreeMap::new();
        for entry in entries {
            by_date.insert(entry.date, entry);
        }
        self.entries = by_date.into_values().collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Ascending by date.
    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, date: NaiveDate) -> Option<&AuditEntry> {
        self.entries
            .binary_search_by_key(&date, |e| e.date)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Newest first, at most `n` entries.
    pub fn recent(&self, n: usize) -> Vec<AuditEntry> {
        self.entries.iter().rev().take(n).cloned().collect()
    }

    pub fn summary(&self) -> AuditSummary {
        if self.entries.is_empty() {
            return AuditSummary::default();
        }

        let mut summary = AuditSummary {
            total_days: self.entries.len(),
            first_date: self.entries.first().map(|e| e.date),
            last_date: self.entries.last().map(|e| e.date),
            ..Default::default()
        };

        let mut pr_sum = 0.0;
        for entry in &self.entries {
            pr_sum += entry.performance_ratio;
            match entry.verdict {
                Verdict::Compliant => summary.compliant_days += 1,
                Verdict::Penalty => summary.penalty_days += 1,
                Verdict::Unpublished => summary.unpublished_days += 1,
            }
        }
        summary.average_pr = ((pr_sum / self.entries.len() as f64) * 100.0).round() / 100.0;
        summary
    }
}
