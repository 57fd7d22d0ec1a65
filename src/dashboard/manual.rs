//! Manual production reading: compute, then publish, for today.

use anyhow::Result;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::models::{DayComputation, PublishReceipt};
use crate::oracle::OracleBackend;

/// Pending user input for today's reading (kWh).
#[derive(Debug, Clone, Default)]
pub struct ManualReadingWorkflow {
    pending: Option<f64>,
}

/// What each phase produced.
#[derive(Debug)]
pub struct ManualOutcome {
    pub date: NaiveDate,
    pub computed: Result<DayComputation>,
    /// `None` when publish was skipped because compute failed
    pub published: Option<Result<PublishReceipt>>,
}

impl ManualOutcome {
    pub fn is_success(&self) -> bool {
        self.computed.is_ok() && matches!(self.published, Some(Ok(_)))
    }
}

pub fn parse_reading(input: &str) -> Result<f64, String> {
    let trimmed = input.trim();
    let value: f64 = trimmed
        .parse()
        .map_err(|_| format!("not a number: {:?}", trimmed))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("reading must be a finite, non-negative number: {}", value));
    }
    Ok(value)
}

impl ManualReadingWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blank input clears the pending value.
    pub fn set_input(&mut self, input: &str) -> Result<(), String> {
        if input.trim().is_empty() {
            self.pending = None;
            return Ok(());
        }
        self.pending = Some(parse_reading(input)?);
        Ok(())
    }

    pub fn pending(&self) -> Option<f64> {
        self.pending
    }

    pub fn clear(&mut self) {
        self.pending = None;
    }

    /// Run both phases against `date`. Publish is only issued once compute
    /// has returned successfully.
    pub async fn execute(
        backend: &dyn OracleBackend,
        asset_id: &str,
        date: NaiveDate,
        actual_energy_kwh: f64,
    ) -> ManualOutcome {
        info!(asset_id, %date, actual_energy_kwh, "Submitting manual reading");

        let computed = backend
            .compute_day(asset_id, date, Some(actual_energy_kwh))
            .await;

        let published = match &computed {
            Ok(_) => {
                let receipt = backend.publish_day(asset_id, date).await;
                match &receipt {
                    Ok(r) => info!(asset_id, %date, verdict = %r.verdict, tx = ?r.tx_link, "Verdict published"),
                    Err(e) => warn!(asset_id, %date, error = %e, "Publish failed"),
                }
                Some(receipt)
            }
            Err(e) => {
                warn!(asset_id, %date, error = %e, "Compute failed; publish skipped");
                None
            }
        };

        ManualOutcome {
            date,
            computed,
            published,
        }
    }
}
