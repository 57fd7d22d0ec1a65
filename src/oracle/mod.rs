//! Oracle service collaborators.
//!
//! The dashboard core only talks to the oracle through the two traits here:
//! request/response pulls and writes (`OracleBackend`) and the per-asset push
//! channel (`LiveFeed`). Production implementations are the REST client and
//! the WebSocket feed; tests substitute in-process fakes.

pub mod live_ws; // Per-asset WebSocket live channel
pub mod rest; // REST client for pulls and writes

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;

use crate::models::{Asset, AssetDraft, AuditReport, DayComputation, OracleStatus, PublishReceipt};

pub use live_ws::{parse_live_message, LiveChannelHandle, SampleSink, WsLiveFeed, ORACLE_UPDATE_KIND};
pub use rest::OracleRestClient;

#[async_trait]
pub trait OracleBackend: Send + Sync {
    async fn list_assets(&self) -> Result<Vec<Asset>>;

    async fn create_asset(&self, draft: &AssetDraft) -> Result<Asset>;

    async fn fetch_audit_log(&self, asset_id: &str) -> Result<AuditReport>;

    /// Compute and store one day. Without `actual_energy_kwh` the oracle derives
    /// the reading from the asset profile.
    async fn compute_day(
        &self,
        asset_id: &str,
        date: NaiveDate,
        actual_energy_kwh: Option<f64>,
    ) -> Result<DayComputation>;

    async fn publish_day(&self, asset_id: &str, date: NaiveDate) -> Result<PublishReceipt>;

    async fn health(&self) -> Result<OracleStatus>;
}

#[async_trait]
pub trait LiveFeed: Send + Sync {
    /// Open a channel subscribed to `asset_id`, delivering matching samples to `sink`.
    async fn open(&self, asset_id: &str, sink: SampleSink) -> Result<LiveChannelHandle>;
}
