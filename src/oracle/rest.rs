//! Oracle REST API Client
//!
//! Pulls (asset list, audit history) and writes (create, compute, publish).
//! Every non-2xx answer is turned into an error carrying status and body, so
//! backend rejections such as a duplicate bond id reach the user verbatim.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::DashboardConfig;
use crate::models::{Asset, AssetDraft, AuditReport, DayComputation, OracleStatus, PublishReceipt};
use crate::oracle::OracleBackend;

#[derive(Clone)]
pub struct OracleRestClient {
    client: Client,
    base_url: String,
}

impl OracleRestClient {
    pub fn new(config: &DashboardConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(4)
            .build()
            .context("Failed to build OracleRestClient")?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    #[inline]
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn list_assets(&self) -> Result<Vec<Asset>> {
        let resp = self
            .client
            .get(self.url("/api/v1/bonds"))
            .send()
            .await
            .context("GET /api/v1/bonds failed")?;

        parse_json(resp, "GET /api/v1/bonds").await
    }

    pub async fn create_asset(&self, draft: &AssetDraft) -> Result<Asset> {
        let resp = self
            .client
            .post(self.url("/api/v1/bonds"))
            .json(draft)
            .send()
            .await
            .context("POST /api/v1/bonds failed")?;

        parse_json(resp, "POST /api/v1/bonds").await
    }

    pub async fn fetch_audit_log(&self, asset_id: &str) -> Result<AuditReport> {
        let path = format!("/oracle/audit/{}", asset_id);
        let resp = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        parse_json(resp, &path).await
    }

    pub async fn compute_day(
        &self,
        asset_id: &str,
        date: NaiveDate,
        actual_energy_kwh: Option<f64>,
    ) -> Result<DayComputation> {
        let path = format!("/oracle/pr/{}/{}", asset_id, date.format("%Y-%m-%d"));
        let mut req = self.client.get(self.url(&path));
        if let Some(kwh) = actual_energy_kwh {
            req = req.query(&[("actual_energy", kwh.to_string())]);
        }

        debug!(asset_id, %date, ?actual_energy_kwh, "compute day");
        let resp = req
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        parse_json(resp, &path).await
    }

    pub async fn publish_day(&self, asset_id: &str, date: NaiveDate) -> Result<PublishReceipt> {
        let path = format!("/oracle/publish/{}/{}", asset_id, date.format("%Y-%m-%d"));
        let resp = self
            .client
            .post(self.url(&path))
            .send()
            .await
            .with_context(|| format!("POST {} failed", path))?;

        parse_json(resp, &path).await
    }

    /// Penalty report for an asset. The shape is owned by the oracle, so it is
    /// handed back untouched.
    pub async fn penalty_summary(&self, asset_id: &str) -> Result<serde_json::Value> {
        let path = format!("/oracle/penalty-summary/{}", asset_id);
        let resp = self
            .client
            .get(self.url(&path))
            .send()
            .await
            .with_context(|| format!("GET {} failed", path))?;

        parse_json(resp, &path).await
    }

    pub async fn health(&self) -> Result<OracleStatus> {
        let resp = self
            .client
            .get(self.url("/"))
            .send()
            .await
            .context("GET / failed")?;

        parse_json(resp, "GET /").await
    }
}

async fn parse_json<T: DeserializeOwned>(resp: Response, what: &str) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow::anyhow!("{} {}: {}", what, status, text));
    }

    resp.json::<T>()
        .await
        .with_context(|| format!("Failed to parse {} response", what))
}

#[async_trait]
impl OracleBackend for OracleRestClient {
    async fn list_assets(&self) -> Result<Vec<Asset>> {
        OracleRestClient::list_assets(self).await
    }

    async fn create_asset(&self, draft: &AssetDraft) -> Result<Asset> {
        OracleRestClient::create_asset(self, draft).await
    }

    async fn fetch_audit_log(&self, asset_id: &str) -> Result<AuditReport> {
        OracleRestClient::fetch_audit_log(self, asset_id).await
    }

    async fn compute_day(
        &self,
        asset_id: &str,
        date: NaiveDate,
        actual_energy_kwh: Option<f64>,
    ) -> Result<DayComputation> {
        OracleRestClient::compute_day(self, asset_id, date, actual_energy_kwh).await
    }

    async fn publish_day(&self, asset_id: &str, date: NaiveDate) -> Result<PublishReceipt> {
        OracleRestClient::publish_day(self, asset_id, date).await
    }

    async fn health(&self) -> Result<OracleStatus> {
        OracleRestClient::health(self).await
    }
}
