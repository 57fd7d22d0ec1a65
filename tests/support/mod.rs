//! In-process fakes for the oracle collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate};
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use solar_bond_monitor::dashboard::Clock;
use solar_bond_monitor::models::{
    Asset, AssetDraft, AuditEntry, AuditReport, DayComputation, OracleStatus, PublishReceipt, Verdict,
};
use solar_bond_monitor::oracle::{parse_live_message, LiveChannelHandle, LiveFeed, OracleBackend, SampleSink};
use solar_bond_monitor::{Dashboard, DashboardConfig};

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 18).unwrap()
}

pub fn fixed_clock() -> Clock {
    Arc::new(today)
}

pub fn asset(id: &str) -> Asset {
    Asset {
        bond_id: id.to_string(),
        name: format!("Solar {}", id),
        lat: 12.97,
        lon: 77.59,
        capacity_kw: 100.0,
        threshold: 75.0,
        base_interest_rate: 5.5,
        contract_address: Some("0x78efd50b1607a9b0a350849202111e6ac7255d50".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    ListAssets,
    CreateAsset(String),
    FetchAudit(String),
    ComputeStart(String, NaiveDate, Option<f64>),
    ComputeEnd(String, NaiveDate),
    Publish(String, NaiveDate),
}

/// Parks one request until released. Used once, then removed.
pub struct Gate {
    pub key: String,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gate {
    fn new(key: &str) -> (Self, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let gate = Self {
            key: key.to_string(),
            started: started.clone(),
            release: release.clone(),
        };
        (gate, started, release)
    }

    /// Take the gate out of `slot` if it is set for `key`.
    fn claim(slot: &Mutex<Option<Gate>>, key: &str) -> Option<Gate> {
        let mut slot = slot.lock();
        if slot.as_ref().is_some_and(|g| g.key == key) {
            slot.take()
        } else {
            None
        }
    }

    async fn pass(gate: Option<Gate>) {
        match gate {
            Some(gate) => {
                gate.started.notify_one();
                gate.release.notified().await;
            }
            None => tokio::task::yield_now().await,
        }
    }
}

#[derive(Default)]
pub struct FakeOracle {
    assets: Mutex<Vec<Asset>>,
    history: Mutex<HashMap<String, BTreeMap<NaiveDate, AuditEntry>>>,
    raw_history: Mutex<HashMap<String, Vec<AuditEntry>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    compute_delay: Mutex<Duration>,
    fail_compute_on: Mutex<Option<NaiveDate>>,
    fail_compute_all: AtomicBool,
    fail_publish: AtomicBool,
    fail_list: AtomicBool,
    failing_audit: Mutex<Vec<String>>,
    audit_gate: Mutex<Option<Gate>>,
    list_gate: Mutex<Option<Gate>>,
    tx_counter: AtomicUsize,
}

impl FakeOracle {
    pub fn with_assets(ids: &[&str]) -> Arc<Self> {
        let oracle = Self::default();
        *oracle.assets.lock() = ids.iter().map(|id| asset(id)).collect();
        Arc::new(oracle)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn computed_dates(&self) -> Vec<NaiveDate> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                Call::ComputeStart(_, date, _) => Some(*date),
                _ => None,
            })
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn set_compute_delay(&self, delay: Duration) {
        *self.compute_delay.lock() = delay;
    }

    pub fn fail_compute_on(&self, date: NaiveDate) {
        *self.fail_compute_on.lock() = Some(date);
    }

    pub fn fail_all_computes(&self) {
        self.fail_compute_all.store(true, Ordering::SeqCst);
    }

    pub fn fail_publish(&self) {
        self.fail_publish.store(true, Ordering::SeqCst);
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_audit_for(&self, asset_id: &str) {
        self.failing_audit.lock().push(asset_id.to_string());
    }

    /// Serve this log verbatim (unsorted, duplicates allowed) for `asset_id`.
    pub fn set_raw_history(&self, asset_id: &str, entries: Vec<AuditEntry>) {
        self.raw_history.lock().insert(asset_id.to_string(), entries);
    }

    pub fn set_rate(&self, asset_id: &str, rate: f64) {
        if let Some(a) = self.assets.lock().iter_mut().find(|a| a.bond_id == asset_id) {
            a.base_interest_rate = rate;
        }
    }

    pub fn remove_asset(&self, asset_id: &str) {
        self.assets.lock().retain(|a| a.bond_id != asset_id);
    }

    /// Park the next audit pull for `asset_id`. Its response is taken before parking.
    pub fn gate_audit(&self, asset_id: &str) -> (Arc<Notify>, Arc<Notify>) {
        let (gate, started, release) = Gate::new(asset_id);
        *self.audit_gate.lock() = Some(gate);
        (started, release)
    }

    /// Park the next asset-list pull. Its response is taken before parking.
    pub fn gate_list(&self) -> (Arc<Notify>, Arc<Notify>) {
        let (gate, started, release) = Gate::new("");
        *self.list_gate.lock() = Some(gate);
        (started, release)
    }

    fn audit_snapshot(&self, asset_id: &str) -> Result<AuditReport> {
        if self.failing_audit.lock().iter().any(|id| id == asset_id) {
            anyhow::bail!("GET /oracle/audit/{} failed: connection reset", asset_id);
        }

        let audit_log = match self.raw_history.lock().get(asset_id) {
            Some(raw) => raw.clone(),
            None => self
                .history
                .lock()
                .get(asset_id)
                .map(|days| days.values().cloned().collect())
                .unwrap_or_default(),
        };

        Ok(AuditReport {
            bond_id: Some(asset_id.to_string()),
            total_days: Some(audit_log.len()),
            audit_log,
            ..Default::default()
        })
    }

    fn threshold_of(&self, asset_id: &str) -> Option<f64> {
        self.assets
            .lock()
            .iter()
            .find(|a| a.bond_id == asset_id)
            .map(|a| a.threshold)
    }
}

#[async_trait]
impl OracleBackend for FakeOracle {
    async fn list_assets(&self) -> Result<Vec<Asset>> {
        self.calls.lock().push(Call::ListAssets);
        let response = if self.fail_list.load(Ordering::SeqCst) {
            Err(anyhow::anyhow!("GET /api/v1/bonds 503 Service Unavailable: down"))
        } else {
            Ok(self.assets.lock().clone())
        };
        Gate::pass(Gate::claim(&self.list_gate, "")).await;
        response
    }

    async fn create_asset(&self, draft: &AssetDraft) -> Result<Asset> {
        let mut assets = self.assets.lock();
        let bond_id = draft
            .bond_id
            .clone()
            .unwrap_or_else(|| format!("BOND_{}", assets.len() + 1));
        self.calls.lock().push(Call::CreateAsset(bond_id.clone()));

        if assets.iter().any(|a| a.bond_id == bond_id) {
            anyhow::bail!("POST /api/v1/bonds 400 Bad Request: {{\"detail\":\"Bond ID already exists\"}}");
        }

        let created = Asset {
            bond_id,
            name: draft.name.clone(),
            lat: draft.lat,
            lon: draft.lon,
            capacity_kw: draft.capacity_kw,
            threshold: draft.threshold,
            base_interest_rate: draft.base_interest_rate,
            contract_address: draft.contract_address.clone(),
        };
        assets.push(created.clone());
        Ok(created)
    }

    async fn fetch_audit_log(&self, asset_id: &str) -> Result<AuditReport> {
        self.calls.lock().push(Call::FetchAudit(asset_id.to_string()));
        let response = self.audit_snapshot(asset_id);
        Gate::pass(Gate::claim(&self.audit_gate, asset_id)).await;
        response
    }

    async fn compute_day(
        &self,
        asset_id: &str,
        date: NaiveDate,
        actual_energy_kwh: Option<f64>,
    ) -> Result<DayComputation> {
        self.calls
            .lock()
            .push(Call::ComputeStart(asset_id.to_string(), date, actual_energy_kwh));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.compute_delay.lock();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().push(Call::ComputeEnd(asset_id.to_string(), date));

        if self.fail_compute_all.load(Ordering::SeqCst) || *self.fail_compute_on.lock() == Some(date) {
            anyhow::bail!("GET /oracle/pr/{}/{} 404 Not Found: No production data", asset_id, date);
        }

        let pr = actual_energy_kwh.unwrap_or(70.0 + f64::from(date.day() % 10));
        self.history.lock().entry(asset_id.to_string()).or_default().insert(
            date,
            AuditEntry {
                date,
                performance_ratio: pr,
                verdict: Verdict::Unpublished,
                tx_link: None,
            },
        );

        Ok(DayComputation {
            bond_id: Some(asset_id.to_string()),
            date: Some(date),
            performance_ratio: Some(pr),
            ..Default::default()
        })
    }

    async fn publish_day(&self, asset_id: &str, date: NaiveDate) -> Result<PublishReceipt> {
        self.calls.lock().push(Call::Publish(asset_id.to_string(), date));
        tokio::task::yield_now().await;

        if self.fail_publish.load(Ordering::SeqCst) {
            anyhow::bail!("POST /oracle/publish/{}/{} 502 Bad Gateway: rpc down", asset_id, date);
        }

        let threshold = self.threshold_of(asset_id).unwrap_or(75.0);
        let mut history = self.history.lock();
        let Some(entry) = history.get_mut(asset_id).and_then(|days| days.get_mut(&date)) else {
            anyhow::bail!("POST /oracle/publish/{}/{} 404 Not Found: nothing computed", asset_id, date);
        };

        entry.verdict = if entry.performance_ratio >= threshold {
            Verdict::Compliant
        } else {
            Verdict::Penalty
        };
        let n = self.tx_counter.fetch_add(1, Ordering::SeqCst);
        entry.tx_link = Some(format!("0x{:064x}", n + 1));
        let receipt = PublishReceipt {
            verdict: entry.verdict,
            performance_ratio: Some(entry.performance_ratio),
            tx_link: entry.tx_link.clone(),
        };
        drop(history);

        // Penalties raise the coupon, as the oracle does.
        if receipt.verdict == Verdict::Penalty {
            if let Some(a) = self.assets.lock().iter_mut().find(|a| a.bond_id == asset_id) {
                a.base_interest_rate += 0.25;
            }
        }
        Ok(receipt)
    }

    async fn health(&self) -> Result<OracleStatus> {
        Ok(OracleStatus {
            status: "OracleX Backend Running".to_string(),
        })
    }
}

/// Channel registry: each open channel gets a sender the test can push frames into.
#[derive(Default)]
pub struct FakeFeed {
    senders: Mutex<HashMap<String, mpsc::UnboundedSender<String>>>,
    opens: Mutex<Vec<String>>,
    open_now: Arc<AtomicUsize>,
    max_open: Arc<AtomicUsize>,
    refuse: Mutex<Vec<String>>,
    open_gate: Mutex<Option<Gate>>,
}

struct OpenGuard(Arc<AtomicUsize>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Sender of the most recent channel opened for `asset_id`.
    pub fn sender(&self, asset_id: &str) -> Option<mpsc::UnboundedSender<String>> {
        self.senders.lock().get(asset_id).cloned()
    }

    pub fn push(&self, asset_id: &str, frame: &str) -> bool {
        match self.sender(asset_id) {
            Some(tx) => tx.send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn opens(&self) -> Vec<String> {
        self.opens.lock().clone()
    }

    pub fn open_now(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    pub fn max_open(&self) -> usize {
        self.max_open.load(Ordering::SeqCst)
    }

    /// Park the next `open` for `asset_id` before it connects.
    pub fn gate_open(&self, asset_id: &str) -> (Arc<Notify>, Arc<Notify>) {
        let (gate, started, release) = Gate::new(asset_id);
        *self.open_gate.lock() = Some(gate);
        (started, release)
    }

    pub fn refuse(&self, asset_id: &str) {
        self.refuse.lock().push(asset_id.to_string());
    }
}

#[async_trait]
impl LiveFeed for FakeFeed {
    async fn open(&self, asset_id: &str, sink: SampleSink) -> Result<LiveChannelHandle> {
        if let Some(gate) = Gate::claim(&self.open_gate, asset_id) {
            Gate::pass(Some(gate)).await;
        }
        if self.refuse.lock().iter().any(|id| id == asset_id) {
            anyhow::bail!("connection refused");
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        self.senders.lock().insert(asset_id.to_string(), tx);
        self.opens.lock().push(asset_id.to_string());

        let now = self.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
        let guard = OpenGuard(self.open_now.clone());

        Ok(LiveChannelHandle::spawn(asset_id, Duration::from_secs(1), move |mut shutdown| async move {
            let _guard = guard;
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    frame = rx.recv() => {
                        let Some(frame) = frame else { break };
                        if let Some(sample) = parse_live_message(&frame) {
                            sink(sample);
                        }
                    }
                }
            }
        }))
    }
}

pub fn dashboard(oracle: &Arc<FakeOracle>, feed: &Arc<FakeFeed>) -> Arc<Dashboard> {
    let config = DashboardConfig::default();
    Arc::new(Dashboard::new(oracle.clone(), feed.clone(), &config).with_clock(fixed_clock()))
}

pub fn update_frame(pr: f64) -> String {
    format!(r#"{{"type":"ORACLE_UPDATE","data":{{"performance_ratio":{}}}}}"#, pr)
}

/// Poll `cond` until it holds or a second passes.
pub async fn wait_for(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
