use chrono::NaiveDate;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};

fn default_interest_rate() -> f64 {
    5.5
}

/// A monitored solar asset ("bond" on the wire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub bond_id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub capacity_kw: f64,
    /// Compliance threshold, percent
    pub threshold: f64,
    /// Dynamic rate, mutated server-side after audits
    #[serde(default = "default_interest_rate")]
    pub base_interest_rate: f64,
    #[serde(default)]
    pub contract_address: Option<String>,
}

/// Creation payload for a new asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDraft {
    /// Server assigns `BOND_<n>` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bond_id: Option<String>,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub capacity_kw: f64,
    pub threshold: f64,
    pub base_interest_rate: f64,
    pub contract_address: Option<String>,
}

impl AssetDraft {
    /// Draft with the default rate and a random contract address.
    pub fn new(name: impl Into<String>, lat: f64, lon: f64, capacity_kw: f64, threshold: f64) -> Self {
        Self {
            bond_id: None,
            name: name.into(),
            lat,
            lon,
            capacity_kw,
            threshold,
            base_interest_rate: default_interest_rate(),
            contract_address: Some(random_contract_address()),
        }
    }

    pub fn with_bond_id(mut self, bond_id: impl Into<String>) -> Self {
        self.bond_id = Some(bond_id.into());
        self
    }

    pub fn with_interest_rate(mut self, rate: f64) -> Self {
        self.base_interest_rate = rate;
        self
    }

    pub fn with_contract_address(mut self, address: impl Into<String>) -> Self {
        self.contract_address = Some(address.into());
        self
    }

    /// Reject drafts the oracle would store but never compute against.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if let Some(id) = &self.bond_id {
            if id.trim().is_empty() {
                return Err("bond_id must not be blank when supplied".to_string());
            }
        }
        if !self.capacity_kw.is_finite() || self.capacity_kw <= 0.0 {
            return Err(format!("capacity_kw must be positive, got {}", self.capacity_kw));
        }
        if !self.threshold.is_finite() || !(0.0..=100.0).contains(&self.threshold) {
            return Err(format!("threshold must be within 0..=100, got {}", self.threshold));
        }
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(format!("lat out of range: {}", self.lat));
        }
        if !self.lon.is_finite() || !(-180.0..=180.0).contains(&self.lon) {
            return Err(format!("lon out of range: {}", self.lon));
        }
        if !self.base_interest_rate.is_finite() {
            return Err("base_interest_rate must be finite".to_string());
        }
        Ok(())
    }
}

/// `0x` followed by 40 lowercase hex digits.
pub fn random_contract_address() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 20] = rng.gen();
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Compliance outcome for one day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Verdict {
    #[serde(rename = "COMPLIANT")]
    Compliant,
    #[serde(rename = "PENALTY")]
    Penalty,
    #[default]
    #[serde(rename = "UNPUBLISHED")]
    Unpublished,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Compliant => "COMPLIANT",
            Verdict::Penalty => "PENALTY",
            Verdict::Unpublished => "UNPUBLISHED",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// Anything that is not one of the two published outcomes (null, missing,
// "PENDING", ...) is treated as unpublished.
impl<'de> Deserialize<'de> for Verdict {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw.as_deref().map(str::trim) {
            Some(s) if s.eq_ignore_ascii_case("COMPLIANT") => Verdict::Compliant,
            Some(s) if s.eq_ignore_ascii_case("PENALTY") => Verdict::Penalty,
            _ => Verdict::Unpublished,
        })
    }
}

/// Push-delivered performance reading. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveSample {
    pub performance_ratio: f64,
}

/// One day of the historical record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub date: NaiveDate,
    pub performance_ratio: f64,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default, alias = "tx_hash")]
    pub tx_link: Option<String>,
}

impl AuditEntry {
    pub fn is_published(&self) -> bool {
        self.tx_link.as_deref().is_some_and(|tx| !tx.trim().is_empty())
    }

    /// Block-explorer link for a published entry.
    pub fn explorer_url(&self, explorer_tx_base: &str) -> Option<String> {
        let tx = self.tx_link.as_deref()?.trim();
        if tx.is_empty() {
            return None;
        }
        if tx.starts_with("http://") || tx.starts_with("https://") {
            return Some(tx.to_string());
        }
        Some(format!("{}/{}", explorer_tx_base.trim_end_matches('/'), tx))
    }
}

/// Audit-history response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    #[serde(default)]
    pub bond_id: Option<String>,
    #[serde(default)]
    pub period: Option<String>,
    #[serde(default)]
    pub total_days: Option<usize>,
    #[serde(default)]
    pub average_pr: Option<f64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub audit_log: Vec<AuditEntry>,
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Result of the per-day compute endpoint. Only used to advance workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DayComputation {
    #[serde(default)]
    pub bond_id: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub performance_ratio: Option<f64>,
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub actual_energy_kwh: Option<f64>,
    #[serde(default)]
    pub ghi: Option<f64>,
    #[serde(default)]
    pub theoretical_max_kwh: Option<f64>,
    #[serde(default)]
    pub threshold_required: Option<f64>,
}

/// Result of publishing a day's verdict.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PublishReceipt {
    #[serde(default)]
    pub verdict: Verdict,
    #[serde(default)]
    pub performance_ratio: Option<f64>,
    #[serde(default, alias = "tx_hash", alias = "blockchain_tx")]
    pub tx_link: Option<String>,
}

/// Backend health probe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OracleStatus {
    #[serde(default)]
    pub status: String,
}
