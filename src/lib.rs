//! Solar Bond Monitor
//!
//! Client-side synchronization core for a performance-bond dashboard: keeps
//! the asset portfolio, a per-asset live sample feed and the audit history in
//! one consistent view, and drives the oracle's write workflows.

pub mod config;
pub mod dashboard;
pub mod models;
pub mod oracle;

pub use config::DashboardConfig;
pub use dashboard::{Dashboard, DashboardError, DashboardView, PullOutcome};
