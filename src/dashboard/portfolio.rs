//! In-memory asset collection and the current selection.
//!
//! The selection is an `Arc` out of the same collection, never a separate
//! copy. Each refresh swaps in the fresh record for the selected id; if the id
//! disappeared upstream the old record stays selected.
//!
//! Refreshes are numbered when issued. A result older than the last one
//! applied is dropped, so overlapping pulls cannot roll the collection back.

use std::sync::Arc;

use crate::models::Asset;

#[derive(Debug, Default)]
pub struct PortfolioCache {
    assets: Vec<Arc<Asset>>,
    selected: Option<Arc<Asset>>,
    refreshes_in_flight: usize,
    issued: u64,
    applied: u64,
}

impl PortfolioCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a refresh in flight and return its sequence number.
    pub fn begin_refresh(&mut self) -> u64 {
        self.refreshes_in_flight += 1;
        self.issued += 1;
        self.issued
    }

    /// Claim the right to apply refresh `seq`. False if a later one already landed.
    pub fn accept(&mut self, seq: u64) -> bool {
        if seq <= self.applied {
            return false;
        }
        self.applied = seq;
        true
    }

    /// Apply a successful pull. Returns false when the selected id was not found.
    pub fn apply_refresh(&mut self, assets: Vec<Asset>) -> bool {
        self.assets = assets.into_iter().map(Arc::new).collect();

        let Some(current) = &self.selected else {
            return true;
        };
        match self.find(&current.bond_id) {
            Some(fresh) => {
                self.selected = Some(fresh);
                true
            }
            None => false,
        }
    }

    pub fn end_refresh(&mut self) {
        self.refreshes_in_flight = self.refreshes_in_flight.saturating_sub(1);
    }

    pub fn is_loading(&self) -> bool {
        self.refreshes_in_flight > 0
    }

    pub fn assets(&self) -> &[Arc<Asset>] {
        &self.assets
    }

    pub fn find(&self, bond_id: &str) -> Option<Arc<Asset>> {
        self.assets.iter().find(|a| a.bond_id == bond_id).cloned()
    }

    /// Install a record already resolved by the caller, whether or not it is
    /// still in the collection.
    pub fn set_selected(&mut self, asset: Arc<Asset>) {
        self.selected = Some(asset);
    }

    /// Select by id. Unknown ids leave the selection unchanged.
    pub fn select(&mut self, bond_id: &str) -> Option<Arc<Asset>> {
        let asset = self.find(bond_id)?;
        self.selected = Some(asset.clone());
        Some(asset)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected(&self) -> Option<Arc<Asset>> {
        self.selected.clone()
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref().map(|a| a.bond_id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(id: &str, rate: f64) -> Asset {
        Asset {
            bond_id: id.to_string(),
            name: format!("Asset {}", id),
            lat: 12.97,
            lon: 77.59,
            capacity_kw: 100.0,
            threshold: 75.0,
            base_interest_rate: rate,
            contract_address: None,
        }
    }

    #[test]
    fn test_refresh_propagates_rate_to_selection() {
        let mut cache = PortfolioCache::new();
        cache.apply_refresh(vec![asset("BOND_01", 5.5), asset("BOND_02", 5.5)]);
        cache.select("BOND_02").unwrap();

        assert!(cache.apply_refresh(vec![asset("BOND_01", 5.5), asset("BOND_02", 7.25)]));
        let selected = cache.selected().unwrap();
        assert_eq!(selected.base_interest_rate, 7.25);
        assert!(Arc::ptr_eq(&selected, &cache.find("BOND_02").unwrap()));
    }

    #[test]
    fn test_missing_selection_left_stale() {
        let mut cache = PortfolioCache::new();
        cache.apply_refresh(vec![asset("BOND_01", 5.5)]);
        cache.select("BOND_01");

        assert!(!cache.apply_refresh(vec![asset("BOND_09", 5.5)]));
        assert_eq!(cache.selected_id(), Some("BOND_01"));
        assert_eq!(cache.assets().len(), 1);
    }

    #[test]
    fn test_select_unknown_is_noop() {
        let mut cache = PortfolioCache::new();
        cache.apply_refresh(vec![asset("BOND_01", 5.5)]);
        assert!(cache.select("BOND_404").is_none());
        assert!(cache.selected().is_none());
    }

    #[test]
    fn test_set_selected_survives_empty_collection() {
        let mut cache = PortfolioCache::new();
        cache.apply_refresh(vec![asset("BOND_01", 5.5), asset("BOND_02", 5.5)]);
        cache.select("BOND_01");
        let second = cache.find("BOND_02").unwrap();

        cache.apply_refresh(Vec::new());
        cache.set_selected(second);
        assert_eq!(cache.selected_id(), Some("BOND_02"));

        assert!(cache.apply_refresh(vec![asset("BOND_02", 6.0)]));
        assert_eq!(cache.selected().unwrap().base_interest_rate, 6.0);
    }

    #[test]
    fn test_out_of_order_refresh_rejected() {
        let mut cache = PortfolioCache::new();
        let older = cache.begin_refresh();
        let newer = cache.begin_refresh();
        assert!(newer > older);

        assert!(cache.accept(newer));
        assert!(!cache.accept(older));
        assert!(!cache.accept(newer));

        let latest = cache.begin_refresh();
        assert!(cache.accept(latest));
    }

    #[test]
    fn test_loading_flag_nests() {
        let mut cache = PortfolioCache::new();
        cache.begin_refresh();
        cache.begin_refresh();
        cache.end_refresh();
        assert!(cache.is_loading());
        cache.end_refresh();
        cache.end_refresh();
        assert!(!cache.is_loading());
    }
}
