//! Per-target exclusive leases
//!
//! At most one update or delete may be in flight for a given table or
//! dataset. Keys are `table:<dataset>.<table>` or `dataset:<dataset>`; a
//! dataset lease also covers every table in it, so a table lease and a lease
//! on its dataset exclude each other. A lease is released when its guard is
//! dropped, on every exit path including errors and aborted sessions.

use crate::error::AppError;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Clone, Default)]
pub struct TargetLeases {
    held: Arc<Mutex<HashSet<String>>>,
}

impl TargetLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lease for `key`, or fail with `TargetBusy` if it or an
    /// overlapping lease is held.
    pub fn acquire(&self, key: impl Into<String>) -> Result<Lease, AppError> {
        let key = key.into();
        let mut held = self
            .held
            .lock()
            .map_err(|_| AppError::Internal("lease table poisoned".to_string()))?;
        if let Some(holder) = held.iter().find(|other| overlaps(&key, other)) {
            debug!(target_key = %key, holder = %holder, "lease refused");
            return Err(AppError::TargetBusy(key));
        }
        held.insert(key.clone());
        debug!(target_key = %key, "lease acquired");
        Ok(Lease {
            key,
            held: Arc::clone(&self.held),
        })
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.held
            .lock()
            .map(|held| held.contains(key))
            .unwrap_or(false)
    }
}

/// Dataset a key belongs to: `dataset:d` and `table:d.t` both give `d`.
fn dataset_scope(key: &str) -> Option<&str> {
    if let Some(dataset) = key.strip_prefix("dataset:") {
        return Some(dataset);
    }
    key.strip_prefix("table:")
        .and_then(|table| table.split_once('.'))
        .map(|(dataset, _)| dataset)
}

fn overlaps(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let whole_dataset = a.starts_with("dataset:") || b.starts_with("dataset:");
    whole_dataset && dataset_scope(a).is_some() && dataset_scope(a) == dataset_scope(b)
}

/// Guard for one held lease
#[derive(Debug)]
pub struct Lease {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        // A poisoned set still has to release the key.
        let mut held = match self.held.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.key);
        debug!(target_key = %self.key, "lease released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_busy() {
        let leases = TargetLeases::new();
        let _lease = leases.acquire("table:sales.sales_raw").unwrap();
        let err = leases.acquire("table:sales.sales_raw").unwrap_err();
        assert!(matches!(err, AppError::TargetBusy(key) if key == "table:sales.sales_raw"));

        // Other targets are independent
        tokio_test::assert_ok!(leases.acquire("table:sales.other"));
    }

    #[test]
    fn test_clones_share_holdings() {
        let leases = TargetLeases::new();
        let other = leases.clone();
        let lease = tokio_test::assert_ok!(leases.acquire("dataset:legacy_data"));
        tokio_test::assert_err!(other.acquire("dataset:legacy_data"));
        drop(lease);
        tokio_test::assert_ok!(other.acquire("dataset:legacy_data"));
    }

    #[test]
    fn test_dataset_lease_covers_its_tables() {
        let leases = TargetLeases::new();
        let table = leases.acquire("table:sales.sales_raw").unwrap();
        let err = leases.acquire("dataset:sales").unwrap_err();
        assert!(matches!(err, AppError::TargetBusy(key) if key == "dataset:sales"));
        tokio_test::assert_ok!(leases.acquire("dataset:sales_archive"));
        drop(table);

        let _dataset = leases.acquire("dataset:sales").unwrap();
        tokio_test::assert_err!(leases.acquire("table:sales.orders"));
        tokio_test::assert_ok!(leases.acquire("table:salesx.orders"));
    }

    #[test]
    fn test_drop_releases() {
        let leases = TargetLeases::new();
        {
            let lease = leases.acquire("dataset:legacy_data").unwrap();
            assert_eq!(lease.key(), "dataset:legacy_data");
            assert!(leases.is_held("dataset:legacy_data"));
        }
        assert!(!leases.is_held("dataset:legacy_data"));
        assert!(leases.acquire("dataset:legacy_data").is_ok());
    }
}
