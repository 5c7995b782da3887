// 🔍 Deduplicating Store Writer
//
// Existence check first, then insert. The UNIQUE constraint on
// transaction_id is the real guard: if another writer slips in between the
// check and the insert, the insert comes back as a conflict and is treated
// as a duplicate too.

use crate::error::StoreError;
use crate::models::TransactionRecord;
use crate::store::{InsertOutcome, TransactionStore};
use serde::{Deserialize, Serialize};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteOutcome {
    Inserted { id: i64 },
    Duplicate,
}

/// Persist `record` unless its transaction id is already stored.
///
/// Duplicates are not errors. Only store failures are.
pub fn write_record<S>(store: &S, record: &TransactionRecord) -> Result<WriteOutcome, StoreError>
where
    S: TransactionStore + ?Sized,
{
    if store.exists(record.transaction_id)? {
        info!(
            transaction_id = record.transaction_id,
            "transaction already exists, skipping"
        );
        return Ok(WriteOutcome::Duplicate);
    }

    match store.insert(record)? {
        InsertOutcome::Inserted(id) => {
            info!(transaction_id = record.transaction_id, id, "transaction created");
            Ok(WriteOutcome::Inserted { id })
        }
        InsertOutcome::Conflict => {
            info!(
                transaction_id = record.transaction_id,
                "transaction was stored by another writer, skipping"
            );
            Ok(WriteOutcome::Duplicate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use chrono::NaiveDate;
    use rust_decimal::{dec, Decimal};
    use std::cell::RefCell;
    use std::collections::HashMap;

    fn record(transaction_id: i64, amount: Decimal) -> TransactionRecord {
        TransactionRecord::new(
            transaction_id,
            NaiveDate::from_ymd_opt(2024, 7, 15).unwrap(),
            amount,
        )
    }

    /// Store double whose existence check can be told to lie, to
    /// simulate a concurrent writer winning the race.
    #[derive(Default)]
    struct RacyStore {
        rows: RefCell<HashMap<i64, TransactionRecord>>,
        blind_exists: bool,
        fail: bool,
    }

    impl TransactionStore for RacyStore {
        fn exists(&self, transaction_id: i64) -> Result<bool, StoreError> {
            if self.fail {
                return Err(StoreError::Corrupt("connection lost".to_string()));
            }
            Ok(!self.blind_exists && self.rows.borrow().contains_key(&transaction_id))
        }

        fn insert(&self, record: &TransactionRecord) -> Result<InsertOutcome, StoreError> {
            let mut rows = self.rows.borrow_mut();
            if rows.contains_key(&record.transaction_id) {
                return Ok(InsertOutcome::Conflict);
            }
            rows.insert(record.transaction_id, record.clone());
            Ok(InsertOutcome::Inserted(rows.len() as i64))
        }
    }

    #[test]
    fn test_write_new_record() {
        let store = SqliteStore::open_in_memory().unwrap();
        let outcome = write_record(&store, &record(1, dec!(10.0))).unwrap();

        assert!(matches!(outcome, WriteOutcome::Inserted { .. }));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_write_is_idempotent() {
        let store = SqliteStore::open_in_memory().unwrap();

        write_record(&store, &record(1, dec!(10.0))).unwrap();
        let second = write_record(&store, &record(1, dec!(99.0))).unwrap();

        assert_eq!(second, WriteOutcome::Duplicate);
        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.list_records().unwrap()[0].amount, dec!(10));
    }

    #[test]
    fn test_conflict_after_passed_check_is_duplicate() {
        let store = RacyStore {
            blind_exists: true,
            ..Default::default()
        };

        write_record(&store, &record(5, dec!(1.0))).unwrap();
        let outcome = write_record(&store, &record(5, dec!(2.0))).unwrap();

        assert_eq!(outcome, WriteOutcome::Duplicate);
        assert_eq!(store.rows.borrow().len(), 1);
        assert_eq!(store.rows.borrow()[&5].amount, dec!(1));
    }

    #[test]
    fn test_store_failure_propagates() {
        let store = RacyStore {
            fail: true,
            ..Default::default()
        };

        assert!(write_record(&store, &record(1, dec!(1.0))).is_err());
        assert!(store.rows.borrow().is_empty());
    }
}
