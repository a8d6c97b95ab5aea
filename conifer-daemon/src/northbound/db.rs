//
// Copyright (c) The Conifer Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};

use conifer_northbound::transaction::Transaction;
use pickledb::PickleDb;
use tracing::error;

pub type Database = Arc<Mutex<PickleDb>>;

// Transactions retained in the rollback log.
const ROLLBACK_LOG_DEPTH: u32 = 50;

fn key(transaction_id: u32) -> String {
    format!("tx:{transaction_id}")
}

// Records a committed transaction in the rollback log, assigning its ID and
// pruning entries beyond the retention depth.
pub(crate) fn transaction_record(
    db: &mut PickleDb,
    transaction: &mut Transaction,
) {
    let next_id = db.get::<u32>("tx:next-id").unwrap_or(0) + 1;
    if let Err(error) = db.set("tx:next-id", &next_id) {
        error!(%error, "failed to update the next transaction ID");
    }
    transaction.id = next_id;

    if let Err(error) = db.set(&key(next_id), transaction) {
        error!(%error, "failed to record transaction in the rollback log");
    }
    if next_id > ROLLBACK_LOG_DEPTH {
        let _ = db.rem(&key(next_id - ROLLBACK_LOG_DEPTH));
    }
}

// Retrieves a transaction from the rollback log, identified by its ID.
pub(crate) fn transaction_get(
    db: &PickleDb,
    transaction_id: u32,
) -> Option<Transaction> {
    db.get(&key(transaction_id))
}

// Retrieves all transactions from the rollback log, oldest first.
pub(crate) fn transaction_get_all(db: &PickleDb) -> Vec<Transaction> {
    let mut transactions = db
        .iter()
        .filter(|entry| entry.get_key() != "tx:next-id")
        .filter(|entry| entry.get_key().starts_with("tx:"))
        .filter_map(|entry| entry.get_value::<Transaction>())
        .collect::<Vec<_>>();
    transactions.sort_by_key(|transaction| transaction.id);
    transactions
}
