// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Ledger store and query.
//!
//! Append-only per party store of finalized transactions. Only notarized and
//! fully signed transactions are accepted; committing twice the same
//! transaction is a no-op.

pub mod builder;
pub mod cursor;

pub use builder::TransactionBuilder;
pub use cursor::{Cursor, Page};

use crate::{
    base::{NotarizedTransaction, RwLock},
    crypto::Hash,
    db::{Db, StoredRecord},
    Result,
};
use std::sync::Arc;

/// Party ledger.
pub struct LedgerStore<D: Db> {
    db: Arc<RwLock<D>>,
}

impl<D: Db> Clone for LedgerStore<D> {
    fn clone(&self) -> Self {
        LedgerStore {
            db: self.db.clone(),
        }
    }
}

impl<D: Db> LedgerStore<D> {
    pub fn new(db: Arc<RwLock<D>>) -> Self {
        LedgerStore { db }
    }

    /// Durably record a notarized transaction.
    /// Returns `false` if the transaction was already recorded.
    pub fn commit(&self, tx: &NotarizedTransaction) -> Result<bool> {
        tx.verify()?;
        let id = tx.id();
        let mut db = self.db.write();
        if db.contains_transaction(&id) {
            debug!("[ledger] transaction {} already recorded", id);
            return Ok(false);
        }
        db.store_transaction(tx)?;
        info!("[ledger] recorded transaction {}", id);
        Ok(true)
    }

    /// Check if a transaction has been recorded.
    pub fn contains(&self, id: &Hash) -> bool {
        self.db.read().contains_transaction(id)
    }

    /// Load a recorded transaction.
    pub fn transaction(&self, id: &Hash) -> Option<NotarizedTransaction> {
        self.db.read().load_transaction(id)
    }

    /// Records matching `filter`, newest first, in pages of `page_size`.
    pub fn query<F>(&self, filter: F, page_size: usize) -> Cursor<D, F>
    where
        F: Fn(&StoredRecord) -> bool,
    {
        let count = self.db.read().records_count();
        Cursor::new(self.db.clone(), filter, page_size, count)
    }

    /// Restart a query from a page offset.
    pub fn resume<F>(&self, filter: F, page_size: usize, offset: usize) -> Cursor<D, F>
    where
        F: Fn(&StoredRecord) -> bool,
    {
        Cursor::new(self.db.clone(), filter, page_size, offset)
    }
}
