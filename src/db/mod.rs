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

//! Persistence contract.
//!
//! Each party owns a store holding its flow runs and its finalized
//! transactions. Records are kept in an append-only list in commit order,
//! each one paired with the identifier of the originating transaction.

use crate::{
    base::{NotarizedTransaction, ProbeState},
    crypto::Hash,
    flow::FlowRun,
    Result,
};
#[cfg(test)]
use mockall::automock;
use uuid::Uuid;

pub mod memory;

pub use memory::MemoryDb;

/// Committed record entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StoredRecord {
    /// Record data.
    pub record: ProbeState,
    /// Originating transaction identifier.
    pub tx_id: Hash,
}

/// Trait providing access to the database.
#[cfg_attr(test, automock)]
pub trait Db: Send + Sync + 'static {
    /// Load flow run by identifier.
    fn load_run(&self, run_id: &Uuid) -> Option<FlowRun>;

    /// Load the identifier of the run created for an idempotency token.
    fn load_run_id(&self, token: &str) -> Option<Uuid>;

    /// Store (insert or update) a flow run.
    /// The run idempotency token is bound to the run on first insertion.
    fn store_run(&mut self, run: &FlowRun) -> Result<()>;

    /// Load all the runs not yet terminated.
    fn load_running_runs(&self) -> Vec<FlowRun>;

    /// Check if a transaction has been recorded.
    fn contains_transaction(&self, id: &Hash) -> bool;

    /// Load recorded transaction by identifier.
    fn load_transaction(&self, id: &Hash) -> Option<NotarizedTransaction>;

    /// Record a transaction and append its outputs to the records list.
    fn store_transaction(&mut self, tx: &NotarizedTransaction) -> Result<()>;

    /// Number of records.
    fn records_count(&self) -> usize;

    /// Load record at a given position in commit order.
    fn load_record(&self, position: usize) -> Option<StoredRecord>;
}
