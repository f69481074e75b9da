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

//! Volatile database implementation.
//!
//! Values are kept MessagePack encoded, as a disk backed store would do, so
//! that loading always hands out an independent copy.

use crate::{
    base::{
        serialize::{rmp_deserialize, rmp_serialize},
        NotarizedTransaction,
    },
    crypto::Hash,
    db::{Db, StoredRecord},
    flow::{FlowRun, RunStatus},
    Result,
};
use std::collections::HashMap;
use uuid::Uuid;

/// In memory database.
#[derive(Default)]
pub struct MemoryDb {
    runs: HashMap<Uuid, Vec<u8>>,
    tokens: HashMap<String, Uuid>,
    transactions: HashMap<Hash, Vec<u8>>,
    records: Vec<Vec<u8>>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }

    fn decode<'a, T: serde::Deserialize<'a>>(buf: &'a [u8]) -> Option<T> {
        match rmp_deserialize(buf) {
            Ok(val) => Some(val),
            Err(err) => {
                error!("[db] corrupted entry: {}", err.to_string_full());
                None
            }
        }
    }
}

impl Db for MemoryDb {
    fn load_run(&self, run_id: &Uuid) -> Option<FlowRun> {
        self.runs.get(run_id).and_then(|buf| Self::decode(buf))
    }

    fn load_run_id(&self, token: &str) -> Option<Uuid> {
        self.tokens.get(token).copied()
    }

    fn store_run(&mut self, run: &FlowRun) -> Result<()> {
        let buf = rmp_serialize(run)?;
        self.tokens.entry(run.token.clone()).or_insert(run.run_id);
        self.runs.insert(run.run_id, buf);
        Ok(())
    }

    fn load_running_runs(&self) -> Vec<FlowRun> {
        self.runs
            .values()
            .filter_map(|buf| Self::decode::<FlowRun>(buf))
            .filter(|run| run.status == RunStatus::Running)
            .collect()
    }

    fn contains_transaction(&self, id: &Hash) -> bool {
        self.transactions.contains_key(id)
    }

    fn load_transaction(&self, id: &Hash) -> Option<NotarizedTransaction> {
        self.transactions.get(id).and_then(|buf| Self::decode(buf))
    }

    fn store_transaction(&mut self, tx: &NotarizedTransaction) -> Result<()> {
        let tx_id = tx.id();
        let mut records = vec![];
        for record in tx.tx.data.probe_outputs() {
            let entry = StoredRecord {
                record: record.clone(),
                tx_id,
            };
            records.push(rmp_serialize(&entry)?);
        }
        let buf = rmp_serialize(tx)?;
        self.transactions.insert(tx_id, buf);
        self.records.extend(records);
        Ok(())
    }

    fn records_count(&self) -> usize {
        self.records.len()
    }

    fn load_record(&self, position: usize) -> Option<StoredRecord> {
        self.records.get(position).and_then(|buf| Self::decode(buf))
    }
}
