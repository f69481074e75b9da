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

//! Received probe messages listing.

use super::protocol::StepKind;
use crate::{
    base::{Party, ProbeState},
    db::Db,
    ledger::LedgerStore,
};

pub const STEPS: &[StepKind] = &[StepKind::Compute];

/// Display string of a received record.
pub fn display(record: &ProbeState) -> String {
    format!("From: {} - Message: {}", record.launcher.name, record.message)
}

/// Records not launched by the local party, most recent first.
pub fn received_messages<D: Db>(ledger: &LedgerStore<D>, me: &Party, page_size: usize) -> Vec<String> {
    let me = me.clone();
    ledger
        .query(move |entry| entry.record.launcher != me, page_size)
        .flat_map(|page| page.values)
        .map(|entry| display(&entry.record))
        .collect()
}
