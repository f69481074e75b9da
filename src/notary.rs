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

//! Notary service.
//!
//! Single trusted uniqueness oracle. It checks that none of the transaction
//! inputs was already consumed by another transaction, then records the
//! inputs as consumed and co-signs, making the transaction final. The check
//! and the recording happen atomically under the consumed set lock.

use crate::{
    base::{Mutex, NotarizedTransaction, Party, SignedTransaction, TransactionSignature},
    crypto::{Hash, KeyPair},
    Error, ErrorKind, Result,
};
#[cfg(test)]
use mockall::automock;
use std::collections::HashMap;
use uuid::Uuid;

/// Notarization outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum NotaryResponse {
    /// Transaction is final.
    Notarized(NotarizedTransaction),
    /// Transaction refused, with reason.
    Rejected(String),
}

/// Notary client interface.
#[cfg_attr(test, automock)]
pub trait Notary: Send + Sync + 'static {
    /// Notary identity.
    fn identity(&self) -> Party;

    /// Submit a fully signed transaction.
    fn notarize(&self, tx: &SignedTransaction) -> NotaryResponse;
}

/// In process notary.
pub struct NotaryService {
    party: Party,
    keypair: KeyPair,
    /// Consumed input ids, bound to the consuming transaction.
    consumed: Mutex<HashMap<Uuid, Hash>>,
}

impl NotaryService {
    /// Create a notary. The party owning key must match the keypair.
    pub fn new(party: Party, keypair: KeyPair) -> Self {
        NotaryService {
            party,
            keypair,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    fn check(&self, tx: &SignedTransaction) -> Result<()> {
        if tx.data.notary != self.party {
            return Err(Error::new_ext(
                ErrorKind::NotaryRejected,
                format!("wrong notary: {}", tx.data.notary),
            ));
        }
        tx.verify_required_signatures()
    }
}

impl Notary for NotaryService {
    fn identity(&self) -> Party {
        self.party.clone()
    }

    fn notarize(&self, tx: &SignedTransaction) -> NotaryResponse {
        let id = tx.id();
        if let Err(err) = self.check(tx) {
            let reason = err.to_string_full();
            warn!("[notary] rejected {}: {}", id, reason);
            return NotaryResponse::Rejected(reason);
        }

        let mut consumed = self.consumed.lock();
        let conflict = tx
            .data
            .inputs
            .iter()
            .find(|input| matches!(consumed.get(*input), Some(by) if *by != id));
        if let Some(input) = conflict {
            let reason = format!("input {} already consumed", input);
            warn!("[notary] rejected {}: {}", id, reason);
            return NotaryResponse::Rejected(reason);
        }
        tx.data.inputs.iter().for_each(|input| {
            consumed.insert(*input, id);
        });
        let notary_sig = TransactionSignature::create(&self.keypair, &id);
        drop(consumed);

        info!("[notary] notarized {}", id);
        NotaryResponse::Notarized(NotarizedTransaction {
            tx: tx.clone(),
            notary_sig,
        })
    }
}
