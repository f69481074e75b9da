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

//! Identity registry.
//!
//! Resolves structured names and keys to parties and lists the notaries the
//! network trusts. Read-mostly, shared by all the flows of a node.

use crate::{
    base::{Party, RwLock, X500Name},
    crypto::PublicKey,
    Error, ErrorKind, Result,
};
#[cfg(test)]
use mockall::automock;
use std::collections::HashMap;

/// Identity lookups.
#[cfg_attr(test, automock)]
pub trait IdentityService: Send + Sync + 'static {
    /// Well known party registered with the given name.
    fn party_from_name(&self, name: &X500Name) -> Option<Party>;

    /// Well known party owning the given key.
    fn party_from_key(&self, key: &PublicKey) -> Option<Party>;

    /// Notaries known to the network, in registration order.
    fn notary_identities(&self) -> Vec<Party>;
}

/// Resolve a textual structured name to a well known party.
pub fn resolve(identity: &dyn IdentityService, name: &str) -> Result<Party> {
    let x500 = X500Name::parse(name)?;
    identity
        .party_from_name(&x500)
        .ok_or_else(|| Error::new_ext(ErrorKind::NoSuchParty, name.to_owned()))
}

#[derive(Default)]
struct DirectoryInner {
    by_name: HashMap<X500Name, Party>,
    by_key: HashMap<PublicKey, Party>,
    notaries: Vec<Party>,
}

/// In memory identity registry.
#[derive(Default)]
pub struct Directory {
    inner: RwLock<DirectoryInner>,
}

impl Directory {
    pub fn new() -> Self {
        Directory::default()
    }

    /// Register a well known party.
    /// Registering the same name again replaces the previous binding.
    pub fn register(&self, party: Party) {
        let mut inner = self.inner.write();
        debug!("[identity] registering {}", party);
        if let Some(old) = inner.by_name.insert(party.name.clone(), party.clone()) {
            inner.by_key.remove(&old.owning_key);
        }
        inner.by_key.insert(party.owning_key.clone(), party);
    }

    /// Register a party as a trusted notary.
    pub fn register_notary(&self, party: Party) {
        self.register(party.clone());
        let mut inner = self.inner.write();
        if !inner.notaries.contains(&party) {
            inner.notaries.push(party);
        }
    }
}

impl IdentityService for Directory {
    fn party_from_name(&self, name: &X500Name) -> Option<Party> {
        self.inner.read().by_name.get(name).cloned()
    }

    fn party_from_key(&self, key: &PublicKey) -> Option<Party> {
        self.inner.read().by_key.get(key).cloned()
    }

    fn notary_identities(&self) -> Vec<Party> {
        self.inner.read().notaries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::schema::tests::{earth, mars, notary, MARS};

    fn create_directory() -> Directory {
        let dir = Directory::new();
        dir.register(earth());
        dir.register(mars());
        dir.register_notary(notary());
        dir
    }

    #[test]
    fn resolve_by_name() {
        let dir = create_directory();

        let party = resolve(&dir, MARS).unwrap();

        assert_eq!(party, mars());
    }

    #[test]
    fn resolve_ignores_attribute_order() {
        let dir = create_directory();

        let party = resolve(&dir, "OU=planet, C=GB, L=FIFTH, O=Mars").unwrap();

        assert_eq!(party, mars());
    }

    #[test]
    fn resolve_unknown_party() {
        let dir = create_directory();

        let err = resolve(&dir, "O=Vulcan, L=ZERO, C=GB, OU=planet").unwrap_err();

        assert_eq!(err.kind, ErrorKind::NoSuchParty);
        assert_eq!(err.detail().unwrap(), "O=Vulcan, L=ZERO, C=GB, OU=planet");
    }

    #[test]
    fn resolve_malformed_name() {
        let dir = create_directory();

        let err = resolve(&dir, "Mars").unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn lookup_by_key() {
        let dir = create_directory();

        let party = dir.party_from_key(&earth().owning_key).unwrap();

        assert_eq!(party.name, earth().name);
    }

    #[test]
    fn notaries_are_listed_once() {
        let dir = create_directory();
        dir.register_notary(notary());

        assert_eq!(dir.notary_identities(), vec![notary()]);
    }

    #[test]
    fn resolve_through_mock() {
        let mut identity = MockIdentityService::new();
        identity
            .expect_party_from_name()
            .returning(|_| Some(earth()));

        let party = resolve(&identity, MARS).unwrap();

        assert_eq!(party, earth());
    }
}
