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

//! Ledger data model.
//!
//! A transaction goes through the following stages:
//! - `UnsignedTransaction`: assembled and contract-valid, zero signatures;
//! - `SignedTransaction`: partially or fully signed by the required signers;
//! - `NotarizedTransaction`: fully signed and co-signed by the notary. This is
//!   final, immutable, and it is the unit recorded by each participant store.
//!
//! Every signature is computed over the transaction identifier, that is the
//! SHA-256 of the anonymous MessagePack serialization of `TransactionData`.

use crate::{
    base::X500Name,
    crypto::{Hash, Hashable, KeyPair, PublicKey},
    Error, ErrorKind, Result,
};
use std::fmt::Display;
use uuid::Uuid;

/// Verifiable ledger participant.
/// Two parties are the same party if they own the same key, regardless of
/// the display name.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Party {
    /// Structured name.
    pub name: X500Name,
    /// Party owning key.
    pub owning_key: PublicKey,
}

impl Party {
    pub fn new(name: X500Name, owning_key: PublicKey) -> Self {
        Party { name, owning_key }
    }
}

impl PartialEq for Party {
    fn eq(&self, other: &Self) -> bool {
        self.owning_key == other.owning_key
    }
}

impl Eq for Party {}

impl std::hash::Hash for Party {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.owning_key.hash(state);
    }
}

impl Display for Party {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Probe record. A linear state jointly owned by the launcher and the target.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeState {
    /// Message delivered by the probe.
    pub message: String,
    /// Whether the probe is only allowed to visit peers of the reference class.
    pub restricted_to_peer_class: bool,
    /// Party launching the probe.
    pub launcher: Party,
    /// Party visited by the probe.
    pub target: Party,
    /// Linear identifier, allocated once at creation.
    pub linear_id: Uuid,
}

/// Client facing representation of a probe record.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProbeStateDto {
    pub message: String,
    pub planetary_only: bool,
    pub launcher: String,
    pub target: String,
    pub linear_id: String,
}

impl ProbeState {
    /// New record with a freshly allocated linear identifier.
    pub fn new(message: &str, restricted_to_peer_class: bool, launcher: Party, target: Party) -> Self {
        ProbeState {
            message: message.to_owned(),
            restricted_to_peer_class,
            launcher,
            target,
            linear_id: Uuid::new_v4(),
        }
    }

    /// Parties that must hold a copy of the record.
    pub fn participants(&self) -> [&Party; 2] {
        [&self.launcher, &self.target]
    }

    pub fn to_dto(&self) -> ProbeStateDto {
        ProbeStateDto {
            message: self.message.clone(),
            planetary_only: self.restricted_to_peer_class,
            launcher: self.launcher.name.to_string(),
            target: self.target.name.to_string(),
            linear_id: self.linear_id.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.to_dto()).unwrap_or_default()
    }
}

/// Record kinds known by the ledger.
/// Each kind is statically paired with its validator in the `contract` module.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub enum ContractState {
    Probe(ProbeState),
}

impl ContractState {
    pub fn as_probe(&self) -> Option<&ProbeState> {
        match self {
            ContractState::Probe(probe) => Some(probe),
        }
    }
}

/// Typed intent carried by a command.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandData {
    /// Creation of a new probe record.
    Launch,
}

/// Command with the set of keys required to authorize it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Command {
    pub value: CommandData,
    pub signers: Vec<PublicKey>,
}

impl Command {
    pub fn new(value: CommandData, signers: Vec<PublicKey>) -> Self {
        Command { value, signers }
    }
}

/// Transaction payload.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionData {
    /// Linear identifiers of the superseded records.
    pub inputs: Vec<Uuid>,
    /// New records.
    pub outputs: Vec<ContractState>,
    /// Commands and their required signers.
    pub commands: Vec<Command>,
    /// Notary in charge of finalizing the transaction.
    pub notary: Party,
}

impl TransactionData {
    /// Transaction identifier.
    pub fn id(&self) -> Hash {
        self.primary_hash()
    }

    /// Union of the commands signers, without duplicates.
    pub fn required_signers(&self) -> Vec<PublicKey> {
        let mut signers: Vec<PublicKey> = vec![];
        self.commands
            .iter()
            .flat_map(|cmd| cmd.signers.iter())
            .for_each(|key| {
                if !signers.contains(key) {
                    signers.push(key.clone());
                }
            });
        signers
    }

    /// Probe records among the outputs.
    pub fn probe_outputs(&self) -> impl Iterator<Item = &ProbeState> {
        self.outputs.iter().filter_map(ContractState::as_probe)
    }
}

/// Signature over a transaction identifier.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TransactionSignature {
    /// Signer public key.
    pub by: PublicKey,
    /// Signature bytes.
    #[serde(with = "serde_bytes")]
    pub bytes: Vec<u8>,
}

impl TransactionSignature {
    pub fn create(keypair: &KeyPair, id: &Hash) -> Self {
        TransactionSignature {
            by: keypair.public_key(),
            bytes: keypair.sign(id.as_bytes()),
        }
    }

    pub fn verify(&self, id: &Hash) -> Result<()> {
        match self.by.verify(id.as_bytes(), &self.bytes) {
            true => Ok(()),
            false => Err(Error::new_ext(
                ErrorKind::InvalidSignature,
                format!("bad signature by {}", self.by.to_fingerprint()),
            )),
        }
    }
}

/// Contract-valid transaction carrying no signatures.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct UnsignedTransaction {
    pub data: TransactionData,
}

impl UnsignedTransaction {
    pub fn id(&self) -> Hash {
        self.data.id()
    }

    /// Sign as the first signer.
    pub fn sign(self, keypair: &KeyPair) -> SignedTransaction {
        let sig = TransactionSignature::create(keypair, &self.id());
        SignedTransaction {
            data: self.data,
            sigs: vec![sig],
        }
    }
}

/// Partially or fully signed transaction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SignedTransaction {
    /// Transaction payload.
    pub data: TransactionData,
    /// Collected signatures.
    pub sigs: Vec<TransactionSignature>,
}

impl SignedTransaction {
    pub fn id(&self) -> Hash {
        self.data.id()
    }

    /// Attach a counterparty signature.
    /// The signature is checked against the transaction id, a second signature
    /// by the same key is ignored.
    pub fn with_signature(mut self, sig: TransactionSignature) -> Result<Self> {
        sig.verify(&self.id())?;
        if !self.sigs.iter().any(|s| s.by == sig.by) {
            self.sigs.push(sig);
        }
        Ok(self)
    }

    /// Required signers that have not signed yet.
    pub fn missing_signers(&self) -> Vec<PublicKey> {
        self.data
            .required_signers()
            .into_iter()
            .filter(|key| !self.sigs.iter().any(|sig| &sig.by == key))
            .collect()
    }

    /// Check the attached signatures validity and that every required signer,
    /// except the `allowed_missing` ones, has signed.
    pub fn verify_signatures_except(&self, allowed_missing: &[PublicKey]) -> Result<()> {
        let id = self.id();
        for sig in self.sigs.iter() {
            sig.verify(&id)?;
        }
        let missing: Vec<String> = self
            .missing_signers()
            .iter()
            .filter(|key| !allowed_missing.contains(key))
            .map(PublicKey::to_fingerprint)
            .collect();
        match missing.is_empty() {
            true => Ok(()),
            false => Err(Error::new_ext(
                ErrorKind::InvalidSignature,
                format!("missing signatures from: {}", missing.join(", ")),
            )),
        }
    }

    /// Check that the transaction is fully signed.
    pub fn verify_required_signatures(&self) -> Result<()> {
        self.verify_signatures_except(&[])
    }
}

/// Final transaction, co-signed by the notary.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NotarizedTransaction {
    pub tx: SignedTransaction,
    pub notary_sig: TransactionSignature,
}

impl NotarizedTransaction {
    pub fn id(&self) -> Hash {
        self.tx.id()
    }

    /// Check the notary signature and that the inner transaction is fully signed.
    pub fn verify(&self) -> Result<()> {
        if self.notary_sig.by != self.tx.data.notary.owning_key {
            return Err(Error::new_ext(
                ErrorKind::InvalidSignature,
                "not signed by the transaction notary",
            ));
        }
        self.notary_sig.verify(&self.id())?;
        self.tx.verify_required_signatures()
    }

    /// All the signatures, notary included.
    pub fn signatures(&self) -> impl Iterator<Item = &TransactionSignature> {
        self.tx.sigs.iter().chain(std::iter::once(&self.notary_sig))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    pub const EARTH: &str = "O=Earth, L=THIRD, C=GB, OU=planet";
    pub const MARS: &str = "O=Mars, L=FIFTH, C=GB, OU=planet";
    pub const PLUTO: &str = "O=Pluto, L=NINTH, C=GB, OU=dwarf-planet";
    pub const NOTARY: &str = "O=Notary, L=SUN, C=GB";

    pub fn create_test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32]).unwrap()
    }

    pub fn create_test_party(name: &str, seed: u8) -> Party {
        Party::new(
            X500Name::parse(name).unwrap(),
            create_test_keypair(seed).public_key(),
        )
    }

    pub fn earth() -> Party {
        create_test_party(EARTH, 3)
    }

    pub fn mars() -> Party {
        create_test_party(MARS, 4)
    }

    pub fn pluto() -> Party {
        create_test_party(PLUTO, 9)
    }

    pub fn notary() -> Party {
        create_test_party(NOTARY, 0xaa)
    }

    pub fn create_test_probe(launcher: Party, target: Party) -> ProbeState {
        ProbeState::new("Hey Mars", false, launcher, target)
    }

    pub fn create_test_data(launcher: Party, target: Party) -> TransactionData {
        let signers = vec![launcher.owning_key.clone(), target.owning_key.clone()];
        TransactionData {
            inputs: vec![],
            outputs: vec![ContractState::Probe(create_test_probe(launcher, target))],
            commands: vec![Command::new(CommandData::Launch, signers)],
            notary: notary(),
        }
    }

    pub fn create_test_signed_tx() -> SignedTransaction {
        let unsigned = UnsignedTransaction {
            data: create_test_data(earth(), mars()),
        };
        let stx = unsigned.sign(&create_test_keypair(3));
        let sig = TransactionSignature::create(&create_test_keypair(4), &stx.id());
        stx.with_signature(sig).unwrap()
    }

    pub fn create_test_notarized_tx() -> NotarizedTransaction {
        let tx = create_test_signed_tx();
        let notary_sig = TransactionSignature::create(&create_test_keypair(0xaa), &tx.id());
        NotarizedTransaction { tx, notary_sig }
    }

    #[test]
    fn party_equality_is_by_key() {
        let renamed = Party::new(X500Name::parse(PLUTO).unwrap(), mars().owning_key);

        assert_eq!(renamed, mars());
        assert_ne!(earth(), mars());
    }

    #[test]
    fn required_signers_are_deduplicated() {
        let mut data = create_test_data(earth(), mars());
        data.commands.push(Command::new(
            CommandData::Launch,
            vec![earth().owning_key],
        ));

        assert_eq!(
            data.required_signers(),
            vec![earth().owning_key, mars().owning_key]
        );
    }

    #[test]
    fn partially_signed_transaction() {
        let unsigned = UnsignedTransaction {
            data: create_test_data(earth(), mars()),
        };

        let stx = unsigned.sign(&create_test_keypair(3));

        assert_eq!(stx.missing_signers(), vec![mars().owning_key]);
        assert!(stx.verify_signatures_except(&[mars().owning_key]).is_ok());
        let err = stx.verify_required_signatures().unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn fully_signed_transaction() {
        let stx = create_test_signed_tx();

        assert!(stx.missing_signers().is_empty());
        assert!(stx.verify_required_signatures().is_ok());
    }

    #[test]
    fn foreign_signature_is_refused() {
        let unsigned = UnsignedTransaction {
            data: create_test_data(earth(), mars()),
        };
        let stx = unsigned.sign(&create_test_keypair(3));
        let other_id = Hash::from_data(b"another transaction");
        let sig = TransactionSignature::create(&create_test_keypair(4), &other_id);

        let err = stx.with_signature(sig).unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn tampered_transaction_breaks_signatures() {
        let mut stx = create_test_signed_tx();
        stx.data.inputs.push(Uuid::new_v4());

        let err = stx.verify_required_signatures().unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn notarized_transaction_verify() {
        let ntx = create_test_notarized_tx();

        assert!(ntx.verify().is_ok());
        assert_eq!(ntx.signatures().count(), 3);
    }

    #[test]
    fn notarized_by_wrong_notary() {
        let mut ntx = create_test_notarized_tx();
        ntx.notary_sig = TransactionSignature::create(&create_test_keypair(0xbb), &ntx.id());

        let err = ntx.verify().unwrap_err();

        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn probe_dto_json() {
        let probe = create_test_probe(earth(), mars());

        let json: serde_json::Value = serde_json::from_str(&probe.to_json()).unwrap();

        assert_eq!(json["message"], "Hey Mars");
        assert_eq!(json["planetaryOnly"], false);
        assert_eq!(json["launcher"], "OU=planet, O=Earth, L=THIRD, C=GB");
        assert_eq!(json["target"], "OU=planet, O=Mars, L=FIFTH, C=GB");
        assert_eq!(json["linearId"], probe.linear_id.to_string());
    }

    #[test]
    fn transaction_id_survives_serialization() {
        let stx = create_test_signed_tx();

        let buf = crate::base::serialize::rmp_serialize(&stx).unwrap();
        let decoded: SignedTransaction = crate::base::serialize::rmp_deserialize(&buf).unwrap();

        assert_eq!(decoded.id(), stx.id());
    }
}
