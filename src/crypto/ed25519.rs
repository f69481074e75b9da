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

use crate::{crypto::Hash, Error, ErrorKind, Result};
use ed25519_dalek::{
    Keypair as KeyPairImpl, PublicKey as PublicKeyImpl, SecretKey as SecretKeyImpl, Signer as _,
    Verifier as _,
};
use rand::rngs::OsRng;
use serde::{self, de::Visitor, Deserialize, Serialize};
use std::convert::TryFrom;

/// Ed25519 signing key pair.
pub struct KeyPair(KeyPairImpl);

/// Ed25519 public key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    imp: PublicKeyImpl,
}

impl KeyPair {
    /// Construct from the 64 bytes `secret || public` representation.
    pub fn from_bytes(bytes: &[u8]) -> Result<KeyPair> {
        let internal = KeyPairImpl::from_bytes(bytes)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Ok(KeyPair(internal))
    }

    /// Derive the key pair from a 32 bytes secret seed.
    pub fn from_seed(seed: &[u8]) -> Result<KeyPair> {
        let secret = SecretKeyImpl::from_bytes(seed)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        let public = PublicKeyImpl::from(&secret);
        Ok(KeyPair(KeyPairImpl { secret, public }))
    }

    pub fn from_random() -> KeyPair {
        let mut csprng = OsRng {};
        let internal = KeyPairImpl::generate(&mut csprng);
        KeyPair(internal)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.0.to_bytes().to_vec()
    }

    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        self.0.sign(data).to_bytes().to_vec()
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey { imp: self.0.public }
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<PublicKey> {
        let internal = PublicKeyImpl::from_bytes(bytes)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        Ok(PublicKey { imp: internal })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.imp.to_bytes().to_vec()
    }

    pub fn verify(&self, data: &[u8], sig: &[u8]) -> bool {
        ed25519_dalek::Signature::try_from(sig)
            .and_then(|s| self.imp.verify(data, &s))
            .is_ok()
    }

    /// Short, human friendly, key identifier: base58 of the key SHA-256.
    pub fn to_fingerprint(&self) -> String {
        let hash = Hash::from_data(self.imp.as_bytes());
        bs58::encode(hash).into_string()
    }
}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.imp.as_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_bytes(self.imp.as_bytes())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct BytesVisitor;

        impl<'v> Visitor<'v> for BytesVisitor {
            type Value = PublicKey;

            fn expecting(
                &self,
                fmt: &mut std::fmt::Formatter<'_>,
            ) -> std::result::Result<(), std::fmt::Error> {
                write!(fmt, "expecting byte array.")
            }

            fn visit_bytes<E>(self, bytes: &[u8]) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                PublicKey::from_bytes(bytes)
                    .map_err(|_err| serde::de::Error::custom("Invalid public key"))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_bytes(&v)
            }
        }
        deserializer.deserialize_byte_buf(BytesVisitor)
    }
}
