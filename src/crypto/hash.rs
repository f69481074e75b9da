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

//! Opaque cryptographic secure hash used by the overall project.
//!
//! Current implementation uses SHA-256. The hash of a serializable value is
//! computed over its anonymous MessagePack representation, thus two parties
//! always derive the same identifier for the same transaction payload.

use crate::{base::serialize, Error, ErrorKind, Result};
use ring::digest;
use serde::{de::Visitor, Deserializer, Serializer};
use std::fmt::Display;

/// SHA-256 digest length.
pub const HASH_LEN: usize = 32;

#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash, PartialOrd, Ord, Default)]
pub struct Hash([u8; HASH_LEN]);

impl Hash {
    /// Creates a new instance by wrapping precomputed hash bytes.
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != HASH_LEN {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("expected {} bytes hash, got {}", HASH_LEN, bytes.len()),
            ));
        }
        let mut hash = Hash::default();
        hash.0.copy_from_slice(bytes);
        Ok(hash)
    }

    /// Compute hash from arbitrary data.
    pub fn from_data(data: &[u8]) -> Self {
        let digest = digest::digest(&digest::SHA256, data);
        let mut hash = Hash::default();
        hash.0.copy_from_slice(digest.as_ref());
        hash
    }

    /// Creates a new instance from a hex string.
    pub fn from_hex(hex: &str) -> Result<Self> {
        match hex::decode(hex) {
            Ok(buf) => Self::new(&buf),
            Err(err) => Err(Error::new_ext(ErrorKind::MalformedData, err)),
        }
    }

    /// Wrapped hash bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

/// Get a reference to the inner bytes array.
impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

impl serde::Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bytes(self.as_bytes())
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct HashVisitor;

        impl<'v> Visitor<'v> for HashVisitor {
            type Value = Hash;

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
                Hash::new(bytes).map_err(|_err| serde::de::Error::custom("Invalid hash"))
            }

            fn visit_byte_buf<E>(self, v: Vec<u8>) -> std::result::Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                self.visit_bytes(&v)
            }
        }
        deserializer.deserialize_byte_buf(HashVisitor)
    }
}

/// A trait for types that can be hashed.
pub trait Hashable {
    /// Hash using the library algorithm.
    fn primary_hash(&self) -> Hash;
}

/// Blanket implementation for all types that can be serialized using
/// MessagePack.
impl<T: serde::Serialize> Hashable for T {
    fn primary_hash(&self) -> Hash {
        let buf = serialize::rmp_serialize(self).unwrap_or_default(); // Safe for core structs.
        Hash::from_data(&buf)
    }
}
