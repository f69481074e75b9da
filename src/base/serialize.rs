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

//! MessagePack helpers.
//!
//! Everything that crosses a party boundary or lands into a party store
//! (session envelopes, checkpoints, notarized transactions) is encoded with
//! the anonymous (without field names) MessagePack format.

use crate::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};

/// Serialize using MessagePack format (without field names).
///
/// # Error
///
/// If the data cannot be serialized a `MalformedData` error kind is returned.
pub fn rmp_serialize<T>(val: &T) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    rmp_serde::to_vec(val).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}

/// Deserialize using MessagePack format.
///
/// # Error
///
/// If the data cannot be deserialized a `MalformedData` error kind is returned.
pub fn rmp_deserialize<'a, T>(buf: &'a [u8]) -> Result<T>
where
    T: Deserialize<'a>,
{
    rmp_serde::from_slice(buf).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))
}
