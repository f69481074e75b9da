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

//! Library error codes and results.

use serde::{de::Visitor, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{Display, Formatter};

/// Project-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Max string length when the error is converted to string using `to_string_full`.
const MAX_ERROR_SOURCE_STRING_LENGTH: usize = 256;

/// Error kind to better contextualize the returned error.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    MalformedData,
    MissingParameter,
    NoSuchParty,
    ContractViolation,
    InvalidSignature,
    SessionTimeout,
    NotaryRejected,
    BadNetwork,
    DatabaseFault,
    ResourceNotFound,
    Other,
}

/// Error kind strings.
pub(super) mod error_kind_str {
    pub const MALFORMED_DATA: &str = "malformed data";
    pub const MISSING_PARAMETER: &str = "missing parameter";
    pub const NO_SUCH_PARTY: &str = "no such party";
    pub const CONTRACT_VIOLATION: &str = "contract violation";
    pub const INVALID_SIGNATURE: &str = "invalid signature";
    pub const SESSION_TIMEOUT: &str = "session timeout";
    pub const NOTARY_REJECTED: &str = "notary rejected";
    pub const BAD_NETWORK: &str = "bad network";
    pub const DATABASE_FAULT: &str = "database fault";
    pub const RESOURCE_NOT_FOUND: &str = "resource not found";
    pub const OTHER: &str = "other";
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ErrorKind::*;
        let kind_str = match self {
            MalformedData => error_kind_str::MALFORMED_DATA,
            MissingParameter => error_kind_str::MISSING_PARAMETER,
            NoSuchParty => error_kind_str::NO_SUCH_PARTY,
            ContractViolation => error_kind_str::CONTRACT_VIOLATION,
            InvalidSignature => error_kind_str::INVALID_SIGNATURE,
            SessionTimeout => error_kind_str::SESSION_TIMEOUT,
            NotaryRejected => error_kind_str::NOTARY_REJECTED,
            BadNetwork => error_kind_str::BAD_NETWORK,
            DatabaseFault => error_kind_str::DATABASE_FAULT,
            ResourceNotFound => error_kind_str::RESOURCE_NOT_FOUND,
            Other => error_kind_str::OTHER,
        };
        write!(f, "{}", kind_str)
    }
}

impl Serialize for ErrorKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let msg = self.to_string();
        serializer.serialize_str(&msg)
    }
}

impl<'de> Deserialize<'de> for ErrorKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ErrorKindVisitor;

        impl<'de> Visitor<'de> for ErrorKindVisitor {
            type Value = String;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a string")
            }

            fn visit_str<R>(self, value: &str) -> std::result::Result<String, R> {
                Ok(value.to_string())
            }
        }

        let kind = match deserializer.deserialize_str(ErrorKindVisitor)?.as_str() {
            error_kind_str::MALFORMED_DATA => ErrorKind::MalformedData,
            error_kind_str::MISSING_PARAMETER => ErrorKind::MissingParameter,
            error_kind_str::NO_SUCH_PARTY => ErrorKind::NoSuchParty,
            error_kind_str::CONTRACT_VIOLATION => ErrorKind::ContractViolation,
            error_kind_str::INVALID_SIGNATURE => ErrorKind::InvalidSignature,
            error_kind_str::SESSION_TIMEOUT => ErrorKind::SessionTimeout,
            error_kind_str::NOTARY_REJECTED => ErrorKind::NotaryRejected,
            error_kind_str::BAD_NETWORK => ErrorKind::BadNetwork,
            error_kind_str::DATABASE_FAULT => ErrorKind::DatabaseFault,
            error_kind_str::RESOURCE_NOT_FOUND => ErrorKind::ResourceNotFound,
            _ => ErrorKind::Other,
        };
        Ok(kind)
    }
}

/// Project-wide error type.
/// Contains a kind enumerate and a `source` carrying the detail that made the
/// operation fail (missing parameter name, violated contract rule, ...).
///
/// The source is serialized as its string representation, this way a failed
/// flow run keeps its human readable message across checkpoints and sessions.
#[derive(Debug, Serialize, Deserialize)]
pub struct Error {
    /// Error kind.
    pub kind: ErrorKind,
    /// Error detail.
    #[serde(serialize_with = "source_se", deserialize_with = "source_de")]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

fn source_se<S: Serializer>(
    source: &Option<Box<dyn std::error::Error + Send + Sync>>,
    s: S,
) -> std::result::Result<S::Ok, S::Error> {
    source.as_ref().map(|b| b.to_string()).serialize(s)
}

fn source_de<'de, D: Deserializer<'de>>(
    d: D,
) -> std::result::Result<Option<Box<dyn std::error::Error + Send + Sync>>, D::Error> {
    let detail = Option::<String>::deserialize(d)?;
    Ok(detail.map(|s| s.into()))
}

impl Clone for Error {
    fn clone(&self) -> Self {
        Error {
            kind: self.kind,
            source: self.source.as_ref().map(|src| src.to_string().into()),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::new_ext(ErrorKind::Other, s)
    }
}

impl<T> From<ErrorKind> for Result<T> {
    fn from(kind: ErrorKind) -> Self {
        Err(kind.into())
    }
}

impl Error {
    pub fn new_ext<E>(kind: ErrorKind, error: E) -> Error
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let source = error.into();
        Error {
            kind,
            source: Some(source),
        }
    }

    pub fn new(kind: ErrorKind) -> Error {
        Error { kind, source: None }
    }

    /// Detail message, if any.
    pub fn detail(&self) -> Option<String> {
        self.source.as_ref().map(|src| src.to_string())
    }

    pub fn to_string_full(&self) -> String {
        let mut err_string = self.to_string();
        if let Some(detail) = self.detail() {
            let mut max_len = std::cmp::min(detail.len(), MAX_ERROR_SOURCE_STRING_LENGTH);
            while !detail.is_char_boundary(max_len) {
                max_len -= 1;
            }
            err_string.push_str(": ");
            err_string.push_str(&detail[..max_len]);
        }
        err_string
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Error) -> bool {
        self.kind == other.kind && self.detail() == other.detail()
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self.source {
            None => None,
            Some(ref source) => Some(source.as_ref()),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.kind)
    }
}
