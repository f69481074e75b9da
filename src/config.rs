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

//! Node configuration.
//!
//! The configuration is a JSON document, omitted keys take their default
//! value. Only `name` is mandatory.
//!
//! ```json
//! {
//!     "name": "O=Mars, L=FIFTH, C=GB, OU=planet",
//!     "serial": 1,
//!     "session_timeout_ms": 30000,
//!     "page_size": 100
//! }
//! ```

use crate::{base::X500Name, flow::FlowConfig, Error, ErrorKind, Result};
use std::{fs, path::Path};

const DEFAULT_SERIAL: u64 = 1;
const DEFAULT_SESSION_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_PAGE_SIZE: usize = 100;

fn default_serial() -> u64 {
    DEFAULT_SERIAL
}

fn default_session_timeout_ms() -> u64 {
    DEFAULT_SESSION_TIMEOUT_MS
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

/// Node configuration.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Legal name of the node party.
    pub name: String,
    /// Node serial, reported by identity requests.
    #[serde(default = "default_serial")]
    pub serial: u64,
    /// Max time a flow waits for a counterparty message.
    #[serde(default = "default_session_timeout_ms")]
    pub session_timeout_ms: u64,
    /// Ledger query page size.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

impl NodeConfig {
    /// Load the configuration from a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: NodeConfig =
            serde_json::from_str(json).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        config.legal_name()?;
        Ok(config)
    }

    /// Load the configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|err| {
            Error::new_ext(ErrorKind::Other, format!("{}: {}", path.display(), err))
        })?;
        Self::from_json(&json)
    }

    /// Parsed node legal name.
    pub fn legal_name(&self) -> Result<X500Name> {
        self.name.parse()
    }

    /// Flow engine configuration.
    pub fn flow_config(&self) -> FlowConfig {
        FlowConfig {
            session_timeout_ms: self.session_timeout_ms,
            page_size: self.page_size,
        }
    }
}
