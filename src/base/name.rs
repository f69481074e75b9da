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

//! Structured party names.
//!
//! Names follow the X.500 distinguished name subset used to address ledger
//! participants: organisation (`O`), locality (`L`) and country (`C`) are
//! mandatory, common name (`CN`), organisation unit (`OU`) and state (`ST`)
//! are optional. The organisation unit classifies the entity (e.g. "planet").

use crate::{Error, ErrorKind, Result};
use std::{fmt::Display, str::FromStr};

/// Party structured name.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct X500Name {
    /// Common name (`CN`).
    pub common_name: Option<String>,
    /// Organisation unit (`OU`), used as entity classifier.
    pub organisation_unit: Option<String>,
    /// Organisation (`O`).
    pub organisation: String,
    /// Locality (`L`).
    pub locality: String,
    /// State or province (`ST`).
    pub state: Option<String>,
    /// Two letters country code (`C`).
    pub country: String,
}

impl X500Name {
    pub fn new(organisation: &str, locality: &str, country: &str) -> Self {
        X500Name {
            common_name: None,
            organisation_unit: None,
            organisation: organisation.to_owned(),
            locality: locality.to_owned(),
            state: None,
            country: country.to_owned(),
        }
    }

    pub fn with_unit(mut self, unit: &str) -> Self {
        self.organisation_unit = Some(unit.to_owned());
        self
    }

    /// Entity class declared by the organisation unit.
    /// Blank units are reported as missing.
    pub fn class(&self) -> Option<&str> {
        self.organisation_unit
            .as_deref()
            .map(str::trim)
            .filter(|unit| !unit.is_empty())
    }

    /// Parse a comma separated list of `ATTRIBUTE=value` pairs.
    pub fn parse(name: &str) -> Result<Self> {
        let mut common_name = None;
        let mut organisation_unit = None;
        let mut organisation = None;
        let mut locality = None;
        let mut state = None;
        let mut country = None;

        for attr in name.split(',') {
            let (key, value) = attr.split_once('=').ok_or_else(|| {
                Error::new_ext(ErrorKind::MalformedData, format!("bad attribute '{}'", attr))
            })?;
            let key = key.trim().to_ascii_uppercase();
            let slot = match key.as_str() {
                "CN" => &mut common_name,
                "OU" => &mut organisation_unit,
                "O" => &mut organisation,
                "L" => &mut locality,
                "ST" => &mut state,
                "C" => &mut country,
                _ => {
                    return Err(Error::new_ext(
                        ErrorKind::MalformedData,
                        format!("unknown attribute '{}'", key),
                    ))
                }
            };
            if slot.replace(value.trim().to_owned()).is_some() {
                return Err(Error::new_ext(
                    ErrorKind::MalformedData,
                    format!("duplicated attribute '{}'", key),
                ));
            }
        }

        let required = |value: Option<String>, key: &str| match value {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("missing attribute '{}'", key),
            )),
        };
        let organisation = required(organisation, "O")?;
        let locality = required(locality, "L")?;
        let country = required(country, "C")?;
        if country.len() != 2 || !country.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                format!("invalid country code '{}'", country),
            ));
        }

        Ok(X500Name {
            common_name,
            organisation_unit,
            organisation,
            locality,
            state,
            country: country.to_ascii_uppercase(),
        })
    }
}

impl FromStr for X500Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        X500Name::parse(s)
    }
}

impl Display for X500Name {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut attrs = vec![];
        if let Some(cn) = &self.common_name {
            attrs.push(format!("CN={}", cn));
        }
        if let Some(ou) = &self.organisation_unit {
            attrs.push(format!("OU={}", ou));
        }
        attrs.push(format!("O={}", self.organisation));
        attrs.push(format!("L={}", self.locality));
        if let Some(st) = &self.state {
            attrs.push(format!("ST={}", st));
        }
        attrs.push(format!("C={}", self.country));
        write!(f, "{}", attrs.join(", "))
    }
}
