//-
// Copyright (c) 2020, Jason Lingle
//
// This file is part of Calfactory.
//
// Calfactory is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option)
// any later version.
//
// Calfactory is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU General Public License for
// more details.
//
// You should have received a copy of the GNU General Public License along with
// Calfactory. If not, see <http://www.gnu.org/licenses/>.

//! Canonical calendar URIs.
//!
//! Backends are keyed by URI, so two spellings of the same calendar must
//! compare equal. A `ResourceUri` is always in canonical form: the scheme is
//! lower-cased and trailing slashes are removed from the location.

use std::fmt;
use std::str::FromStr;

use crate::support::error::Error;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceUri {
    text: String,
    scheme_len: usize,
}

impl ResourceUri {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let split = raw.find("://").ok_or(Error::InvalidUri)?;
        let scheme = &raw[..split];
        let location = raw[split + "://".len()..].trim_end_matches('/');

        if !is_valid_scheme(scheme)
            || location.is_empty()
            || location.chars().any(char::is_control)
        {
            return Err(Error::InvalidUri);
        }

        let scheme = scheme.to_ascii_lowercase();
        Ok(ResourceUri {
            scheme_len: scheme.len(),
            text: format!("{}://{}", scheme, location),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.text[..self.scheme_len]
    }

    /// Everything after `scheme://`.
    pub fn location(&self) -> &str {
        &self.text[self.scheme_len + "://".len()..]
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }
}

fn is_valid_scheme(scheme: &str) -> bool {
    let mut chars = scheme.chars();
    chars.next().map_or(false, |c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
}

impl FromStr for ResourceUri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        ResourceUri::parse(s)
    }
}

impl fmt::Display for ResourceUri {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.text)
    }
}
