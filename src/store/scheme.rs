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

use std::collections::HashMap;
use std::sync::Arc;

use crate::factory::{BackendProvider, CalBackend, ResourceUri};
use crate::support::error::Error;

/// Routes each URI to the provider registered for its scheme.
#[derive(Default)]
pub struct SchemeProvider {
    providers: HashMap<String, Arc<dyn BackendProvider>>,
}

impl SchemeProvider {
    pub fn new() -> Self {
        SchemeProvider::default()
    }

    /// Use `provider` for URIs of `scheme` (case-insensitive).
    pub fn with(
        mut self,
        scheme: &str,
        provider: Arc<dyn BackendProvider>,
    ) -> Self {
        self.providers.insert(scheme.to_ascii_lowercase(), provider);
        self
    }

    fn provider(
        &self,
        uri: &ResourceUri,
    ) -> Result<&dyn BackendProvider, Error> {
        self.providers
            .get(uri.scheme())
            .map(|p| &**p)
            .ok_or_else(|| Error::UnsupportedScheme(uri.scheme().to_owned()))
    }
}

impl BackendProvider for SchemeProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        self.provider(uri)?.open(uri)
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        self.provider(uri)?.create(uri)
    }
}
