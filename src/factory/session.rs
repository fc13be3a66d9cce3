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

use std::fmt;
use std::sync::Arc;

use log::debug;

use super::backend::BackendHandle;
use super::uri::ResourceUri;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// A caller's binding to an open calendar.
///
/// The session keeps its backend alive. Dropping it (or calling `close`)
/// detaches it; when the last session of a backend detaches, the backend is
/// torn down and its URI unregistered.
pub struct ClientSession {
    id: u64,
    backend: Arc<BackendHandle>,
    log_prefix: LogPrefix,
}

impl ClientSession {
    pub(super) fn new(
        id: u64,
        backend: Arc<BackendHandle>,
        log_prefix: LogPrefix,
    ) -> Self {
        ClientSession {
            id,
            backend,
            log_prefix,
        }
    }

    /// The session's identifier, unique among sessions of the same backend.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn uri(&self) -> &ResourceUri {
        self.backend.uri()
    }

    /// Whether `self` and `other` are attached to the very same backend
    /// instance.
    pub fn same_backend(&self, other: &ClientSession) -> bool {
        Arc::ptr_eq(&self.backend, &other.backend)
    }

    /// Whether this session is attached to `handle`.
    pub fn is_attached_to(&self, handle: &BackendHandle) -> bool {
        std::ptr::eq(Arc::as_ptr(&self.backend), handle)
    }

    pub fn get_uids(&self) -> Result<Vec<String>, Error> {
        self.backend.with_store(|store| Ok(store.get_uids()))
    }

    pub fn get_object(&self, uid: &str) -> Result<Option<String>, Error> {
        self.backend.with_store(|store| Ok(store.get_object(uid)))
    }

    pub fn update_object(&self, uid: &str, ical: &str) -> Result<(), Error> {
        debug!("{} Update object {}", self.log_prefix, uid);
        self.backend
            .with_store(|store| store.update_object(uid, ical))
    }

    pub fn remove_object(&self, uid: &str) -> Result<bool, Error> {
        debug!("{} Remove object {}", self.log_prefix, uid);
        self.backend.with_store(|store| store.remove_object(uid))
    }

    /// Detach from the backend.
    pub fn close(self) {}
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.backend.remove_client(self.id);
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("uri", self.backend.uri())
            .finish()
    }
}
