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

//! Open calendars and the sessions attached to them.
//!
//! A `BackendHandle` wraps the storage-specific `CalBackend` for one URI and
//! tracks which client sessions are attached. When the last session detaches,
//! the handle reports to the registry, which closes the underlying store and
//! then unregisters the URI.
//!
//! Once a handle has been closed it can never gain a new session. This is
//! what keeps sessions from outliving their backend: attaching and closing
//! both happen under the handle's lock, and closing only succeeds while no
//! session is attached.

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};

use log::{debug, error, info};

use super::registry::BackendRegistry;
use super::session::ClientSession;
use super::uri::ResourceUri;
use crate::support::{error::Error, log_prefix::LogPrefix};

/// Storage for a single open calendar.
///
/// Implementations own all of their internal state; the factory only ever
/// reaches it through this trait, one call at a time.
pub trait CalBackend: Send {
    /// List the UIDs of all objects in the calendar.
    fn get_uids(&self) -> Vec<String>;
    /// Fetch the iCalendar text of the object with the given UID.
    fn get_object(&self, uid: &str) -> Option<String>;
    /// Add or replace the object with the given UID.
    fn update_object(&mut self, uid: &str, ical: &str) -> Result<(), Error>;
    /// Remove the object with the given UID, returning whether it existed.
    fn remove_object(&mut self, uid: &str) -> Result<bool, Error>;
    /// Release the calendar. Called exactly once, after the last session has
    /// detached.
    fn close(&mut self) -> Result<(), Error>;
}

/// Opens and creates calendars of some storage type.
pub trait BackendProvider: Send + Sync {
    /// Open an existing calendar.
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error>;
    /// Create a new, empty calendar.
    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error>;
}

pub struct BackendHandle {
    uri: ResourceUri,
    log_prefix: LogPrefix,
    registry: Weak<BackendRegistry>,
    state: Mutex<State>,
}

struct State {
    /// `None` once the backend has been closed.
    store: Option<Box<dyn CalBackend>>,
    sessions: BTreeSet<u64>,
    next_session: u64,
}

impl BackendHandle {
    /// Wrap a freshly opened `store`.
    ///
    /// The handle reports its teardown to `registry`, but is not registered
    /// there by this call.
    pub fn new(
        uri: ResourceUri,
        store: Box<dyn CalBackend>,
        registry: &Arc<BackendRegistry>,
    ) -> Arc<Self> {
        let log_prefix = LogPrefix::new("backend".to_owned());
        log_prefix.set_uri(uri.to_string());

        Arc::new(BackendHandle {
            uri,
            log_prefix,
            registry: Arc::downgrade(registry),
            state: Mutex::new(State {
                store: Some(store),
                sessions: BTreeSet::new(),
                next_session: 1,
            }),
        })
    }

    pub fn uri(&self) -> &ResourceUri {
        &self.uri
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().unwrap().sessions.len()
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().unwrap().store.is_some()
    }

    /// Attach a new client session.
    ///
    /// Fails with `BackendClosed` if the backend has already been torn down.
    pub fn add_client(self: &Arc<Self>) -> Result<ClientSession, Error> {
        let mut state = self.state.lock().unwrap();
        if state.store.is_none() {
            return Err(Error::BackendClosed);
        }

        let id = state.next_session;
        state.next_session += 1;
        state.sessions.insert(id);
        debug!(
            "{} Session {} attached ({} total)",
            self.log_prefix,
            id,
            state.sessions.len()
        );

        let log_prefix = self.log_prefix.deep_clone();
        log_prefix.set_session(id);
        Ok(ClientSession::new(id, Arc::clone(self), log_prefix))
    }

    pub(super) fn remove_client(&self, id: u64) {
        let now_idle = {
            let mut state = self.state.lock().unwrap();
            state.sessions.remove(&id);
            debug!(
                "{} Session {} detached ({} remaining)",
                self.log_prefix,
                id,
                state.sessions.len()
            );
            state.sessions.is_empty()
        };

        if now_idle {
            match self.registry.upgrade() {
                Some(registry) => registry.notify_closed(self),
                None => {
                    if let Some(store) = self.take_if_idle() {
                        self.close_store(store);
                    }
                }
            }
        }
    }

    /// If no sessions are attached, mark the backend closed and return its
    /// store so the caller can close it.
    pub(super) fn take_if_idle(&self) -> Option<Box<dyn CalBackend>> {
        let mut state = self.state.lock().unwrap();
        if state.sessions.is_empty() {
            state.store.take()
        } else {
            None
        }
    }

    /// Close `store`, logging any failure.
    ///
    /// A panic while closing is contained here, since the registry keeps the
    /// URI unavailable until this returns.
    pub(super) fn close_store(&self, mut store: Box<dyn CalBackend>) {
        match panic::catch_unwind(AssertUnwindSafe(|| store.close())) {
            Ok(Ok(())) => info!("{} Closed", self.log_prefix),
            Ok(Err(e)) => {
                error!("{} Error closing backend: {}", self.log_prefix, e)
            }
            Err(_) => {
                error!("{} Backend panicked while closing", self.log_prefix)
            }
        }
    }

    /// Run `f` against the store, failing if the backend has been closed.
    pub(super) fn with_store<R>(
        &self,
        f: impl FnOnce(&mut dyn CalBackend) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let mut state = self.state.lock().unwrap();
        match state.store {
            Some(ref mut store) => f(&mut **store),
            None => Err(Error::BackendClosed),
        }
    }
}

impl fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("BackendHandle")
            .field("uri", &self.uri)
            .field("sessions", &self.session_count())
            .finish()
    }
}
