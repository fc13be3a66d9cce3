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

//! The URI to backend mapping shared by all jobs.
//!
//! Each URI moves through `absent -> loading -> loaded -> closing -> absent`.
//! While a URI is loading or closing, other jobs wanting the same URI wait
//! for it to resolve instead of opening it a second time, so every URI has
//! at most one live backend no matter how many workers there are.
//!
//! A URI only leaves the loaded state when its backend reports that the last
//! session has detached. The backend is closed before the URI becomes
//! absent again. When that leaves no backends at all, the "empty" observers
//! are notified so the owning process can decide whether to exit.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use log::{debug, info, warn};

use super::backend::BackendHandle;
use super::uri::ResourceUri;
use crate::support::error::Error;

type EmptyObserver = Arc<dyn Fn() + Send + Sync>;
type Slots = HashMap<ResourceUri, Slot>;

enum Slot {
    Loading,
    Loaded(Arc<BackendHandle>),
    /// The backend's store is being closed; nothing may open the URI yet.
    Closing,
}

#[derive(Default)]
pub struct BackendRegistry {
    slots: Mutex<Slots>,
    resolved: Condvar,
    empty_observers: Mutex<Vec<EmptyObserver>>,
}

/// Result of `BackendRegistry::claim`.
pub(super) enum Claim<'a> {
    /// The URI is already open.
    Loaded(Arc<BackendHandle>),
    /// The URI is now marked as loading on behalf of the caller, who must
    /// either complete the ticket or drop it.
    Vacant(LoadTicket<'a>),
}

/// Exclusive right to open one URI.
///
/// Dropping the ticket without completing it returns the URI to the absent
/// state and wakes anyone waiting on it.
pub(super) struct LoadTicket<'a> {
    registry: &'a BackendRegistry,
    uri: ResourceUri,
    completed: bool,
}

impl BackendRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(BackendRegistry::default())
    }

    /// Return the backend currently open for `uri`, if any.
    pub fn lookup(&self, uri: &ResourceUri) -> Option<Arc<BackendHandle>> {
        match self.slots.lock().unwrap().get(uri) {
            Some(&Slot::Loaded(ref handle)) => Some(Arc::clone(handle)),
            _ => None,
        }
    }

    /// Record `handle` as the backend for `uri`.
    ///
    /// It is a contract violation to register a URI which already has a
    /// backend; callers must `lookup` first. This is an assertion failure in
    /// debug builds and `AlreadyRegistered` otherwise. A handle which has
    /// already been closed is rejected with `BackendClosed`.
    ///
    /// Registering a URI that a job is currently loading is allowed; the job
    /// will discard what it loaded and use `handle` instead. If the previous
    /// backend of `uri` is still closing, this waits for it to finish.
    pub fn register(
        &self,
        uri: ResourceUri,
        handle: Arc<BackendHandle>,
    ) -> Result<(), Error> {
        debug_assert_eq!(&uri, handle.uri());

        let mut slots = self.wait_while_closing(&uri);
        if let Some(&Slot::Loaded(_)) = slots.get(&uri) {
            debug_assert!(false, "double registration of {}", uri);
            return Err(Error::AlreadyRegistered);
        }

        if !handle.is_open() {
            return Err(Error::BackendClosed);
        }

        info!("Registered backend for {}", uri);
        slots.insert(uri, Slot::Loaded(handle));
        self.resolved.notify_all();
        Ok(())
    }

    /// Tear down and remove the backend for `uri`.
    ///
    /// This is only valid once the backend has no sessions left, which is
    /// normally handled by the backend itself when its last session
    /// detaches. Unregistering a backend that still has sessions attached
    /// is a contract violation: an assertion failure in debug builds, and
    /// otherwise the entry is left alone and `None` is returned.
    ///
    /// If this removes the last backend, the empty observers are notified.
    pub fn unregister(&self, uri: &ResourceUri) -> Option<Arc<BackendHandle>> {
        let handle = self.lookup(uri)?;
        if !self.tear_down(&handle) {
            debug_assert!(
                false,
                "unregistering {} with sessions attached",
                uri
            );
            return None;
        }

        Some(handle)
    }

    /// The number of live backends, counting those still being closed.
    pub fn len(&self) -> usize {
        live_count(&self.slots.lock().unwrap())
    }

    pub fn is_empty(&self) -> bool {
        0 == self.len()
    }

    /// Call `observer` each time the registry goes from having at least one
    /// live backend to having none.
    ///
    /// Observers run on whichever thread tore down the last backend, without
    /// any registry lock held.
    pub fn on_empty(&self, observer: impl Fn() + Send + Sync + 'static) {
        self.empty_observers
            .lock()
            .unwrap()
            .push(Arc::new(observer));
    }

    /// Find the backend for `uri`, or take responsibility for loading it.
    ///
    /// If another job is loading `uri`, or its previous backend is still
    /// closing, this blocks until that resolves.
    pub(super) fn claim(&self, uri: &ResourceUri) -> Claim<'_> {
        let mut slots = self.slots.lock().unwrap();
        loop {
            match slots.get(uri) {
                Some(&Slot::Loaded(ref handle)) => {
                    return Claim::Loaded(Arc::clone(handle));
                }
                Some(&Slot::Loading) | Some(&Slot::Closing) => {
                    debug!("Waiting for in-flight load or close of {}", uri);
                    slots = self.resolved.wait(slots).unwrap();
                }
                None => {
                    slots.insert(uri.clone(), Slot::Loading);
                    return Claim::Vacant(LoadTicket {
                        registry: self,
                        uri: uri.clone(),
                        completed: false,
                    });
                }
            }
        }
    }

    /// Called by a backend when its last session has detached.
    ///
    /// If no session was attached in the meantime, the backend is closed and,
    /// if it is the one registered for its URI, unregistered.
    pub(super) fn notify_closed(&self, handle: &BackendHandle) {
        self.tear_down(handle);
    }

    /// Close `handle` if it has no sessions, returning whether it did.
    ///
    /// A registered handle stays in the closing state until its store has
    /// been closed, and only then is its URI removed.
    fn tear_down(&self, handle: &BackendHandle) -> bool {
        let (store, registered) = {
            let mut slots = self.slots.lock().unwrap();
            let store = match handle.take_if_idle() {
                Some(store) => store,
                None => return false,
            };

            let registered = match slots.get(handle.uri()) {
                Some(&Slot::Loaded(ref current)) => {
                    std::ptr::eq(Arc::as_ptr(current), handle)
                }
                _ => false,
            };

            if registered {
                slots.insert(handle.uri().clone(), Slot::Closing);
            }

            (store, registered)
        };

        handle.close_store(store);

        if registered {
            let now_empty = {
                let mut slots = self.slots.lock().unwrap();
                slots.remove(handle.uri());
                info!("Unregistered backend for {}", handle.uri());
                self.resolved.notify_all();
                0 == live_count(&slots)
            };

            if now_empty {
                self.fire_empty();
            }
        }

        true
    }

    fn wait_while_closing(&self, uri: &ResourceUri) -> MutexGuard<'_, Slots> {
        let mut slots = self.slots.lock().unwrap();
        while let Some(&Slot::Closing) = slots.get(uri) {
            slots = self.resolved.wait(slots).unwrap();
        }
        slots
    }

    fn fire_empty(&self) {
        info!("No more backends loaded");
        let observers = self.empty_observers.lock().unwrap().clone();
        for observer in observers {
            observer();
        }
    }
}

impl LoadTicket<'_> {
    /// Register `handle` as the result of this load.
    ///
    /// If some other backend got registered for the URI while loading, that
    /// backend is left in place and returned as the error, and the caller
    /// must discard `handle`.
    pub(super) fn complete(
        mut self,
        handle: Arc<BackendHandle>,
    ) -> Result<(), Arc<BackendHandle>> {
        self.completed = true;

        let mut slots = self.registry.wait_while_closing(&self.uri);
        let result = match slots.get(&self.uri) {
            Some(&Slot::Loaded(ref winner)) => {
                warn!(
                    "{} was registered while being loaded; \
                     discarding redundant backend",
                    self.uri
                );
                Err(Arc::clone(winner))
            }
            _ => {
                info!("Registered backend for {}", self.uri);
                slots.insert(self.uri.clone(), Slot::Loaded(handle));
                Ok(())
            }
        };

        self.registry.resolved.notify_all();
        result
    }
}

impl Drop for LoadTicket<'_> {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let mut slots = self.registry.slots.lock().unwrap();
        if let Some(&Slot::Loading) = slots.get(&self.uri) {
            slots.remove(&self.uri);
        }
        self.registry.resolved.notify_all();
    }
}

/// Backends which are loaded or still closing.
fn live_count(slots: &Slots) -> usize {
    slots
        .values()
        .filter(|s| !matches!(**s, Slot::Loading))
        .count()
}
