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

//! The calendar factory.
//!
//! Callers ask the factory to load or create a calendar by URI, handing over
//! a listener. The request is queued and `submit_*` returns immediately; a
//! worker thread later opens (or reuses) the backend, attaches a new
//! `ClientSession`, and reports the outcome to the listener.
//!
//! The factory does not own any global state. The registry it uses is passed
//! in, so several factories (or tests) can each have their own.

pub mod backend;
pub mod job;
pub mod listener;
pub mod registry;
pub mod session;
pub mod uri;

#[cfg(test)]
mod integration_tests;

use std::io;
use std::sync::Arc;

use log::debug;

pub use self::backend::{BackendHandle, BackendProvider, CalBackend};
pub use self::job::{Job, JobKind};
pub use self::listener::{
    listener, result_channel, Listener, ListenerRef, LoadResult, LoadStatus,
};
pub use self::registry::BackendRegistry;
pub use self::session::ClientSession;
pub use self::uri::ResourceUri;

use crate::support::error::Error;
use crate::support::threading::JobQueue;

pub struct CalFactory {
    registry: Arc<BackendRegistry>,
    queue: JobQueue<Job>,
}

impl CalFactory {
    /// Create a factory whose jobs run on `workers` threads.
    pub fn new(
        registry: Arc<BackendRegistry>,
        provider: Arc<dyn BackendProvider>,
        workers: usize,
    ) -> io::Result<Self> {
        let queue = {
            let registry = Arc::clone(&registry);
            JobQueue::new("calfactory", workers, move |job: Job| {
                job.run(&registry, &*provider)
            })?
        };

        Ok(CalFactory { registry, queue })
    }

    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Queue a request to open the calendar at `uri`.
    ///
    /// The listener receives `Success` with a session, or `Error`.
    pub fn submit_load(
        &self,
        uri: &str,
        listener: ListenerRef,
    ) -> Result<(), Error> {
        self.submit(uri, JobKind::Load, listener)
    }

    /// Queue a request to create a calendar at `uri`.
    ///
    /// The listener receives `Success` with a session, `InUse` if the
    /// calendar is already open, or `Error`.
    pub fn submit_create(
        &self,
        uri: &str,
        listener: ListenerRef,
    ) -> Result<(), Error> {
        self.submit(uri, JobKind::Create, listener)
    }

    /// Queue a job of the given kind.
    ///
    /// A nil listener or malformed URI is rejected here, before anything is
    /// queued, as is any request made after `shutdown` (`QueueClosed`). In
    /// all of these cases the listener is not called.
    pub fn submit(
        &self,
        uri: &str,
        kind: JobKind,
        listener: ListenerRef,
    ) -> Result<(), Error> {
        let listener = listener.ok_or(Error::NilListener)?;
        let uri = ResourceUri::parse(uri)?;
        debug!("Queueing {:?} of {}", kind, uri);

        self.queue
            .submit(Job::new(uri, kind, listener))
            .map_err(|job| {
                job.reject();
                Error::QueueClosed
            })
    }

    /// Call `observer` whenever the last open calendar is torn down.
    pub fn on_last_backend_gone(
        &self,
        observer: impl Fn() + Send + Sync + 'static,
    ) {
        self.registry.on_empty(observer);
    }

    /// Stop accepting requests and wait for queued ones to finish.
    pub fn shutdown(&self) {
        self.queue.shutdown();
    }
}
