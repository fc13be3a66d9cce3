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

//! Load and create jobs.
//!
//! A job carries one request from the caller's thread to a worker. Whatever
//! happens once it has been queued, its listener hears about it exactly once:
//! the normal path notifies explicitly, and a job which is dropped without
//! having done so (unwound by a panic, or left behind by a worker) reports
//! `Error` from its destructor.

use std::sync::Arc;

use log::{debug, info, warn};

use super::backend::{BackendHandle, BackendProvider, CalBackend};
use super::listener::{Listener, LoadStatus};
use super::registry::{BackendRegistry, Claim, LoadTicket};
use super::session::ClientSession;
use super::uri::ResourceUri;
use crate::support::{error::Error, log_prefix::LogPrefix};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobKind {
    /// Open an existing calendar, reusing it if already open.
    Load,
    /// Create a new calendar; report `InUse` if it is already open.
    Create,
}

pub struct Job {
    uri: ResourceUri,
    kind: JobKind,
    listener: Option<Box<dyn Listener>>,
    log_prefix: LogPrefix,
}

type Outcome = (LoadStatus, Option<ClientSession>);

impl Job {
    pub fn new(
        uri: ResourceUri,
        kind: JobKind,
        listener: Box<dyn Listener>,
    ) -> Self {
        let log_prefix = LogPrefix::new(
            match kind {
                JobKind::Load => "load",
                JobKind::Create => "create",
            }
            .to_owned(),
        );
        log_prefix.set_uri(uri.to_string());

        Job {
            uri,
            kind,
            listener: Some(listener),
            log_prefix,
        }
    }

    /// Execute the job and notify the listener.
    pub fn run(
        mut self,
        registry: &Arc<BackendRegistry>,
        provider: &dyn BackendProvider,
    ) {
        let (status, session) = match self.kind {
            JobKind::Load => self.load(registry, provider),
            JobKind::Create => self.create(registry, provider),
        };
        self.notify(status, session);
    }

    fn load(
        &self,
        registry: &Arc<BackendRegistry>,
        provider: &dyn BackendProvider,
    ) -> Outcome {
        loop {
            match registry.claim(&self.uri) {
                Claim::Loaded(handle) => match handle.add_client() {
                    Ok(session) => return (LoadStatus::Success, Some(session)),
                    // Torn down between lookup and attach; claiming again
                    // waits for the close to finish.
                    Err(Error::BackendClosed) => continue,
                    Err(e) => return self.failed(e),
                },

                Claim::Vacant(ticket) => {
                    return match provider.open(&self.uri) {
                        Ok(store) => {
                            info!("{} Opened", self.log_prefix);
                            self.install(registry, ticket, store)
                        }
                        Err(e) => self.failed(e),
                    };
                }
            }
        }
    }

    fn create(
        &self,
        registry: &Arc<BackendRegistry>,
        provider: &dyn BackendProvider,
    ) -> Outcome {
        match registry.claim(&self.uri) {
            Claim::Loaded(_) => {
                info!("{} Already in use", self.log_prefix);
                (LoadStatus::InUse, None)
            }

            Claim::Vacant(ticket) => match provider.create(&self.uri) {
                Ok(store) => {
                    info!("{} Created", self.log_prefix);
                    self.install(registry, ticket, store)
                }
                Err(e) => self.failed(e),
            },
        }
    }

    /// Wrap `store` in a handle, attach the caller's session, and register
    /// it.
    ///
    /// The session is attached before registering so that no other job can
    /// observe the backend without any sessions.
    fn install(
        &self,
        registry: &Arc<BackendRegistry>,
        ticket: LoadTicket<'_>,
        store: Box<dyn CalBackend>,
    ) -> Outcome {
        let handle = BackendHandle::new(self.uri.clone(), store, registry);
        let session = match handle.add_client() {
            Ok(session) => session,
            Err(e) => return self.failed(e),
        };

        match ticket.complete(Arc::clone(&handle)) {
            Ok(()) => (LoadStatus::Success, Some(session)),

            Err(winner) => {
                // Detaching the only session closes the redundant backend.
                drop(session);

                match self.kind {
                    JobKind::Create => (LoadStatus::InUse, None),
                    JobKind::Load => match winner.add_client() {
                        Ok(session) => (LoadStatus::Success, Some(session)),
                        Err(e) => self.failed(e),
                    },
                }
            }
        }
    }

    /// Discard a job that will never run, without notifying its listener.
    pub(super) fn reject(mut self) {
        debug!("{} Rejected; the factory has shut down", self.log_prefix);
        self.listener = None;
    }

    fn failed(&self, e: Error) -> Outcome {
        warn!("{} Failed: {}", self.log_prefix, e);
        (LoadStatus::Error, None)
    }

    fn notify(&mut self, status: LoadStatus, session: Option<ClientSession>) {
        if let Some(listener) = self.listener.take() {
            if let Err(e) = listener.cal_loaded(status, session) {
                warn!(
                    "{} Could not notify the listener: {}",
                    self.log_prefix, e
                );
            }
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if self.listener.is_some() {
            warn!("{} Abandoned before completion", self.log_prefix);
            self.notify(LoadStatus::Error, None);
        }
    }
}
