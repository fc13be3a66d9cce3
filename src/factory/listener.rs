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

//! The one-shot result callback given with every load or create request.

use crossbeam::channel;

use super::session::ClientSession;
use crate::support::error::Error;

/// Terminal outcome of a load or create job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    /// The calendar is open and a session was attached for the caller.
    Success,
    /// The calendar could not be opened or created.
    Error,
    /// A create was requested for a calendar which is already open.
    ///
    /// This is not a failure; the caller may simply load it instead.
    InUse,
}

/// Receives the result of exactly one job.
///
/// `cal_loaded` is invoked from a worker thread, never from the thread that
/// submitted the job. `session` is present if and only if `status` is
/// `Success`.
pub trait Listener: Send + 'static {
    fn cal_loaded(
        self: Box<Self>,
        status: LoadStatus,
        session: Option<ClientSession>,
    ) -> Result<(), Error>;
}

/// A listener as accepted by the factory. `None` is a nil listener and is
/// always rejected.
pub type ListenerRef = Option<Box<dyn Listener>>;

impl<F> Listener for F
where
    F: FnOnce(LoadStatus, Option<ClientSession>) + Send + 'static,
{
    fn cal_loaded(
        self: Box<Self>,
        status: LoadStatus,
        session: Option<ClientSession>,
    ) -> Result<(), Error> {
        (*self)(status, session);
        Ok(())
    }
}

/// Wrap a closure as a listener.
pub fn listener<F>(f: F) -> ListenerRef
where
    F: FnOnce(LoadStatus, Option<ClientSession>) + Send + 'static,
{
    Some(Box::new(f))
}

#[derive(Debug)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub session: Option<ClientSession>,
}

/// Listener which forwards the result into a channel.
///
/// If the receiver is gone by the time the job finishes, delivery fails with
/// `ListenerGone` and the session, if any, is dropped.
pub struct ChannelListener(channel::Sender<LoadResult>);

impl Listener for ChannelListener {
    fn cal_loaded(
        self: Box<Self>,
        status: LoadStatus,
        session: Option<ClientSession>,
    ) -> Result<(), Error> {
        self.0
            .send(LoadResult { status, session })
            .map_err(|_| Error::ListenerGone)
    }
}

/// Create a listener whose result can be received from the returned channel.
pub fn result_channel() -> (ListenerRef, channel::Receiver<LoadResult>) {
    let (sender, receiver) = channel::bounded(1);
    (Some(Box::new(ChannelListener(sender))), receiver)
}
