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

use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Malformed calendar URI")]
    InvalidUri,
    #[error("Unsafe calendar name")]
    UnsafeName,
    #[error("No listener given for load/create request")]
    NilListener,
    #[error("A backend is already registered for this URI")]
    AlreadyRegistered,
    #[error("Calendar does not exist")]
    NoSuchResource,
    #[error("Calendar already exists")]
    AlreadyExists,
    #[error("Listener could not be notified")]
    ListenerGone,
    #[error("Job queue has been shut down")]
    QueueClosed,
    #[error("Backend has already been closed")]
    BackendClosed,
    #[error("No backend handles URI scheme '{0}'")]
    UnsupportedScheme(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    TomlDe(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSer(#[from] toml::ser::Error),
}
