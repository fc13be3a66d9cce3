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

//! Concrete calendar storage.
//!
//! Each provider implements `BackendProvider` for one kind of storage. The
//! factory itself never looks inside a store.

pub mod file;
pub mod memory;
pub mod scheme;

pub use self::file::FileProvider;
pub use self::memory::MemoryProvider;
pub use self::scheme::SchemeProvider;
