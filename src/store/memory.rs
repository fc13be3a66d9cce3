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

//! Calendars held in memory.
//!
//! Created calendars are not persisted anywhere: once the backend is torn
//! down, its contents are discarded and loading the URI again fails. Only
//! calendars seeded with `with_resource` survive teardown, for as long as the
//! provider itself lives.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::factory::{BackendProvider, CalBackend, ResourceUri};
use crate::support::error::Error;

type Objects = Arc<Mutex<BTreeMap<String, String>>>;

#[derive(Default)]
pub struct MemoryProvider {
    durable: Mutex<HashMap<ResourceUri, Objects>>,
    counters: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    creates: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryProvider {
    pub fn new() -> Self {
        MemoryProvider::default()
    }

    /// Add an empty calendar at `uri` which can be loaded and which keeps its
    /// contents across teardown.
    pub fn with_resource(self, uri: &str) -> Result<Self, Error> {
        self.durable
            .lock()
            .unwrap()
            .insert(ResourceUri::parse(uri)?, Objects::default());
        Ok(self)
    }

    /// The number of successful `open` calls.
    pub fn open_count(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    /// The number of successful `create` calls.
    pub fn create_count(&self) -> usize {
        self.counters.creates.load(Ordering::SeqCst)
    }

    /// The number of stores that have been closed.
    pub fn close_count(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    fn store(&self, objects: Objects) -> Box<dyn CalBackend> {
        Box::new(MemoryStore {
            objects,
            counters: Arc::clone(&self.counters),
        })
    }
}

impl BackendProvider for MemoryProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        let objects = self
            .durable
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or(Error::NoSuchResource)?;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(self.store(objects))
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        if self.durable.lock().unwrap().contains_key(uri) {
            return Err(Error::AlreadyExists);
        }

        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        Ok(self.store(Objects::default()))
    }
}

struct MemoryStore {
    objects: Objects,
    counters: Arc<Counters>,
}

impl CalBackend for MemoryStore {
    fn get_uids(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    fn get_object(&self, uid: &str) -> Option<String> {
        self.objects.lock().unwrap().get(uid).cloned()
    }

    fn update_object(&mut self, uid: &str, ical: &str) -> Result<(), Error> {
        self.objects
            .lock()
            .unwrap()
            .insert(uid.to_owned(), ical.to_owned());
        Ok(())
    }

    fn remove_object(&mut self, uid: &str) -> Result<bool, Error> {
        Ok(self.objects.lock().unwrap().remove(uid).is_some())
    }

    fn close(&mut self) -> Result<(), Error> {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
