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

//! Calendars stored as files.
//!
//! `file://NAME` refers to `NAME.toml` in the provider's data directory. NAME
//! must be a safe name, so a URI can never reach outside that directory.
//!
//! The file holds a single `objects` table mapping UIDs to iCalendar text.
//! It is rewritten atomically after every change, so there is nothing left
//! to flush when the calendar is closed.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::factory::{BackendProvider, CalBackend, ResourceUri};
use crate::support::{
    error::Error,
    file_ops::{self, ErrorTransforms, IgnoreKinds},
    safe_name::is_safe_name,
};

const MAX_CALENDAR_SIZE: u64 = 64 * 1024 * 1024;
const CALENDAR_MODE: u32 = 0o600;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
struct CalendarFile {
    #[serde(default)]
    objects: BTreeMap<String, String>,
}

pub struct FileProvider {
    data_dir: PathBuf,
}

impl FileProvider {
    /// Create a provider storing calendars under `data_dir`, creating the
    /// directory if it does not exist yet.
    pub fn new(data_dir: PathBuf) -> Result<Self, Error> {
        fs::DirBuilder::new()
            .mode(0o750)
            .create(&data_dir)
            .ignore_already_exists()?;
        Ok(FileProvider { data_dir })
    }

    fn path_for(&self, uri: &ResourceUri) -> Result<PathBuf, Error> {
        let name = uri.location();
        if !is_safe_name(name) {
            return Err(Error::UnsafeName);
        }

        Ok(self.data_dir.join(format!("{}.toml", name)))
    }
}

impl BackendProvider for FileProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        let path = self.path_for(uri)?;
        let data = file_ops::slurp(&path, MAX_CALENDAR_SIZE)
            .on_not_found(Error::NoSuchResource)?;
        let calendar: CalendarFile = toml::from_slice(&data)?;

        debug!(
            "Read {} object(s) from {}",
            calendar.objects.len(),
            path.display()
        );
        Ok(Box::new(FileStore { path, calendar }))
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        let path = self.path_for(uri)?;
        let calendar = CalendarFile::default();
        file_ops::spit(
            &path,
            false,
            CALENDAR_MODE,
            toml::to_string(&calendar)?.as_bytes(),
        )
        .on_exists(Error::AlreadyExists)?;

        info!("Created {}", path.display());
        Ok(Box::new(FileStore { path, calendar }))
    }
}

struct FileStore {
    path: PathBuf,
    calendar: CalendarFile,
}

impl FileStore {
    fn save(&self) -> Result<(), Error> {
        let data = toml::to_string(&self.calendar)?;
        file_ops::spit(&self.path, true, CALENDAR_MODE, data.as_bytes())?;
        Ok(())
    }
}

impl CalBackend for FileStore {
    fn get_uids(&self) -> Vec<String> {
        self.calendar.objects.keys().cloned().collect()
    }

    fn get_object(&self, uid: &str) -> Option<String> {
        self.calendar.objects.get(uid).cloned()
    }

    fn update_object(&mut self, uid: &str, ical: &str) -> Result<(), Error> {
        let previous = self
            .calendar
            .objects
            .insert(uid.to_owned(), ical.to_owned());
        if let Err(e) = self.save() {
            // Keep memory consistent with what is on disk
            match previous {
                Some(previous) => {
                    self.calendar.objects.insert(uid.to_owned(), previous);
                }
                None => {
                    self.calendar.objects.remove(uid);
                }
            }
            return Err(e);
        }

        Ok(())
    }

    fn remove_object(&mut self, uid: &str) -> Result<bool, Error> {
        let previous = match self.calendar.objects.remove(uid) {
            Some(previous) => previous,
            None => return Ok(false),
        };

        if let Err(e) = self.save() {
            self.calendar.objects.insert(uid.to_owned(), previous);
            return Err(e);
        }

        Ok(true)
    }

    fn close(&mut self) -> Result<(), Error> {
        debug!("Closing {}", self.path.display());
        Ok(())
    }
}
