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

use std::fs;
use std::io::{self, Read};
use std::path::Path;

use log::{error, warn};

use super::main::Action;
use crate::factory::{
    result_channel, CalFactory, ClientSession, JobKind, LoadResult, LoadStatus,
};
use crate::support::error::Error;
use crate::support::sysexits::*;

/// Upper bound on an object read from the command line.
const MAX_INPUT_SIZE: u64 = 16 * 1024 * 1024;

pub(super) fn run(factory: &CalFactory, action: Action) -> Result<(), Sysexit> {
    match action {
        Action::Create { uri } => {
            let result = request(factory, &uri, JobKind::Create)?;
            match result.status {
                LoadStatus::Success => println!("created"),
                LoadStatus::InUse => println!("in use"),
                LoadStatus::Error => {
                    eprintln!("Could not create '{}'", uri);
                    return Err(EX_CANTCREAT);
                }
            }
        }

        Action::Load { uri } => {
            let session = load(factory, &uri)?;
            for uid in session.get_uids().map_err(|e| failed(&uri, e))? {
                println!("{}", uid);
            }
        }

        Action::Get { uri, uid } => {
            let session = load(factory, &uri)?;
            match session.get_object(&uid).map_err(|e| failed(&uri, e))? {
                Some(ical) => print!("{}", ical),
                None => {
                    eprintln!("'{}' has no object '{}'", uri, uid);
                    return Err(EX_DATAERR);
                }
            }
        }

        Action::Put { uri, uid, input } => {
            let ical = read_input(&input)?;
            let session = load(factory, &uri)?;
            session
                .update_object(&uid, &ical)
                .map_err(|e| failed(&uri, e))?;
        }

        Action::Rm { uri, uid } => {
            let session = load(factory, &uri)?;
            if !session.remove_object(&uid).map_err(|e| failed(&uri, e))? {
                eprintln!("'{}' has no object '{}'", uri, uid);
                return Err(EX_DATAERR);
            }
        }
    }

    Ok(())
}

/// Submit a job and wait for its outcome.
fn request(
    factory: &CalFactory,
    uri: &str,
    kind: JobKind,
) -> Result<LoadResult, Sysexit> {
    let (listener, results) = result_channel();
    if let Err(e) = factory.submit(uri, kind, listener) {
        eprintln!("Can't open '{}': {}", uri, e);
        return Err(match e {
            Error::InvalidUri => EX_USAGE,
            _ => EX_SOFTWARE,
        });
    }

    results.recv().map_err(|_| {
        error!("Job for {} finished without reporting back", uri);
        EX_SOFTWARE
    })
}

fn load(factory: &CalFactory, uri: &str) -> Result<ClientSession, Sysexit> {
    let result = request(factory, uri, JobKind::Load)?;
    match (result.status, result.session) {
        (LoadStatus::Success, Some(session)) => Ok(session),
        (status, _) => {
            eprintln!("Could not open '{}' ({:?})", uri, status);
            Err(EX_NOINPUT)
        }
    }
}

fn read_input(path: &Path) -> Result<String, Sysexit> {
    let mut data = String::new();
    let result = if Path::new("-") == path {
        io::stdin()
            .take(MAX_INPUT_SIZE)
            .read_to_string(&mut data)
    } else {
        fs::File::open(path)
            .and_then(|f| f.take(MAX_INPUT_SIZE).read_to_string(&mut data))
    };

    match result {
        Ok(_) => Ok(data),
        Err(e) if io::ErrorKind::NotFound == e.kind() => {
            eprintln!("'{}' does not exist", path.display());
            Err(EX_NOINPUT)
        }
        Err(e) => {
            eprintln!("Error reading '{}': {}", path.display(), e);
            Err(EX_IOERR)
        }
    }
}

fn failed(uri: &str, e: Error) -> Sysexit {
    warn!("Operation on {} failed: {}", uri, e);
    eprintln!("Error accessing '{}': {}", uri, e);
    match e {
        Error::Io(_) | Error::TomlSer(_) => EX_IOERR,
        _ => EX_SOFTWARE,
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::factory::BackendRegistry;
    use crate::store::{FileProvider, MemoryProvider, SchemeProvider};

    struct Setup {
        root: TempDir,
        factory: CalFactory,
    }

    fn set_up() -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let files = FileProvider::new(root.path().join("calendars")).unwrap();
        let provider = SchemeProvider::new()
            .with("file", Arc::new(files))
            .with("memory", Arc::new(MemoryProvider::new()));
        let factory =
            CalFactory::new(BackendRegistry::new(), Arc::new(provider), 1)
                .unwrap();
        Setup { root, factory }
    }

    fn put(setup: &Setup, uri: &str, uid: &str, ical: &str) {
        let input = setup.root.path().join(format!("{}.ics", uid));
        fs::write(&input, ical).unwrap();
        run(
            &setup.factory,
            Action::Put {
                uri: uri.to_owned(),
                uid: uid.to_owned(),
                input,
            },
        )
        .unwrap();
    }

    #[test]
    fn create_put_get_rm() {
        let setup = set_up();
        let uri = "file://work";

        run(
            &setup.factory,
            Action::Create {
                uri: uri.to_owned(),
            },
        )
        .unwrap();
        put(&setup, uri, "meeting", "BEGIN:VEVENT\nEND:VEVENT\n");

        let session = load(&setup.factory, uri).unwrap();
        assert_eq!(vec!["meeting".to_owned()], session.get_uids().unwrap());
        drop(session);

        run(
            &setup.factory,
            Action::Get {
                uri: uri.to_owned(),
                uid: "meeting".to_owned(),
            },
        )
        .unwrap();
        run(
            &setup.factory,
            Action::Rm {
                uri: uri.to_owned(),
                uid: "meeting".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(
            Err(EX_DATAERR),
            run(
                &setup.factory,
                Action::Get {
                    uri: uri.to_owned(),
                    uid: "meeting".to_owned(),
                },
            )
        );
        assert_eq!(
            Err(EX_DATAERR),
            run(
                &setup.factory,
                Action::Rm {
                    uri: uri.to_owned(),
                    uid: "meeting".to_owned(),
                },
            )
        );
    }

    #[test]
    fn create_twice_fails() {
        let setup = set_up();
        let create = || {
            run(
                &setup.factory,
                Action::Create {
                    uri: "file://home".to_owned(),
                },
            )
        };

        assert_eq!(Ok(()), create());
        assert_eq!(Err(EX_CANTCREAT), create());
    }

    #[test]
    fn missing_calendar_is_noinput() {
        let setup = set_up();
        assert_eq!(
            Err(EX_NOINPUT),
            run(
                &setup.factory,
                Action::Load {
                    uri: "file://nowhere".to_owned(),
                },
            )
        );
        assert_eq!(
            Err(EX_NOINPUT),
            run(
                &setup.factory,
                Action::Load {
                    uri: "imap://nowhere".to_owned(),
                },
            )
        );
    }

    #[test]
    fn bad_uri_is_usage_error() {
        let setup = set_up();
        assert_eq!(
            Err(EX_USAGE),
            run(
                &setup.factory,
                Action::Load {
                    uri: "no scheme here".to_owned(),
                },
            )
        );
    }

    #[test]
    fn missing_input_file() {
        let setup = set_up();
        run(
            &setup.factory,
            Action::Create {
                uri: "file://work".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(
            Err(EX_NOINPUT),
            run(
                &setup.factory,
                Action::Put {
                    uri: "file://work".to_owned(),
                    uid: "x".to_owned(),
                    input: setup.root.path().join("absent.ics"),
                },
            )
        );
    }

    #[test]
    fn memory_calendars_do_not_outlive_their_session() {
        let setup = set_up();
        run(
            &setup.factory,
            Action::Create {
                uri: "memory://scratch".to_owned(),
            },
        )
        .unwrap();

        assert_eq!(
            Err(EX_NOINPUT),
            run(
                &setup.factory,
                Action::Load {
                    uri: "memory://scratch".to_owned(),
                },
            )
        );
    }
}
