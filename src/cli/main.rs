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
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;
use structopt::StructOpt;

use crate::factory::{BackendRegistry, CalFactory};
use crate::store::{FileProvider, SchemeProvider};
use crate::support::sysexits::*;
use crate::support::system_config::SystemConfig;
use crate::support::threading::effective_workers;

#[derive(StructOpt)]
#[structopt(max_term_width = 80)]
struct Command {
    /// The directory containing `calfactory.toml` etc
    /// [default: current directory]
    #[structopt(long, parse(from_os_str))]
    root: Option<PathBuf>,

    #[structopt(subcommand)]
    action: Action,
}

#[derive(StructOpt)]
pub(super) enum Action {
    /// Create a new, empty calendar.
    ///
    /// Prints `created` on success. If the calendar is already open in this
    /// process, prints `in use` instead and leaves it alone.
    Create {
        /// The calendar to create, e.g. `file://work`.
        uri: String,
    },
    /// Open a calendar and list the UIDs of the objects it contains.
    Load {
        /// The calendar to open.
        uri: String,
    },
    /// Print one object of a calendar.
    Get {
        /// The calendar to read from.
        uri: String,
        /// UID of the object to print.
        uid: String,
    },
    /// Add or replace one object of a calendar.
    Put {
        /// The calendar to write to.
        uri: String,
        /// UID of the object to store.
        uid: String,
        /// File holding the object's iCalendar text. "-" will read from
        /// stdin.
        #[structopt(parse(from_os_str), default_value = "-")]
        input: PathBuf,
    },
    /// Remove one object from a calendar.
    Rm {
        /// The calendar to modify.
        uri: String,
        /// UID of the object to remove.
        uid: String,
    },
}

pub fn main() {
    // Clap exits with status 1 instead of EX_USAGE if we use the more concise
    // API
    let cmd = Command::from_clap(&match Command::clap().get_matches_safe() {
        Ok(matches) => matches,
        Err(
            e @ clap::Error {
                kind: clap::ErrorKind::HelpDisplayed,
                ..
            },
        )
        | Err(
            e @ clap::Error {
                kind: clap::ErrorKind::VersionDisplayed,
                ..
            },
        ) => {
            println!("{}", e.message);
            return;
        }
        Err(e) => {
            eprintln!("{}", e.message);
            EX_USAGE.exit()
        }
    });

    let root = cmd.root.unwrap_or_else(|| PathBuf::from("."));
    let system_config = load_system_config(&root);
    init_logging(&root);

    let data_dir = root.join(&system_config.storage.data_dir);
    let files = match FileProvider::new(data_dir.clone()) {
        Ok(files) => files,
        Err(e) => {
            eprintln!("Unable to set up '{}': {}", data_dir.display(), e);
            EX_CANTCREAT.exit()
        }
    };
    let provider = SchemeProvider::new().with("file", Arc::new(files));

    let workers = effective_workers(system_config.jobs.workers);
    let registry = BackendRegistry::new();
    let factory = match CalFactory::new(registry, Arc::new(provider), workers)
    {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("Unable to start worker threads: {}", e);
            EX_OSERR.exit()
        }
    };
    factory.on_last_backend_gone(|| info!("No calendars remain open"));

    let result = super::calendar::run(&factory, cmd.action);
    factory.shutdown();

    if let Err(exit) = result {
        exit.exit();
    }
}

fn load_system_config(root: &Path) -> SystemConfig {
    let system_config_path = root.join("calfactory.toml");
    let mut system_config_toml = Vec::new();
    if let Err(e) = fs::File::open(&system_config_path)
        .and_then(|mut f| f.read_to_end(&mut system_config_toml))
    {
        eprintln!("Error reading '{}': {}", system_config_path.display(), e);
        EX_CONFIG.exit();
    }

    match toml::from_slice(&system_config_toml) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "Error in config file at '{}': {}",
                system_config_path.display(),
                e
            );
            EX_CONFIG.exit()
        }
    }
}

fn init_logging(root: &Path) {
    if Ok(true) == nix::unistd::isatty(2) {
        // Running interactively; ignore logging configuration and just write
        // to stderr.
        crate::init_simple_log();
        return;
    }

    let log_config_file = root.join("logging.toml");
    if log_config_file.is_file() {
        if let Err(e) = log4rs::init_file(
            &log_config_file,
            log4rs::file::Deserializers::new(),
        ) {
            eprintln!(
                "Failed to initialise logging from '{}': {}",
                log_config_file.display(),
                e
            );
            EX_CONFIG.exit();
        }
    } else {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: env!("CARGO_PKG_NAME").to_owned(),
            pid: nix::unistd::getpid().as_raw(),
        };

        let logger = match syslog::unix(formatter) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("Failed to connect to syslog: {}", e);
                EX_OSERR.exit()
            }
        };
        if let Err(e) =
            log::set_boxed_logger(Box::new(syslog::BasicLogger::new(logger)))
                .map(|_| log::set_max_level(log::LevelFilter::Info))
        {
            eprintln!("Failed to initialise logging: {}", e);
            EX_SOFTWARE.exit();
        }
    }
}
