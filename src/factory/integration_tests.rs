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

//! End-to-end tests of the factory: real job queue, real registry, in-memory
//! storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel;
use proptest::prelude::*;
use rayon::prelude::*;

use super::*;
use crate::store::MemoryProvider;

const TIMEOUT: Duration = Duration::from_secs(10);

struct Setup {
    factory: CalFactory,
    provider: Arc<MemoryProvider>,
    empty_events: Arc<AtomicUsize>,
}

fn set_up(provider: MemoryProvider, workers: usize) -> Setup {
    crate::init_test_log();

    let provider = Arc::new(provider);
    let factory =
        CalFactory::new(BackendRegistry::new(), provider.clone(), workers)
            .unwrap();

    let empty_events = Arc::new(AtomicUsize::new(0));
    {
        let empty_events = Arc::clone(&empty_events);
        factory.on_last_backend_gone(move || {
            empty_events.fetch_add(1, Ordering::SeqCst);
        });
    }

    Setup {
        factory,
        provider,
        empty_events,
    }
}

impl Setup {
    fn load(&self, uri: &str) -> LoadResult {
        let (listener, results) = result_channel();
        self.factory.submit_load(uri, listener).unwrap();
        results.recv_timeout(TIMEOUT).unwrap()
    }

    fn create(&self, uri: &str) -> LoadResult {
        let (listener, results) = result_channel();
        self.factory.submit_create(uri, listener).unwrap();
        results.recv_timeout(TIMEOUT).unwrap()
    }

    fn empty_events(&self) -> usize {
        self.empty_events.load(Ordering::SeqCst)
    }
}

/// Delegates to a `MemoryProvider`, but holds every `open` until released.
struct GatedProvider {
    inner: MemoryProvider,
    entered: channel::Sender<()>,
    gate: channel::Receiver<()>,
}

impl BackendProvider for GatedProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        let _ = self.entered.send(());
        let _ = self.gate.recv();
        self.inner.open(uri)
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        self.inner.create(uri)
    }
}

/// Panics when asked to open `mem://boom`.
struct PanickyProvider(MemoryProvider);

impl BackendProvider for PanickyProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        if "mem://boom" == uri.as_str() {
            panic!("storage exploded");
        }
        self.0.open(uri)
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        self.0.create(uri)
    }
}

#[test]
fn create_in_use_teardown_load() {
    let setup = set_up(MemoryProvider::new(), 1);

    let first = setup.create("res://a");
    assert_eq!(LoadStatus::Success, first.status);
    let h1 = first.session.unwrap();
    assert_eq!("res://a", h1.uri().as_str());

    let second = setup.create("res://a");
    assert_eq!(LoadStatus::InUse, second.status);
    assert!(second.session.is_none());
    // The existing backend is untouched
    assert_eq!(1, setup.factory.registry().len());
    assert_eq!(1, setup.provider.create_count());
    let current = setup
        .factory
        .registry()
        .lookup(h1.uri())
        .expect("backend still registered");
    assert!(h1.is_attached_to(&current));
    assert_eq!(1, current.session_count());
    assert!(current.is_open());
    drop(current);

    drop(h1);
    assert!(setup.factory.registry().is_empty());
    assert_eq!(1, setup.empty_events());

    // Created memory calendars do not outlive their backend
    let third = setup.load("res://a");
    assert_eq!(LoadStatus::Error, third.status);
    assert!(third.session.is_none());
}

#[test]
fn load_missing_reports_error_without_empty_event() {
    let setup = set_up(MemoryProvider::new(), 1);

    let result = setup.load("res://missing");
    assert_eq!(LoadStatus::Error, result.status);
    assert!(result.session.is_none());
    assert!(setup.factory.registry().is_empty());
    assert_eq!(0, setup.empty_events());
}

#[test]
fn load_reuses_open_backend() {
    let setup =
        set_up(MemoryProvider::new().with_resource("res://a").unwrap(), 1);

    let s1 = setup.load("res://a").session.unwrap();
    let s2 = setup.load("RES://a/").session.unwrap();
    assert!(s1.same_backend(&s2));
    assert_ne!(s1.id(), s2.id());
    assert_eq!(1, setup.provider.open_count());

    s1.update_object("ev1", "BEGIN:VEVENT").unwrap();
    assert_eq!(
        Some("BEGIN:VEVENT".to_owned()),
        s2.get_object("ev1").unwrap()
    );
    assert_eq!(vec!["ev1".to_owned()], s2.get_uids().unwrap());
    assert!(s2.remove_object("ev1").unwrap());
    assert_eq!(None, s1.get_object("ev1").unwrap());

    drop(s1);
    assert_eq!(1, setup.factory.registry().len());
    drop(s2);
    assert!(setup.factory.registry().is_empty());
    assert_eq!(1, setup.provider.close_count());
}

#[test]
fn teardown_then_load_opens_afresh() {
    let setup =
        set_up(MemoryProvider::new().with_resource("res://a").unwrap(), 1);

    let session = setup.load("res://a").session.unwrap();
    session.update_object("ev1", "BEGIN:VEVENT").unwrap();
    drop(session);
    assert!(setup
        .factory
        .registry()
        .lookup(&"res://a".parse().unwrap())
        .is_none());

    let session = setup.load("res://a").session.unwrap();
    assert_eq!(2, setup.provider.open_count());
    // Seeded calendars are durable
    assert_eq!(vec!["ev1".to_owned()], session.get_uids().unwrap());
}

#[test]
fn create_of_seeded_resource_fails() {
    let setup =
        set_up(MemoryProvider::new().with_resource("res://a").unwrap(), 1);
    assert_eq!(LoadStatus::Error, setup.create("res://a").status);
    assert!(setup.factory.registry().is_empty());
}

#[test]
fn concurrent_loads_open_once() {
    let (entered_send, entered) = channel::unbounded();
    let (release, gate) = channel::unbounded();
    let provider = Arc::new(GatedProvider {
        inner: MemoryProvider::new().with_resource("res://a").unwrap(),
        entered: entered_send,
        gate,
    });
    let factory =
        CalFactory::new(BackendRegistry::new(), provider.clone(), 4).unwrap();

    let (l1, r1) = result_channel();
    let (l2, r2) = result_channel();
    factory.submit_load("res://a", l1).unwrap();
    factory.submit_load("res://a", l2).unwrap();

    // One worker is inside open(); the other must be waiting on it rather
    // than opening a second time.
    entered.recv_timeout(TIMEOUT).unwrap();
    assert!(entered.recv_timeout(Duration::from_millis(100)).is_err());
    release.send(()).unwrap();

    let s1 = r1.recv_timeout(TIMEOUT).unwrap().session.unwrap();
    let s2 = r2.recv_timeout(TIMEOUT).unwrap().session.unwrap();
    assert!(s1.same_backend(&s2));
    assert_eq!(1, provider.inner.open_count());
}

#[test]
fn create_behind_inflight_load_reports_in_use() {
    let (entered_send, entered) = channel::unbounded();
    let (release, gate) = channel::unbounded();
    let provider = Arc::new(GatedProvider {
        inner: MemoryProvider::new().with_resource("res://a").unwrap(),
        entered: entered_send,
        gate,
    });
    let factory =
        CalFactory::new(BackendRegistry::new(), provider.clone(), 2).unwrap();

    let (load_listener, load_results) = result_channel();
    factory.submit_load("res://a", load_listener).unwrap();
    entered.recv_timeout(TIMEOUT).unwrap();

    let (create_listener, create_results) = result_channel();
    factory.submit_create("res://a", create_listener).unwrap();
    // The create must not overtake the load still inside open()
    assert!(create_results
        .recv_timeout(Duration::from_millis(100))
        .is_err());
    release.send(()).unwrap();

    let loaded = load_results.recv_timeout(TIMEOUT).unwrap();
    let created = create_results.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(LoadStatus::Success, loaded.status);
    assert_eq!(LoadStatus::InUse, created.status);
    assert!(created.session.is_none());
    assert_eq!(1, provider.inner.open_count());
    assert_eq!(0, provider.inner.create_count());
}

/// Delegates to a `MemoryProvider`, but its stores take a while to close.
struct SlowCloseProvider {
    inner: MemoryProvider,
    closing: Arc<AtomicBool>,
    opens_during_close: AtomicUsize,
}

struct SlowCloseStore {
    inner: Box<dyn CalBackend>,
    closing: Arc<AtomicBool>,
}

impl BackendProvider for SlowCloseProvider {
    fn open(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        if self.closing.load(Ordering::SeqCst) {
            self.opens_during_close.fetch_add(1, Ordering::SeqCst);
        }

        Ok(Box::new(SlowCloseStore {
            inner: self.inner.open(uri)?,
            closing: Arc::clone(&self.closing),
        }))
    }

    fn create(&self, uri: &ResourceUri) -> Result<Box<dyn CalBackend>, Error> {
        self.inner.create(uri)
    }
}

impl CalBackend for SlowCloseStore {
    fn get_uids(&self) -> Vec<String> {
        self.inner.get_uids()
    }

    fn get_object(&self, uid: &str) -> Option<String> {
        self.inner.get_object(uid)
    }

    fn update_object(&mut self, uid: &str, ical: &str) -> Result<(), Error> {
        self.inner.update_object(uid, ical)
    }

    fn remove_object(&mut self, uid: &str) -> Result<bool, Error> {
        self.inner.remove_object(uid)
    }

    fn close(&mut self) -> Result<(), Error> {
        self.closing.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        self.closing.store(false, Ordering::SeqCst);
        self.inner.close()
    }
}

#[test]
fn load_waits_for_previous_backend_to_close() {
    crate::init_test_log();
    let provider = Arc::new(SlowCloseProvider {
        inner: MemoryProvider::new().with_resource("res://a").unwrap(),
        closing: Arc::new(AtomicBool::new(false)),
        opens_during_close: AtomicUsize::new(0),
    });
    let factory =
        CalFactory::new(BackendRegistry::new(), provider.clone(), 2).unwrap();

    let (l1, r1) = result_channel();
    factory.submit_load("res://a", l1).unwrap();
    let session = r1.recv_timeout(TIMEOUT).unwrap().session.unwrap();
    session.update_object("ev1", "BEGIN:VEVENT").unwrap();

    let closer = std::thread::spawn(move || drop(session));
    std::thread::sleep(Duration::from_millis(50));

    let (l2, r2) = result_channel();
    factory.submit_load("res://a", l2).unwrap();
    let result = r2.recv_timeout(TIMEOUT).unwrap();
    closer.join().unwrap();

    assert_eq!(LoadStatus::Success, result.status);
    assert_eq!(0, provider.opens_during_close.load(Ordering::SeqCst));
    assert_eq!(2, provider.inner.open_count());
    assert_eq!(1, provider.inner.close_count());
    assert_eq!(
        vec!["ev1".to_owned()],
        result.session.unwrap().get_uids().unwrap()
    );
}

#[test]
fn registration_during_open_discards_redundant_backend() {
    let (entered_send, entered) = channel::unbounded();
    let (release, gate) = channel::unbounded();
    let provider = Arc::new(GatedProvider {
        inner: MemoryProvider::new().with_resource("res://a").unwrap(),
        entered: entered_send,
        gate,
    });
    let registry = BackendRegistry::new();
    let factory =
        CalFactory::new(Arc::clone(&registry), provider.clone(), 1).unwrap();

    let (listener, results) = result_channel();
    factory.submit_load("res://a", listener).unwrap();
    entered.recv_timeout(TIMEOUT).unwrap();

    let uri: ResourceUri = "res://a".parse().unwrap();
    let winner = BackendHandle::new(
        uri.clone(),
        provider.inner.create(&"res://other".parse().unwrap()).unwrap(),
        &registry,
    );
    let winner_session = winner.add_client().unwrap();
    registry.register(uri, Arc::clone(&winner)).unwrap();
    release.send(()).unwrap();

    let result = results.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(LoadStatus::Success, result.status);
    let session = result.session.unwrap();
    assert!(session.same_backend(&winner_session));
    // The backend opened by the job was closed straight away
    assert_eq!(1, provider.inner.close_count());
    assert_eq!(2, winner.session_count());
}

#[test]
fn precondition_violations_are_rejected_synchronously() {
    let setup = set_up(MemoryProvider::new(), 1);

    assert_matches!(
        Err(Error::NilListener),
        setup.factory.submit_load("res://a", None)
    );
    assert_matches!(
        Err(Error::NilListener),
        setup.factory.submit_create("res://a", None)
    );

    let called = Arc::new(AtomicUsize::new(0));
    let called2 = Arc::clone(&called);
    assert_matches!(
        Err(Error::InvalidUri),
        setup.factory.submit_load(
            "not a uri",
            listener(move |_, _| {
                called2.fetch_add(1, Ordering::SeqCst);
            })
        )
    );

    setup.factory.shutdown();
    assert_eq!(0, called.load(Ordering::SeqCst));
    assert_eq!(0, setup.provider.create_count());
}

#[test]
fn submit_after_shutdown_is_rejected() {
    let setup = set_up(MemoryProvider::new(), 2);
    setup.factory.shutdown();

    let (listener, results) = result_channel();
    assert_matches!(
        Err(Error::QueueClosed),
        setup.factory.submit_create("res://a", listener)
    );
    // The listener was dropped without being called
    assert_matches!(
        Err(channel::RecvTimeoutError::Disconnected),
        results.recv_timeout(TIMEOUT).map(|_| ())
    );
    assert_eq!(0, setup.provider.create_count());
}

#[test]
fn listener_that_went_away_releases_session() {
    let setup = set_up(MemoryProvider::new(), 1);

    let (listener, results) = result_channel();
    drop(results);
    setup.factory.submit_create("res://a", listener).unwrap();
    setup.factory.shutdown();

    assert!(setup.factory.registry().is_empty());
    assert_eq!(1, setup.provider.close_count());
    assert_eq!(1, setup.empty_events());
}

#[test]
fn panicking_backend_reports_error_and_worker_survives() {
    crate::init_test_log();
    let provider = Arc::new(PanickyProvider(
        MemoryProvider::new().with_resource("res://a").unwrap(),
    ));
    let factory =
        CalFactory::new(BackendRegistry::new(), provider, 1).unwrap();

    let (l1, r1) = result_channel();
    factory.submit_load("mem://boom", l1).unwrap();
    assert_eq!(LoadStatus::Error, r1.recv_timeout(TIMEOUT).unwrap().status);

    let (l2, r2) = result_channel();
    factory.submit_load("res://a", l2).unwrap();
    assert_eq!(
        LoadStatus::Success,
        r2.recv_timeout(TIMEOUT).unwrap().status
    );

    // The failed load did not leave the URI stuck in the loading state
    let (l3, r3) = result_channel();
    factory.submit_create("mem://boom", l3).unwrap();
    assert_eq!(
        LoadStatus::Success,
        r3.recv_timeout(TIMEOUT).unwrap().status
    );
}

#[test]
fn listener_runs_off_caller_thread() {
    let setup = set_up(MemoryProvider::new(), 1);
    let (send, recv) = channel::bounded(1);

    setup
        .factory
        .submit_create(
            "res://a",
            listener(move |status, session| {
                send.send((status, std::thread::current().id())).unwrap();
                drop(session);
            }),
        )
        .unwrap();

    let (status, thread) = recv.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(LoadStatus::Success, status);
    assert_ne!(std::thread::current().id(), thread);
}

#[test]
fn many_callers_share_one_backend_per_uri() {
    let uris = ["res://a", "res://b", "res://c"];
    let mut provider = MemoryProvider::new();
    for uri in &uris {
        provider = provider.with_resource(uri).unwrap();
    }
    let setup = set_up(provider, 4);

    let results = (0..90)
        .into_par_iter()
        .map(|i| {
            let (listener, results) = result_channel();
            setup.factory.submit_load(uris[i % 3], listener).unwrap();
            results
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|r| r.recv_timeout(TIMEOUT).unwrap())
        .collect::<Vec<_>>();

    let mut by_uri = HashMap::<String, Vec<ClientSession>>::new();
    for result in results {
        assert_eq!(LoadStatus::Success, result.status);
        let session = result.session.unwrap();
        by_uri
            .entry(session.uri().to_string())
            .or_default()
            .push(session);
    }

    assert_eq!(3, by_uri.len());
    for sessions in by_uri.values() {
        assert_eq!(30, sessions.len());
        assert!(sessions.iter().all(|s| s.same_backend(&sessions[0])));
    }
    assert_eq!(3, setup.provider.open_count());
    assert_eq!(3, setup.factory.registry().len());

    drop(by_uri);
    assert!(setup.factory.registry().is_empty());
    assert_eq!(1, setup.empty_events());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn every_job_notifies_exactly_once(
        requests in prop::collection::vec((0usize..4, any::<bool>()), 1..40),
        workers in 1usize..4,
    ) {
        let setup = set_up(
            MemoryProvider::new()
                .with_resource("res://0").unwrap()
                .with_resource("res://1").unwrap(),
            workers,
        );
        let notifications = Arc::new(AtomicUsize::new(0));
        let (send, recv) = channel::unbounded();

        for &(ix, create) in &requests {
            let notifications = Arc::clone(&notifications);
            let send = send.clone();
            let l = listener(move |status, session| {
                notifications.fetch_add(1, Ordering::SeqCst);
                send.send((status, session)).unwrap();
            });

            let uri = format!("res://{}", ix);
            if create {
                setup.factory.submit_create(&uri, l).unwrap();
            } else {
                setup.factory.submit_load(&uri, l).unwrap();
            }
        }

        setup.factory.shutdown();
        prop_assert_eq!(requests.len(), notifications.load(Ordering::SeqCst));

        let results = recv.try_iter().collect::<Vec<_>>();
        prop_assert_eq!(requests.len(), results.len());

        // Sessions are still held, so every URI has at most one live
        // backend and all of its sessions share it.
        let mut by_uri = HashMap::<String, Vec<&ClientSession>>::new();
        for &(status, ref session) in &results {
            prop_assert_eq!(status == LoadStatus::Success, session.is_some());
            if let Some(ref session) = *session {
                by_uri
                    .entry(session.uri().to_string())
                    .or_default()
                    .push(session);
            }
        }

        for sessions in by_uri.values() {
            prop_assert!(sessions.iter().all(|s| s.same_backend(sessions[0])));
        }
        prop_assert_eq!(by_uri.len(), setup.factory.registry().len());
    }
}
