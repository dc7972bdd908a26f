//! Change coalescing through the watcher bridge

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cindex::server::NullSource;
use cindex::{JobRunner, ParseOptions, WatcherBridge};

use crate::common::TestRepo;

#[test]
fn test_burst_of_changes_costs_one_extra_parse() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.cpp", "int a;\n");
    let (store, parser, _) = repo.stub_store();
    let pool = Arc::new(JobRunner::new("parse", 2).unwrap());
    let bridge = WatcherBridge::new(Arc::clone(&store), pool, Box::new(NullSource));

    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    bridge.sync_subscriptions();
    assert_eq!(bridge.watched(), vec![file.clone()]);

    parser.gate.close();
    let running = bridge.on_path_changed(&file).expect("first change starts a reparse");
    parser.gate.wait_for_waiters(1);

    for i in 0..5 {
        repo.touch_with(&file, &format!("int a{};\n", i));
        assert!(bridge.on_path_changed(&file).is_none());
    }
    parser.gate.open();

    let outcome = running.wait().into_result().unwrap();
    assert_eq!(outcome.runs, 2);
    assert!(outcome.last.is_ok());
    assert_eq!(parser.parses(), 3);
    assert_eq!(parser.live_units(), 1);

    let contents = store.with_unit(&file, |e| e.unit.contents.clone()).unwrap();
    assert_eq!(contents, "int a4;\n");
}

#[test]
fn test_changes_after_completion_start_a_new_reparse() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.c", "int a;\n");
    let (store, parser, _) = repo.stub_store();
    let pool = Arc::new(JobRunner::new("parse", 1).unwrap());
    let bridge = WatcherBridge::new(Arc::clone(&store), pool, Box::new(NullSource));
    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    bridge.sync_subscriptions();

    for _ in 0..2 {
        let outcome = bridge.on_path_changed(&file).unwrap().wait().into_result().unwrap();
        assert_eq!(outcome.runs, 1);
    }
    assert_eq!(parser.parses(), 3);
}

#[test]
fn test_untracked_and_removed_paths_are_ignored() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.c", "int a;\n");
    let other = repo.add_file("b.c", "int b;\n");
    let (store, parser, _) = repo.stub_store();
    let pool = Arc::new(JobRunner::new("parse", 1).unwrap());
    let bridge = WatcherBridge::new(Arc::clone(&store), pool, Box::new(NullSource));

    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    bridge.sync_subscriptions();
    assert!(bridge.on_path_changed(&other).is_none());

    store.remove_source_file(&file);
    bridge.sync_subscriptions();
    assert!(bridge.on_path_changed(&file).is_none());
    assert_eq!(parser.parses(), 1);
}

#[test]
fn test_event_thread_feeds_reparses() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.c", "int a;\n");
    let (store, parser, _) = repo.stub_store();
    let pool = Arc::new(JobRunner::new("parse", 1).unwrap());
    let bridge = Arc::new(WatcherBridge::new(Arc::clone(&store), pool, Box::new(NullSource)));
    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    bridge.sync_subscriptions();

    let (tx, rx) = mpsc::channel();
    let mut handle = bridge.start(rx);
    tx.send(file.clone()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while parser.parses() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.stop();
    assert!(!handle.is_running());
    assert_eq!(parser.parses(), 2);
}
