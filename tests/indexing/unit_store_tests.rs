//! Unit store tests against the recording stub parser

use std::path::Path;
use std::sync::Arc;
use std::thread;

use cindex::{FileFilter, IndexError, LoadOutcome, ParseOptions};

use crate::common::TestRepo;

#[test]
fn test_add_then_remove_disposes_exactly_once() {
    let repo = TestRepo::new();
    let file = repo.add_file("src/a.cpp", "int a;\n");
    let (store, parser, _) = repo.stub_store();

    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    assert!(store.remove_source_file(&file));

    assert!(!store.is_indexed(&file));
    assert!(store.paths().is_empty());
    assert_eq!(parser.parses(), 1);
    assert_eq!(parser.disposes(), 1);
    assert_eq!(parser.live_units(), 0);
    assert_eq!(parser.double_disposes(), 0);
}

#[test]
fn test_readd_replaces_and_disposes_previous_unit() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.c", "int a;\n");
    let (store, parser, _) = repo.stub_store();

    let first = store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    let second = store
        .add_source_file(&file, ParseOptions::INCOMPLETE, &["-DX".to_string()])
        .unwrap();

    assert_eq!(first.file_id, second.file_id);
    assert_eq!(second.compiler_flags, vec!["-DX".to_string()]);
    assert_eq!(store.len(), 1);
    assert_eq!(parser.disposes(), 1);
    assert_eq!(parser.live_units(), 1);

    store.clear();
    assert_eq!(parser.live_units(), 0);
    assert_eq!(parser.double_disposes(), 0);
}

#[test]
fn test_failed_parse_of_a_cpp_is_not_listed() {
    let repo = TestRepo::new();
    let (store, parser, registry) = repo.stub_store();
    parser.fail_on(Path::new("/a.cpp"));

    let err = store
        .add_source_file(Path::new("/a.cpp"), ParseOptions::NONE, &["-std=c++11".to_string()])
        .unwrap_err();
    assert!(matches!(err, IndexError::ParseFailure { .. }));
    assert_eq!(err.code(), "parse_failure");

    let listed: Vec<_> = store.file_list(FileFilter::all()).collect();
    assert!(!listed.iter().any(|p| p == Path::new("/a.cpp")));
    assert_eq!(store.failures().len(), 1);
    assert!(registry.id_for(Path::new("/a.cpp")).is_none());
    assert_eq!(parser.live_units(), 0);
}

#[test]
fn test_load_of_stale_save_reparses() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.cpp", "int a;\n");
    let (store, parser, _) = repo.stub_store();

    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
    store.save_ast(&file).unwrap();
    repo.touch_with(&file, "int a;\nint b;\n");

    let outcome = store.load_ast(&file).unwrap();
    assert!(matches!(outcome, LoadOutcome::Reparsed(_)));
    assert!(!outcome.summary().saved);
    assert_eq!(parser.parses(), 2);

    let contents = store.with_unit(&file, |entry| entry.unit.contents.clone()).unwrap();
    assert_eq!(contents, "int a;\nint b;\n");
    assert_eq!(parser.live_units(), 1);
}

#[test]
fn test_load_of_save_written_for_another_path_reparses() {
    let repo = TestRepo::new();
    let a = repo.add_file("a.cpp", "int a;\n");
    let b = repo.add_file("b.cpp", "int b;\n");
    let (store, parser, _) = repo.stub_store();

    store.add_source_file(&a, ParseOptions::NONE, &[]).unwrap();
    store.save_ast(&a).unwrap();

    // Put a's save where b's would live, matching b's size and mtime
    let ast_dir = repo.ast_dir();
    std::fs::copy(
        cindex::paths::ast_file_for(&ast_dir, &a),
        cindex::paths::ast_file_for(&ast_dir, &b),
    )
    .unwrap();
    let meta_bytes = std::fs::read(cindex::paths::ast_meta_for(&ast_dir, &a)).unwrap();
    let mut meta: serde_json::Value = serde_json::from_slice(&meta_bytes).unwrap();
    let b_meta = std::fs::metadata(&b).unwrap();
    meta["source_mtime"] = serde_json::to_value(b_meta.modified().unwrap()).unwrap();
    meta["source_len"] = serde_json::json!(b_meta.len());
    std::fs::write(
        cindex::paths::ast_meta_for(&ast_dir, &b),
        serde_json::to_vec(&meta).unwrap(),
    )
    .unwrap();

    let outcome = store.load_ast(&b).unwrap();
    assert!(matches!(outcome, LoadOutcome::Reparsed(_)));
    assert_eq!(outcome.summary().path, b);
    assert_eq!(parser.parses(), 2);
    let (path, contents) = store
        .with_unit(&b, |entry| (entry.unit.path.clone(), entry.unit.contents.clone()))
        .unwrap();
    assert_eq!(path, b);
    assert_eq!(contents, "int b;\n");
}

#[test]
fn test_load_of_current_save_skips_parsing() {
    let repo = TestRepo::new();
    let file = repo.add_file("a.cpp", "int a;\n");
    let (store, parser, _) = repo.stub_store();

    store.add_source_file(&file, ParseOptions::NONE, &["-std=c++11".to_string()]).unwrap();
    let saved_to = store.save_ast(&file).unwrap();
    assert!(saved_to.starts_with(repo.ast_dir()));
    store.remove_source_file(&file);

    let outcome = store.load_ast(&file).unwrap();
    assert!(matches!(outcome, LoadOutcome::Loaded(_)));
    assert_eq!(outcome.summary().compiler_flags, vec!["-std=c++11".to_string()]);
    assert_eq!(parser.parses(), 1);
    assert!(store.is_indexed(&file));
}

#[test]
fn test_unsaved_filter_tracks_saves() {
    let repo = TestRepo::new();
    let a = repo.add_file("a.c", "int a;\n");
    let b = repo.add_file("b.c", "int b;\n");
    let (store, _, _) = repo.stub_store();
    store.add_source_file(&a, ParseOptions::NONE, &[]).unwrap();
    store.add_source_file(&b, ParseOptions::NONE, &[]).unwrap();
    store.save_ast(&a).unwrap();

    let unsaved = FileFilter {
        unsaved_only: true,
        pattern: None,
    };
    assert_eq!(store.file_list(unsaved.clone()).collect::<Vec<_>>(), vec![b.clone()]);

    // Reparsing makes the saved copy out of date
    store.reparse(&a).unwrap();
    assert_eq!(store.file_list(unsaved).count(), 2);
}

#[test]
fn test_concurrent_adds_and_removes_balance() {
    let repo = TestRepo::new();
    let files: Vec<_> = (0..8)
        .map(|i| repo.add_file(&format!("f{}.c", i), "int x;\n"))
        .collect();
    let (store, parser, registry) = repo.stub_store();

    let handles: Vec<_> = files
        .iter()
        .cloned()
        .enumerate()
        .map(|(i, file)| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..5 {
                    store.add_source_file(&file, ParseOptions::NONE, &[]).unwrap();
                }
                if i % 2 == 0 {
                    assert!(store.remove_source_file(&file));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(store.len(), 4);
    assert_eq!(registry.len(), 8);
    assert_eq!(parser.parses(), 40);
    assert_eq!(parser.disposes(), 36);
    assert_eq!(parser.live_units(), 4);
    assert_eq!(parser.double_disposes(), 0);
}
