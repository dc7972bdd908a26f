//! End-to-end command dispatch with the stub parser

use std::sync::Arc;

use serde_json::json;

use cindex::server::NullSource;
use cindex::{Daemon, DaemonConfig, FileRegistry, MemoryRegistryStore, RawCommand, Response};

use crate::common::{StubParser, TestRepo};

fn daemon(repo: &TestRepo) -> (Daemon<StubParser>, Arc<StubParser>, Arc<MemoryRegistryStore>) {
    let parser = StubParser::new();
    let store = Arc::new(MemoryRegistryStore::new());
    let registry = Arc::new(FileRegistry::with_store(store.clone()));
    let config = DaemonConfig {
        data_dir: repo.path().join("data"),
        parse_workers: 2,
        job_workers: 2,
        watch: false,
        default_compiler_flags: vec!["-std=c++17".to_string()],
        ..DaemonConfig::default()
    };
    let daemon = Daemon::with_parts(
        config,
        Arc::clone(&parser),
        registry,
        Box::new(NullSource),
        None,
    )
    .unwrap();
    (daemon, parser, store)
}

fn ok(resp: Response) -> serde_json::Value {
    assert!(resp.is_ok(), "expected success, got {:?}", resp);
    resp.result.unwrap_or_default()
}

#[test]
fn test_add_list_status_remove() {
    let repo = TestRepo::new();
    let a = repo.add_file("src/a.cpp", "int a;\n");
    let b = repo.add_file("src/b.cpp", "int b;\n");
    let (d, parser, persisted) = daemon(&repo);

    let added = ok(d.handle(RawCommand::new("add-source-file", json!({"path": a}))));
    assert_eq!(added["compiler_flags"], json!(["-std=c++17"]));
    ok(d.handle(RawCommand::new("addSourceFile", json!({"path": b, "flags": []}))));
    assert_eq!(persisted.len(), 2);
    assert_eq!(d.watcher().watched(), vec![a.clone(), b.clone()]);

    let listed = ok(d.handle(RawCommand::new("list-files", json!({"pattern": "a\\.cpp$"}))));
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["files"], json!([a]));

    let status = ok(d.handle(RawCommand::new("status", json!({"query": ""}))));
    assert_eq!(status["unit_count"], 2);
    assert_eq!(status["file_count"], 2);
    assert_eq!(status["watched"].as_array().map(Vec::len), Some(2));

    let removed = ok(d.handle(RawCommand::new("remove-source-file", json!({"path": a}))));
    assert_eq!(removed["removed"], true);
    assert_eq!(d.watcher().watched(), vec![b.clone()]);

    let report = d.shutdown();
    assert_eq!(report.abandoned_parses, 0);
    assert_eq!(parser.live_units(), 0);
    assert_eq!(parser.double_disposes(), 0);
}

#[test]
fn test_failures_are_reported_not_fatal() {
    let repo = TestRepo::new();
    let bad = repo.add_file("bad.c", "int (\n");
    let (d, parser, _) = daemon(&repo);
    parser.fail_on(&bad);

    let resp = d.handle(RawCommand::new("add-source-file", json!({"path": bad})));
    assert_eq!(resp.error_code(), Some("parse_failure"));
    assert_eq!(d.watcher().watched(), vec![bad.clone()]);

    let resp = d.handle(RawCommand::new("unknownCommand", json!({})));
    assert_eq!(resp.error_code(), Some("unknown_command"));

    let resp = d.handle(RawCommand::new("lookup-line", json!({"path": bad})));
    assert_eq!(resp.error_code(), Some("malformed_input"));

    let status = ok(d.handle(RawCommand::new("status", json!({"query": "failures"}))));
    assert_eq!(status["failures"][0]["path"], json!(bad));

    let listed = ok(d.handle(RawCommand::new("list-files", serde_json::Value::Null)));
    assert_eq!(listed["count"], 0);
}

#[test]
fn test_add_makefile_from_compile_database() {
    let repo = TestRepo::new();
    let a = repo.add_file("src/a.cpp", "int a;\n");
    let b = repo.add_file("src/b.c", "int b;\n");
    let build = cindex::paths::canonicalize(repo.path()).unwrap().join("build");
    let db = json!([
        {"directory": build, "file": "../src/a.cpp",
         "command": "c++ -std=c++11 -c ../src/a.cpp -o a.o"},
        {"directory": build, "file": "../src/b.c",
         "arguments": ["cc", "-c", "../src/b.c"]}
    ]);
    std::fs::create_dir_all(&build).unwrap();
    let db_path = build.join("compile_commands.json");
    std::fs::write(&db_path, serde_json::to_string(&db).unwrap()).unwrap();

    let (d, parser, _) = daemon(&repo);
    parser.fail_on(&b);

    let result = ok(d.handle(RawCommand::new("add-makefile", json!({"path": db_path}))));
    assert_eq!(result["commands"], 2);
    assert_eq!(result["added"], json!([a]));
    assert_eq!(result["failed"][0]["code"], "parse_failure");
    assert_eq!(result["failed"][0]["path"], json!(b));

    let flags = d
        .units()
        .with_unit(&a, |entry| entry.compiler_flags.clone())
        .unwrap();
    assert_eq!(flags, vec!["-std=c++11".to_string()]);
}

#[test]
fn test_save_then_load_through_commands() {
    let repo = TestRepo::new();
    let a = repo.add_file("a.cpp", "int a;\n");
    let (d, parser, _) = daemon(&repo);

    ok(d.handle(RawCommand::new("add-source-file", json!({"path": a}))));
    let saved = ok(d.handle(RawCommand::new("saveAST", json!({"path": a}))));
    assert!(saved["ast_path"].as_str().unwrap().ends_with(".ast"));

    let unsaved = ok(d.handle(RawCommand::new("list-files", json!({"unsaved_only": true}))));
    assert_eq!(unsaved["count"], 0);

    ok(d.handle(RawCommand::new("remove-source-file", json!({"path": a}))));
    let loaded = ok(d.handle(RawCommand::new("load-ast", json!({"path": a}))));
    assert_eq!(loaded["outcome"], "loaded");
    assert_eq!(loaded["unit"]["path"], json!(a));
    assert_eq!(parser.parses(), 1);
    assert_eq!(d.watcher().watched(), vec![a]);
}

#[test]
fn test_lookup_resolves_registered_paths() {
    let repo = TestRepo::new();
    let a = repo.add_file("a.cpp", "int a;\nint b;\n");
    let (d, _, _) = daemon(&repo);
    ok(d.handle(RawCommand::new("add-source-file", json!({"path": a}))));

    let text = format!("{},11", a.display());
    let found = ok(d.handle(RawCommand::new("lookup", json!({"location": text, "flags": 1}))));
    assert_eq!(found["indexed"], true);
    assert_eq!(found["key"], format!("{},000011", a.display()));
    assert_eq!(found["position"], json!({"line": 2, "column": 5}));
    assert_eq!(found["resolved"], format!("{},000011", a.display()));

    let encoded = cindex::Location::encode_client_location(&a, 4);
    let found = ok(d.handle(RawCommand::new("lookup", json!({"location": encoded}))));
    assert_eq!(found["offset"], 4);

    let missing = cindex::Location::encode_client_location(&repo.path().join("none.c"), 0);
    let resp = d.handle(RawCommand::new("lookup", json!({"location": missing})));
    assert_eq!(resp.error_code(), Some("not_found"));
}
