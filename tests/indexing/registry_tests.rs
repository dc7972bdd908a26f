//! Registry and location tests

use std::path::{Path, PathBuf};
use std::sync::{Arc, Barrier};
use std::thread;

use cindex::{FileId, FileRegistry, KeyFlags, Location, SqliteRegistryStore};

use crate::common::TestRepo;

#[test]
fn test_insert_same_path_from_many_threads() {
    let registry = Arc::new(FileRegistry::new());
    let barrier = Arc::new(Barrier::new(16));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                registry.insert(Path::new("/src/shared.h")).unwrap()
            })
        })
        .collect();
    let ids: Vec<FileId> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.last_id(), ids[0]);
    assert_eq!(registry.insert(Path::new("/src/shared.h")).unwrap(), ids[0]);
}

#[test]
fn test_registry_reloads_from_sqlite() {
    let repo = TestRepo::new();
    let db = repo.path().join("files.sqlite");

    {
        let store = SqliteRegistryStore::open(&db).unwrap();
        let registry = FileRegistry::with_store(Arc::new(store));
        assert_eq!(registry.insert(Path::new("/a.cpp")).unwrap(), FileId::new(1));
        assert_eq!(registry.insert(Path::new("/b.cpp")).unwrap(), FileId::new(2));
    }

    let store = SqliteRegistryStore::open(&db).unwrap();
    let registry = FileRegistry::with_store(Arc::new(store));
    assert_eq!(registry.load_from_store().unwrap(), 2);
    assert_eq!(registry.id_for(Path::new("/b.cpp")), Some(FileId::new(2)));
    assert_eq!(registry.path_for(FileId::new(1)), Some(PathBuf::from("/a.cpp")));
    assert_eq!(registry.insert(Path::new("/c.cpp")).unwrap(), FileId::new(3));
    registry.verify().unwrap();
}

#[test]
fn test_file_order_puts_higher_ids_first() {
    let registry = FileRegistry::new();
    let a = Location::from_path_and_offset(&registry, "/a.cpp,100").unwrap();
    let b = Location::from_path_and_offset(&registry, "/b.cpp,0").unwrap();
    assert_eq!(a.file_id(), FileId::new(1));
    assert_eq!(b.file_id(), FileId::new(2));

    // File id descending, then offset ascending
    assert!(b < a);
    assert!(!(a < b));
    assert!(Location::new(FileId::new(1), 5) < a);

    assert_eq!(a.key(&registry, KeyFlags::NONE), "/a.cpp,100");
    assert_eq!(a.key(&registry, KeyFlags::PADDED), "/a.cpp,000100");
}

#[test]
fn test_location_order_is_strict_and_transitive() {
    let samples: Vec<Location> = [0u32, 1, 7, u32::MAX]
        .iter()
        .flat_map(|&file| {
            [0u32, 1, 100, u32::MAX]
                .into_iter()
                .map(move |offset| Location::new(FileId::new(file), offset))
        })
        .collect();

    for a in &samples {
        assert!(!(a < a));
        for b in &samples {
            assert!(!(a < b && b < a), "{:?} {:?}", a, b);
            if a != b {
                assert!(a < b || b < a, "{:?} {:?}", a, b);
            }
            for c in &samples {
                if a < b && b < c {
                    assert!(a < c, "{:?} {:?} {:?}", a, b, c);
                }
            }
        }
    }
}

#[test]
fn test_location_fields_and_key_survive_packing() {
    for &(file, offset) in &[(1u32, 0u32), (2, 100), (u32::MAX, u32::MAX), (42, 1 << 31)] {
        let loc = Location::new(FileId::new(file), offset);
        assert_eq!(loc.file_id(), FileId::new(file));
        assert_eq!(loc.offset(), offset);
        assert_eq!(Location::from_key(&loc.to_key()).unwrap(), loc);
    }
    assert!(Location::from_key(&[1, 2, 3]).is_err());
}
