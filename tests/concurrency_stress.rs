//! Concurrent readers/writers stress tests

use gds_rs::{ArrayData, ArraySpec, Container, ElemType, FileManager, GdsError};
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

#[test]
fn test_10_concurrent_readers_2_writers() {
    let temp = TempDir::new().unwrap();
    let gds = Container::create(temp.path().join("stress.gds"), false).unwrap();

    // Pre-populate
    let root = gds.root();
    for i in 0..20 {
        let x = root
            .add_array(
                &format!("x{}", i),
                ArraySpec::integer(ElemType::Int32, vec![0]).with_encoder("LZ4"),
            )
            .unwrap();
        x.append_values(ArrayData::Int32((0..5000).map(|v| v + i).collect()))
            .unwrap();
    }

    let reads = AtomicUsize::new(0);
    crossbeam::scope(|s| {
        for thread_id in 0..12 {
            let gds = gds.clone();
            let reads = &reads;
            s.spawn(move |_| {
                if thread_id < 2 {
                    // Writer thread
                    let folder = gds.root().add_folder(&format!("w{}", thread_id)).unwrap();
                    for i in 0..50 {
                        let raw = folder.add_raw(&format!("r{}", i), None).unwrap();
                        raw.append_raw(&[thread_id as u8; 300]).unwrap();
                    }
                } else {
                    // Reader thread
                    for _ in 0..200 {
                        let i = rand::random::<usize>() % 20;
                        let x = gds.resolve(&format!("x{}", i), false).unwrap().unwrap();
                        let out = x.read(Some(&[1000]), Some(&[10]), None).unwrap();
                        let expected: Vec<i32> = (1000..1010).map(|v| v + i as i32).collect();
                        assert_eq!(out.data, ArrayData::Int32(expected));
                        reads.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });
        }
    })
    .unwrap();

    assert_eq!(reads.load(Ordering::Relaxed), 2000);
    // Verify integrity
    assert_eq!(root.child_count().unwrap(), 22);
    for w in ["w0", "w1"] {
        let folder = gds.resolve(w, false).unwrap().unwrap();
        assert_eq!(folder.child_count().unwrap(), 50);
    }
    gds.close().unwrap();
}

#[test]
fn test_concurrent_appends_to_one_array() {
    let temp = TempDir::new().unwrap();
    let gds = Container::create(temp.path().join("append.gds"), false).unwrap();
    let x = gds
        .root()
        .add_array("x", ArraySpec::integer(ElemType::Int64, vec![0, 4]))
        .unwrap();

    crossbeam::scope(|s| {
        for t in 0..8i64 {
            let x = x.clone();
            s.spawn(move |_| {
                for _ in 0..100 {
                    // Each append is one full row, so rows never interleave
                    x.append_values(ArrayData::Int64(vec![t; 4])).unwrap();
                }
            });
        }
    })
    .unwrap();

    let out = x.read(None, None, None).unwrap();
    assert_eq!(out.dim, vec![800, 4]);
    if let ArrayData::Int64(values) = out.data {
        for row in values.chunks(4) {
            assert!(row.iter().all(|&v| v == row[0]));
        }
        for t in 0..8 {
            assert_eq!(values.iter().filter(|&&v| v == t).count(), 400);
        }
    } else {
        panic!("expected Int64 data");
    }
    gds.close().unwrap();
}

#[test]
fn test_close_while_clones_are_in_use() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("closing.gds");
    let gds = Container::create(&path, false).unwrap();
    let raw = gds.root().add_raw("r", None).unwrap();
    raw.append_raw(&[1u8; 1024]).unwrap();

    let failures = AtomicUsize::new(0);
    crossbeam::scope(|s| {
        for _ in 0..4 {
            let raw = raw.clone();
            let failures = &failures;
            s.spawn(move |_| {
                for _ in 0..500 {
                    match raw.read_raw(0, 16) {
                        Ok(bytes) => assert_eq!(bytes, vec![1u8; 16]),
                        Err(GdsError::InvalidOperation { .. }) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            });
        }
        gds.close().unwrap();
    })
    .unwrap();

    // Once closed, every later read fails the same way
    assert!(matches!(
        raw.read_raw(0, 1),
        Err(GdsError::InvalidOperation { .. })
    ));
    assert!(!FileManager::global().is_open(&path));
    assert!(failures.load(Ordering::Relaxed) <= 2000);
}

#[test]
fn test_many_read_only_handles_across_threads() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("shared.gds");
    {
        let gds = Container::create(&path, false).unwrap();
        let v = gds
            .root()
            .add_array("v", ArraySpec::real(ElemType::Float64, vec![0]))
            .unwrap();
        v.append_values(ArrayData::Float64((0..1000).map(|i| i as f64).collect()))
            .unwrap();
        gds.close().unwrap();
    }

    crossbeam::scope(|s| {
        for _ in 0..8 {
            let path = &path;
            s.spawn(move |_| {
                let gds = Container::open(path, true, true).unwrap();
                let v = gds.resolve("v", false).unwrap().unwrap();
                let out = v.read(Some(&[500]), Some(&[3]), None).unwrap();
                assert_eq!(out.data, ArrayData::Float64(vec![500.0, 501.0, 502.0]));
                gds.close().unwrap();
            });
        }
    })
    .unwrap();

    assert!(!FileManager::global().is_open(&path));
}

#[test]
fn test_concurrent_virtual_folder_resolution() {
    let temp = TempDir::new().unwrap();
    for t in 0..3 {
        let target = Container::create(temp.path().join(format!("t{}.gds", t)), false).unwrap();
        let x = target
            .root()
            .add_array("x", ArraySpec::integer(ElemType::Int32, vec![0]))
            .unwrap();
        x.append_values(ArrayData::Int32(vec![t; 4])).unwrap();
        target.close().unwrap();
    }

    let gds = Container::create(temp.path().join("links.gds"), false).unwrap();
    for t in 0..3 {
        gds.root()
            .add_vfolder(&format!("l{}", t), &format!("t{}.gds", t))
            .unwrap();
    }
    gds.root().add_vfolder("gone", "missing.gds").unwrap();

    crossbeam::scope(|s| {
        for thread_id in 0..8 {
            let gds = gds.clone();
            s.spawn(move |_| {
                for i in 0..50 {
                    let t = (thread_id + i) % 3;
                    let x = gds.resolve(&format!("l{}/x", t), false).unwrap().unwrap();
                    assert_eq!(x.name(true).unwrap(), format!("l{}/x", t));
                    assert_eq!(
                        x.read(None, None, None).unwrap().data,
                        ArrayData::Int32(vec![t as i32; 4])
                    );

                    let gone = gds.resolve("gone", false).unwrap().unwrap();
                    assert!(gone.list_children(true).unwrap().is_empty());
                    assert!(!gone.describe().unwrap().good);
                }
            });
        }
    })
    .unwrap();

    gds.close().unwrap();
}
