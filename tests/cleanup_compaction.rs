//! Compaction of closed containers

use gds_rs::{ArrayData, ArraySpec, Container, ContainerBuilder, ElemType, GdsError};
use tempfile::TempDir;

#[test]
fn test_cleanup_reclaims_deleted_payloads() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("compact.gds");
    let kept: Vec<i64> = (0..20_000).collect();

    {
        let gds = Container::create(&path, false).unwrap();
        let root = gds.root();
        let keep = root
            .add_array("keep", ArraySpec::integer(ElemType::Int64, vec![0]))
            .unwrap();
        keep.append_values(ArrayData::Int64(kept.clone())).unwrap();
        keep.set_attribute("note", "survives").unwrap();

        let junk = root.add_raw("junk", None).unwrap();
        junk.append_raw(&vec![0xAB; 500_000]).unwrap();
        gds.sync().unwrap();

        junk.delete().unwrap();
        gds.close().unwrap();
    }

    let before = std::fs::metadata(&path).unwrap().len();
    let report = Container::cleanup(&path, false).unwrap();
    assert_eq!(report.old_size, before);
    assert!(report.fragments > 0);
    assert!(report.new_size < report.old_size);
    assert!(report.reclaimed() >= 500_000);
    assert!(!temp.path().join("compact.gds.tmp").exists());

    let gds = Container::open(&path, true, false).unwrap();
    assert_eq!(gds.root().list_children(true).unwrap(), vec!["keep"]);
    let keep = gds.resolve("keep", false).unwrap().unwrap();
    assert_eq!(
        keep.read(None, None, None).unwrap().data,
        ArrayData::Int64(kept)
    );
    assert_eq!(
        keep.attributes().unwrap().get("note").and_then(|v| v.as_str()),
        Some("survives")
    );
    gds.close().unwrap();
}

#[test]
fn test_cleanup_keeps_compressed_streams_readable() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("codecs.gds");
    let data: Vec<u8> = (0..150_000u32).map(|i| (i / 7) as u8).collect();

    {
        let gds = Container::create(&path, false).unwrap();
        for (name, encoder) in [("lz4", "LZ4"), ("zstd", "ZSTD.max"), ("plain", "")] {
            let raw = gds
                .root()
                .add_raw(name, Some(encoder).filter(|e| !e.is_empty()))
                .unwrap();
            raw.append_raw(&data).unwrap();
            // Every sync appends a fresh index and orphans the previous one
            gds.sync().unwrap();
        }
        gds.close().unwrap();
    }

    let report = Container::cleanup(&path, true).unwrap();
    assert!(report.fragments >= 2);

    let gds = Container::open(&path, true, false).unwrap();
    for name in ["lz4", "zstd", "plain"] {
        let raw = gds.resolve(name, false).unwrap().unwrap();
        assert_eq!(raw.raw_len().unwrap(), data.len() as u64);
        assert_eq!(raw.read_raw(70_000, 1000).unwrap(), &data[70_000..71_000]);
    }
    gds.close().unwrap();

    // A second pass finds nothing to drop
    let again = Container::cleanup(&path, false).unwrap();
    assert_eq!(again.fragments, 0);
    assert_eq!(again.new_size, again.old_size);
}

#[test]
fn test_cleanup_refuses_open_files() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("busy.gds");
    let gds = Container::create(&path, false).unwrap();

    assert!(matches!(
        Container::cleanup(&path, false),
        Err(GdsError::AlreadyOpen { .. })
    ));
    gds.close().unwrap();
    assert!(Container::cleanup(&path, false).is_ok());
}

#[test]
fn test_cleanup_missing_file() {
    let temp = TempDir::new().unwrap();
    let err = gds_rs::cleanup(temp.path().join("nothing.gds"), false).unwrap_err();
    assert!(matches!(err, GdsError::FileNotFound(_)));
}

#[test]
fn test_string_arrays_read_back_after_cleanup() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ids.gds");
    let ids: Vec<String> = (0..500).map(|i| format!("rs{}", i * 7919)).collect();
    {
        let gds = ContainerBuilder::new()
            .chunk_size(128)
            .encoder("ZSTD")
            .create(&path)
            .unwrap();
        let s = gds
            .root()
            .add_array("ids", ArraySpec::string(ElemType::Utf8, vec![0]))
            .unwrap();
        for batch in ids.chunks(37) {
            s.append_values(ArrayData::Utf8(batch.to_vec())).unwrap();
            gds.sync().unwrap();
        }
        gds.root().add_raw("scratch", None).unwrap().delete().unwrap();
        gds.close().unwrap();
    }

    Container::cleanup(&path, false).unwrap();

    let gds = Container::open(&path, true, false).unwrap();
    let s = gds.resolve("ids", false).unwrap().unwrap();
    assert!(s.describe().unwrap().good);
    let mask: Vec<bool> = (0..500).map(|i| i % 61 == 3).collect();
    let expected: Vec<String> = (0..500).filter(|i| i % 61 == 3).map(|i| ids[i].clone()).collect();
    assert_eq!(
        s.read_selected(&[mask], None).unwrap().data,
        ArrayData::Utf8(expected)
    );
    assert_eq!(
        s.read(Some(&[250]), Some(&[100]), None).unwrap().data,
        ArrayData::Utf8(ids[250..350].to_vec())
    );
    gds.close().unwrap();
}
