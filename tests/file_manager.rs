//! Container lifecycle: duplicate-open policy, close/sync, persistence

use gds_rs::{
    ArrayData, ArraySpec, AttrValue, Container, ContainerBuilder, ContainerOptions, ElemType,
    FileManager, GdsError, Mode,
};
use tempfile::TempDir;

#[test]
fn test_duplicate_open_policy() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("dup.gds");
    Container::create(&path, false).unwrap().close().unwrap();

    let first = Container::open(&path, true, false).unwrap();
    assert!(matches!(
        Container::open(&path, true, false),
        Err(GdsError::AlreadyOpen { .. })
    ));

    let second = Container::open(&path, true, true).unwrap();
    assert_eq!(second.mode(), Mode::ReadOnly);
    assert_eq!(FileManager::global().handle_count(&path), 2);

    // A writer needs exclusive access even with allow_dup
    assert!(matches!(
        Container::open(&path, false, true),
        Err(GdsError::AlreadyOpen { .. })
    ));
    assert!(matches!(
        Container::create(&path, true),
        Err(GdsError::AlreadyOpen { .. })
    ));

    first.close().unwrap();
    second.close().unwrap();
    assert!(!FileManager::global().is_open(&path));

    let writer = Container::open(&path, false, false).unwrap();
    assert_eq!(writer.mode(), Mode::ReadWrite);
    writer.close().unwrap();
}

#[test]
fn test_read_only_alongside_writer() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("rw.gds");
    let writer = Container::create(&path, false).unwrap();
    writer.root().add_folder("g").unwrap();
    writer.sync().unwrap();

    let reader = Container::open(&path, true, true).unwrap();
    assert_eq!(reader.root().list_children(true).unwrap(), vec!["g"]);

    reader.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn test_read_only_handle_rejects_writes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("ro.gds");
    Container::create(&path, false).unwrap().close().unwrap();

    let gds = Container::open(&path, true, false).unwrap();
    let root = gds.root();
    assert!(matches!(gds.sync(), Err(GdsError::InvalidOperation { .. })));
    assert!(matches!(
        root.add_folder("g"),
        Err(GdsError::InvalidOperation { .. })
    ));
    assert!(matches!(
        root.set_attribute("k", 1i64),
        Err(GdsError::InvalidOperation { .. })
    ));
    // Closing a read-only handle writes nothing
    let size = gds.filesize().unwrap();
    gds.close().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), size);
}

#[test]
fn test_open_missing_file() {
    let temp = TempDir::new().unwrap();
    let err = Container::open(temp.path().join("absent.gds"), true, false).unwrap_err();
    assert!(matches!(err, GdsError::FileNotFound(_)));
    assert!(err.is_not_found());
}

#[test]
fn test_open_rejects_foreign_files() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("foreign.gds");
    std::fs::write(&path, vec![0x42u8; 512]).unwrap();

    assert!(matches!(
        Container::open(&path, true, false),
        Err(GdsError::CorruptData(_))
    ));
    // The failed open leaves no handle behind
    assert!(!FileManager::global().is_open(&path));
}

#[test]
fn test_reopen_restores_everything() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("persist.gds");

    {
        let gds = ContainerBuilder::new()
            .chunk_size(1024)
            .encoder("LZ4")
            .create(&path)
            .unwrap();
        let root = gds.root();
        let g = root.add_folder("g").unwrap();
        g.set_attribute("description", "genotypes").unwrap();
        g.set_attribute("ploidy", 2i64).unwrap();

        let x = g
            .add_array("x", ArraySpec::real(ElemType::Float32, vec![0, 2]))
            .unwrap();
        let values: Vec<f32> = (0..5000).map(|i| i as f32 * 0.5).collect();
        x.append_values(ArrayData::Float32(values)).unwrap();

        let ids = g
            .add_array("ids", ArraySpec::string(ElemType::Utf8, vec![0]))
            .unwrap();
        ids.append_values(ArrayData::Utf8(vec!["rs1".into(), "rs22".into()]))
            .unwrap();

        let hidden = root.add_label("hidden").unwrap();
        hidden.set_hidden(true).unwrap();
        gds.close().unwrap();
    }

    let gds = Container::open(&path, true, false).unwrap();
    let g = gds.resolve("g", false).unwrap().unwrap();
    let attrs = g.attributes().unwrap();
    assert_eq!(attrs.get("description"), Some(&AttrValue::Str("genotypes".into())));
    assert_eq!(attrs.get("ploidy").and_then(AttrValue::as_int), Some(2));

    let x = g.child("x").unwrap();
    let info = x.describe().unwrap();
    assert_eq!(info.dim, Some(vec![2500, 2]));
    assert_eq!(info.encoder, "LZ4");
    let out = x.read(Some(&[1000, 0]), Some(&[2, 2]), None).unwrap();
    assert_eq!(out.data, ArrayData::Float32(vec![1000.0, 1000.5, 1001.0, 1001.5]));

    let ids = g.child("ids").unwrap();
    assert_eq!(
        ids.read(None, None, None).unwrap().data,
        ArrayData::Utf8(vec!["rs1".into(), "rs22".into()])
    );

    assert_eq!(gds.root().list_children(false).unwrap(), vec!["g"]);
    assert!(gds.root().child("hidden").unwrap().is_hidden().unwrap());
    gds.close().unwrap();
}

#[test]
fn test_sync_makes_changes_visible_to_new_handles() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("sync.gds");
    let writer = Container::create(&path, false).unwrap();
    let raw = writer.root().add_raw("r", None).unwrap();
    raw.append_raw(b"hello").unwrap();

    let before = Container::open(&path, true, true).unwrap();
    assert!(before.root().list_children(true).unwrap().is_empty());
    before.close().unwrap();

    writer.sync().unwrap();
    let after = Container::open(&path, true, true).unwrap();
    let r = after.resolve("r", false).unwrap().unwrap();
    assert_eq!(r.read_raw(0, 5).unwrap(), b"hello");
    after.close().unwrap();
    writer.close().unwrap();
}

#[test]
fn test_drop_flushes_and_releases() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("drop.gds");
    {
        let gds = Container::create(&path, false).unwrap();
        gds.root().add_folder("kept").unwrap();
    }
    assert!(!FileManager::global().is_open(&path));

    let gds = Container::open(&path, true, false).unwrap();
    assert_eq!(gds.root().list_children(true).unwrap(), vec!["kept"]);
}

#[test]
fn test_nodes_outlive_dropped_handle() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("alive.gds");
    let node = {
        let gds = Container::create(&path, false).unwrap();
        gds.root().add_label("l").unwrap()
    };
    // The node still holds the container open
    assert!(FileManager::global().is_open(&path));
    assert_eq!(node.name(true).unwrap(), "l");
    node.container().close().unwrap();
    assert!(!FileManager::global().is_open(&path));
}

#[test]
fn test_options_from_toml() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("toml.gds");
    let options = ContainerOptions::from_toml_str("chunk_size = 128\nencoder = \"ZSTD.max\"").unwrap();

    let gds = ContainerBuilder::new().options(options).create(&path).unwrap();
    let raw = gds.root().add_raw("r", None).unwrap();
    raw.append_raw(&[5u8; 1000]).unwrap();
    assert_eq!(raw.describe().unwrap().encoder, "ZSTD.max");
    assert_eq!(gds.options().chunk_size, 128);
    gds.close().unwrap();
}

#[test]
fn test_filesize_grows_with_appends() {
    let temp = TempDir::new().unwrap();
    let gds = Container::create(temp.path().join("size.gds"), false).unwrap();
    let start = gds.filesize().unwrap();

    let raw = gds.root().add_raw("r", None).unwrap();
    raw.append_raw(&vec![1u8; 200_000]).unwrap();
    assert!(gds.filesize().unwrap() > start + 100_000);
    gds.close().unwrap();
}
