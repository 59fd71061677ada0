use filekit::*;
use filekit_local::*;
use tempfile::TempDir;

const PNG_HEAD: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x0D];

async fn open(temp: &TempDir, compression: Compression) -> LocalBlobStore {
    LocalBlobStore::builder().root(temp.path()).compression(compression).connect().await.unwrap()
}

#[tokio::test]
async fn test_path_traversal_blocked() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    assert!(store.resolve("../etc/passwd").is_err());
    assert!(store.resolve("foo/../../bar").is_err());
    assert!(matches!(
        store.write("../escape.txt", b"x", &Metadata::new()).await,
        Err(StorageError::PathTraversalAttempt { .. })
    ));
}

#[tokio::test]
async fn test_write_read_roundtrip_uncompressed() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    assert!(store.write("foo/bar.bin", b"hello world", &Metadata::new()).await.unwrap());
    assert!(store.file_exists("foo/bar.bin").await.unwrap());
    assert!(store.directory_exists("foo").await.unwrap());
    assert!(!store.directory_exists("foo/bar.bin").await.unwrap());
    assert_eq!(store.read("foo/bar.bin").await.unwrap(), b"hello world");
    assert_eq!(std::fs::read(temp.path().join("foo/bar.bin")).unwrap(), b"hello world");
}

#[tokio::test]
async fn test_streamed_write_roundtrip_compressed() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::Lz4).await;

    let payload = vec![1u8; 4096];
    assert!(store.write_stream("bin/data.dat", payload.as_slice(), &Metadata::new()).await.unwrap());

    let on_disk = std::fs::read(temp.path().join("bin/data.dat")).unwrap();
    assert!(on_disk.len() < payload.len());
    assert_eq!(store.read("bin/data.dat").await.unwrap(), payload);
}

#[tokio::test]
async fn test_overwrite_replaces_contents() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    store.write("a/v.txt", b"one", &Metadata::new()).await.unwrap();
    store.write_stream("a/v.txt", &b"two"[..], &Metadata::new()).await.unwrap();
    assert_eq!(store.read("a/v.txt").await.unwrap(), b"two");
}

#[tokio::test]
async fn test_delete_reports_presence() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    store.write("tmp/file.txt", b"x", &Metadata::new()).await.unwrap();
    assert!(store.delete("tmp/file.txt").await.unwrap());
    assert!(!store.file_exists("tmp/file.txt").await.unwrap());
    assert!(!store.delete("tmp/file.txt").await.unwrap());
}

#[tokio::test]
async fn test_read_missing_returns_file_not_found() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    let err = store.read("missing.bin").await.expect_err("expected error");
    match err {
        StorageError::FileNotFound { .. } => {},
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_listing_hides_temp_files() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;

    store.write("up/1/a.txt", b"a", &Metadata::new()).await.unwrap();
    store.write("up/.dirindex", b"1", &Metadata::new()).await.unwrap();
    std::fs::write(temp.path().join("up/1/b.txt.fktmp.9"), b"partial").unwrap();

    let root = store.list_directory("up").await.unwrap();
    assert_eq!(
        root,
        vec![
            DirEntry { path: "up/.dirindex".into(), kind: EntryKind::File },
            DirEntry { path: "up/1".into(), kind: EntryKind::Directory },
        ]
    );
    assert_eq!(store.list_directory("up/1").await.unwrap().len(), 1);
    assert!(store.list_directory("up/2").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_mime_is_sniffed_after_decompression() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::Lz4).await;

    store.write("img/photo.bin", PNG_HEAD, &Metadata::new()).await.unwrap();
    assert_eq!(store.mime_type("img/photo.bin").await.unwrap(), "image/png");

    store.write("img/notes.txt", b"plain words", &Metadata::new()).await.unwrap();
    assert_eq!(store.mime_type("img/notes.txt").await.unwrap(), "text/plain");
}

#[tokio::test]
async fn test_connect_without_create_requires_root() {
    let temp = TempDir::new().unwrap();
    let result =
        LocalBlobStore::builder().root(temp.path().join("absent")).create(false).connect().await;
    assert!(matches!(result, Err(StorageError::Io { .. })));
}

#[tokio::test]
async fn test_connect_purges_stale_temp_files() {
    let temp = TempDir::new().unwrap();
    let stale = temp.path().join("old.png.fktmp.3");
    let file = std::fs::File::create(&stale).unwrap();
    file.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(3600)).unwrap();
    drop(file);

    let _store = open(&temp, Compression::None).await;
    assert!(!stale.exists());
}

#[tokio::test]
async fn test_service_shards_on_disk() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp, Compression::None).await;
    let config = StorageConfig { max_dir_files: ShardLimit::bounded(2).unwrap(), ..Default::default() };
    let service = StorageService::builder().store(store.clone()).config(config).build().unwrap();
    let options = SaveOptions::new().prefix("uploads");

    let mut paths = Vec::new();
    for name in ["a.png", "b.png", "c.png"] {
        paths.push(service.save(FileRecord::from_bytes(name, PNG_HEAD.to_vec()), &options).await.unwrap());
    }

    assert!(paths[0].starts_with("uploads/1/") && paths[1].starts_with("uploads/1/"));
    assert!(paths[2].starts_with("uploads/2/"));
    assert_eq!(std::fs::read_to_string(temp.path().join("uploads/.dirindex")).unwrap(), "2");
    assert_eq!(std::fs::read_dir(temp.path().join("uploads/1")).unwrap().count(), 2);

    let viewed = service.view(&paths[2]).await.unwrap().unwrap();
    assert_eq!(viewed.mime_type, "image/png");
    assert!(service.delete(&paths[2]).await.unwrap());
    assert!(!temp.path().join(&paths[2]).exists());
}

#[tokio::test]
async fn test_service_resumes_from_persisted_marker() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("media")).unwrap();
    std::fs::write(temp.path().join("media/.dirindex"), "7").unwrap();

    let store = open(&temp, Compression::None).await;
    let service = StorageService::builder().store(store).build().unwrap();

    let path = service
        .save(FileRecord::from_bytes("x.txt", b"x".to_vec()), &SaveOptions::new().prefix("media"))
        .await
        .unwrap();
    assert!(path.starts_with("media/7/"), "{path}");
}
