//! End-to-end tests for a namespace with real directory trees mounted in it.
//!
//! # Layout
//!
//! Each test builds a temporary directory holding `x/a.txt`, `y/a.txt` and
//! an empty `z/`, creates `/a` in a fresh namespace, and mounts the
//! directory there.

use std::sync::Arc;

use graft_vfs::{
    AccessMode, LocalBackend, MountRequest, MountedFilesystem, Namespace, NamespaceConfig,
    MountConfig, OpenFlags, VfsError,
};
use tempfile::TempDir;

// ============================================================================
// Shared test setup
// ============================================================================

fn external_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("x")).unwrap();
    std::fs::write(dir.path().join("x/a.txt"), "Hello X A\n").unwrap();
    std::fs::create_dir(dir.path().join("y")).unwrap();
    std::fs::write(dir.path().join("y/a.txt"), "Hello Y A\n").unwrap();
    std::fs::create_dir(dir.path().join("z")).unwrap();
    dir
}

async fn mounted_namespace() -> (Namespace, TempDir) {
    let dir = external_tree();
    let ns = Namespace::new(NamespaceConfig::default());
    let a = ns.path("/a").unwrap();
    ns.create_directory(&a).await.unwrap();
    ns.mount(MountRequest::new(Arc::new(LocalBackend::new(dir.path())), "/", a).unwrap())
        .await
        .unwrap();
    (ns, dir)
}

fn names(entries: Vec<graft_vfs::DirEntry>) -> Vec<String> {
    entries.into_iter().map(|e| e.name).collect()
}

// ============================================================================
// Listing and reading
// ============================================================================

#[tokio::test]
async fn list_mounted_directory_is_sorted() {
    let (ns, _dir) = mounted_namespace().await;
    let entries = ns.list_directory(&ns.path("/a").unwrap()).await.unwrap();
    assert_eq!(names(entries), ["x", "y", "z"]);

    let entries = ns.list_directory(&ns.path("/a/x").unwrap()).await.unwrap();
    assert_eq!(names(entries), ["a.txt"]);
}

#[tokio::test]
async fn read_external_bytes_exactly() {
    let (ns, _dir) = mounted_namespace().await;
    let data = ns.read_all(&ns.path("/a/x/a.txt").unwrap()).await.unwrap();
    assert_eq!(data, b"Hello X A\n");

    let attr = ns
        .read_attributes(&ns.path("/a/y/a.txt").unwrap())
        .await
        .unwrap();
    assert!(attr.is_file());
    assert_eq!(attr.size, 10);
}

#[tokio::test]
async fn open_mount_point_is_not_not_found() {
    let (ns, _dir) = mounted_namespace().await;
    let err = ns
        .open_read(&ns.path("/a").unwrap(), OpenFlags::read())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::IsADirectory(_)));
    assert!(!err.is_not_found());
}

#[tokio::test]
async fn missing_external_file_is_not_found() {
    let (ns, _dir) = mounted_namespace().await;
    let err = ns
        .read_all(&ns.path("/a/x/nope.txt").unwrap())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn path_below_a_file_is_not_found() {
    let (ns, _dir) = mounted_namespace().await;
    let below = ns.path("/a/x/a.txt/child").unwrap();

    let err = ns.read_attributes(&below).await.unwrap_err();
    match err {
        VfsError::NotFound(p) => assert_eq!(p, "/a/x/a.txt/child"),
        other => panic!("unexpected {other:?}"),
    }
    assert!(ns.list_directory(&below).await.unwrap_err().is_not_found());
    assert!(ns.read_all(&below).await.unwrap_err().is_not_found());

    // Seen as missing, so creation reaches the mount and is refused there.
    let err = ns.create_directories(&below).await.unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied(_)), "{err:?}");
}

// ============================================================================
// Read-only enforcement
// ============================================================================

#[tokio::test]
async fn mounted_content_rejects_changes() {
    let (ns, dir) = mounted_namespace().await;
    let file = ns.path("/a/x/a.txt").unwrap();

    let err = ns.open_read(&file, OpenFlags::create_truncate()).await.unwrap_err();
    assert!(matches!(err, VfsError::ReadOnly));

    let err = ns.check_access(&file, &[AccessMode::Write]).await.unwrap_err();
    assert!(matches!(err, VfsError::ReadOnly));

    let err = ns.create_directory(&ns.path("/a/w").unwrap()).await.unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied(_)));

    let err = ns.delete(&ns.path("/a/z").unwrap()).await.unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied(_)));

    assert!(dir.path().join("z").is_dir());
    assert_eq!(
        std::fs::read_to_string(dir.path().join("x/a.txt")).unwrap(),
        "Hello X A\n"
    );
}

#[cfg(unix)]
#[tokio::test]
async fn symlink_escape_is_denied() {
    let outer = TempDir::new().unwrap();
    std::fs::write(outer.path().join("secret.txt"), "secret").unwrap();
    let inner = outer.path().join("inner");
    std::fs::create_dir(&inner).unwrap();
    std::os::unix::fs::symlink(outer.path().join("secret.txt"), inner.join("leak")).unwrap();

    let ns = Namespace::new(NamespaceConfig::default());
    let m = ns.path("/m").unwrap();
    ns.create_directory(&m).await.unwrap();
    ns.mount(MountRequest::new(Arc::new(LocalBackend::new(&inner)), "/", m).unwrap())
        .await
        .unwrap();

    let err = ns
        .read_all(&ns.path("/m/leak").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::PermissionDenied(_)), "{err:?}");
}

// ============================================================================
// Mount lifecycle
// ============================================================================

#[tokio::test]
async fn unmount_restores_virtual_directory() {
    let dir = external_tree();
    let ns = Namespace::new(NamespaceConfig::default());
    let a = ns.path("/a").unwrap();
    ns.create_directories(&ns.path("/a/before").unwrap()).await.unwrap();
    let before = ns.read_attributes(&a).await.unwrap();

    ns.mount(MountRequest::new(Arc::new(LocalBackend::new(dir.path())), "/", a.clone()).unwrap())
        .await
        .unwrap();
    assert_eq!(
        ns.mounted_filesystems(),
        vec![MountedFilesystem {
            mount_point: a.clone(),
            source: "/".into(),
        }]
    );
    assert_eq!(names(ns.list_directory(&a).await.unwrap()), ["x", "y", "z"]);

    ns.unmount(&a).await.unwrap();
    assert!(ns.mounted_filesystems().is_empty());
    assert_eq!(names(ns.list_directory(&a).await.unwrap()), ["before"]);
    assert_eq!(ns.read_attributes(&a).await.unwrap(), before);

    let err = ns.unmount(&a).await.unwrap_err();
    assert!(matches!(err, VfsError::NotAMount(_)));
}

#[tokio::test]
async fn mount_configured_creates_mount_points() {
    let dir = external_tree();
    let ns = Namespace::new(NamespaceConfig {
        mounts: vec![MountConfig {
            source: dir.path().join("x"),
            at: "/media/x".to_string(),
        }],
        ..NamespaceConfig::default()
    });
    ns.mount_configured().await.unwrap();

    assert_eq!(
        names(ns.list_directory(&ns.path("/media").unwrap()).await.unwrap()),
        ["x"]
    );
    let data = ns.read_all(&ns.path("/media/x/a.txt").unwrap()).await.unwrap();
    assert_eq!(data, b"Hello X A\n");
}

// ============================================================================
// Namespaces inside namespaces
// ============================================================================

#[tokio::test]
async fn namespace_mounted_in_another_namespace() {
    let (inner, _dir) = mounted_namespace().await;
    let inner = Arc::new(inner);

    let err = MountRequest::new(inner.clone(), "/", inner.path("/a").unwrap()).unwrap_err();
    assert!(matches!(err, VfsError::CrossNamespace(_)));

    let outer = Namespace::new(NamespaceConfig::named("outer"));
    let at = outer.path("/nested").unwrap();
    outer.create_directory(&at).await.unwrap();
    outer
        .mount(MountRequest::new(inner.clone(), "/", at.clone()).unwrap())
        .await
        .unwrap();

    assert_eq!(names(outer.list_directory(&at).await.unwrap()), ["a"]);
    let data = outer
        .read_all(&outer.path("/nested/a/y/a.txt").unwrap())
        .await
        .unwrap();
    assert_eq!(data, b"Hello Y A\n");
}

#[tokio::test]
async fn paths_do_not_cross_namespaces() {
    let (ns0, _dir) = mounted_namespace().await;
    let ns1 = Namespace::new(NamespaceConfig::default());

    assert_ne!(ns0.path("/a/x").unwrap(), ns1.path("/a/x").unwrap());
    let err = ns1
        .list_directory(&ns0.path("/a").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::CrossNamespace(_)));

    let err = ns1
        .mount(
            MountRequest::new(Arc::new(LocalBackend::new("/")), "/", ns0.path("/a").unwrap())
                .unwrap(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::CrossNamespace(_)));
}

// ============================================================================
// Renames
// ============================================================================

#[tokio::test]
async fn rename_virtual_directories() {
    let ns = Namespace::new(NamespaceConfig::default());
    ns.create_directory(&ns.path("/a").unwrap()).await.unwrap();
    ns.create_directory(&ns.path("/b").unwrap()).await.unwrap();
    ns.create_directory(&ns.path("/a/inner").unwrap()).await.unwrap();

    let err = ns
        .rename(&ns.path("/a").unwrap(), &ns.path("/b").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, VfsError::AlreadyExists(_)));

    ns.rename(&ns.path("/a").unwrap(), &ns.path("/c").unwrap())
        .await
        .unwrap();
    assert!(ns
        .list_directory(&ns.path("/a").unwrap())
        .await
        .unwrap_err()
        .is_not_found());
    assert_eq!(
        names(ns.list_directory(&ns.path("/c").unwrap()).await.unwrap()),
        ["inner"]
    );
}
