mod common;

use common::{lp, write_file, RepoFixture};
use std::fs;

/// Lazy copy on first write: the source file appears under the overlay
/// mirror, byte-identical, and the whiteout log stays untouched.
#[tokio::test]
async fn test_lazy_copy_on_first_write() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "a.txt", "hello");
    });
    let repo = fixture.open();

    let physical = repo.readwrite_path(&lp("/a.txt")).await.unwrap();
    assert_eq!(physical, fixture.mirror_path("a.txt"));
    assert_eq!(fs::read_to_string(&physical).unwrap(), "hello");
    assert!(repo.is_local(&lp("/a.txt")));
    assert_eq!(fixture.whiteout_log(), "");

    // The source is untouched.
    assert_eq!(
        fs::read_to_string(fixture.source_root.join("a.txt")).unwrap(),
        "hello"
    );
}

#[tokio::test]
async fn test_read_path_resolves_overlay_after_write() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "a.txt", "hello");
    });
    let repo = fixture.open();

    // Before any write the source side wins.
    assert_eq!(
        repo.read_path(&lp("/a.txt")).await,
        fixture.source_root.join("a.txt")
    );

    repo.readwrite_path(&lp("/a.txt")).await.unwrap();
    assert_eq!(
        repo.read_path(&lp("/a.txt")).await,
        fixture.mirror_path("a.txt")
    );
}

/// Repeated readwrite resolution copies the source at most once.
#[tokio::test]
async fn test_readwrite_path_is_idempotent() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "a.txt", "original");
    });
    let repo = fixture.open();

    let first = repo.readwrite_path(&lp("/a.txt")).await.unwrap();
    // A client write lands in the overlay...
    fs::write(&first, "client edit").unwrap();

    // ...and a second resolution must not clobber it with a fresh copy.
    let second = repo.readwrite_path(&lp("/a.txt")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(fs::read_to_string(&second).unwrap(), "client edit");
}

/// A path absent from both layers is admitted as a create-new: the caller
/// gets the overlay path and produces the file there itself.
#[tokio::test]
async fn test_create_new_path() {
    let fixture = RepoFixture::new();
    let repo = fixture.open();

    let physical = repo.readwrite_path(&lp("/new.txt")).await.unwrap();
    assert_eq!(physical, fixture.mirror_path("new.txt"));
    assert!(repo.is_local(&lp("/new.txt")));
    assert!(!physical.exists());

    fs::write(&physical, "fresh").unwrap();
    assert_eq!(
        repo.read_path(&lp("/new.txt")).await,
        fixture.mirror_path("new.txt")
    );
}

#[tokio::test]
async fn test_nested_write_creates_overlay_parents() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "d1/d2/f.txt", "deep");
    });
    let repo = fixture.open();

    let physical = repo.readwrite_path(&lp("/d1/d2/f.txt")).await.unwrap();
    assert_eq!(physical, fixture.mirror_path("d1/d2/f.txt"));
    assert_eq!(fs::read_to_string(&physical).unwrap(), "deep");
}

/// Concurrent writers to the same path share one materialization and one
/// result.
#[tokio::test]
async fn test_concurrent_materialize_dedup() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "big.bin", &"x".repeat(1 << 20));
    });
    let repo = fixture.open();

    let a = repo.clone();
    let b = repo.clone();
    let (ra, rb) = tokio::join!(
        tokio::spawn(async move { a.readwrite_path(&lp("/big.bin")).await }),
        tokio::spawn(async move { b.readwrite_path(&lp("/big.bin")).await }),
    );
    let pa = ra.unwrap().unwrap();
    let pb = rb.unwrap().unwrap();

    assert_eq!(pa, pb);
    assert_eq!(fs::read(&pa).unwrap().len(), 1 << 20);
    assert_eq!(fixture.whiteout_log(), "");
}

/// Materializing a directory mirrors its children and commits the
/// directory itself to the whiteout log as a durable subtree marker.
#[tokio::test]
async fn test_directory_materialization() {
    let fixture = RepoFixture::with_source(|src| {
        write_file(src, "d/x.txt", "one");
        write_file(src, "d/sub/y.txt", "two");
    });
    let repo = fixture.open();

    repo.readwrite_path(&lp("/d")).await.unwrap();

    assert_eq!(
        fs::read_to_string(fixture.mirror_path("d/x.txt")).unwrap(),
        "one"
    );
    assert_eq!(
        fs::read_to_string(fixture.mirror_path("d/sub/y.txt")).unwrap(),
        "two"
    );
    assert!(repo.is_local(&lp("/d")));
    assert!(repo.is_local(&lp("/d/x.txt")));
    assert!(repo.is_local(&lp("/d/sub")));
    assert!(repo.is_local(&lp("/d/sub/y.txt")));

    let log = fixture.whiteout_log();
    assert!(log.lines().any(|l| l == "/d"), "log was: {:?}", log);
    assert!(log.lines().any(|l| l == "/d/sub"));
    // Plain file copies are their own evidence and stay out of the log.
    assert!(!log.lines().any(|l| l == "/d/x.txt"));
}

/// read_path is total: paths that exist nowhere still resolve (to the
/// source side), and opening them yields the host's not-found error.
#[tokio::test]
async fn test_read_path_is_total_for_missing_paths() {
    let fixture = RepoFixture::new();
    let repo = fixture.open();

    let physical = repo.read_path(&lp("/ghost.txt")).await;
    assert_eq!(physical, fixture.source_root.join("ghost.txt"));
    assert!(!physical.exists());
}
