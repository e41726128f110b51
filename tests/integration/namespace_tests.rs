use crate::common::fixtures::{seed_docs, A_TXT};
use crate::common::setup::TestDrive;
use clouddrive_fuse::fuse::file_handles::AccessMode;
use clouddrive_fuse::remote::EntryKind;
use clouddrive_fuse::FsError;

async fn names(env: &TestDrive, path: &str) -> Vec<String> {
    let mut names: Vec<String> = env
        .bridge
        .readdir(path)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_append_to_listed_file() {
    let env = TestDrive::new();
    let drive = env.client.drive();
    let docs = drive.insert_dir(&env.root(), "docs").unwrap();
    drive.insert_file(&docs, "a.txt", A_TXT).unwrap();

    assert_eq!(names(&env, "/docs").await, vec!["a.txt"]);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    assert_eq!(env.bridge.write(fh, 10, b"abcde").await.unwrap(), 5);
    env.bridge.release(fh).await.unwrap();

    assert_eq!(env.bridge.getattr("/docs/a.txt").await.unwrap().size, 15);
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"0123456789abcde");
}

#[tokio::test]
async fn test_getattr_reports_kind_and_size() {
    let env = TestDrive::new();
    seed_docs(&env);

    let root = env.bridge.getattr("/").await.unwrap();
    assert_eq!(root.kind, EntryKind::Directory);
    let notes = env.bridge.lookup("/docs", "notes").await.unwrap();
    assert_eq!(notes.kind, EntryKind::Directory);
    let readme = env.bridge.getattr("/readme.md").await.unwrap();
    assert_eq!(readme.kind, EntryKind::File);
    assert_eq!(readme.size, 8);
}

#[tokio::test]
async fn test_lookup_missing_and_through_file() {
    let env = TestDrive::new();
    seed_docs(&env);

    assert!(matches!(env.bridge.getattr("/docs/missing").await, Err(FsError::NotFound(_))));
    assert!(matches!(
        env.bridge.getattr("/readme.md/inner").await,
        Err(FsError::NotADirectory(_))
    ));
}

#[tokio::test]
async fn test_open_directory_is_rejected() {
    let env = TestDrive::new();
    seed_docs(&env);

    let result = env.bridge.open("/docs", AccessMode::ReadOnly, false).await;
    assert!(matches!(result, Err(FsError::IsADirectory(_))));
}

#[tokio::test]
async fn test_create_existing_name_fails() {
    let env = TestDrive::new();
    seed_docs(&env);

    let result = env.bridge.create("/docs/a.txt", AccessMode::WriteOnly).await;
    assert!(matches!(result, Err(FsError::AlreadyExists(_))));
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), A_TXT);
}

#[tokio::test]
async fn test_unlink_and_rmdir_check_types() {
    let env = TestDrive::new();
    seed_docs(&env);

    assert!(matches!(env.bridge.unlink("/docs").await, Err(FsError::IsADirectory(_))));
    assert!(matches!(env.bridge.rmdir("/readme.md").await, Err(FsError::NotADirectory(_))));
    assert!(matches!(env.bridge.rmdir("/docs").await, Err(FsError::NotEmpty(_))));
    assert!(matches!(env.bridge.rmdir("/").await, Err(FsError::Busy(_))));

    env.bridge.rmdir("/docs/notes").await.unwrap();
    env.bridge.unlink("/docs/a.txt").await.unwrap();
    assert!(names(&env, "/docs").await.is_empty());
    env.bridge.rmdir("/docs").await.unwrap();
    assert_eq!(names(&env, "/").await, vec!["readme.md"]);
}

#[tokio::test]
async fn test_rename_replaces_existing_file() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);

    env.bridge.rename("/readme.md", "/docs/a.txt").await.unwrap();

    assert_eq!(env.remote_identity("/docs/a.txt"), Some(tree.readme));
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"# drive\n");
    assert_eq!(names(&env, "/").await, vec!["docs"]);
}

#[tokio::test]
async fn test_rename_rejects_invalid_targets() {
    let env = TestDrive::new();
    seed_docs(&env);

    assert!(matches!(
        env.bridge.rename("/docs", "/docs/notes/docs").await,
        Err(FsError::InvalidArgument(_))
    ));
    assert!(matches!(
        env.bridge.rename("/readme.md", "/docs/notes").await,
        Err(FsError::IsADirectory(_))
    ));
    assert!(matches!(
        env.bridge.rename("/docs/notes", "/readme.md").await,
        Err(FsError::NotADirectory(_))
    ));
    // Same path is a no-op
    env.bridge.rename("/docs", "/docs").await.unwrap();
    assert_eq!(env.client.get_call_count("move_entry"), 0);
}

#[tokio::test]
async fn test_read_only_mount_rejects_mutations() {
    let env = TestDrive::read_only();
    seed_docs(&env);

    let denied = |r: Result<_, FsError>| matches!(r, Err(FsError::PermissionDenied(_)));
    assert!(denied(env.bridge.create("/docs/new.txt", AccessMode::WriteOnly).await.map(|_| ())));
    assert!(denied(env.bridge.mkdir("/docs/new").await.map(|_| ())));
    assert!(denied(env.bridge.unlink("/docs/a.txt").await));
    assert!(denied(env.bridge.rename("/docs/a.txt", "/b.txt").await));
    assert!(denied(env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false).await.map(|_| ())));
    assert_eq!(env.client.get_call_count("create"), 0);
    assert_eq!(env.client.get_call_count("delete"), 0);

    // Reads still work
    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadOnly, false).await.unwrap();
    assert_eq!(env.bridge.read(fh, 0, 4).await.unwrap(), b"0123");
    env.bridge.release(fh).await.unwrap();
}

#[tokio::test]
async fn test_read_past_end_is_empty() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadOnly, false).await.unwrap();
    assert!(env.bridge.read(fh, 10, 4).await.unwrap().is_empty());
    assert_eq!(env.bridge.read(fh, 8, 100).await.unwrap(), b"89");
    env.bridge.release(fh).await.unwrap();
    assert!(matches!(env.bridge.read(fh, 0, 1).await, Err(FsError::BadHandle(_))));
}

#[tokio::test]
async fn test_statfs_quota_is_cached() {
    let env = TestDrive::new();
    seed_docs(&env);

    let first = env.bridge.statfs().await.unwrap();
    let second = env.bridge.statfs().await.unwrap();

    assert_eq!(first, second);
    assert!(first.remaining < first.total);
    assert_eq!(env.client.get_call_count("quota"), 1);
}
