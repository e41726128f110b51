use crate::common::fixtures::seed_docs;
use crate::common::setup::TestDrive;
use clouddrive_fuse::fuse::file_handles::AccessMode;
use clouddrive_fuse::remote::{RemoteDriveClient, RemoteError};
use clouddrive_fuse::FsError;

#[tokio::test]
async fn test_resolve_is_stable_without_invalidation() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    let cache = env.bridge.path_cache();

    let first = cache.resolve("/docs/a.txt").await.unwrap();
    let listings = env.client.get_call_count("list_children");
    let second = cache.resolve("/docs/a.txt").await.unwrap();

    assert_eq!(first, tree.a_txt);
    assert_eq!(second, first);
    assert_eq!(env.client.get_call_count("list_children"), listings);
}

#[tokio::test]
async fn test_create_populates_cache_without_listing() {
    let env = TestDrive::new();
    seed_docs(&env);
    let cache = env.bridge.path_cache();
    cache.resolve("/docs").await.unwrap();
    env.client.reset_call_counters();

    let (fh, attributes) = env.bridge.create("/docs/new.txt", AccessMode::ReadWrite).await.unwrap();
    let resolved = cache.resolve("/docs/new.txt").await.unwrap();

    assert_eq!(resolved, attributes.identity);
    assert_eq!(env.client.get_call_count("list_children"), 0);
    assert_eq!(env.client.get_call_count("create"), 1);
    env.bridge.release(fh).await.unwrap();
}

#[tokio::test]
async fn test_rename_moves_identity_to_new_path() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    let cache = env.bridge.path_cache();
    cache.resolve("/docs/a.txt").await.unwrap();

    env.bridge.rename("/docs/a.txt", "/docs/b.txt").await.unwrap();

    assert!(matches!(cache.resolve("/docs/a.txt").await, Err(FsError::NotFound(_))));
    assert_eq!(cache.resolve("/docs/b.txt").await.unwrap(), tree.a_txt);
    assert_eq!(env.remote_identity("/docs/b.txt"), Some(tree.a_txt));
}

#[tokio::test]
async fn test_rename_directory_keeps_descendants() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    let cache = env.bridge.path_cache();
    cache.resolve("/docs/a.txt").await.unwrap();

    env.bridge.rename("/docs", "/archive").await.unwrap();
    env.client.reset_call_counters();

    assert_eq!(cache.resolve("/archive/a.txt").await.unwrap(), tree.a_txt);
    assert_eq!(cache.path_of(&tree.a_txt).as_deref(), Some("/archive/a.txt"));
    assert_eq!(env.client.get_call_count("list_children"), 0);
}

#[tokio::test]
async fn test_stale_identity_is_resolved_again() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    env.bridge.path_cache().resolve("/docs/a.txt").await.unwrap();

    // Replaced behind our back: same path, new identity
    let drive = env.client.drive();
    drive.delete(&tree.a_txt).await.unwrap();
    let replacement = drive.insert_file(&tree.docs, "a.txt", b"replaced").unwrap();

    let attributes = env.bridge.getattr("/docs/a.txt").await.unwrap();
    assert_eq!(attributes.identity, replacement);
    assert_eq!(env.client.get_call_count("get_metadata"), 2);
    assert_eq!(attributes.size, 8);
}

#[tokio::test]
async fn test_deleted_path_surfaces_not_found_after_one_retry() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    env.bridge.path_cache().resolve("/docs/a.txt").await.unwrap();
    env.client.drive().delete(&tree.a_txt).await.unwrap();

    let result = env.bridge.getattr("/docs/a.txt").await;
    assert!(matches!(result, Err(FsError::NotFound(_))));
}

#[tokio::test]
async fn test_remote_failures_are_not_retried() {
    let env = TestDrive::new();
    seed_docs(&env);
    env.client.make_operation_fail("list_children");

    let result = env.bridge.getattr("/docs/a.txt").await;
    assert!(matches!(result, Err(FsError::RemoteUnavailable(_))));
    assert_eq!(env.client.get_call_count("list_children"), 1);
}

#[tokio::test]
async fn test_auth_required_is_permission_denied() {
    let env = TestDrive::new();
    seed_docs(&env);
    env.client
        .make_operation_fail_with("list_children", RemoteError::AuthRequired("no token".to_string()));

    let result = env.bridge.readdir("/docs").await;
    assert!(matches!(result, Err(FsError::PermissionDenied(_))));
}

#[tokio::test]
async fn test_readdir_served_from_fresh_listing() {
    let env = TestDrive::new();
    seed_docs(&env);

    let first = env.bridge.readdir("/docs").await.unwrap();
    let listings = env.client.get_call_count("list_children");
    let second = env.bridge.readdir("/docs").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(env.client.get_call_count("list_children"), listings);
}

#[tokio::test]
async fn test_mkdir_shows_up_in_listing() {
    let env = TestDrive::new();
    seed_docs(&env);
    env.bridge.readdir("/docs").await.unwrap();

    env.bridge.mkdir("/docs/photos").await.unwrap();
    let names: Vec<String> = env
        .bridge
        .readdir("/docs")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert!(names.contains(&"photos".to_string()));
}

#[tokio::test]
async fn test_missing_name_under_fresh_listing_needs_no_remote_call() {
    let env = TestDrive::new();
    seed_docs(&env);
    env.bridge.readdir("/docs").await.unwrap();
    env.client.reset_call_counters();

    for _ in 0..2 {
        let result = env.bridge.getattr("/docs/missing.txt").await;
        assert!(matches!(result, Err(FsError::NotFound(_))));
    }
    assert_eq!(env.client.get_call_count("list_children"), 0);
    assert_eq!(env.client.get_call_count("get_metadata"), 0);
}

#[tokio::test]
async fn test_replaced_directory_is_resolved_again() {
    let env = TestDrive::new();
    let tree = seed_docs(&env);
    env.bridge.path_cache().resolve("/docs").await.unwrap();

    // The whole directory is replaced remotely
    let drive = env.client.drive();
    drive.delete(&tree.docs).await.unwrap();
    let docs = drive.insert_dir(&env.root(), "docs").unwrap();
    let replacement = drive.insert_file(&docs, "a.txt", b"new").unwrap();
    env.client.reset_call_counters();

    let attributes = env.bridge.getattr("/docs/a.txt").await.unwrap();
    assert_eq!(attributes.identity, replacement);
    assert_eq!(attributes.size, 3);
    // Old /docs, then the root, then the new /docs
    assert_eq!(env.client.get_call_count("list_children"), 3);
}
