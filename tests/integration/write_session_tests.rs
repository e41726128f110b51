use crate::common::fixtures::{seed_docs, A_TXT};
use crate::common::setup::TestDrive;
use clouddrive_fuse::fuse::file_handles::AccessMode;
use clouddrive_fuse::remote::RemoteError;
use clouddrive_fuse::FsError;
use std::time::Duration;

#[tokio::test]
async fn test_size_reflects_write_after_release() {
    let env = TestDrive::new();
    seed_docs(&env);
    assert_eq!(env.bridge.getattr("/docs/a.txt").await.unwrap().size, 10);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 10, b"more!").await.unwrap();
    env.bridge.release(fh).await.unwrap();

    let metadata_calls = env.client.get_call_count("get_metadata");
    assert_eq!(env.bridge.getattr("/docs/a.txt").await.unwrap().size, 15);
    // The snapshot was invalidated by the flush, so this was a fresh fetch
    assert_eq!(env.client.get_call_count("get_metadata"), metadata_calls + 1);
}

#[tokio::test]
async fn test_concurrent_exclusive_open_admits_one_writer() {
    let env = TestDrive::new();
    seed_docs(&env);

    let (first, second) = tokio::join!(
        env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false),
        env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false),
    );

    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(FsError::Busy(_))))
            .count(),
        1
    );
}

#[tokio::test]
async fn test_round_trip_before_and_after_release() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false).await.unwrap();
    env.bridge.write(fh, 3, b"XYZ").await.unwrap();
    assert_eq!(env.bridge.read(fh, 3, 3).await.unwrap(), b"XYZ");
    env.bridge.release(fh).await.unwrap();

    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadOnly, false).await.unwrap();
    assert_eq!(env.bridge.read(fh, 3, 3).await.unwrap(), b"XYZ");
    assert_eq!(env.bridge.read(fh, 0, 100).await.unwrap(), b"012XYZ6789");
    env.bridge.release(fh).await.unwrap();
}

#[tokio::test]
async fn test_writes_stay_local_until_flush() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 0, b"ab").await.unwrap();
    env.bridge.write(fh, 2, b"cd").await.unwrap();
    assert_eq!(env.client.get_call_count("write_whole"), 0);
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), A_TXT);

    env.bridge.flush(fh).await.unwrap();
    assert_eq!(env.client.get_call_count("write_whole"), 1);
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"abcd456789");

    // Nothing left to upload
    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.client.get_call_count("write_whole"), 1);
}

#[tokio::test]
async fn test_flush_failure_keeps_buffer_dirty() {
    let env = TestDrive::new();
    seed_docs(&env);
    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 0, b"new").await.unwrap();

    env.client.make_operation_fail("write_whole");
    assert!(matches!(env.bridge.flush(fh).await, Err(FsError::RemoteUnavailable(_))));
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), A_TXT);

    env.client.clear_operation_failures();
    env.bridge.flush(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"new3456789");
    env.bridge.release(fh).await.unwrap();
}

#[tokio::test]
async fn test_release_failure_is_reported_and_handle_dropped() {
    let env = TestDrive::new();
    seed_docs(&env);
    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 0, b"lost").await.unwrap();

    env.client.make_operation_fail("write_whole");
    assert!(matches!(env.bridge.release(fh).await, Err(FsError::RemoteUnavailable(_))));
    assert_eq!(env.bridge.flush(fh).await, Err(FsError::BadHandle(fh)));
    assert_eq!(env.bridge.open_files().open_count(), 0);

    // The writer slot is free again
    env.client.clear_operation_failures();
    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), A_TXT);
}

#[tokio::test]
async fn test_open_with_truncate_empties_file() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, true).await.unwrap();
    assert_eq!(env.bridge.getattr("/docs/a.txt").await.unwrap().size, 0);
    // The old content is never downloaded
    assert_eq!(env.client.get_call_count("read_range"), 0);

    env.bridge.release(fh).await.unwrap();
    assert!(env.remote_content("/docs/a.txt").unwrap().is_empty());
}

#[tokio::test]
async fn test_truncate_through_open_writer() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false).await.unwrap();
    env.bridge.write(fh, 10, b"++").await.unwrap();
    let attributes = env.bridge.truncate("/docs/a.txt", Some(fh), 2).await.unwrap();
    assert_eq!(attributes.size, 2);
    assert_eq!(env.bridge.read(fh, 0, 10).await.unwrap(), b"01");

    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"01");
}

#[tokio::test]
async fn test_unlink_discards_pending_writes() {
    let env = TestDrive::new();
    seed_docs(&env);

    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 0, b"doomed").await.unwrap();
    env.bridge.unlink("/docs/a.txt").await.unwrap();

    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.client.get_call_count("write_whole"), 0);
    assert!(env.remote_identity("/docs/a.txt").is_none());
}

#[tokio::test]
async fn test_created_file_round_trip() {
    let env = TestDrive::new();
    seed_docs(&env);

    let (fh, attributes) = env.bridge.create("/docs/fresh.txt", AccessMode::WriteOnly).await.unwrap();
    assert_eq!(attributes.size, 0);
    env.bridge.write(fh, 0, b"hello").await.unwrap();
    assert_eq!(env.bridge.getattr("/docs/fresh.txt").await.unwrap().size, 5);
    env.bridge.release(fh).await.unwrap();

    assert_eq!(env.remote_content("/docs/fresh.txt").unwrap(), b"hello");
    // A freshly created file needs no download before the first write
    assert_eq!(env.client.get_call_count("read_range"), 0);
}

#[tokio::test]
async fn test_flush_rejected_by_auth_is_permission_denied() {
    let env = TestDrive::new();
    seed_docs(&env);
    let fh = env.bridge.open("/docs/a.txt", AccessMode::WriteOnly, false).await.unwrap();
    env.bridge.write(fh, 0, b"new").await.unwrap();

    env.client
        .make_operation_fail_with("write_whole", RemoteError::AuthRequired("sign in again".to_string()));
    let result = env.bridge.flush(fh).await;
    assert!(matches!(result, Err(FsError::PermissionDenied(_))));
    assert_eq!(result.unwrap_err().to_errno(), libc::EACCES);

    // Still dirty, so a later flush uploads it
    env.client.clear_operation_failures();
    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"new3456789");
}

#[tokio::test]
async fn test_write_beyond_memory_is_rejected_and_buffer_kept() {
    let env = TestDrive::new();
    seed_docs(&env);
    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false).await.unwrap();
    env.bridge.write(fh, 0, b"ab").await.unwrap();

    let result = env.bridge.write(fh, 1 << 62, b"x").await;
    assert!(matches!(result, Err(FsError::FileTooLarge(_))));
    assert!(matches!(
        env.bridge.write(fh, u64::MAX, b"x").await,
        Err(FsError::FileTooLarge(_))
    ));
    assert!(matches!(
        env.bridge.truncate("/docs/a.txt", Some(fh), 1 << 62).await,
        Err(FsError::FileTooLarge(_))
    ));

    assert_eq!(env.bridge.getattr("/docs/a.txt").await.unwrap().size, 10);
    assert_eq!(env.bridge.read(fh, 0, 100).await.unwrap(), b"ab23456789");
    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"ab23456789");
}

#[tokio::test]
async fn test_cancelled_write_leaves_buffer_untouched() {
    let env = TestDrive::new();
    seed_docs(&env);
    let fh = env.bridge.open("/docs/a.txt", AccessMode::ReadWrite, false).await.unwrap();

    // The write is dropped while its buffer is still being loaded
    env.client.delay_operation("read_range", Duration::from_secs(30));
    let cancelled = tokio::time::timeout(Duration::from_millis(50), env.bridge.write(fh, 0, b"XYZ")).await;
    assert!(cancelled.is_err());
    env.client.clear_operation_delays();

    assert_eq!(env.bridge.read(fh, 0, 100).await.unwrap(), A_TXT);
    env.bridge.flush(fh).await.unwrap();
    assert_eq!(env.client.get_call_count("write_whole"), 0);

    // The next write applies in full
    env.bridge.write(fh, 0, b"XYZ").await.unwrap();
    env.bridge.release(fh).await.unwrap();
    assert_eq!(env.remote_content("/docs/a.txt").unwrap(), b"XYZ3456789");
}
