//! Integration tests for the upload lifecycle

mod common;

use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;
use stitch_core::*;
use stitch_engine::*;

#[tokio::test]
async fn out_of_order_chunks_read_back_in_index_order() {
    let (store, _temp) = UploadStore::temp().await.unwrap();

    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 2, "World").await.unwrap();
    store.append_bytes(&id, 1, " ").await.unwrap();
    store.append_bytes(&id, 0, "Hello").await.unwrap();
    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"Hello World");
    assert_eq!(info.name, "a.txt");
    assert_eq!(info.content_type, "text/plain");
    assert_eq!(info.state, UploadState::Finalized);
    assert_eq!(info.chunk_count, 3);
    assert_eq!(info.size, 11);
    assert_eq!(info.digest, Some(ContentHash::new(b"Hello World")));
    assert!(info.finalized_at.is_some());
}

#[tokio::test]
async fn indices_order_numerically_not_lexicographically() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("n.bin", "application/octet-stream").await.unwrap();

    for index in [10u64, 9, 2, 1, 100, 0] {
        store.append_bytes(&id, index, format!("[{}]", index)).await.unwrap();
    }
    store.finalize(&id).await.unwrap();

    let (_, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"[0][1][2][9][10][100]");
}

#[tokio::test]
async fn last_write_wins_for_repeated_index() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("a.txt", "text/plain").await.unwrap();

    store.append_bytes(&id, 0, "Hello").await.unwrap();
    store.append_bytes(&id, 1, "Earth").await.unwrap();
    store.append_bytes(&id, 1, "World").await.unwrap();
    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"HelloWorld");
    assert_eq!(info.chunk_count, 2);
}

#[tokio::test]
async fn gaps_are_assembled_without_validation() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("gappy", "text/plain").await.unwrap();

    store.append_bytes(&id, 3, "three").await.unwrap();
    store.append_bytes(&id, 1, "one").await.unwrap();
    store.finalize(&id).await.unwrap();

    let (_, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"onethree");
}

#[tokio::test]
async fn empty_finalize_yields_empty_artifact() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("empty.txt", "text/plain").await.unwrap();

    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert!(data.is_empty());
    assert_eq!(info.size, 0);
    assert_eq!(info.chunk_count, 0);
    assert_eq!(info.digest, Some(ContentHash::new(b"")));
}

#[tokio::test]
async fn finalize_twice_is_rejected_and_artifact_unchanged() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 0, "once").await.unwrap();
    store.finalize(&id).await.unwrap();
    let (before, _) = read_artifact(&store, &id).await;

    let err = store.finalize(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyFinalized);

    let (after, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"once");
    assert_eq!(after.finalized_at, before.finalized_at);
    assert_eq!(after.digest, before.digest);
}

#[tokio::test]
async fn append_after_finalize_is_rejected() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 0, "sealed").await.unwrap();
    store.finalize(&id).await.unwrap();

    let err = store.append_bytes(&id, 1, "late").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyFinalized);

    let (_, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"sealed");
}

#[tokio::test]
async fn read_before_finalize_is_not_ready() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 0, "pending").await.unwrap();

    assert_eq!(read_error(&store, &id).await, ErrorKind::NotReady);
    assert_eq!(read_error(&store, &UploadId::new()).await, ErrorKind::NotFound);
}

#[tokio::test]
async fn register_fails_when_scratch_area_cannot_be_created() {
    let temp = tempfile::tempdir().unwrap();
    let (store, backend) = faulty_store(&temp, Duration::ZERO).await;

    backend.fail_create_area.store(true, Ordering::SeqCst);
    let err = store.register("a.txt", "text/plain").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);
    assert!(store.is_empty());
}

#[tokio::test]
async fn failed_finalize_leaves_upload_open_and_retryable() {
    let temp = tempfile::tempdir().unwrap();
    let (store, backend) = faulty_store(&temp, Duration::ZERO).await;

    let id = store.register("retry.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 1, "B").await.unwrap();
    store.append_bytes(&id, 0, "A").await.unwrap();

    backend.fail_get.store(true, Ordering::SeqCst);
    let err = store.finalize(&id).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StorageUnavailable);

    let info = store.info(&id).await.unwrap();
    assert_eq!(info.state, UploadState::Open);
    assert_eq!(info.chunk_count, 2);
    assert_eq!(read_error(&store, &id).await, ErrorKind::NotReady);

    // Still open, so more chunks are accepted before the retry
    store.append_bytes(&id, 2, "C").await.unwrap();

    backend.fail_get.store(false, Ordering::SeqCst);
    store.finalize(&id).await.unwrap();

    let (_, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"ABC");
}

#[tokio::test]
async fn cleanup_failures_do_not_fail_finalize() {
    let temp = tempfile::tempdir().unwrap();
    let (store, backend) = faulty_store(&temp, Duration::ZERO).await;

    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 0, "kept").await.unwrap();

    backend.fail_remove.store(true, Ordering::SeqCst);
    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert_eq!(info.state, UploadState::Finalized);
    assert_eq!(data, b"kept");
}

#[tokio::test]
async fn keep_chunks_when_cleanup_disabled() {
    let (config, _temp) = StoreConfig::temp().unwrap();
    let store = UploadStore::open(config.with_cleanup_chunks(false)).await.unwrap();

    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 0, "a").await.unwrap();
    store.append_bytes(&id, 1, "b").await.unwrap();
    store.finalize(&id).await.unwrap();

    let area = store.config().root.join(id.to_string());
    let chunk_files = std::fs::read_dir(&area)
        .unwrap()
        .filter(|e| e.as_ref().unwrap().file_name().to_string_lossy().ends_with(".chunk"))
        .count();
    assert_eq!(chunk_files, 2);
}

#[tokio::test]
async fn uploads_are_independent() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let first = store.register("first.txt", "text/plain").await.unwrap();
    let second = store.register("second.txt", "text/csv").await.unwrap();
    assert_ne!(first, second);

    store.append_bytes(&first, 0, "one").await.unwrap();
    store.append_bytes(&second, 0, "two").await.unwrap();
    store.finalize(&first).await.unwrap();

    // Finalizing one upload leaves the other open
    assert_eq!(store.info(&second).await.unwrap().state, UploadState::Open);
    store.append_bytes(&second, 1, "!").await.unwrap();
    store.finalize(&second).await.unwrap();

    let (_, a) = read_artifact(&store, &first).await;
    let (info, b) = read_artifact(&store, &second).await;
    assert_eq!(a, b"one");
    assert_eq!(b, b"two!");
    assert_eq!(info.content_type, "text/csv");
}

#[tokio::test]
async fn keyspace_backend_full_flow() {
    let (config, _temp) = StoreConfig::temp().unwrap();
    let store = UploadStore::open(config.with_backend(BackendKind::Keyspace)).await.unwrap();

    let id = store.register("a.txt", "text/plain").await.unwrap();
    store.append_bytes(&id, 2, "World").await.unwrap();
    store.append_bytes(&id, 1, " ").await.unwrap();
    store.append_bytes(&id, 0, "Hello").await.unwrap();
    assert_eq!(read_error(&store, &id).await, ErrorKind::NotReady);
    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert_eq!(data, b"Hello World");
    assert_eq!(info.content_type, "text/plain");

    store.shutdown().await.unwrap();
}

#[tokio::test]
async fn large_chunks_survive_buffered_copy() {
    let (store, _temp) = UploadStore::temp().await.unwrap();
    let id = store.register("big.bin", "application/octet-stream").await.unwrap();

    // Larger than the copy buffer so each chunk takes several reads
    let chunk_len = stitch_engine::assembly::COPY_BUFFER_SIZE * 3 + 17;
    let chunks: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; chunk_len]).collect();
    for (index, chunk) in chunks.iter().enumerate().rev() {
        store.append_bytes(&id, index as u64, chunk.clone()).await.unwrap();
    }
    store.finalize(&id).await.unwrap();

    let (info, data) = read_artifact(&store, &id).await;
    assert_eq!(data, chunks.concat());
    assert_eq!(info.size, (chunk_len * 4) as u64);
}
