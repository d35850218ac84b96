mod common;

use common::test_helpers::{read_key_file, table, write_key_file};
use keygate::{AdmissionGate, GateError, InMemoryKeyStore, JsonFileKeyStore, KeyRecord};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn ok() -> impl std::future::Future<Output = Result<&'static str, std::io::Error>> {
    async { Ok("done") }
}

#[tokio::test]
async fn single_request_quota_is_spent_exactly_once() {
    let store = InMemoryKeyStore::new(table(&[("abc", 0, 1)]));
    let gate = AdmissionGate::new(store.clone());
    let calls = Arc::new(AtomicUsize::new(0));

    let counted = || {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, std::io::Error>(())
        }
    };

    gate.run(Some("abc"), counted).await.expect("first request admitted");
    assert_eq!(store.snapshot().get("abc"), Some(&KeyRecord::new(1, 1)));

    let err = gate.run(Some("abc"), counted).await.unwrap_err();
    assert!(matches!(err, GateError::QuotaExceeded { used: 1, limit: 1 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.snapshot().get("abc"), Some(&KeyRecord::new(1, 1)));
}

#[tokio::test]
async fn handler_failure_leaves_usage_untouched() {
    let store = InMemoryKeyStore::new(table(&[("abc", 4, 5)]));
    let gate = AdmissionGate::new(store.clone());

    let err = gate
        .run(Some("abc"), || async { Err::<(), _>(std::io::Error::other("boom")) })
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::HandlerFailure(ref msg) if msg.contains("boom")));
    assert_eq!(store.snapshot().get("abc").unwrap().used, 4);

    gate.run(Some("abc"), ok).await.unwrap();
    assert_eq!(store.snapshot().get("abc").unwrap().used, 5);
}

#[tokio::test]
async fn rejections_happen_before_the_handler_runs() {
    let store = InMemoryKeyStore::new(table(&[("abc", 0, 1)]));
    let gate = AdmissionGate::new(store.clone());

    assert!(matches!(gate.run(None, ok).await, Err(GateError::MissingKey)));
    assert!(matches!(gate.run(Some(""), ok).await, Err(GateError::MissingKey)));
    assert_eq!(store.load_count(), 0);

    assert!(matches!(gate.run(Some("ABC"), ok).await, Err(GateError::InvalidKey)));
    assert_eq!(store.snapshot(), table(&[("abc", 0, 1)]));
}

#[tokio::test]
async fn usage_is_read_only() {
    let store = InMemoryKeyStore::new(table(&[("abc", 3, 10)]));
    let gate = AdmissionGate::new(store.clone());

    let first = gate.usage(Some("abc")).await.unwrap();
    let second = gate.usage(Some("abc")).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.remaining, 7);
    assert_eq!(store.snapshot().get("abc").unwrap().used, 3);
}

#[tokio::test]
async fn admission_without_commit_charges_nothing() {
    let store = InMemoryKeyStore::new(table(&[("abc", 0, 2)]));
    let gate = AdmissionGate::new(store.clone());

    let admission = gate.admit(Some("abc")).await.unwrap();
    assert_eq!(admission.record(), KeyRecord::new(0, 2));
    drop(admission);

    let admission = gate.admit(Some("abc")).await.unwrap();
    let committed = gate.commit(admission).await.unwrap();
    assert_eq!(committed, KeyRecord::new(1, 2));
    assert_eq!(gate.usage(Some("abc")).await.unwrap().used, 1);
}

#[tokio::test]
async fn file_store_round_trips_through_the_gate() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_key_file(dir.path(), &table(&[("abc", 0, 1), ("xyz", 2, 3)]));
    let gate = AdmissionGate::new(JsonFileKeyStore::new(&path));

    gate.run(Some("abc"), ok).await.unwrap();
    let err = gate.run(Some("abc"), ok).await.unwrap_err();
    assert!(err.is_quota_exceeded());

    let on_disk = read_key_file(&path);
    assert_eq!(on_disk.get("abc"), Some(&KeyRecord::new(1, 1)));
    assert_eq!(on_disk.get("xyz"), Some(&KeyRecord::new(2, 3)));
}

#[tokio::test]
async fn out_of_band_edits_are_seen_on_next_request() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_key_file(dir.path(), &table(&[("abc", 0, 1)]));
    let gate = AdmissionGate::new(JsonFileKeyStore::new(&path));

    gate.run(Some("abc"), ok).await.unwrap();
    assert!(gate.run(Some("abc"), ok).await.unwrap_err().is_quota_exceeded());

    // Raise the limit and provision a new key without restarting.
    write_key_file(dir.path(), &table(&[("abc", 1, 2), ("new", 0, 1)]));
    gate.run(Some("abc"), ok).await.unwrap();
    gate.run(Some("new"), ok).await.unwrap();
    assert_eq!(read_key_file(&path).get("abc"), Some(&KeyRecord::new(2, 2)));
}

#[tokio::test]
async fn malformed_key_file_is_storage_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("apiKeys.json");
    std::fs::write(&path, "{ not json").unwrap();
    let gate = AdmissionGate::new(JsonFileKeyStore::new(&path));

    let err = gate.run(Some("abc"), ok).await.unwrap_err();
    assert!(matches!(err, GateError::StorageUnavailable(_)));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
}

#[tokio::test]
async fn handler_timeout_is_a_failure() {
    let store = InMemoryKeyStore::new(table(&[("abc", 0, 1)]));
    let gate = AdmissionGate::new(store.clone()).with_handler_timeout(Duration::from_millis(20));

    let err = gate
        .run(Some("abc"), || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, std::io::Error>(())
        })
        .await
        .unwrap_err();
    assert!(matches!(err, GateError::HandlerFailure(_)));
    assert_eq!(store.snapshot().get("abc").unwrap().used, 0);
}
