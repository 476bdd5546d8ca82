#![cfg(feature = "inmemory")]

use redis_cache_store::backend::{InMemoryClient, StoreClient};
use redis_cache_store::{RedisCacheStore, StoreOptions};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    user_id: u64,
    roles: Vec<String>,
}

#[tokio::test]
async fn counters_and_reads_share_the_native_integer() {
    init_logger();
    let store = RedisCacheStore::builder()
        .with_client(InMemoryClient::new())
        .with_options(StoreOptions::new().namespace("counters"))
        .build()
        .expect("build");

    assert_eq!(store.increment("foo", 1, None).await, Some(1));
    assert_eq!(store.read::<String, _>("foo", None).await.as_deref(), Some("1"));
    assert_eq!(store.decrement("foo", 3, None).await, Some(-2));
    assert_eq!(store.read::<i64, _>("foo", None).await, Some(-2));
}

#[tokio::test]
async fn composite_keys_are_expanded_before_namespacing() {
    init_logger();
    let client = InMemoryClient::new();
    let store = RedisCacheStore::new(client.clone())
        .with_options(StoreOptions::new().namespace("app"));

    let session = Session {
        user_id: 7,
        roles: vec!["admin".into()],
    };
    assert!(store.write(&["session", "7"], &session, None).await);
    assert!(client.get("app:session/7").await.expect("get").is_some());
    assert_eq!(store.read(&["session", "7"], None).await, Some(session));
}

#[tokio::test]
async fn read_multi_returns_only_present_names() {
    init_logger();
    let store = RedisCacheStore::new(InMemoryClient::new())
        .with_options(StoreOptions::new().namespace("app"));

    store.write("a", &1u32, None).await;
    store.write("b", &2u32, None).await;

    let values: HashMap<String, u32> = store.read_multi(&["a", "b", "missing"], None).await;
    assert_eq!(values, HashMap::from([("a".to_string(), 1), ("b".to_string(), 2)]));
}

#[tokio::test]
async fn delete_matched_treats_namespace_literally() {
    init_logger();
    let client = InMemoryClient::new();
    let bracketed = RedisCacheStore::new(client.clone())
        .with_options(StoreOptions::new().namespace("a[b]"));
    let plain = RedisCacheStore::new(client.clone())
        .with_options(StoreOptions::new().namespace("ab"));

    bracketed.write("x", &1u8, None).await;
    plain.write("x", &1u8, None).await;

    assert_eq!(bracketed.delete_matched("*", None).await, Some(1));
    assert!(!bracketed.exist("x", None).await);
    assert!(plain.exist("x", None).await);
}

#[tokio::test]
async fn written_ttl_expires_entries() {
    init_logger();
    let store = RedisCacheStore::new(InMemoryClient::new());
    let options = StoreOptions::new().expires_in(Duration::from_secs(1));

    assert!(store.write("short", &"lived".to_string(), Some(&options)).await);
    assert!(store.exist("short", None).await);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    assert_eq!(store.read::<String, _>("short", None).await, None);
    assert!(!store.exist("short", None).await);
}

#[tokio::test]
async fn unreachable_backend_degrades_to_misses() {
    init_logger();
    let store = RedisCacheStore::builder()
        .with_params(serde_json::json!({"host": "127.0.0.1", "port": 1, "timeout": 0.5}))
        .build()
        .expect("build");

    assert_eq!(store.read::<String, _>("foo", None).await, None);
    assert!(!store.write("foo", &"bar".to_string(), None).await);
    assert!(!store.delete("foo", None).await);
    assert_eq!(store.increment("foo", 1, None).await, None);
    assert_eq!(store.decrement("foo", 1, None).await, None);
    assert_eq!(store.delete_matched("*", None).await, None);
    assert!(store.stats().await.is_err());
}
