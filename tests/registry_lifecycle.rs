use redis_cache_store::config::TomlFileSource;
use redis_cache_store::{ClientHandle, ConnectionRegistry, RedisCacheStore};
use std::io::Write;
use std::sync::Arc;

const CONFIG: &str = r#"
[development.myredisdb]
db = 1
host = "localhost"
port = 6379

[test.MyRedisDB]
db = 1
host = "localhost"
port = 6379
thread-safe = true

[test.cache]
url = "redis://localhost:6379/2"
namespace = "app"

[test.failover]
db = 1
host = "localhost"
zkservers = "127.0.0.1:26379,127.0.0.1:26380"
"#;

fn registry() -> (tempfile::NamedTempFile, ConnectionRegistry) {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(CONFIG.as_bytes()).expect("write config");
    let registry = ConnectionRegistry::new(TomlFileSource::new(file.path()), "test");
    (file, registry)
}

#[test]
fn configuration_is_normalized_for_the_active_environment() {
    let (_file, registry) = registry();
    let configuration = registry.configuration().expect("configuration");

    assert_eq!(configuration.environment(), "test");
    let names: Vec<&str> = configuration.names().collect();
    assert_eq!(names, vec!["cache", "failover", "myredisdb"]);

    let myredisdb = configuration.get("MyRedisDB").expect("myredisdb");
    assert_eq!(myredisdb.thread_safe, Some(true));
    assert_eq!(myredisdb.db_index(), 1);

    let failover = configuration.get("failover").expect("failover");
    assert_eq!(failover.failover_servers.len(), 2);
}

#[tokio::test]
async fn handles_live_until_disconnected() {
    let (_file, registry) = registry();

    let first = registry.connect("myredisdb").expect("connect");
    assert!(matches!(*first, ClientHandle::Direct(_)));
    assert!(Arc::ptr_eq(&first, &registry.connect("MyRedisDB").expect("connect")));
    assert!(registry.connect("failover").expect("connect").is_failover());

    registry.reconnect(Some("myredisdb"));
    assert_eq!(first.generation(), 1);

    registry.shutdown().await;
    assert!(registry.connected_names().is_empty());

    let second = registry.connect("myredisdb").expect("connect");
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.generation(), 0);
}

#[test]
fn stores_share_registry_connections() {
    let (_file, registry) = registry();

    let a = RedisCacheStore::builder()
        .with_registry(&registry, "cache")
        .build()
        .expect("build");
    let b = RedisCacheStore::builder()
        .with_registry(&registry, "cache")
        .build()
        .expect("build");

    assert_eq!(a.client().backend_name(), "direct");
    assert_eq!(b.client().backend_name(), "direct");
    assert_eq!(registry.connected_names(), vec!["cache"]);
}

#[test]
fn missing_environment_is_a_config_error() {
    let (file, _registry) = registry();
    let registry = ConnectionRegistry::new(TomlFileSource::new(file.path()), "production");

    let err = registry.connect("cache").unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("production"));
}
