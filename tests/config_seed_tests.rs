//! Configuration and seed loading tests.

mod common;

use common::*;
use serde_json::json;
use shellql::config::{ServerConfig, CONFIG_FILE_NAME};
use shellql::{MemoryStore, QueryService, RunRegistry};
use std::sync::Arc;
use tempfile::TempDir;

#[test]
fn test_load_reads_toml_and_dotenv() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(CONFIG_FILE_NAME),
        "host = \"0.0.0.0\"\nport = 7001\nrun_ttl_secs = 30\n",
    )
    .unwrap();
    std::fs::write(dir.path().join(".env"), "SHELLQL_PORT=7002\n").unwrap();

    let config = ServerConfig::load(dir.path()).unwrap();
    assert_eq!(config.host, "0.0.0.0");
    assert_eq!(config.port, 7002);
    assert_eq!(config.run_ttl_secs, 30);
}

#[test]
fn test_bad_toml_is_an_error() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join(CONFIG_FILE_NAME), "port = \"high\"\n").unwrap();
    assert!(ServerConfig::load(dir.path()).is_err());
}

#[tokio::test]
async fn test_seed_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("seed.json");
    std::fs::write(
        &path,
        json!({
            "events": [
                {"kind": "login", "at": {"$date": "2024-05-01T09:00:00Z"}},
                {"kind": "logout", "at": {"$date": "2024-05-01T17:30:00Z"}}
            ]
        })
        .to_string(),
    )
    .unwrap();

    let store = MemoryStore::load_seed(&path).unwrap();
    assert_eq!(store.collection_names(), vec!["events".to_string()]);

    let service = QueryService::new(Arc::new(store), RunRegistry::default());
    let value = run_query(
        &service,
        "db.events.find({at: {$lt: ISODate('2024-05-01T12:00:00Z')}})",
    )
    .await;
    assert_eq!(
        value["data"],
        json!([{"kind": "login", "at": "2024-05-01T09:00:00Z"}])
    );
}

#[test]
fn test_missing_seed_file() {
    let dir = TempDir::new().unwrap();
    assert!(MemoryStore::load_seed(&dir.path().join("absent.json")).is_err());
}
