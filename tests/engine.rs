//! End-to-end engine tests: file-backed database, demo connector, full
//! sync lifecycle, retrieval, and stats.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use mailseek::chat::ChatEngine;
use mailseek::config::RetrievalConfig;
use mailseek::connector_demo::DEMO_BAD_PASSWORD;
use mailseek::db;
use mailseek::embedding::{EmbeddingProvider, HashProvider};
use mailseek::error::EngineError;
use mailseek::index::VectorIndex;
use mailseek::migrate;
use mailseek::models::{
    ConnectorKind, ConnectorStatus, CreateConnector, MailboxConfig, SyncSnapshot,
};
use mailseek::pipeline::EmbeddingPipeline;
use mailseek::registry::ConnectorRegistry;
use mailseek::stats;

struct Engine {
    _tmp: TempDir,
    registry: Arc<ConnectorRegistry>,
    index: VectorIndex,
    chat: ChatEngine,
}

async fn engine() -> Engine {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect(&tmp.path().join("data/mailseek.db"))
        .await
        .unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let index = VectorIndex::new(pool);
    let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::new(128));
    let pipeline = EmbeddingPipeline::new(Arc::clone(&provider), 8, 2000);
    let registry = Arc::new(ConnectorRegistry::new(index.clone(), pipeline, 100));
    let chat = ChatEngine::new(
        provider,
        index.clone(),
        RetrievalConfig {
            top_k: 5,
            min_score: 0.01,
            max_snippet_chars: 200,
        },
    );

    Engine {
        _tmp: tmp,
        registry,
        index,
        chat,
    }
}

fn demo_connector(name: &str, password: &str) -> CreateConnector {
    CreateConnector {
        kind: ConnectorKind::Demo,
        name: name.to_string(),
        config: MailboxConfig {
            username: "user@example.com".to_string(),
            password: password.to_string(),
            host: None,
            port: None,
            mailbox: None,
        },
        enabled: true,
    }
}

async fn wait_for_sync(registry: &ConnectorRegistry, id: &str) -> SyncSnapshot {
    for _ in 0..500 {
        let snapshot = registry.sync_status(id).unwrap();
        if !snapshot.is_syncing {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("sync did not finish in time");
}

#[tokio::test]
async fn test_full_lifecycle_create_connect_sync_chat() {
    let engine = engine().await;

    let info = engine
        .registry
        .create(demo_connector("Personal", "secret"))
        .unwrap();
    assert_eq!(info.status, ConnectorStatus::Disconnected);

    let info = engine.registry.connect(&info.id).await.unwrap();
    assert_eq!(info.status, ConnectorStatus::Connected);

    engine.registry.clone().spawn_sync(&info.id).unwrap();
    let snapshot = wait_for_sync(&engine.registry, &info.id).await;
    assert_eq!(snapshot.progress, 100);
    assert_eq!(snapshot.messages_processed, 3);
    assert!(snapshot.last_sync.is_some());

    let info = engine.registry.get(&info.id).unwrap();
    assert_eq!(info.status, ConnectorStatus::Connected);
    assert_eq!(info.message_count, 3);

    // The demo mailbox contains a birthday party invitation.
    let reply = engine.chat.chat("when is the birthday party?").await.unwrap();
    assert!(!reply.sources.is_empty());
    assert!(reply
        .sources
        .iter()
        .any(|s| s.metadata.subject.to_lowercase().contains("birthday")));
}

#[tokio::test]
async fn test_progress_never_decreases_while_polling() {
    let engine = engine().await;
    let id = engine
        .registry
        .create(demo_connector("Personal", "secret"))
        .unwrap()
        .id;
    engine.registry.connect(&id).await.unwrap();
    engine.registry.clone().spawn_sync(&id).unwrap();

    let mut last = 0u8;
    loop {
        let snapshot = engine.registry.sync_status(&id).unwrap();
        assert!(snapshot.progress >= last);
        last = snapshot.progress;
        if !snapshot.is_syncing {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(last, 100);
}

#[tokio::test]
async fn test_second_sync_while_running_conflicts() {
    let engine = engine().await;
    let id = engine
        .registry
        .create(demo_connector("Personal", "secret"))
        .unwrap()
        .id;
    engine.registry.connect(&id).await.unwrap();

    engine.registry.clone().spawn_sync(&id).unwrap();
    assert!(matches!(
        engine.registry.clone().spawn_sync(&id),
        Err(EngineError::Conflict(_))
    ));
    wait_for_sync(&engine.registry, &id).await;
}

#[tokio::test]
async fn test_invalid_credentials_error_state_excluded_from_connected() {
    let engine = engine().await;
    let id = engine
        .registry
        .create(demo_connector("Broken", DEMO_BAD_PASSWORD))
        .unwrap()
        .id;

    let err = engine.registry.connect(&id).await.unwrap_err();
    assert!(matches!(err, EngineError::Auth(_)));

    let report = stats::gather(&engine.registry, &engine.index).await.unwrap();
    assert_eq!(report.connectors.total_connectors, 1);
    assert_eq!(report.connectors.connected_connectors, 0);
}

#[tokio::test]
async fn test_resync_indexes_nothing_new() {
    let engine = engine().await;
    let id = engine
        .registry
        .create(demo_connector("Personal", "secret"))
        .unwrap()
        .id;
    engine.registry.connect(&id).await.unwrap();

    engine.registry.clone().spawn_sync(&id).unwrap();
    wait_for_sync(&engine.registry, &id).await;
    assert_eq!(engine.index.count().await.unwrap(), 3);

    engine.registry.clone().spawn_sync(&id).unwrap();
    let snapshot = wait_for_sync(&engine.registry, &id).await;
    assert_eq!(snapshot.messages_processed, 0);
    assert_eq!(engine.index.count().await.unwrap(), 3);
    assert_eq!(engine.registry.get(&id).unwrap().message_count, 3);
}

#[tokio::test]
async fn test_delete_cascades_documents_but_spares_others() {
    let engine = engine().await;
    let a = engine
        .registry
        .create(demo_connector("Account A", "secret"))
        .unwrap()
        .id;
    let b = engine
        .registry
        .create(demo_connector("Account B", "secret"))
        .unwrap()
        .id;

    for id in [&a, &b] {
        engine.registry.connect(id).await.unwrap();
        engine.registry.clone().spawn_sync(id).unwrap();
        wait_for_sync(&engine.registry, id).await;
    }
    assert_eq!(engine.index.count().await.unwrap(), 6);

    engine.registry.delete(&a).await.unwrap();
    assert!(matches!(
        engine.registry.get(&a),
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.index.count().await.unwrap(), 3);
    assert_eq!(engine.index.count_by_connector(&b).await.unwrap(), 3);

    let report = stats::gather(&engine.registry, &engine.index).await.unwrap();
    assert_eq!(report.vector_database.total_emails, 3);
    assert_eq!(report.connectors.total_connectors, 1);
}

#[tokio::test]
async fn test_chat_without_any_index_returns_empty_sources() {
    let engine = engine().await;
    let reply = engine.chat.chat("anything at all").await.unwrap();
    assert!(reply.sources.is_empty());
    assert!(!reply.response.is_empty());
}

#[tokio::test]
async fn test_stats_reflect_indexed_documents() {
    let engine = engine().await;
    let id = engine
        .registry
        .create(demo_connector("Personal", "secret"))
        .unwrap()
        .id;
    engine.registry.connect(&id).await.unwrap();
    engine.registry.clone().spawn_sync(&id).unwrap();
    wait_for_sync(&engine.registry, &id).await;

    let report = stats::gather(&engine.registry, &engine.index).await.unwrap();
    assert_eq!(report.vector_database.total_emails, 3);
    assert_eq!(report.connectors.connected_connectors, 1);
}
