//! End-to-end tests of the engine library over both store backends.

use std::sync::Arc;

use serde_json::json;
use tempfile::TempDir;

use context_engine::bitmap_manager::TickOptions;
use context_engine::config::Config;
use context_engine::core::store::memory::InMemoryStore;
use context_engine::core::{ChecksumAlgorithm, Document, Error, LayerUpdate};
use context_engine::engine::Engine;
use context_engine::events::ContextEventKind;

async fn memory_engine() -> Engine {
    Engine::with_store(Arc::new(InMemoryStore::new()), &Config::minimal())
        .await
        .unwrap()
}

fn sqlite_config(tmp: &TempDir) -> Config {
    let mut config = Config::minimal();
    config.db.path = tmp.path().join("data").join("ctx.sqlite");
    config
}

fn ids(docs: &[Document]) -> Vec<u32> {
    docs.iter().map(|d| d.id).collect()
}

#[tokio::test]
async fn test_context_scoping_follows_tree_paths() {
    let engine = memory_engine().await;
    let contexts = engine.contexts();

    let a = contexts.create_context("s1", Some("/work/alpha"), true).await.unwrap();
    let b = contexts.create_context("s1", Some("/work/beta"), true).await.unwrap();
    let home = contexts.create_context("s2", Some("/home"), true).await.unwrap();

    let da = a
        .insert_document(Document::new("note", json!({"t": "alpha"})), None, None)
        .await
        .unwrap();
    let db = b
        .insert_document(Document::new("note", json!({"t": "beta"})), None, None)
        .await
        .unwrap();
    let dh = home
        .insert_document(Document::new("note", json!({"t": "home"})), None, None)
        .await
        .unwrap();

    assert_eq!(ids(&a.list_documents(None, None, None).await.unwrap()), vec![da.id]);
    assert_eq!(ids(&b.list_documents(None, None, None).await.unwrap()), vec![db.id]);

    a.set_url("..", false).await.unwrap();
    assert_eq!(a.path(), "/work");
    assert_eq!(
        ids(&a.list_documents(None, None, None).await.unwrap()),
        vec![da.id, db.id]
    );

    let root = contexts.create_context("s3", None, false).await.unwrap();
    assert!(root.context_array().is_empty());
    assert_eq!(
        ids(&root.list_documents(None, None, None).await.unwrap()),
        vec![da.id, db.id, dh.id]
    );
}

#[tokio::test]
async fn test_features_and_filters_narrow_listing() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/inbox"), true)
        .await
        .unwrap();

    let note = ctx
        .insert_document(Document::new("note", json!({"n": 1})), None, None)
        .await
        .unwrap();
    let tab = ctx
        .insert_document(
            Document::new("tab", json!({"url": "https://example.org"})).with_feature("browser"),
            None,
            None,
        )
        .await
        .unwrap();

    let notes = ctx
        .list_documents(None, Some(&["note".to_string()]), None)
        .await
        .unwrap();
    assert_eq!(ids(&notes), vec![note.id]);

    let either = ctx
        .list_documents(None, Some(&["note".to_string(), "browser".to_string()]), None)
        .await
        .unwrap();
    assert_eq!(ids(&either), vec![note.id, tab.id]);

    engine
        .index()
        .tick_filters(&["starred".to_string()], &[tab.id])
        .await
        .unwrap();
    let starred = ctx
        .list_documents(None, None, Some(&["starred".to_string()]))
        .await
        .unwrap();
    assert_eq!(ids(&starred), vec![tab.id]);
}

#[tokio::test]
async fn test_layer_features_flow_into_context() {
    let engine = memory_engine().await;
    engine.tree().insert("/reading", true).await.unwrap();
    engine
        .layers()
        .update_layer(
            "reading",
            LayerUpdate {
                feature_bitmaps: Some(vec!["article".into()]),
                ..LayerUpdate::default()
            },
        )
        .await
        .unwrap();

    let ctx = engine
        .contexts()
        .create_context("s", Some("/reading"), false)
        .await
        .unwrap();
    assert_eq!(ctx.feature_array(), vec!["article".to_string()]);

    let doc = ctx
        .insert_document(Document::new("page", json!({"p": 1})), None, None)
        .await
        .unwrap();
    let articles = engine
        .index()
        .feature_bitmaps()
        .get_bitmap("article")
        .await
        .unwrap()
        .unwrap();
    assert!(articles.contains(doc.id));
}

#[tokio::test]
async fn test_duplicate_content_merges_memberships() {
    let engine = memory_engine().await;
    let contexts = engine.contexts();
    let one = contexts.create_context("s", Some("/one"), true).await.unwrap();
    let two = contexts.create_context("s", Some("/two"), true).await.unwrap();

    let first = one
        .insert_document(Document::new("note", json!({"same": true})), None, None)
        .await
        .unwrap();
    let second = two
        .insert_document(Document::new("note", json!({"same": true})), None, None)
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(engine.index().count().await.unwrap(), 1);

    assert_eq!(ids(&one.list_documents(None, None, None).await.unwrap()), vec![first.id]);
    assert_eq!(ids(&two.list_documents(None, None, None).await.unwrap()), vec![first.id]);

    let digest = first.primary_checksum(ChecksumAlgorithm::Sha256).unwrap();
    let found = engine.index().get_document_by_hash(digest).await.unwrap().unwrap();
    assert_eq!(found.id, first.id);
}

#[tokio::test]
async fn test_remove_then_delete() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/tmp"), true)
        .await
        .unwrap();
    let doc = ctx
        .insert_document(Document::new("note", json!({"x": 1})), None, None)
        .await
        .unwrap();

    assert!(ctx.remove_document(doc.id, None, None).await.unwrap());
    assert!(ctx.list_documents(None, None, None).await.unwrap().is_empty());
    assert!(engine.index().has_document(doc.id).await.unwrap());

    assert!(ctx.delete_document(doc.id).await.unwrap());
    assert!(!engine.index().has_document(doc.id).await.unwrap());
    assert!(!ctx.delete_document(doc.id).await.unwrap());
}

#[tokio::test]
async fn test_remove_at_root_rejected() {
    let engine = memory_engine().await;
    let root = engine.contexts().create_context("s", None, false).await.unwrap();
    let doc = root
        .insert_document(Document::new("note", json!({"x": 2})), None, None)
        .await
        .unwrap();

    let err = root.remove_document(doc.id, None, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation { .. }));
}

#[tokio::test]
async fn test_versions_link_to_parent() {
    let engine = memory_engine().await;
    let parent = engine
        .index()
        .insert_document(Document::new("note", json!({"v": 1})), &[], &[])
        .await
        .unwrap();
    let child = engine
        .index()
        .create_version(parent.id, Document::new("note", json!({"v": 2})), &[], &[])
        .await
        .unwrap();

    assert_eq!(child.parent_id, Some(parent.id));
    assert_eq!(child.version_number, 2);
    let parent = engine.index().get_document(parent.id).await.unwrap().unwrap();
    assert_eq!(parent.versions, vec![child.id]);
    assert_eq!(parent.latest_version, 2);
}

#[tokio::test]
async fn test_events_follow_mutations() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/events"), true)
        .await
        .unwrap();
    let mut rx = ctx.subscribe();

    ctx.set_url("/events/sub", true).await.unwrap();
    ctx.insert_document(Document::new("note", json!({"e": 1})), None, None)
        .await
        .unwrap();

    let first = rx.recv().await.unwrap();
    assert_eq!(first.kind, ContextEventKind::UrlChanged);
    assert_eq!(first.context_id, ctx.id());
    let second = rx.recv().await.unwrap();
    assert_eq!(second.kind, ContextEventKind::DocumentInserted);
}

#[tokio::test]
async fn test_removing_context_destroys_it() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/gone"), true)
        .await
        .unwrap();
    assert_eq!(engine.contexts().context_count(), 1);

    assert!(engine.contexts().remove_context(ctx.id()));
    assert!(ctx.is_destroyed());
    assert!(ctx
        .insert_document(Document::new("note", json!({})), None, None)
        .await
        .is_err());
    assert!(!engine.contexts().remove_context(ctx.id()));
}

#[tokio::test]
async fn test_sqlite_state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);

    let doc_id = {
        let engine = Engine::open(&config).await.unwrap();
        let ctx = engine
            .contexts()
            .create_context("s", Some("/projects/rust"), true)
            .await
            .unwrap();
        ctx.insert_document(Document::new("note", json!({"keep": "me"})), None, None)
            .await
            .unwrap()
            .id
    };

    let engine = Engine::open(&config).await.unwrap();
    assert!(engine.layers().has_layer("projects"));
    assert!(engine.tree().path_exists("/projects/rust"));

    let ctx = engine
        .contexts()
        .create_context("s", Some("/projects/rust"), false)
        .await
        .unwrap();
    let docs = ctx.list_documents(None, None, None).await.unwrap();
    assert_eq!(ids(&docs), vec![doc_id]);
    assert_eq!(docs[0].data["keep"], "me");

    let next = ctx
        .insert_document(Document::new("note", json!({"keep": "too"})), None, None)
        .await
        .unwrap();
    assert!(next.id > doc_id);
}

#[tokio::test]
async fn test_sqlite_layer_rename_persists() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);

    {
        let engine = Engine::open(&config).await.unwrap();
        engine.tree().insert("/drafts/ideas", true).await.unwrap();
        engine.tree().rename_layer("drafts", "notes").await.unwrap();
    }

    let engine = Engine::open(&config).await.unwrap();
    assert!(engine.tree().path_exists("/notes/ideas"));
    assert!(!engine.layers().has_layer("drafts"));
}

#[tokio::test]
async fn test_removing_anchor_layer_is_refused() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/work/alpha"), true)
        .await
        .unwrap();
    ctx.insert_document(Document::new("note", json!({"w": 1})), None, None)
        .await
        .unwrap();
    let work = engine.layers().name_to_id("work").unwrap();

    let err = engine.remove_layer("work").await.unwrap_err();
    assert!(matches!(err, Error::Conflict { .. }));
    assert!(engine.layers().has_layer("work"));
    assert_eq!(engine.tree().paths(), vec!["/work", "/work/alpha"]);
    assert_eq!(engine.tree().resolve_layers("/work/alpha").unwrap().len(), 2);
    assert!(engine.index().context_bitmaps().has_bitmap(&work).await.unwrap());

    engine.tree().remove_path("/work/alpha", false).await.unwrap();
    engine.remove_layer("work").await.unwrap();
    assert!(!engine.layers().has_layer("work"));
    assert!(!engine.index().context_bitmaps().has_bitmap(&work).await.unwrap());
    assert!(engine.tree().paths().is_empty());
}

#[tokio::test]
async fn test_same_data_under_two_schemas_stays_separate() {
    let engine = memory_engine().await;
    let ctx = engine
        .contexts()
        .create_context("s", Some("/inbox"), true)
        .await
        .unwrap();

    let note = ctx
        .insert_document(Document::new("note", json!({"x": 1})), None, None)
        .await
        .unwrap();
    let tab = ctx
        .insert_document(Document::new("tab", json!({"x": 1})), None, None)
        .await
        .unwrap();

    assert_ne!(note.id, tab.id);
    assert_eq!(tab.schema, "tab");
    assert_eq!(engine.index().count().await.unwrap(), 2);

    let tabs = ctx
        .list_documents(None, Some(&["tab".to_string()]), None)
        .await
        .unwrap();
    assert_eq!(ids(&tabs), vec![tab.id]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sqlite_concurrent_inserts_with_deferred_filters() {
    let tmp = TempDir::new().unwrap();
    let config = sqlite_config(&tmp);
    let shared = vec!["shared".to_string()];
    let deferred = TickOptions {
        auto_create: true,
        implicit_save: false,
    };

    let mut inserted = {
        let engine = Engine::open(&config).await.unwrap();
        let mut handles = Vec::new();
        for n in 0..8u32 {
            let index = engine.index().clone();
            let shared = shared.clone();
            handles.push(tokio::spawn(async move {
                let doc = index
                    .insert_document(Document::new("note", json!({ "n": n })), &shared, &[])
                    .await
                    .unwrap();
                index
                    .filter_bitmaps()
                    .tick("pending", &[doc.id], deferred)
                    .await
                    .unwrap();
                doc.id
            }));
        }
        let mut inserted = Vec::new();
        for handle in handles {
            inserted.push(handle.await.unwrap());
        }
        assert_eq!(engine.index().filter_bitmaps().flush().await.unwrap(), 1);
        assert_eq!(engine.index().filter_bitmaps().flush().await.unwrap(), 0);
        inserted
    };
    inserted.sort_unstable();
    inserted.dedup();
    assert_eq!(inserted.len(), 8);

    let engine = Engine::open(&config).await.unwrap();
    let found = engine
        .index()
        .query_ids(&shared, &[], &["pending".to_string()])
        .await
        .unwrap();
    assert_eq!(found, inserted);
}
