//! End-to-end replication over HTTP against the in-memory CouchDB.

use bench_client::{
    replicate, CouchDatabase, CouchOptions, Database, MemoryCouchServer, MemoryDatabase,
    ReplicationEvent, ReplicationOptions, ReplicationStatus,
};
use bench_types::{doc_id, AllDocsQuery, Document};
use std::sync::Arc;

async fn remote_with_docs(server: &MemoryCouchServer, n: u64) -> Arc<CouchDatabase> {
    let remote = Arc::new(
        CouchDatabase::new(&server.url(), "remote", CouchOptions::default()).unwrap(),
    );
    remote.create().await.unwrap();
    let mut rng = rand::thread_rng();
    let docs: Vec<Document> = (0..n).map(|i| Document::bench(doc_id(i), &mut rng)).collect();
    let results = remote.bulk_docs(docs).await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));
    remote
}

#[tokio::test]
async fn pull_replication_copies_every_document() {
    let server = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let remote = remote_with_docs(&server, 25).await;
    let local = Arc::new(MemoryDatabase::new("local"));

    let options = ReplicationOptions {
        batch_size: 10,
        ..Default::default()
    };
    let mut replication = replicate(remote.clone(), local.clone(), options);

    let mut changes = 0;
    let mut completions = Vec::new();
    while let Some(event) = replication.next_event().await {
        match event {
            ReplicationEvent::Change(_) => changes += 1,
            ReplicationEvent::Complete(summary) => completions.push(summary),
            ReplicationEvent::Error(e) => panic!("replication failed: {}", e),
        }
    }

    assert_eq!(completions.len(), 1);
    let summary = &completions[0];
    assert_eq!(summary.status, ReplicationStatus::Complete);
    assert_eq!(summary.docs_written, 25);
    assert_eq!(summary.batches, 3);
    assert_eq!(changes, 3);
    assert_eq!(local.doc_count().await, 25);

    // Local copies carry the remote revisions and bodies.
    for i in [0, 12, 24] {
        let id = doc_id(i);
        let remote_doc = remote.get(&id).await.unwrap();
        let local_doc = local.get(&id).await.unwrap();
        assert_eq!(remote_doc, local_doc);
    }

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn second_replication_transfers_nothing() {
    let server = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let remote = remote_with_docs(&server, 5).await;
    let local = Arc::new(MemoryDatabase::new("local"));

    let first = replicate(remote.clone(), local.clone(), ReplicationOptions::default())
        .finish()
        .await
        .unwrap();
    assert_eq!(first.docs_written, 5);

    let second = replicate(remote, local.clone(), ReplicationOptions::default())
        .finish()
        .await
        .unwrap();
    assert_eq!(second.docs_read, 0);
    assert_eq!(second.docs_written, 0);
    assert_eq!(local.doc_count().await, 5);
}

#[tokio::test]
async fn replication_picks_up_latest_generation() {
    let server = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let remote = remote_with_docs(&server, 3).await;

    let mut doc = remote.get(&doc_id(1)).await.unwrap();
    doc.body.insert("foo".into(), serde_json::json!("updated"));
    let rev = remote.put(doc).await.unwrap().rev.unwrap();
    assert!(rev.starts_with("2-"));

    let local = Arc::new(MemoryDatabase::new("local"));
    replicate(remote, local.clone(), ReplicationOptions::default())
        .finish()
        .await
        .unwrap();

    let copied = local.get(&doc_id(1)).await.unwrap();
    assert_eq!(copied.rev.as_deref(), Some(rev.as_str()));
    assert_eq!(copied.body["foo"], "updated");
}

#[tokio::test]
async fn stop_after_docs_cancels_run() {
    let server = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let remote = remote_with_docs(&server, 50).await;
    let local = Arc::new(MemoryDatabase::new("local"));

    let options = ReplicationOptions {
        batch_size: 10,
        stop_after_docs: Some(20),
        ..Default::default()
    };
    let summary = replicate(remote, local.clone(), options)
        .finish()
        .await
        .unwrap();
    assert_eq!(summary.status, ReplicationStatus::Cancelled);
    assert_eq!(summary.docs_written, 20);

    let rows = local.all_docs(&AllDocsQuery::default()).await.unwrap();
    assert_eq!(rows.len(), 20);
}

#[tokio::test]
async fn http_destroy_removes_remote_database() {
    let server = MemoryCouchServer::start("127.0.0.1:0").await.unwrap();
    let remote = remote_with_docs(&server, 1).await;
    assert!(server.couch().database("remote").is_some());

    remote.destroy().await.unwrap();
    assert!(server.couch().database("remote").is_none());
    assert!(remote.info().await.is_err());
}
