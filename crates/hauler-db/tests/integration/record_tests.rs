use hauler_core::models::CanonicalRecord;
use hauler_core::traits::RecordSink;

use crate::integration::common::setup_test_db;

fn product(path: &str, title: &str) -> CanonicalRecord {
    CanonicalRecord::new(
        "product",
        serde_json::json!({"path": path, "title": title}),
    )
}

#[tokio::test]
async fn insert_and_list_records() {
    let (db, _container) = setup_test_db().await;
    let repo = db.records("pharmacy");

    repo.insert(&product("/product/1", "Aspirin")).await.unwrap();
    repo.insert(&product("/product/42", "Ibuprofen")).await.unwrap();

    assert_eq!(repo.count().await.unwrap(), 2);

    let stored = repo.list(10).await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].collection, "pharmacy");
    assert_eq!(stored[0].kind, "product");
    assert_eq!(stored[0].data["title"], "Aspirin");
    assert_eq!(stored[0].data_hash, product("/product/1", "Aspirin").data_hash());
}

#[tokio::test]
async fn collections_are_isolated() {
    let (db, _container) = setup_test_db().await;
    let shop = db.records("shop");
    let api = db.records("api");

    shop.insert(&product("/product/1", "Aspirin")).await.unwrap();

    assert_eq!(shop.count().await.unwrap(), 1);
    assert_eq!(api.count().await.unwrap(), 0);
    assert!(api.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn insert_many_returns_accepted_count() {
    let (db, _container) = setup_test_db().await;
    let repo = db.records("api");

    let batch: Vec<CanonicalRecord> = (0..5)
        .map(|i| CanonicalRecord::new("item", serde_json::json!({"id": i})))
        .collect();

    assert_eq!(repo.insert_many(&batch).await.unwrap(), 5);
    assert_eq!(repo.insert_many(&[]).await.unwrap(), 0);
    assert_eq!(repo.count().await.unwrap(), 5);
}

#[tokio::test]
async fn migrations_are_idempotent() {
    let (db, _container) = setup_test_db().await;
    db.migrate().await.unwrap();
    db.records("any").health_check().await.unwrap();
}
