//! Database initialization on disk

use rqs_common::db::init::init_database;
use rqs_common::db::migrations::get_schema_version;
use rqs_common::db::ReceiptStore;
use rqs_common::receipts::{DomainCode, ReceiptRef};

#[tokio::test]
async fn test_database_created_with_parent_folder() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("main.db");

    let pool = init_database(&db_path).await.unwrap();
    assert!(db_path.exists(), "database file was not created");
    assert!(get_schema_version(&pool).await.unwrap() >= 2);
}

#[tokio::test]
async fn test_existing_database_keeps_receipts() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("main.db");

    let reference = ReceiptRef::parse(
        DomainCode::RuFns,
        "t=20240101T1200&s=10.50&fn=123&i=45&fp=999&n=1",
    )
    .unwrap();

    {
        let pool = init_database(&db_path).await.unwrap();
        ReceiptStore::new(pool.clone()).insert(&reference).await.unwrap();
        pool.close().await;
    }

    let pool = init_database(&db_path).await.unwrap();
    let record = ReceiptStore::new(pool).load_by_id(1).await.unwrap();
    assert_eq!(record.map(|r| r.unique_key), Some(reference.unique_key()));
}
