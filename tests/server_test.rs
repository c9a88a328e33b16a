//! Integration tests against live MySQL and PostgreSQL servers.
//!
//! Skipped unless `TEST_MYSQL_URL` / `TEST_POSTGRES_URL` point at a
//! disposable database, e.g. `mysql://root:pw@localhost:3306/sorcerer_test`.

use serde_json::json;
use sorcererdb::config::DsnConfig;
use sorcererdb::db::{ConnectionRegistry, QueryExecutor};
use sorcererdb::models::QueryParam;

async fn executor_for(var: &str, table_ddl: &str) -> Option<QueryExecutor> {
    let Ok(url) = std::env::var(var) else {
        eprintln!("{} not set, skipping", var);
        return None;
    };
    let config = DsnConfig::parse(&url).unwrap().with_name("server");
    let registry = ConnectionRegistry::with_dsns([config]).await.unwrap();
    registry.connect("server").await.unwrap();

    let mut executor = QueryExecutor::new(registry);
    executor.set_query("DROP TABLE IF EXISTS sorcerer_people");
    assert!(executor.execute().await.unwrap());
    executor.set_query(table_ddl);
    assert!(executor.execute().await.unwrap());
    Some(executor)
}

async fn exercise_crud(executor: &mut QueryExecutor, select_by_name: &str) {
    let first = executor
        .insert("sorcerer_people", [("name", json!("Eric")), ("age", json!(30))])
        .await
        .unwrap();
    let second = executor
        .insert("sorcerer_people", [("name", json!("Ann")), ("age", json!(41))])
        .await
        .unwrap();
    assert_eq!(first, Some(1));
    assert_eq!(second, Some(2));

    executor
        .set_query(select_by_name)
        .set_binding("name", "Eric")
        .unwrap();
    let row = executor.fetch_one().await.unwrap().unwrap();
    assert_eq!(row["age"], json!(30));

    let updated = executor
        .update("sorcerer_people", [("age", 31)], [("name", "Eric")])
        .await
        .unwrap();
    assert_eq!(updated, Some(1));

    let deleted = executor
        .delete("sorcerer_people", [("name", "Ann")], Some(1))
        .await
        .unwrap();
    assert_eq!(deleted, Some(1));

    executor.begin_transaction().await.unwrap();
    executor
        .insert("sorcerer_people", [("name", "Temp")])
        .await
        .unwrap();
    executor.rollback().await.unwrap();

    executor.set_query("SELECT * FROM sorcerer_people");
    assert_eq!(executor.fetch_count().await.unwrap(), Some(1));

    executor.set_query("DROP TABLE sorcerer_people");
    assert!(executor.execute().await.unwrap());
    executor.registry().close_all().await;
}

#[tokio::test]
async fn test_mysql_crud() {
    let Some(mut executor) = executor_for(
        "TEST_MYSQL_URL",
        "CREATE TABLE sorcerer_people (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL, age INT)",
    )
    .await
    else {
        return;
    };

    exercise_crud(
        &mut executor,
        "SELECT * FROM sorcerer_people WHERE name = %(name)s",
    )
    .await;
}

#[tokio::test]
async fn test_postgres_crud() {
    let Some(mut executor) = executor_for(
        "TEST_POSTGRES_URL",
        "CREATE TABLE sorcerer_people (id SERIAL PRIMARY KEY, name TEXT NOT NULL, age INTEGER)",
    )
    .await
    else {
        return;
    };

    exercise_crud(
        &mut executor,
        "SELECT * FROM sorcerer_people WHERE name = $name",
    )
    .await;
}

#[tokio::test]
async fn test_postgres_insert_without_sequence() {
    let Some(mut executor) = executor_for(
        "TEST_POSTGRES_URL",
        "CREATE TABLE sorcerer_people (name TEXT NOT NULL, age INTEGER)",
    )
    .await
    else {
        return;
    };

    executor.begin_transaction().await.unwrap();
    executor
        .insert("sorcerer_people", [("name", "NoSeq")])
        .await
        .unwrap();
    assert!(executor.last_error().is_none());
    executor.set_query("SELECT * FROM sorcerer_people");
    assert_eq!(executor.fetch_count().await.unwrap(), Some(1));
    executor.commit().await.unwrap();

    executor.set_query("DROP TABLE sorcerer_people");
    assert!(executor.execute().await.unwrap());
    executor.registry().close_all().await;
}

#[tokio::test]
async fn test_mysql_stored_procedure() {
    let Some(mut executor) = executor_for(
        "TEST_MYSQL_URL",
        "CREATE TABLE sorcerer_people (id INT AUTO_INCREMENT PRIMARY KEY, name VARCHAR(64) NOT NULL, age INT)",
    )
    .await
    else {
        return;
    };

    executor.set_query("DROP PROCEDURE IF EXISTS sorcerer_add");
    assert!(executor.execute().await.unwrap());
    executor.set_query(
        "CREATE PROCEDURE sorcerer_add(IN p_name VARCHAR(64), IN p_age INT) \
         BEGIN INSERT INTO sorcerer_people (name, age) VALUES (p_name, p_age); END",
    );
    assert!(executor.execute().await.unwrap());

    let ok = executor
        .call_procedure(
            "sorcerer_add",
            [QueryParam::from("Proc"), QueryParam::Int(50)],
        )
        .await
        .unwrap();
    assert!(ok, "{:?}", executor.last_error());

    executor.set_query("SELECT * FROM sorcerer_people");
    assert_eq!(executor.fetch_count().await.unwrap(), Some(1));

    executor.set_query("DROP PROCEDURE sorcerer_add");
    assert!(executor.execute().await.unwrap());
    executor.set_query("DROP TABLE sorcerer_people");
    assert!(executor.execute().await.unwrap());
    executor.registry().close_all().await;
}
