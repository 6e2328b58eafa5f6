use crate::helpers::{
    StubDatabase, spawn_app, spawn_app_with_sessions, spawn_app_with_unreachable_database,
};
use serde_json::{Value, json};

fn reachable_body() -> Value {
    json!({"status": "ok", "database": "reachable"})
}

fn unreachable_body() -> Value {
    json!({"status": "unhealthy", "database": "unreachable"})
}

async fn assert_health(response: reqwest::Response, status: u16, body: Value) {
    assert_eq!(response.status().as_u16(), status);
    let received: Value = response.json().await.expect("Response body is not JSON");
    assert_eq!(received, body);
}

#[tokio::test]
async fn health_returns_200_when_the_database_answers() {
    // Arrange
    let database = StubDatabase::reachable();
    let app = spawn_app_with_sessions(database.clone()).await;

    // Act
    let response = app.get_health().await;

    // Assert
    assert_health(response, 200, reachable_body()).await;
    assert_eq!(database.journal(), ["open", "execute", "commit", "close"]);
}

#[tokio::test]
async fn health_returns_503_when_the_connection_is_refused() {
    let database = StubDatabase::reachable();
    database.set_reachable(false);
    let app = spawn_app_with_sessions(database.clone()).await;

    let response = app.get_health().await;

    assert_health(response, 503, unreachable_body()).await;
    assert!(database.journal().is_empty());
}

#[tokio::test]
async fn health_returns_503_and_rolls_back_when_the_query_fails() {
    let database = StubDatabase::reachable();
    database.set_failing_queries(true);
    let app = spawn_app_with_sessions(database.clone()).await;

    let response = app.get_health().await;

    assert_health(response, 503, unreachable_body()).await;
    assert_eq!(database.journal(), ["open", "execute", "rollback", "close"]);
}

#[tokio::test]
async fn health_reflects_a_flapping_database_on_every_call() {
    let database = StubDatabase::reachable();
    let app = spawn_app_with_sessions(database.clone()).await;

    assert_health(app.get_health().await, 200, reachable_body()).await;

    database.set_reachable(false);
    assert_health(app.get_health().await, 503, unreachable_body()).await;

    database.set_reachable(true);
    assert_health(app.get_health().await, 200, reachable_body()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_health_checks_succeed_independently() {
    let database = StubDatabase::reachable();
    let app = spawn_app_with_sessions(database.clone()).await;

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let client = app.api_client.clone();
            let url = format!("{}/health", app.address);
            tokio::spawn(async move { client.get(url).send().await })
        })
        .collect();

    for handle in handles {
        let response = handle
            .await
            .expect("Request task panicked")
            .expect("Failed to execute request.");
        assert_health(response, 200, reachable_body()).await;
    }
    assert_eq!(database.count("open"), 100);
    assert_eq!(database.count("commit"), 100);
    assert_eq!(database.count("close"), 100);
}

#[tokio::test]
async fn health_returns_503_when_postgres_refuses_connections() {
    let app = spawn_app_with_unreachable_database().await;

    let response = app.get_health().await;

    assert_health(response, 503, unreachable_body()).await;
}

#[tokio::test]
#[ignore = "requires the Postgres instance described in configuration/"]
async fn health_returns_200_against_a_live_postgres() {
    let app = spawn_app().await;

    let response = app.get_health().await;

    assert_health(response, 200, reachable_body()).await;
}

#[tokio::test]
async fn openapi_document_describes_the_health_endpoint() {
    let app = spawn_app_with_sessions(StubDatabase::reachable()).await;

    let response = app.get_openapi().await;

    assert!(response.status().is_success());
    let document: Value = response.json().await.expect("Response body is not JSON");
    assert!(document["paths"]["/health"]["get"].is_object());
}
