#[path = "./mod.rs"]
mod common;

use reqwest::StatusCode;
use serde_json::Value;

#[tokio::test]
async fn healthcheck_returns_status_and_version() {
    let base_url = common::spawn_app(vec![]).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{base_url}/healthcheck"))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), StatusCode::OK);

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["status"], "OK");
    assert!(json["version"].is_string());
}

#[tokio::test]
async fn healthcheck_requires_no_service_key() {
    // No x-service-key header at all, and the auth layer doesn't even
    // apply to this route.
    let base_url = common::spawn_app(vec![]).await;
    let response = reqwest::get(format!("{base_url}/healthcheck")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
