#[path = "./mod.rs"]
mod common;

use reqwest::StatusCode;
use serde_json::{json, Value};

/// Scenario 4: a malicious planner reply is still caught by the Guard.
/// The Coordinator probes the database before consulting the planner, so
/// this needs a reachable one even though the rejection itself never
/// touches a row.
#[tokio::test]
async fn malicious_drop_table_is_rejected_by_the_guard() {
    if common::live_database_url().is_none() {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    }

    let base_url = common::spawn_app(vec![
        r#"{"sql": "DROP TABLE public.market_data"}"#,
    ])
    .await;

    let response = post_query(&base_url, json!({"question": "drop all tables"})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "guard_rejection");
    assert_eq!(body["kind"], "not_read_only");
}

/// Scenario 5: a missing `question` field is a 400, independent of the LLM.
#[tokio::test]
async fn missing_question_is_rejected_before_any_llm_call() {
    let base_url = common::spawn_app(vec![]).await;

    let response = post_query(&base_url, json!({})).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "missing_question");
}

/// Scenario 6: no service key and a mismatched `Referer` host is a 401.
#[tokio::test]
async fn mismatched_referer_without_service_key_is_unauthorized() {
    let base_url = common::spawn_app(vec![]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/query"))
        .header("referer", "https://evil.example.com/")
        .json(&json!({"question": "What is the latest USDC utilization?"}))
        .send()
        .await
        .expect("request failed");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");
}

/// A valid service key bypasses the same-origin check entirely.
#[tokio::test]
async fn a_valid_service_key_passes_the_auth_layer() {
    let base_url = common::spawn_app(vec![r#"{"sql": ""}"#]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{base_url}/query"))
        .header("x-service-key", common::SERVICE_KEY)
        .json(&json!({}))
        .send()
        .await
        .expect("request failed");

    // Auth passes; the empty question fails validation next, not auth.
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "missing_question");
}

/// Scenario 1: the fast path answers a "latest utilization" question
/// without ever invoking the planner, so it needs a real database to
/// execute against.
#[tokio::test]
async fn fast_path_answers_latest_utilization_without_the_planner() {
    let Some(database_url) = common::live_database_url() else {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    };
    let _ = database_url;

    let base_url = common::spawn_app(vec![]).await;
    let response = post_query(&base_url, json!({"question": "What is the latest USDC utilization?"})).await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    let answer = body["answer"].as_str().unwrap();
    assert!(answer.contains("USDC"), "answer was: {answer}");
    assert!(body["sql"].as_str().unwrap().contains("ORDER BY ts DESC LIMIT 1"));
}

/// Scenario 2: a planner-routed question over a real window of data.
#[tokio::test]
async fn planner_routed_question_returns_a_short_summary() {
    if common::live_database_url().is_none() {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    }

    let plan = json!({
        "sql": "SELECT AVG(borrow_apy) AS avg_borrow_apy FROM public.market_data \
                 WHERE protocol='aave' AND symbol='WETH' AND ts >= NOW() - INTERVAL '7 days'"
    })
    .to_string();
    let summary = "Average WETH borrow APY over the last 7 days was 3.2%.";

    let base_url = common::spawn_app(vec![&plan, summary]).await;
    let response = post_query(
        &base_url,
        json!({"question": "Show me the average borrow_apy for WETH over the last 7 days"}),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(!body["answer"].as_str().unwrap().is_empty());
}

/// Scenario 3: the first candidate fails with a recoverable error class;
/// the retried plan succeeds.
#[tokio::test]
async fn a_recoverable_execution_error_triggers_one_retry() {
    if common::live_database_url().is_none() {
        eprintln!("skipping: DATABASE_URL not set");
        return;
    }

    let bad_plan = json!({
        "sql": "SELECT symbol, PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY utilization) \
                 OVER (PARTITION BY symbol) FROM public.market_data WHERE protocol='aave'"
    })
    .to_string();
    let good_plan = json!({
        "sql": "SELECT symbol, (SELECT PERCENTILE_CONT(0.5) WITHIN GROUP (ORDER BY m2.utilization) \
                 FROM public.market_data m2 WHERE m2.symbol = m1.symbol) AS median_utilization \
                 FROM public.market_data m1 WHERE m1.protocol='aave' GROUP BY symbol, median_utilization"
    })
    .to_string();
    let summary = "Median utilization per asset returned.";

    let base_url = common::spawn_app(vec![&bad_plan, &good_plan, summary]).await;
    let response = post_query(&base_url, json!({"question": "median utilization per asset"})).await;

    assert_eq!(response.status(), StatusCode::OK);
}

async fn post_query(base_url: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(format!("{base_url}/query"))
        .header("x-service-key", common::SERVICE_KEY)
        .json(&body)
        .send()
        .await
        .expect("request failed")
}
