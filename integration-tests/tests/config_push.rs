use crate::common::TestFleet;
use nginx_fleet_control::types::{LogResponse, PulledConfig, ReloadOutcome};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};

const SITE: &str = "server {\n    listen 80;\n    server_name shop.example.com;\n}\n";

#[tokio::test]
async fn test_push_enable_reload_pull() {
    let fleet = TestFleet::new().await;
    let node = fleet.add_node("web1", "10.0.0.11").await;
    fleet.put_file("shop.conf", SITE).await;

    let resp = fleet
        .request(Method::POST, &format!("/api/nodes/{}/push-config", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["ok"], true);
    assert_eq!(
        fleet
            .fleet
            .remote_file("10.0.0.11", "/etc/nginx/sites-available/shop.conf")
            .unwrap(),
        SITE.as_bytes()
    );

    let outcome = fleet
        .request(Method::POST, &format!("/api/nodes/{}/enable-and-reload", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap()
        .json::<ReloadOutcome>()
        .await
        .unwrap();
    assert!(outcome.ok);
    assert!(!outcome.reload_out.is_empty());
    assert!(fleet
        .fleet
        .is_linked("10.0.0.11", "/etc/nginx/sites-enabled/shop.conf"));

    let pulled = fleet
        .request(Method::POST, &format!("/api/nodes/{}/pull-config", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap()
        .json::<PulledConfig>()
        .await
        .unwrap();
    assert_eq!(pulled.content, SITE);

    // Three sessions, each disposed exactly once
    assert_eq!(fleet.fleet.connects(), 3);
    assert_eq!(fleet.fleet.disposes(), 3);

    let log = fleet
        .request(Method::GET, "/api/cluster/log")
        .send()
        .await
        .unwrap()
        .json::<LogResponse>()
        .await
        .unwrap();
    let actions: Vec<&str> = log.entries.iter().map(|e| e.action.as_str()).collect();
    assert_eq!(
        actions,
        vec!["node:add", "push-config", "enable-and-reload", "pull-config"]
    );
    assert!(log.entries[1..].iter().all(|e| e.subject_host == "10.0.0.11"));
}

#[tokio::test]
async fn test_failed_config_test_skips_reload() {
    let fleet = TestFleet::new().await;
    let node = fleet.add_node("web1", "10.0.0.11").await;
    fleet.put_file("shop.conf", "server {").await;
    fleet.fleet.break_config("10.0.0.11");

    let resp = fleet
        .request(Method::POST, &format!("/api/nodes/{}/push-config", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = fleet
        .request(Method::POST, &format!("/api/nodes/{}/enable-and-reload", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap();
    // A failed test is reported in the body, not as an HTTP error
    assert_eq!(resp.status(), StatusCode::OK);
    let outcome: ReloadOutcome = resp.json().await.unwrap();
    assert!(!outcome.ok);
    assert!(outcome.test_out.contains("test failed"));
    assert_eq!(outcome.reload_out, "");
    assert!(!fleet
        .fleet
        .commands("10.0.0.11")
        .iter()
        .any(|c| c.contains("systemctl")));
}

#[tokio::test]
async fn test_rejected_key_and_missing_file() {
    let fleet = TestFleet::new().await;
    let node = fleet.add_node("web1", "10.0.0.11").await;
    fleet.put_file("shop.conf", SITE).await;
    fleet.fleet.reject_key("10.0.0.11");

    let resp = fleet
        .request(Method::POST, &format!("/api/nodes/{}/push-config", node.id))
        .json(&json!({ "filename": "shop.conf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("management key"));

    let resp = fleet
        .request(Method::POST, &format!("/api/nodes/{}/push-config", node.id))
        .json(&json!({ "filename": "other.conf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(fleet.fleet.connects(), 0);
}
