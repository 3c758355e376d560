use crate::common::TestFleet;
use base64::prelude::{Engine as _, BASE64_STANDARD};
use nginx_fleet_control::types::{RunResponse, SyncResponse};
use reqwest::{Method, StatusCode};
use serde_json::json;

#[tokio::test]
async fn test_sync_over_nodes_and_files() {
    let fleet = TestFleet::new().await;
    let a = fleet.add_node("a", "10.0.1.1").await;
    let b = fleet.add_node("b", "10.0.1.2").await;
    fleet.put_file("one.conf", "1").await;
    fleet.put_file("two.conf", "2").await;
    fleet.fleet.set_unreachable("10.0.1.2");

    let resp = fleet
        .request(Method::POST, "/api/cluster/sync")
        .json(&json!({
            "files": ["one.conf", "two.conf"],
            "nodes": [a.id.clone(), "ghost", b.id.clone()],
            "action": "push"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let results = resp.json::<SyncResponse>().await.unwrap().results;

    let summary: Vec<(&str, &str, bool)> = results
        .iter()
        .map(|r| (r.node_id.as_str(), r.file.as_str(), r.ok))
        .collect();
    assert_eq!(
        summary,
        vec![
            (a.id.as_str(), "one.conf", true),
            (a.id.as_str(), "two.conf", true),
            ("ghost", "one.conf", false),
            ("ghost", "two.conf", false),
            (b.id.as_str(), "one.conf", false),
            (b.id.as_str(), "two.conf", false),
        ]
    );
    assert_eq!(results[2].error.as_deref(), Some("node not found"));
    assert!(results[4].error.as_deref().unwrap().contains("connection failed"));
    assert_eq!(
        fleet.fleet.remote_paths("10.0.1.1"),
        vec![
            "/etc/nginx/sites-available/one.conf",
            "/etc/nginx/sites-available/two.conf"
        ]
    );
}

#[tokio::test]
async fn test_run_push_certs_on_many_nodes() {
    let fleet = TestFleet::new().await;
    let a = fleet.add_node("a", "10.0.1.1").await;
    let b = fleet.add_node("b", "10.0.1.2").await;

    let resp = fleet
        .request(Method::POST, "/api/cluster/run")
        .json(&json!({
            "nodes": [a.id.clone(), b.id.clone()],
            "operation": {
                "type": "push-certs",
                "files": [
                    { "name": "shop.crt", "contentBase64": BASE64_STANDARD.encode("CRT") },
                    { "name": "shop.key", "contentBase64": BASE64_STANDARD.encode("KEY") }
                ],
                "targetDir": "/etc/nginx/ssl/shop"
            }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let results = resp.json::<RunResponse>().await.unwrap().results;

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].node_id, a.id);
    assert_eq!(results[1].node_id, b.id);
    assert!(results.iter().all(|r| r.ok));
    for host in ["10.0.1.1", "10.0.1.2"] {
        assert_eq!(
            fleet.fleet.remote_file(host, "/etc/nginx/ssl/shop/shop.key").unwrap(),
            b"KEY"
        );
    }
    assert_eq!(fleet.fleet.connects(), fleet.fleet.disposes());
}

#[tokio::test]
async fn test_run_enable_and_reload_mixed() {
    let fleet = TestFleet::new().await;
    let a = fleet.add_node("a", "10.0.1.1").await;
    let b = fleet.add_node("b", "10.0.1.2").await;
    fleet.put_file("shop.conf", "server {}").await;
    fleet.fleet.fail_reload("10.0.1.2");

    let push = fleet
        .request(Method::POST, "/api/cluster/run")
        .json(&json!({
            "nodes": [a.id.clone(), b.id.clone()],
            "operation": { "type": "push-config", "filename": "shop.conf" }
        }))
        .send()
        .await
        .unwrap()
        .json::<RunResponse>()
        .await
        .unwrap();
    assert!(push.results.iter().all(|r| r.ok && r.exit_code == Some(0)));

    let reload = fleet
        .request(Method::POST, "/api/cluster/run")
        .json(&json!({
            "nodes": [a.id, b.id],
            "operation": { "type": "enable-and-reload", "filename": "shop.conf" }
        }))
        .send()
        .await
        .unwrap()
        .json::<RunResponse>()
        .await
        .unwrap();
    assert!(reload.results[0].ok);
    assert!(!reload.results[1].ok);
    assert_eq!(reload.results[1].error.as_deref(), Some("reload failed"));
}
