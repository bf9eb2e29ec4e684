//! Integration tests for the accessory host.
//!
//! These tests start a real HTTP server on the loopback interface, send
//! actual HTTP requests, and verify end-to-end behaviour.

use std::sync::Arc;
use std::time::Duration;

use accessory_host::{
    AccessoryInfo, AccessoryServer, ChangeOrigin, CharacteristicsBody, ServerConfig,
    SpeakerAccessory, CONTROLLER_HEADER, ON_IID, SPEAKER_AID, VOLUME_IID,
};
use serde_json::{json, Value};
use tokio::time::timeout;

async fn start_server() -> (AccessoryServer, Arc<SpeakerAccessory>) {
    let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new(
        "Test's macbook speaker volume",
    )));
    accessory.speaker().on.set_value(true);
    accessory.speaker().volume.set_value(40);

    let config = ServerConfig::local_only().with_port_range(0, 0);
    let server = AccessoryServer::start(config, Arc::clone(&accessory))
        .await
        .expect("Failed to start accessory server");

    (server, accessory)
}

async fn pair(client: &reqwest::Client, base_url: &str) -> String {
    let response = client
        .post(format!("{base_url}/pair-setup"))
        .json(&json!({ "pin": "123-41-234" }))
        .send()
        .await
        .expect("Failed to send pairing request");
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    body["controller_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_pairing_requires_setup_code() {
    let (server, _accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();

    let response = client
        .post(format!("{base_url}/pair-setup"))
        .json(&json!({ "pin": "999-99-998" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], json!(-70401));
    assert_eq!(server.pairings().count(), 0);

    let controller_id = pair(&client, &base_url).await;
    assert!(server.pairings().is_paired(&controller_id));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_unpaired_requests_are_rejected() {
    let (server, _accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();

    let response = client
        .get(format!("{base_url}/accessories"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .get(format!("{base_url}/characteristics?id=1.10"))
        .header(CONTROLLER_HEADER, "not-a-controller")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    let response = client
        .put(format!("{base_url}/characteristics"))
        .json(&json!({ "characteristics": [{ "aid": 1, "iid": 10, "value": 70 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_accessory_database() {
    let (server, accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();
    let controller_id = pair(&client, &base_url).await;

    let response = client
        .get(format!("{base_url}/accessories"))
        .header(CONTROLLER_HEADER, &controller_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: Value = response.json().await.unwrap();
    let accessory_json = &body["accessories"][0];
    assert_eq!(accessory_json["aid"], json!(SPEAKER_AID));

    let info = &accessory_json["services"][0];
    assert_eq!(info["type"], json!("3E"));
    assert_eq!(
        info["characteristics"][0]["value"],
        json!(accessory.name())
    );

    let speaker = &accessory_json["services"][1];
    assert_eq!(speaker["type"], json!("43"));
    assert_eq!(speaker["characteristics"][0]["iid"], json!(ON_IID));
    assert_eq!(speaker["characteristics"][0]["value"], json!(true));
    assert_eq!(speaker["characteristics"][1]["iid"], json!(VOLUME_IID));
    assert_eq!(speaker["characteristics"][1]["value"], json!(40));
    assert_eq!(speaker["characteristics"][1]["maxValue"], json!(100));

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_read_characteristics() {
    let (server, _accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();
    let controller_id = pair(&client, &base_url).await;

    let response = client
        .get(format!("{base_url}/characteristics?id=1.9,1.10"))
        .header(CONTROLLER_HEADER, &controller_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    let body: CharacteristicsBody = response.json().await.unwrap();
    assert_eq!(body.characteristics.len(), 2);
    assert_eq!(body.characteristics[0].value, Some(json!(true)));
    assert_eq!(body.characteristics[1].value, Some(json!(40)));

    // Unknown instance ids are reported per entry
    let response = client
        .get(format!("{base_url}/characteristics?id=1.10,1.99"))
        .header(CONTROLLER_HEADER, &controller_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 207);

    let body: CharacteristicsBody = response.json().await.unwrap();
    assert_eq!(body.characteristics[0].value, Some(json!(40)));
    assert_eq!(body.characteristics[1].status, Some(-70409));

    // Malformed id list
    let response = client
        .get(format!("{base_url}/characteristics?id=volume"))
        .header(CONTROLLER_HEADER, &controller_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_write_reaches_subscribers() {
    let (server, accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();
    let controller_id = pair(&client, &base_url).await;

    let mut changes = accessory.speaker().volume.subscribe();

    let response = client
        .put(format!("{base_url}/characteristics"))
        .header(CONTROLLER_HEADER, &controller_id)
        .json(&json!({ "characteristics": [{ "aid": 1, "iid": 10, "value": 70 }] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let change = timeout(Duration::from_secs(1), changes.recv())
        .await
        .expect("Timeout waiting for remote change")
        .expect("Change channel closed");
    assert_eq!(change.value, 70);
    assert_eq!(change.origin, ChangeOrigin::Remote);
    assert_eq!(accessory.speaker().volume.value(), 70);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_remote_write_validation() {
    let (server, accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();
    let controller_id = pair(&client, &base_url).await;

    let response = client
        .put(format!("{base_url}/characteristics"))
        .header(CONTROLLER_HEADER, &controller_id)
        .json(&json!({ "characteristics": [
            { "aid": 1, "iid": 10, "value": 101 },
            { "aid": 1, "iid": 2, "value": "Renamed" },
            { "aid": 1, "iid": 42, "value": 1 },
            { "aid": 1, "iid": 9, "value": false }
        ] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 207);

    let body: CharacteristicsBody = response.json().await.unwrap();
    let statuses: Vec<Option<i32>> = body.characteristics.iter().map(|c| c.status).collect();
    assert_eq!(
        statuses,
        vec![Some(-70410), Some(-70404), Some(-70409), Some(0)]
    );

    assert_eq!(accessory.speaker().volume.value(), 40);
    assert!(!accessory.speaker().on.value());

    // Malformed body
    let response = client
        .put(format!("{base_url}/characteristics"))
        .header(CONTROLLER_HEADER, &controller_id)
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_event_stream_broadcasts_local_changes() {
    let (server, accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();
    let controller_id = pair(&client, &base_url).await;

    let mut response = client
        .get(format!("{base_url}/events"))
        .header(CONTROLLER_HEADER, &controller_id)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);

    accessory.speaker().volume.set_value(55);

    let mut received = String::new();
    let result = timeout(Duration::from_secs(2), async {
        while !received.contains("\"iid\":10") {
            match response.chunk().await.unwrap() {
                Some(chunk) => received.push_str(&String::from_utf8_lossy(&chunk)),
                None => break,
            }
        }
    })
    .await;
    assert!(result.is_ok(), "Timeout waiting for event");

    assert!(received.contains("characteristic"));
    assert!(received.contains("\"value\":55"));
    assert!(received.contains("\"origin\":\"local\""));

    // Shutdown must not hang on the open stream
    timeout(Duration::from_secs(6), server.shutdown())
        .await
        .expect("Shutdown hung on open event stream")
        .unwrap();
}

#[tokio::test]
async fn test_unknown_routes() {
    let (server, _accessory) = start_server().await;
    let client = reqwest::Client::new();
    let base_url = server.base_url().to_string();

    let response = client
        .get(format!("{base_url}/does-not-exist"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_server_stops_serving_after_shutdown() {
    let (server, _accessory) = start_server().await;
    let base_url = server.base_url().to_string();

    server.shutdown().await.unwrap();

    let client = reqwest::Client::new();
    let result = client
        .post(format!("{base_url}/pair-setup"))
        .json(&json!({ "pin": "123-41-234" }))
        .timeout(Duration::from_secs(1))
        .send()
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_no_available_port() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let accessory = Arc::new(SpeakerAccessory::new(AccessoryInfo::new("Speaker")));
    let config = ServerConfig::local_only().with_port_range(port, port);

    let result = AccessoryServer::start(config, accessory).await;
    assert!(matches!(
        result,
        Err(accessory_host::ServerError::NoAvailablePort { .. })
    ));
}
