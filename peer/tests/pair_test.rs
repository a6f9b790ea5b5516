//! End-to-end tests: a phone and a watch peer served on localhost, linked
//! to each other over HTTP.

use repsync_engine::DeviceRole;
use repsync_peer::config::Config;
use serde_json::{json, Value};
use std::{future::Future, time::Duration};
use tempfile::TempDir;
use tokio::net::TcpListener;

struct Pair {
    phone: String,
    watch: String,
    client: reqwest::Client,
    _dirs: (TempDir, TempDir),
}

async fn serve(role: DeviceRole, listener: TcpListener, peer_url: String, dir: &TempDir) {
    let mut config = Config::local(role, dir.path().to_path_buf());
    config.peer_url = Some(peer_url);
    let state = repsync_peer::start(config).unwrap();
    let app = repsync_peer::app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
}

async fn pair() -> Pair {
    let phone_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let watch_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let phone = format!("http://{}", phone_listener.local_addr().unwrap());
    let watch = format!("http://{}", watch_listener.local_addr().unwrap());

    let dirs = (tempfile::tempdir().unwrap(), tempfile::tempdir().unwrap());
    serve(DeviceRole::Phone, phone_listener, watch.clone(), &dirs.0).await;
    serve(DeviceRole::Watch, watch_listener, phone.clone(), &dirs.1).await;

    Pair {
        phone,
        watch,
        client: reqwest::Client::new(),
        _dirs: dirs,
    }
}

impl Pair {
    async fn get(&self, base: &str, path: &str) -> Value {
        self.client
            .get(format!("{}{}", base, path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post(&self, base: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(format!("{}{}", base, path))
            .json(&body)
            .send()
            .await
            .unwrap()
    }
}

/// Poll `check` until it holds or ten seconds pass.
async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn watch_receives_phone_edits() {
    let owned = pair().await;
    let pair = &owned;

    eventually("initial sync on the watch", || async move {
        pair.get(&pair.watch, "/status").await["initialSyncDone"] == true
    })
    .await;

    let response = pair
        .post(&pair.phone, "/workouts", json!({ "name": "Push" }))
        .await;
    assert_eq!(response.status(), 201);
    let workout: Value = response.json().await.unwrap();
    let id = workout["id"].as_str().unwrap().to_string();
    let id = id.as_str();

    let response = pair
        .post(
            &pair.phone,
            &format!("/workouts/{}/exercises", id),
            json!({ "name": "Bench" }),
        )
        .await;
    assert_eq!(response.status(), 201);

    eventually("workout on the watch", || async move {
        let view = pair.get(&pair.watch, &format!("/workouts/{}", id)).await;
        view["name"] == "Push" && view["exercises"][0]["name"] == "Bench"
    })
    .await;

    eventually("phone outbox drained", || async move {
        pair.get(&pair.phone, "/health").await["outstandingTransfers"] == 0
    })
    .await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn running_workout_is_shared() {
    let owned = pair().await;
    let pair = &owned;

    eventually("link up", || async move {
        let phone = pair.get(&pair.phone, "/status").await;
        let watch = pair.get(&pair.watch, "/status").await;
        phone["link"]["reachable"] == true
            && watch["link"]["reachable"] == true
            && watch["initialSyncDone"] == true
    })
    .await;

    let workout: Value = pair
        .post(&pair.phone, "/workouts", json!({ "name": "Run" }))
        .await
        .json()
        .await
        .unwrap();
    let id = workout["id"].as_str().unwrap().to_string();
    let id = id.as_str();

    eventually("workout on the watch", || async move {
        pair.get(&pair.watch, &format!("/workouts/{}", id)).await["name"] == "Run"
    })
    .await;

    let response = pair
        .post(&pair.watch, &format!("/workouts/{}/start", id), json!({}))
        .await;
    assert_eq!(response.status(), 204);

    eventually("phone sees the watch's workout", || async move {
        let status = pair.get(&pair.phone, "/status").await;
        status["running"]["source"] == "watch" && status["editingEnabled"] == false
    })
    .await;

    let response = pair
        .post(&pair.phone, "/workouts", json!({ "name": "Blocked" }))
        .await;
    assert_eq!(response.status(), 409);

    // The phone may end the watch's workout.
    let response = pair.post(&pair.phone, "/workout/end", json!({})).await;
    assert_eq!(response.status(), 204);

    eventually("watch released", || async move {
        let status = pair.get(&pair.watch, "/status").await;
        status["running"].is_null() && status["editingEnabled"] == true
    })
    .await;
}
