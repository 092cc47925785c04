use reqwest::StatusCode;
use serde_json::{json, Value};
use std::{
    net::{SocketAddr, TcpListener},
    time::Duration,
};
use tokio::task::JoinHandle;
use toss_server::{
    api::{serve, AppState},
    config::Config,
};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct TestServer {
    addr: SocketAddr,
    handle: JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, p: &str) -> String {
        format!("http://{}{}", self.addr, p)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn spawn_server(places_url: Option<String>) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::for_data_dir(addr.to_string(), tmp.path().to_path_buf());
    if let Some(url) = places_url {
        config.places.base_url = url;
        config.places.api_key = Some("test-key".into());
    }
    let state = AppState::new(config).await.unwrap();
    let handle = tokio::spawn(async move {
        serve(listener, state).await.unwrap();
    });
    TestServer {
        addr,
        handle,
        _tmp: tmp,
    }
}

async fn session(client: &reqwest::Client, server: &TestServer, name: &str) -> (String, String) {
    let resp = client
        .post(server.url("/api/session"))
        .json(&json!({ "name": name }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let v: Value = resp.json().await.unwrap();
    (
        v["token"].as_str().unwrap().to_string(),
        v["participant_id"].as_str().unwrap().to_string(),
    )
}

async fn mount_places(places: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/geocode/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{"geometry": {"location": {"lat": 48.85, "lng": 2.35}}}]
        })))
        .mount(places)
        .await;
    Mock::given(method("GET"))
        .and(path("/place/nearbysearch/json"))
        .and(query_param("location", "48.85,2.35"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "next_page_token": "page2",
            "results": [
                {"place_id": "p1", "name": "Chez Un", "rating": 4.5},
                {"place_id": "p2", "name": "Deux", "rating": 4.1}
            ]
        })))
        .mount(places)
        .await;
    Mock::given(method("GET"))
        .and(path("/place/nearbysearch/json"))
        .and(query_param("pagetoken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [
                {"place_id": "p2", "name": "Deux", "rating": 4.1},
                {"place_id": "p3", "name": "Trois", "rating": 3.9}
            ]
        })))
        .mount(places)
        .await;
}

#[tokio::test]
async fn health_and_auth_required() {
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();
    let resp = client.get(server.url("/api/health")).send().await.unwrap();
    assert_eq!(resp.text().await.unwrap(), "ok");

    let resp = client.get(server.url("/api/rooms/ABCDEF")).send().await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let resp = client
        .get(server.url("/api/rooms/ABCDEF"))
        .bearer_auth("garbage")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = client
        .post(server.url("/api/session"))
        .json(&json!({ "name": "   " }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"], "invalid_name");
}

#[tokio::test]
async fn two_people_reach_a_match() {
    let places = MockServer::start().await;
    mount_places(&places).await;
    let server = spawn_server(Some(places.uri())).await;
    let client = reqwest::Client::new();
    let (ann, ann_id) = session(&client, &server, "Ann").await;
    let (ben, ben_id) = session(&client, &server, "Ben").await;
    let (cat, _) = session(&client, &server, "Cat").await;

    let resp = client
        .post(server.url("/api/rooms"))
        .bearer_auth(&ann)
        .json(&json!({ "location": "Paris", "filters": { "radius_m": 2000 } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let room: Value = resp.json().await.unwrap();
    let code = room["id"].as_str().unwrap().to_string();
    assert_eq!(room["host_id"], ann_id.as_str());

    // codes are case-insensitive
    let resp = client
        .post(server.url(&format!("/api/rooms/{}/join", code.to_lowercase())))
        .bearer_auth(&ben)
        .json(&json!({ "name": "Benjamin" }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    let room: Value = resp.json().await.unwrap();
    assert_eq!(room["participants"].as_array().unwrap().len(), 2);

    // first page, then second page with one duplicate
    let page: Value = client
        .post(server.url(&format!("/api/rooms/{code}/restaurants/next")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["added"], 2);
    assert_eq!(page["has_more"], true);
    let page: Value = client
        .post(server.url(&format!("/api/rooms/{code}/restaurants/next")))
        .bearer_auth(&ben)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["added"], 1);
    assert_eq!(page["has_more"], false);
    let ids: Vec<&str> = page["room"]["restaurants"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, ["p1", "p2", "p3"]);

    // exhausted
    let page: Value = client
        .post(server.url(&format!("/api/rooms/{code}/restaurants/next")))
        .bearer_auth(&ben)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(page["added"], 0);

    // outsiders cannot swipe
    let resp = client
        .post(server.url(&format!("/api/rooms/{code}/swipes")))
        .bearer_auth(&cat)
        .json(&json!({ "kind": "restaurant", "item_id": "p1", "direction": "right" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let swipe = |token: String, item: &'static str, dir: &'static str| {
        let client = client.clone();
        let url = server.url(&format!("/api/rooms/{code}/swipes"));
        async move {
            let v: Value = client
                .post(url)
                .bearer_auth(token)
                .json(&json!({ "kind": "restaurant", "item_id": item, "direction": dir }))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            v
        }
    };
    assert_eq!(swipe(ann.clone(), "p1", "left").await["matched"], false);
    assert_eq!(swipe(ann.clone(), "p2", "right").await["matched"], false);
    assert_eq!(swipe(ben.clone(), "p1", "right").await["matched"], false);
    let last = swipe(ben.clone(), "p2", "right").await;
    assert_eq!(last["matched"], true);
    assert_eq!(last["room"]["restaurant_swipes"][&ben_id]["p2"], "right");

    let m: Value = client
        .get(server.url(&format!("/api/rooms/{code}/matches")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(m["restaurants"], json!(["p2"]));
    assert_eq!(m["food_types"], json!([]));

    let hist: Value = client
        .get(server.url("/api/history"))
        .bearer_auth(&ben)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(hist[0]["room_id"], code.as_str());
    assert_eq!(hist[0]["matched"]["id"], "p2");

    // only the host changes filters; doing so resets the list
    let resp = client
        .put(server.url(&format!("/api/rooms/{code}/filters")))
        .bearer_auth(&ben)
        .json(&json!({ "filters": { "keyword": "sushi" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let room: Value = client
        .put(server.url(&format!("/api/rooms/{code}/filters")))
        .bearer_auth(&ann)
        .json(&json!({ "filters": { "keyword": "sushi" } }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(room["restaurants"], json!([]));
    assert_eq!(room["next_page_token"], Value::Null);

    // host leaves, Ben takes over
    let resp = client
        .post(server.url(&format!("/api/rooms/{code}/leave")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    let room: Value = client
        .get(server.url(&format!("/api/rooms/{code}")))
        .bearer_auth(&ben)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(room["host_id"], ben_id.as_str());
}

#[tokio::test]
async fn places_disabled_without_key() {
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();
    let (ann, _) = session(&client, &server, "Ann").await;
    let room: Value = client
        .post(server.url("/api/rooms"))
        .bearer_auth(&ann)
        .json(&json!({ "location": "Lisbon" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = room["id"].as_str().unwrap();
    let resp = client
        .post(server.url(&format!("/api/rooms/{code}/restaurants/next")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["error"], "places_disabled");

    let resp = client
        .get(server.url("/api/rooms/ZZZZZZ"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn favorites_export_and_account_deletion() {
    let server = spawn_server(None).await;
    let client = reqwest::Client::new();
    let (ann, ann_id) = session(&client, &server, "Ann").await;
    let (ben, _) = session(&client, &server, "Ben").await;

    let resp = client
        .post(server.url("/api/favorites"))
        .bearer_auth(&ann)
        .json(&json!({ "id": "p9", "name": "Nine" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);

    let room: Value = client
        .post(server.url("/api/rooms"))
        .bearer_auth(&ann)
        .json(&json!({ "location": "Oslo" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = room["id"].as_str().unwrap().to_string();
    client
        .post(server.url(&format!("/api/rooms/{code}/join")))
        .bearer_auth(&ben)
        .json(&json!({ "name": "Ben" }))
        .send()
        .await
        .unwrap();

    let export: Value = client
        .get(server.url("/api/account/export"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(export["participant_id"], ann_id.as_str());
    assert_eq!(export["favorites"][0]["restaurant"]["id"], "p9");
    assert_eq!(export["history"][0]["room_id"], code.as_str());

    let resp = client
        .delete(server.url("/api/account"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);

    let favs: Value = client
        .get(server.url("/api/favorites"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(favs, json!([]));
    let room: Value = client
        .get(server.url(&format!("/api/rooms/{code}")))
        .bearer_auth(&ben)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(room["participants"].as_array().unwrap().len(), 1);
    assert_ne!(room["host_id"], ann_id.as_str());

    let resp = client
        .delete(server.url("/api/favorites/p9"))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

async fn swipe_on(
    client: &reqwest::Client,
    server: &TestServer,
    token: &str,
    code: &str,
    item: &str,
    dir: &str,
) {
    let resp = client
        .post(server.url(&format!("/api/rooms/{code}/swipes")))
        .bearer_auth(token)
        .json(&json!({ "kind": "restaurant", "item_id": item, "direction": dir }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
}

/// Ann and Ben like p1, Cat does not; Cat then drops out one way or another.
async fn holdout_departs(delete_account: bool) {
    let places = MockServer::start().await;
    mount_places(&places).await;
    let server = spawn_server(Some(places.uri())).await;
    let client = reqwest::Client::new();
    let (ann, _) = session(&client, &server, "Ann").await;
    let (ben, _) = session(&client, &server, "Ben").await;
    let (cat, _) = session(&client, &server, "Cat").await;

    let room: Value = client
        .post(server.url("/api/rooms"))
        .bearer_auth(&ann)
        .json(&json!({ "location": "Paris" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = room["id"].as_str().unwrap().to_string();
    for (token, name) in [(&ben, "Ben"), (&cat, "Cat")] {
        let resp = client
            .post(server.url(&format!("/api/rooms/{code}/join")))
            .bearer_auth(token)
            .json(&json!({ "name": name }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());
    }
    let resp = client
        .post(server.url(&format!("/api/rooms/{code}/restaurants/next")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    swipe_on(&client, &server, &ann, &code, "p1", "right").await;
    swipe_on(&client, &server, &ben, &code, "p1", "right").await;
    swipe_on(&client, &server, &cat, &code, "p1", "left").await;

    let resp = if delete_account {
        client.delete(server.url("/api/account")).bearer_auth(&cat).send().await
    } else {
        client
            .post(server.url(&format!("/api/rooms/{code}/leave")))
            .bearer_auth(&cat)
            .send()
            .await
    };
    assert_eq!(resp.unwrap().status(), StatusCode::NO_CONTENT);

    let m: Value = client
        .get(server.url(&format!("/api/rooms/{code}/matches")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(m["restaurants"], json!(["p1"]));

    for token in [&ann, &ben] {
        let hist: Value = client
            .get(server.url("/api/history"))
            .bearer_auth(token)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(hist[0]["room_id"], code.as_str());
        assert_eq!(hist[0]["matched"]["id"], "p1");
    }
}

#[tokio::test]
async fn leaving_holdout_completes_match_in_history() {
    holdout_departs(false).await;
}

#[tokio::test]
async fn deleted_holdout_completes_match_in_history() {
    holdout_departs(true).await;
}

#[tokio::test]
async fn page_loaded_for_old_filters_is_discarded() {
    let places = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/geocode/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "results": [{"geometry": {"location": {"lat": 48.85, "lng": 2.35}}}]
        })))
        .mount(&places)
        .await;
    Mock::given(method("GET"))
        .and(path("/place/nearbysearch/json"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "status": "OK",
                    "next_page_token": "page2",
                    "results": [{"place_id": "p1", "name": "Chez Un", "rating": 4.5}]
                }))
                .set_delay(Duration::from_millis(800)),
        )
        .mount(&places)
        .await;
    let server = spawn_server(Some(places.uri())).await;
    let client = reqwest::Client::new();
    let (ann, _) = session(&client, &server, "Ann").await;
    let room: Value = client
        .post(server.url("/api/rooms"))
        .bearer_auth(&ann)
        .json(&json!({ "location": "Paris" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let code = room["id"].as_str().unwrap().to_string();

    let loading = {
        let client = client.clone();
        let url = server.url(&format!("/api/rooms/{code}/restaurants/next"));
        let token = ann.clone();
        tokio::spawn(async move {
            let resp = client.post(url).bearer_auth(token).send().await.unwrap();
            assert!(resp.status().is_success());
            resp.json::<Value>().await.unwrap()
        })
    };

    // the upstream page is still in flight
    tokio::time::sleep(Duration::from_millis(200)).await;
    let resp = client
        .put(server.url(&format!("/api/rooms/{code}/filters")))
        .bearer_auth(&ann)
        .json(&json!({ "filters": { "keyword": "sushi" } }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());

    let page = loading.await.unwrap();
    assert_eq!(page["added"], 0);
    assert_eq!(page["room"]["restaurants"], json!([]));
    assert_eq!(page["room"]["next_page_token"], Value::Null);

    let room: Value = client
        .get(server.url(&format!("/api/rooms/{code}")))
        .bearer_auth(&ann)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(room["restaurants"], json!([]));
    assert_eq!(room["next_page_token"], Value::Null);
    assert_eq!(room["filters"]["keyword"], "sushi");
}
