use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::FutureExt;
use jsonsvr_core::{Interpreter, RouteTable, shared_data};
use jsonsvr_web::AxumServiceAdapter;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower::ServiceExt;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock should be after unix epoch")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{}-{}-{}", prefix, std::process::id(), ts));
    std::fs::create_dir_all(&dir).expect("failed to create temp dir");
    dir
}

fn adapter(service: Value) -> AxumServiceAdapter {
    let table = RouteTable::from_value(&service).expect("service should load");
    AxumServiceAdapter::new(Arc::new(Interpreter::new()), table)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<(&str, &str)>,
) -> (StatusCode, header::HeaderMap, String) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some((content_type, text)) => {
            builder = builder.header(header::CONTENT_TYPE, content_type);
            Body::from(text.to_string())
        }
        None => Body::empty(),
    };
    let resp = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let headers = resp.headers().clone();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn greet_renders_shared_data() {
    let data = shared_data();
    data.lock().unwrap().insert("name".to_string(), json!("Ada"));
    let app = adapter(json!({
        "/greet": { "get": { "responseText": "Hello, ${data.name}" } }
    }))
    .with_data(data)
    .router();

    let (status, headers, body) = send(&app, "GET", "/greet", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Hello, Ada");
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "text/html; charset=utf-8");
}

#[tokio::test]
async fn data_persists_across_requests() {
    let app = adapter(json!({
        "/count": {
            "post": {
                "preScript": "if data.count == () { data.count = 0 } data.count += 1",
                "responseText": "${data.count}"
            }
        }
    }))
    .router();

    send(&app, "POST", "/count", None).await;
    let (_, _, body) = send(&app, "POST", "/count", None).await;
    assert_eq!(body, "2");
}

#[tokio::test]
async fn request_details_reach_templates() {
    let app = adapter(json!({
        "/users/:id": {
            "put": {
                "headers": { "x-user": "${request.params.id}" },
                "responseText": "${req.method} ${req.params.id} ${req.query.tag} ${req.body.name}"
            }
        }
    }))
    .router();

    let (status, headers, body) = send(
        &app,
        "PUT",
        "/users/7?tag=new%20one",
        Some(("application/json", r#"{"name":"Ada"}"#)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "PUT 7 new one Ada");
    assert_eq!(headers.get("x-user").unwrap(), "7");
}

#[tokio::test]
async fn json_response_file_is_served() {
    let dir = unique_temp_dir("jsonsvr-web-json");
    let file = dir.join("items.json");
    std::fs::write(
        &file,
        r#"{ "items": { "$array": { "count": "${request.query.n}", "element": { "id": "${i}" } } } }"#,
    )
    .unwrap();

    let app = adapter(json!({
        "/items": { "get": { "response": file.to_str().unwrap() } }
    }))
    .router();

    let (status, headers, body) = send(&app, "GET", "/items?n=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .starts_with("application/json")
    );
    let parsed: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(parsed, json!({ "items": [{ "id": 0 }, { "id": 1 }] }));

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn missing_response_file_is_404_without_post_script() {
    let data = shared_data();
    let app = adapter(json!({
        "/gone": {
            "get": { "response": "./missing.json", "postScript": "data.post = true" }
        }
    }))
    .with_data(data.clone())
    .router();

    let (status, _, _) = send(&app, "GET", "/gone", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(data.lock().unwrap().get("post").is_none());
}

#[tokio::test]
async fn rules_are_selected_in_order() {
    let app = adapter(json!({
        "/pick": {
            "get": [
                { "condition": "false", "responseText": "first" },
                { "responseText": "second" }
            ]
        }
    }))
    .router();

    let (_, _, body) = send(&app, "GET", "/pick", None).await;
    assert_eq!(body, "second");
}

#[tokio::test]
async fn error_redirect_and_unknown_paths() {
    let app = adapter(json!({
        "/teapot": { "get": { "errorResponse": 418 } },
        "/away": { "*": { "redirect": "/elsewhere?from=${request.path}" } },
        "/nothing": { "get": [{ "condition": "false", "responseText": "x" }] }
    }))
    .router();

    let (status, _, body) = send(&app, "GET", "/teapot", None).await;
    assert_eq!(status, StatusCode::IM_A_TEAPOT);
    assert_eq!(body, "I'm a teapot");

    let (status, headers, _) = send(&app, "DELETE", "/away", None).await;
    assert_eq!(status, StatusCode::FOUND);
    assert_eq!(headers.get(header::LOCATION).unwrap(), "/elsewhere?from=/away");

    let (status, _, _) = send(&app, "GET", "/nothing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "GET", "/not-defined", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = send(&app, "POST", "/teapot", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_script_can_change_the_status() {
    let app = adapter(json!({
        "/created": {
            "post": { "responseText": "ok", "postScript": "response.status = 201" }
        }
    }))
    .router();

    let (status, _, body) = send(&app, "POST", "/created", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn index_page_served_when_no_root_route() {
    let app = adapter(json!({ "/x": { "get": { "responseText": "x" } } }))
        .with_index_page(Some("<h1>index</h1>".to_string()))
        .router();
    let (status, _, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "<h1>index</h1>");

    let app = adapter(json!({ "/": { "get": { "responseText": "root" } } }))
        .with_index_page(Some("<h1>index</h1>".to_string()))
        .router();
    let (_, _, body) = send(&app, "GET", "/", None).await;
    assert_eq!(body, "root");
}

#[tokio::test]
async fn reload_swaps_the_route_table() {
    let adapter = adapter(json!({ "/v": { "get": { "responseText": "one" } } })).with_reloader(|| {
        async { RouteTable::from_value(&json!({ "/v": { "get": { "responseText": "two" } } })) }
            .boxed()
    });
    let app = adapter.clone().router();

    let (_, _, body) = send(&app, "GET", "/v", None).await;
    assert_eq!(body, "one");

    let (status, _, body) = send(&app, "GET", "/_reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(serde_json::from_str::<Value>(&body).unwrap(), json!({ "success": true }));

    let (_, _, body) = send(&app, "GET", "/v", None).await;
    assert_eq!(body, "two");
}

#[tokio::test]
async fn failed_reload_keeps_previous_table() {
    let adapter = adapter(json!({ "/v": { "get": { "responseText": "one" } } }))
        .with_reloader(|| async { RouteTable::from_json_str("{ not json") }.boxed());
    let app = adapter.router();

    let (_, _, body) = send(&app, "GET", "/_reload", None).await;
    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["success"], json!(false));
    assert!(reply["message"].is_string());

    let (_, _, body) = send(&app, "GET", "/v", None).await;
    assert_eq!(body, "one");
}

#[tokio::test]
async fn stop_notifies_shutdown() {
    let adapter = adapter(json!({}));
    let signal = adapter.shutdown_signal();
    let app = adapter.router();

    let (status, _, body) = send(&app, "GET", "/_stop", None).await;
    assert_eq!(status, StatusCode::OK);
    let reply: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(reply["success"], json!(true));
    assert!(reply["time"].is_string());

    tokio::time::timeout(std::time::Duration::from_secs(1), signal.notified())
        .await
        .expect("shutdown should be signalled");
}

#[tokio::test]
async fn access_log_keeps_bodies_intact() {
    let app = adapter(json!({
        "/echo": { "post": { "responseText": "${request.body}" } }
    }))
    .with_access_log(true)
    .router();

    let (status, _, body) = send(&app, "POST", "/echo", Some(("text/plain", "ping"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ping");
}
