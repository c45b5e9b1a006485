use std::net::SocketAddr;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use serde_json::{Value, json};
use tower::ServiceExt;

use readgrade_core::Config;
use readgrade_web::{AppState, ServerConfig, router};

const ARTICLE: &str = r#"<!doctype html>
<html>
<head><title>Budgeting Basics for Students</title></head>
<body>
  <nav><a href="/">Home</a> <a href="/news">News</a> <a href="/about">About</a></nav>
  <article>
    <h1>Budgeting Basics for Students</h1>
    <p>A budget is a plan for how you will spend and save the money you earn each month.</p>
    <p>Start by writing down every source of income, including part-time jobs, allowances, and gifts from family.</p>
    <p>Next, list your fixed costs, such as a phone bill, and your flexible costs, such as snacks and movies.</p>
    <p>Compare the two totals, and decide how much you can move into savings before the month begins.</p>
    <p>Checking your plan every week helps you notice small leaks before they turn into large problems.</p>
  </article>
  <footer>Copyright 2024 Example Finance Lessons</footer>
</body>
</html>"#;

async fn spawn_fixture_server() -> String {
    let app = Router::new().route("/lessons/budgeting-basics", get(|| async { Html(ARTICLE) }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn app(config: Config) -> Router {
    let state = AppState::from_config(config).unwrap();
    router(state, &ServerConfig::default())
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn root_and_health() {
    let app = app(Config::default());

    let (status, body) = send(&app, get_request("/")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "running");
    assert!(body["message"].as_str().unwrap().contains("Readability Analyzer"));
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = send(&app, get_request("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "healthy" }));
}

#[tokio::test]
async fn empty_url_list_is_rejected() {
    let app = app(Config::default());
    let (status, body) = send(&app, post_json("/api/analyze-urls", json!({ "urls": [] }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"], "validation_error");
}

#[tokio::test]
async fn too_many_urls_are_rejected() {
    let config = Config {
        max_urls_per_request: 3,
        ..Config::default()
    };
    let app = app(config);
    let urls: Vec<String> = (0..4).map(|i| format!("https://example.com/a/{i}")).collect();
    let (status, body) = send(&app, post_json("/api/analyze-urls", json!({ "urls": urls }))).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["message"].as_str().unwrap().contains("Maximum 3 URLs"));
}

#[tokio::test]
async fn unknown_progress_is_not_found() {
    let app = app(Config::default());
    let (status, body) = send(&app, get_request("/api/progress/nope")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "not_found");

    let response = app
        .clone()
        .oneshot(get_request("/api/progress/nope/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analyzes_fixture_pages_end_to_end() {
    let base = spawn_fixture_server().await;
    let app = app(Config::default());

    let good = format!("{base}/lessons/budgeting-basics");
    let missing = format!("{base}/lessons/missing-page");
    let (status, body) = send(
        &app,
        post_json(
            "/api/analyze-urls",
            json!({ "urls": [good, missing], "request_id": "fixture-batch" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["request_id"], "fixture-batch");

    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 2);

    let article = &results[0];
    assert_eq!(article["url"], good);
    assert_eq!(article["extraction_success"], true);
    assert_eq!(article["title"], "Budgeting Basics for Students");
    assert_eq!(article["extraction_method"], "primary");
    let metrics = &article["metrics"];
    assert!(metrics["word_count"].as_u64().unwrap() > 50);
    assert!(metrics["sentence_count"].as_u64().unwrap() >= 5);
    assert!(metrics["consensus"].as_f64().unwrap() > 0.0);

    let failed = &results[1];
    assert_eq!(failed["extraction_success"], false);
    assert!(failed["metrics"].is_null());
    assert!(!failed["error"].as_str().unwrap().is_empty());

    let summary = &body["summary"];
    assert_eq!(summary["total_urls"], 2);
    assert_eq!(summary["successful"], 1);
    assert_eq!(summary["failed"], 1);
    assert_eq!(summary["average_grade_level"], metrics["consensus"]);

    let (status, progress) = send(&app, get_request("/api/progress/fixture-batch")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(progress["status"], "completed");
    assert_eq!(progress["processed_count"], 2);
    assert_eq!(progress["successful_count"], 1);
    assert_eq!(progress["failed_count"], 1);
}

#[tokio::test]
async fn progress_stream_ends_after_completed_snapshot() {
    let base = spawn_fixture_server().await;
    let app = app(Config::default());

    let url = format!("{base}/lessons/budgeting-basics");
    let (status, _) = send(
        &app,
        post_json(
            "/api/analyze-urls",
            json!({ "urls": [url], "request_id": "streamed" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .clone()
        .oneshot(get_request("/api/progress/streamed/stream"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/event-stream"
    );

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert_eq!(text.matches("event: progress").count(), 1);
    assert!(text.contains(r#""status":"completed""#));
}

#[tokio::test]
async fn reusing_a_finished_request_id_starts_a_new_batch() {
    let base = spawn_fixture_server().await;
    let app = app(Config::default());
    let url = format!("{base}/lessons/budgeting-basics");

    for _ in 0..2 {
        let (status, body) = send(
            &app,
            post_json("/api/analyze-urls", json!({ "urls": [url], "request_id": "again" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["summary"]["successful"], 1);
    }
}
