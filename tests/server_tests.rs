//! HTTP 路由集成测试：直接调用 `handle_request`，不占用端口

mod common;

use std::sync::Arc;

use common::*;
use gradewise_lib::config::AppConfig;
use gradewise_lib::database::Database;
use gradewise_lib::grading::GradeSubmissionRequest;
use gradewise_lib::server::{handle_request, AppState, INSTRUCTOR_HEADER};
use hyper::{Body, Method, Request, StatusCode};
use serde_json::{json, Value};

struct TestApp {
    state: Arc<AppState>,
    _dir: tempfile::TempDir,
}

fn app(llm_base_url: &str) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.llm = openai_llm_config(llm_base_url);
    config.server.max_body_bytes = 64 * 1024;
    let db = Arc::new(Database::new(&dir.path().join("server.db")).unwrap());
    TestApp {
        state: Arc::new(gradewise_lib::build_state(&config, db)),
        _dir: dir,
    }
}

async fn call(
    app: &TestApp,
    method: Method,
    uri: &str,
    instructor: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = instructor {
        builder = builder.header(INSTRUCTOR_HEADER, id);
    }
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let response = handle_request(app.state.clone(), builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn finalize_body(final_score: Option<f64>) -> Value {
    json!({
        "questionFileName": "question.docx",
        "studentResponseFileName": "answer.txt",
        "rubric": "3 points for inputs, 3 points for outputs, 4 points for chlorophyll.",
        "maxScore": 10,
        "aiResult": {
            "score": 6.5,
            "feedback": "Good start",
            "justification": "Inputs correct"
        },
        "finalScore": final_score,
        "instructorComments": "Discussed in class"
    })
}

#[tokio::test]
async fn test_healthz_and_unknown_routes() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = call(&app, Method::GET, "/healthz", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));

    let (status, body) = call(&app, Method::GET, "/nope", None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    let (status, _) = call(&app, Method::GET, "/api/grade", None, None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let (status, _) = call(&app, Method::PUT, "/api/graded-tests", Some("alice"), None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_metrics_endpoint_is_prometheus_text() {
    let app = app("http://127.0.0.1:9");
    let response = handle_request(
        app.state.clone(),
        Request::builder()
            .method(Method::GET)
            .uri("/metrics")
            .body(Body::empty())
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(
        hyper::body::to_bytes(response.into_body())
            .await
            .unwrap()
            .to_vec(),
    )
    .unwrap();
    assert!(text.contains("# TYPE gradewise_http_requests_total counter"));
    assert!(text.contains("gradewise_graded_tests_stored 0"));
}

#[tokio::test]
async fn test_storage_routes_require_instructor_header() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = call(&app, Method::GET, "/api/graded-tests", None, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing x-instructor-id header.");

    let (status, _) = call(
        &app,
        Method::POST,
        "/api/graded-tests",
        Some("   "),
        Some(finalize_body(None)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_save_list_recent_delete_flow() {
    let app = app("http://127.0.0.1:9");

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/graded-tests",
        Some("alice@example.com"),
        Some(finalize_body(Some(8.0))),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["finalScore"], 8.0);
    assert_eq!(body["data"]["aiScore"], 6.5);
    let first_id = body["data"]["id"].as_str().unwrap().to_string();

    for _ in 0..3 {
        let (status, _) = call(
            &app,
            Method::POST,
            "/api/graded-tests",
            Some("alice@example.com"),
            Some(finalize_body(None)),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let (status, body) = call(
        &app,
        Method::GET,
        "/api/graded-tests",
        Some("alice@example.com"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 4);

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/graded-tests/recent",
        Some("alice@example.com"),
        None,
    )
    .await;
    assert_eq!(body["data"]["total"], 4);
    assert_eq!(body["data"]["tests"].as_array().unwrap().len(), 3);

    let (_, body) = call(
        &app,
        Method::GET,
        "/api/graded-tests/recent?limit=1",
        Some("alice@example.com"),
        None,
    )
    .await;
    assert_eq!(body["data"]["tests"].as_array().unwrap().len(), 1);

    // 其他教师看不到也删不掉
    let uri = format!("/api/graded-tests/{}", first_id);
    let (status, _) = call(&app, Method::GET, &uri, Some("bob@example.com"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, Method::DELETE, &uri, Some("bob@example.com"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(&app, Method::GET, &uri, Some("alice@example.com"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["instructorComments"], "Discussed in class");

    let (status, _) = call(&app, Method::DELETE, &uri, Some("alice@example.com"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, Method::DELETE, &uri, Some("alice@example.com"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        Method::DELETE,
        "/api/graded-tests",
        Some("alice@example.com"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["deleted"], 3);
}

#[tokio::test]
async fn test_invalid_override_is_unprocessable() {
    let app = app("http://127.0.0.1:9");
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/graded-tests",
        Some("alice"),
        Some(finalize_body(Some(11.0))),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(
        body["error"],
        "Please enter a valid score between 0 and 10."
    );
}

#[tokio::test]
async fn test_bad_json_and_oversized_bodies() {
    let app = app("http://127.0.0.1:9");

    let response = handle_request(
        app.state.clone(),
        Request::builder()
            .method(Method::POST)
            .uri("/api/grade")
            .body(Body::from("{not json"))
            .unwrap(),
    )
    .await
    .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let big = json!({ "rubric": "x".repeat(70 * 1024) });
    let (status, _) = call(&app, Method::POST, "/api/grade", None, Some(big)).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_grade_route_returns_action_result() {
    let mut server = mockito::Server::new_async().await;
    let _mock = server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(openai_completion(
            r#"{"score": 9, "feedback": "Thorough", "justification": "All rubric items"}"#,
        ))
        .create_async()
        .await;
    let app = app(&server.url());

    let request = GradeSubmissionRequest {
        question_file: Some(docx_file("q.docx", &["Describe the water cycle."])),
        student_response_file: Some(text_file("a.txt", "Evaporation, condensation, precipitation.")),
        expected_answer_file: None,
        rubric: Some("Name all three stages of the water cycle in order.".into()),
        max_score: Some(10.0),
    };
    let (status, body) = call(
        &app,
        Method::POST,
        "/api/grade",
        None,
        Some(serde_json::to_value(&request).unwrap()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["score"], 9.0);

    let (status, body) = call(
        &app,
        Method::POST,
        "/api/grade",
        None,
        Some(json!({ "rubric": "too short" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert!(body["details"]["questionFile"].is_array());
}
