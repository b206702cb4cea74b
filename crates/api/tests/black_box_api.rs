use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{Value, json};

use coursegen_ai::{ContentGenerator, GenerationRequest, InteractionType, UpstreamError};
use coursegen_core::{CourseId, GenerationStatus, ManualClock};
use coursegen_infra::content::{ContentStore, StatusTarget};
use coursegen_infra::{GenerationRuntime, RuntimeConfig, RuntimeDeps};

/// Canned answers for every interaction the default workflow performs.
struct CannedGenerator;

#[async_trait]
impl ContentGenerator for CannedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, UpstreamError> {
        let text = match request.interaction {
            InteractionType::Outline => {
                r#"{"sections": [{"title": "Basics", "articles": [{"title": "Ownership"}, {"title": "Borrowing"}]}]}"#
            }
            InteractionType::ArticleContent => "# Lesson\n\nValues have a single owner.",
            InteractionType::Enrichment => {
                r#"{"summary": "Ownership", "key_takeaways": ["one owner"], "further_reading": []}"#
            }
            other => return Err(UpstreamError::message(format!("unexpected {other}"))),
        };
        Ok(text.to_string())
    }
}

struct TestServer {
    base_url: String,
    runtime: Arc<GenerationRuntime>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        let clock = ManualClock::starting_now();
        let deps = RuntimeDeps::in_memory(Arc::new(CannedGenerator), clock);
        let config = RuntimeConfig {
            worker_concurrency: 2,
            poll_interval: Duration::from_millis(10),
            ..RuntimeConfig::default()
        };
        let runtime = Arc::new(GenerationRuntime::new(&config, deps));
        runtime.start();

        // Same router as prod, bound to an ephemeral port.
        let app = coursegen_api::app::build_app(runtime.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            runtime,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_course(client: &reqwest::Client, srv: &TestServer) -> String {
    let res = client
        .post(srv.url("/courses"))
        .json(&json!({
            "title": "Rust for Operators",
            "description": "Running Rust services in production",
            "level": "beginner",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    body["id"].as_str().unwrap().to_string()
}

async fn workflow_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    course_id: &str,
    status: &str,
) -> Value {
    // Workers run in the background; poll until the course settles.
    for _ in 0..200 {
        let res = client
            .get(srv.url(&format!("/workflows/{course_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("course {course_id} never reached {status}");
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn course_creation_validates_and_reads_back() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/courses"))
        .json(&json!({ "title": "  ", "level": "beginner" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    let id = create_course(&client, &srv).await;
    let res = client.get(srv.url(&format!("/courses/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["title"], "Rust for Operators");
    assert_eq!(body["generation_status"], "PENDING");

    let res = client.get(srv.url("/courses/not-a-uuid")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn workflow_runs_to_completion_in_the_background() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let course_id = create_course(&client, &srv).await;

    let res = client
        .post(srv.url("/workflows"))
        .json(&json!({ "course_id": course_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["job_type"], "outline");
    let job_id = body["job_id"].as_str().unwrap().to_string();

    let status = workflow_eventually(&client, &srv, &course_id, "COMPLETED").await;
    assert_eq!(status["articles_total"], 2);
    assert_eq!(status["articles_completed"], 2);
    assert_eq!(status["articles_failed"], 0);

    let res = client.get(srv.url(&format!("/jobs/{job_id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let job: Value = res.json().await.unwrap();
    assert_eq!(job["state"], "completed");

    // The last job is acked just after it completes the course.
    let mut stats = Value::Null;
    for _ in 0..200 {
        let res = client.get(srv.url("/jobs/stats")).send().await.unwrap();
        stats = res.json().await.unwrap();
        if stats["queue"]["completed"] == 5 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(stats["queue"]["completed"], 5);
    assert_eq!(stats["queue"]["failed"], 0);
    assert!(stats["workers"]["processed"].as_u64().unwrap() >= 4);

    let res = client
        .get(srv.url("/jobs?state=completed&limit=2"))
        .send()
        .await
        .unwrap();
    let jobs: Value = res.json().await.unwrap();
    assert_eq!(jobs.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn workflow_errors_map_to_status_codes() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/workflows"))
        .json(&json!({ "course_id": CourseId::new().to_string() }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(srv.url("/workflows/nope")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_id");

    let course_id = create_course(&client, &srv).await;
    let id: CourseId = course_id.parse().unwrap();
    srv.runtime
        .content()
        .set_status(StatusTarget::Course(id), GenerationStatus::InProgress, None)
        .await
        .unwrap();

    let res = client
        .post(srv.url("/workflows"))
        .json(&json!({ "course_id": course_id }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "conflict");
}

#[tokio::test]
async fn quiz_requests_are_validated_before_enqueueing() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let course_id = create_course(&client, &srv).await;

    let res = client
        .post(srv.url(&format!("/courses/{course_id}/quizzes")))
        .json(&json!({ "kind": "pop_quiz" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "invalid_quiz_kind");

    let res = client
        .post(srv.url(&format!("/courses/{course_id}/quizzes")))
        .json(&json!({ "kind": "article" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");

    // No articles yet, so the course-level bank has nothing to draw from.
    let res = client
        .post(srv.url(&format!("/courses/{course_id}/quizzes")))
        .json(&json!({ "kind": "final_bank" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn rate_limits_can_be_listed_and_cleared() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    srv.runtime
        .rate_limits()
        .set("openai", "gpt-4o-mini", Some(30))
        .await;

    let res = client.get(srv.url("/rate-limits")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let active: Value = res.json().await.unwrap();
    let active = active.as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["model"], "gpt-4o-mini");
    assert_eq!(active[0]["is_rate_limited"], true);
    assert_eq!(active[0]["seconds_remaining"], 30);

    let res = client
        .delete(srv.url("/rate-limits/openai/gpt-4o-mini"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url("/rate-limits")).send().await.unwrap();
    let active: Value = res.json().await.unwrap();
    assert!(active.as_array().unwrap().is_empty());
}
