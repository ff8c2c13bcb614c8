//! HTTP integration tests for the Therapaw API
//!
//! Full handler dispatch through `build_router` + `oneshot`. The vision model
//! and chat agent are in-process fakes; sessions run without a durable store
//! unless a test wires one in.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::json;
use therapaw_core::session::{DurableStore, SpacesStore};
use therapaw_core::{
    ChatAgent, ChatError, ChatMessage, MemoryTier, SessionCodec, SessionManager, SessionRecord,
    TherapawConfig, VisionError, VisionModel,
};
use therapaw_server::http::{build_router, HttpState};
use tower::ServiceExt;

const BOUNDARY: &str = "therapaw-test-boundary";

struct FakeVision;

#[async_trait]
impl VisionModel for FakeVision {
    async fn evaluate(&self, image_data_url: &str) -> Result<String, VisionError> {
        assert!(image_data_url.starts_with("data:image/"));
        Ok("PATIENT PROFILE:\n- Breed/Mix: Beagle\n\nPROGNOSIS: excellent".to_string())
    }

    fn name(&self) -> &str {
        "fake-vision"
    }
}

/// Records the report it was grounded in.
#[derive(Default)]
struct RecordingAgent {
    reports: Mutex<Vec<String>>,
}

#[async_trait]
impl ChatAgent for RecordingAgent {
    async fn reply(&self, report: &str, history: &[ChatMessage]) -> Result<String, ChatError> {
        self.reports.lock().unwrap().push(report.to_string());
        Ok(format!("{} turns considered", history.len()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn make_state(durable: Option<Arc<dyn DurableStore>>, agent: Arc<RecordingAgent>) -> Arc<HttpState> {
    Arc::new(HttpState {
        sessions: Arc::new(SessionManager::new(
            durable,
            Arc::new(MemoryTier::new()),
            SessionCodec::default(),
        )),
        vision: Some(Arc::new(FakeVision)),
        chat: Some(agent),
        config: TherapawConfig::default(),
    })
}

fn memory_spaces() -> Arc<dyn DurableStore> {
    let op = opendal::Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    Arc::new(SpacesStore::with_operator(op, "sessions/"))
}

fn multipart_body(field: &str, content_type: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        format!(
            "Content-Disposition: form-data; name=\"{}\"; filename=\"dog.png\"\r\n",
            field
        )
        .as_bytes(),
    );
    body.extend_from_slice(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn analyze_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

async fn read_json(resp: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn get_session(state: Arc<HttpState>, id: &str) -> (StatusCode, serde_json::Value) {
    let req = Request::builder()
        .method("GET")
        .uri(format!("/api/session/{}", id))
        .body(Body::empty())
        .unwrap();
    let resp = build_router(state).oneshot(req).await.unwrap();
    let status = resp.status();
    (status, read_json(resp).await)
}

// ===========================================================================
// TEST 1: GET /version: returns version and protocol
// ===========================================================================
#[tokio::test]
async fn test_version_endpoint_integration() {
    let app = build_router(make_state(None, Arc::default()));

    let req = Request::builder()
        .method("GET")
        .uri("/version")
        .body(Body::empty())
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = read_json(resp).await;
    assert!(json["version"].is_string());
    assert_eq!(json["protocol"], "therapaw/1");
}

// ===========================================================================
// TEST 2: GET /health: reports durable tier when Spaces is wired in
// ===========================================================================
#[tokio::test]
async fn test_health_reports_storage() {
    let app = build_router(make_state(Some(memory_spaces()), Arc::default()));

    let req = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let json = read_json(resp).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["storage"]["durable"], true);
    assert_eq!(json["vision"], true);
}

// ===========================================================================
// TEST 3: GET /api/session/:id: unknown id is a 404
// ===========================================================================
#[tokio::test]
async fn test_unknown_session_404() {
    let state = make_state(None, Arc::default());
    let (status, body) = get_session(state, "session-1-deadbeef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "Session not found" }));
}

// ===========================================================================
// TEST 4: POST /api/analyze without the image field: 400
// ===========================================================================
#[tokio::test]
async fn test_analyze_without_image_field() {
    let app = build_router(make_state(None, Arc::default()));

    let resp = app
        .oneshot(analyze_request(multipart_body("photo", "image/png", b"\x89PNG")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(resp).await["error"], "No image provided");
}

// ===========================================================================
// TEST 5: analyze → session, no durable store: the id carries the record
// ===========================================================================
#[tokio::test]
async fn test_analyze_then_fetch_self_contained() {
    let state = make_state(None, Arc::default());
    let app = build_router(state.clone());

    let resp = app
        .oneshot(analyze_request(multipart_body("image", "image/png", b"\x89PNG\r\n")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = read_json(resp).await;
    assert_eq!(json["persistence"], "memory");

    let id = json["sessionId"].as_str().unwrap().to_string();
    assert!(id.starts_with("session-"));

    // Simulate a restart: the memory tier is gone, the id still resolves
    state.sessions.memory().clear();

    let (status, session) = get_session(state, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert!(session["analysis"]
        .as_str()
        .unwrap()
        .contains("PROGNOSIS: excellent"));
    assert_eq!(session["imageUrl"], "data:image/png;base64,iVBORw0K");
    assert!(session["timestamp"].is_string());
}

// ===========================================================================
// TEST 6: analyze → session with durable store: reference-form id
// ===========================================================================
#[tokio::test]
async fn test_analyze_then_fetch_durable() {
    let state = make_state(Some(memory_spaces()), Arc::default());

    let resp = build_router(state.clone())
        .oneshot(analyze_request(multipart_body("image", "image/jpeg", b"\xff\xd8\xff")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let json = read_json(resp).await;
    assert_eq!(json["persistence"], "durable");
    assert!(json.get("warning").is_none());

    let id = json["sessionId"].as_str().unwrap().to_string();
    assert!(!id.contains('_'), "durable ids are plain keys");
    assert!(state.sessions.memory().is_empty());

    let (status, session) = get_session(state, &id).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(session["imageUrl"], "data:image/jpeg;base64,/9j/");
}

// ===========================================================================
// TEST 7: POST /api/chat grounded in a stored session
// ===========================================================================
#[tokio::test]
async fn test_chat_with_session_id() {
    let agent = Arc::new(RecordingAgent::default());
    let state = make_state(None, agent.clone());
    state
        .sessions
        .store("session-7-abc", &SessionRecord::new("Mild separation anxiety", "img"))
        .await;

    let payload = json!({
        "messages": [
            { "role": "user", "content": "Why does she chew shoes?" },
            { "role": "assistant", "content": "Boredom, mostly." },
            { "role": "user", "content": "What should I do?" }
        ],
        "sessionId": "session-7-abc"
    });

    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let resp = build_router(state).oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(read_json(resp).await["message"], "3 turns considered");
    assert_eq!(
        *agent.reports.lock().unwrap(),
        vec!["Mild separation anxiety".to_string()]
    );
}

// ===========================================================================
// TEST 8: POST /api/chat with no report to ground in: 400
// ===========================================================================
#[tokio::test]
async fn test_chat_without_report() {
    let app = build_router(make_state(None, Arc::default()));

    let payload = json!({ "messages": [{ "role": "user", "content": "hello" }] });
    let req = Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap();

    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// ===========================================================================
// TEST 9: encoded path separators cannot escape the session prefix
// ===========================================================================
#[tokio::test]
async fn test_session_id_cannot_escape_prefix() {
    let op = opendal::Operator::new(opendal::services::Memory::default())
        .unwrap()
        .finish();
    let outside = SessionRecord::new("not a session", "img");
    op.write("other.json", serde_json::to_vec(&outside).unwrap())
        .await
        .unwrap();
    let spaces: Arc<dyn DurableStore> = Arc::new(SpacesStore::with_operator(op, "sessions/"));
    let state = make_state(Some(spaces), Arc::default());

    let (status, body) = get_session(state, "..%2Fother").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Session not found");
}
