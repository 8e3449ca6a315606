//! Mock blocklist and threat-intelligence API

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

const DEFAULT_AS_NUMBER: &str = "3356";

/// Mutable state of the threat-intelligence side
#[derive(Debug, Default)]
pub struct MockStore {
    instance_id: Option<Uuid>,
    report_num: u64,
}

impl MockStore {
    /// Issue the instance id on first call, return the same one afterwards
    pub fn register(&mut self) -> Uuid {
        *self.instance_id.get_or_insert_with(Uuid::new_v4)
    }

    pub fn report(&mut self) -> u64 {
        self.report_num += 1;
        self.report_num
    }

    pub fn reset(&mut self) {
        self.instance_id = None;
        self.report_num = 0;
    }

    pub fn instance_id(&self) -> Option<Uuid> {
        self.instance_id
    }

    pub fn report_num(&self) -> u64 {
        self.report_num
    }
}

#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Second entry of the ASN blocklist
    pub as_number: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            as_number: DEFAULT_AS_NUMBER.to_string(),
        }
    }
}

impl MockConfig {
    pub fn from_env() -> Self {
        Self {
            as_number: std::env::var("AS_NUMBER").unwrap_or_else(|_| DEFAULT_AS_NUMBER.to_string()),
        }
    }
}

struct MockState {
    config: MockConfig,
    store: RwLock<MockStore>,
}

#[derive(Debug, Serialize)]
struct ApiResponse<T: Serialize> {
    result: &'static str,
    data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse { result: "ok", data })
}

pub struct MockServer {
    state: Arc<MockState>,
}

impl MockServer {
    pub fn new(config: MockConfig) -> Self {
        Self {
            state: Arc::new(MockState {
                config,
                store: RwLock::new(MockStore::default()),
            }),
        }
    }

    pub fn router(&self) -> Router {
        let lists = Router::new()
            .route("/ip", get(ip_handler))
            .route("/rdns", get(rdns_handler))
            .route("/asn", get(asn_handler))
            .route("/user_agent", get(user_agent_handler))
            .route("/uri", get(uri_handler));

        let bunkernet = Router::new()
            .route("/ping", get(ping_handler))
            .route("/register", post(register_handler))
            .route("/report", post(report_handler))
            .route("/db", get(db_handler))
            .route("/instance_id", get(instance_id_handler))
            .route("/report_num", get(report_num_handler))
            .route("/reset", post(reset_handler));

        Router::new()
            .nest("/list", lists)
            .nest("/bunkernet", bunkernet)
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Start the mock service
    pub async fn serve(self, addr: SocketAddr) -> anyhow::Result<()> {
        info!("Mock API starting on http://{}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router()).await?;

        Ok(())
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new(MockConfig::default())
    }
}

pub async fn serve(addr: SocketAddr, config: MockConfig) -> anyhow::Result<()> {
    MockServer::new(config).serve(addr).await
}

// ============================================================================
// Blocklists
// ============================================================================

async fn ip_handler() -> &'static str {
    "192.168.0.254\n10.0.0.0/8\n127.0.0.0/24"
}

async fn rdns_handler() -> &'static str {
    ".example.com\n.example.org\n.bw-services"
}

async fn asn_handler(State(state): State<Arc<MockState>>) -> String {
    format!("1234\n{}\n5678", state.config.as_number)
}

async fn user_agent_handler() -> &'static str {
    "BunkerBot\nCensysInspect\nShodanInspect\nZmEu\nmasscan"
}

async fn uri_handler() -> &'static str {
    "/admin\n/login"
}

// ============================================================================
// Threat intelligence
// ============================================================================

async fn ping_handler() -> impl IntoResponse {
    ok("pong")
}

async fn register_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    let id = state.store.write().await.register();
    debug!("Registered instance {}", id);
    ok(id.to_string())
}

async fn report_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    let count = state.store.write().await.report();
    debug!("Report #{} acknowledged", count);
    ok("Report acknowledged.")
}

async fn db_handler() -> impl IntoResponse {
    ok(Vec::<String>::new())
}

async fn instance_id_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    match state.store.read().await.instance_id() {
        Some(id) => (StatusCode::OK, ok(id.to_string())).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse {
                result: "error",
                data: "Instance ID not found.",
            }),
        )
            .into_response(),
    }
}

async fn report_num_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    ok(state.store.read().await.report_num())
}

async fn reset_handler(State(state): State<Arc<MockState>>) -> impl IntoResponse {
    state.store.write().await.reset();
    ok("Reset done.")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::Value;
    use tower::ServiceExt;

    async fn call(app: &Router, method: Method, uri: &str) -> (StatusCode, String) {
        let request = Request::builder().method(method).uri(uri).body(Body::empty()).unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    async fn call_json(app: &Router, method: Method, uri: &str) -> (StatusCode, Value) {
        let (status, body) = call(app, method, uri).await;
        (status, serde_json::from_str(&body).unwrap())
    }

    #[test]
    fn test_store_register_is_idempotent() {
        let mut store = MockStore::default();
        let first = store.register();
        assert_eq!(store.register(), first);
        store.reset();
        assert!(store.instance_id().is_none());
        assert_ne!(store.register(), first);
    }

    #[tokio::test]
    async fn test_blocklists() {
        let app = MockServer::new(MockConfig {
            as_number: "64512".to_string(),
        })
        .router();

        assert_eq!(
            call(&app, Method::GET, "/list/ip").await,
            (StatusCode::OK, "192.168.0.254\n10.0.0.0/8\n127.0.0.0/24".to_string())
        );
        assert_eq!(call(&app, Method::GET, "/list/asn").await.1, "1234\n64512\n5678");
        assert_eq!(call(&app, Method::GET, "/list/uri").await.1, "/admin\n/login");
        assert_eq!(call(&app, Method::GET, "/list/rdns").await.1, ".example.com\n.example.org\n.bw-services");
        assert!(call(&app, Method::GET, "/list/user_agent").await.1.starts_with("BunkerBot\n"));
    }

    #[tokio::test]
    async fn test_default_as_number() {
        let app = MockServer::default().router();
        assert_eq!(call(&app, Method::GET, "/list/asn").await.1, "1234\n3356\n5678");
    }

    #[tokio::test]
    async fn test_register_report_reset_cycle() {
        let app = MockServer::default().router();

        let (status, body) = call_json(&app, Method::GET, "/bunkernet/instance_id").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["result"], "error");
        assert_eq!(body["data"], "Instance ID not found.");

        let (_, registered) = call_json(&app, Method::POST, "/bunkernet/register").await;
        let id = registered["data"].as_str().unwrap().to_string();
        assert!(Uuid::parse_str(&id).is_ok());
        let (_, again) = call_json(&app, Method::POST, "/bunkernet/register").await;
        assert_eq!(again["data"], id.as_str());

        let (status, body) = call_json(&app, Method::GET, "/bunkernet/instance_id").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], id.as_str());

        for _ in 0..3 {
            let (_, body) = call_json(&app, Method::POST, "/bunkernet/report").await;
            assert_eq!(body["data"], "Report acknowledged.");
        }
        assert_eq!(call_json(&app, Method::GET, "/bunkernet/report_num").await.1["data"], 3);

        let (_, body) = call_json(&app, Method::POST, "/bunkernet/reset").await;
        assert_eq!(body["data"], "Reset done.");
        assert_eq!(call_json(&app, Method::GET, "/bunkernet/report_num").await.1["data"], 0);
        assert_eq!(call_json(&app, Method::GET, "/bunkernet/instance_id").await.0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_ping_and_db() {
        let app = MockServer::default().router();
        let (_, ping) = call_json(&app, Method::GET, "/bunkernet/ping").await;
        assert_eq!(ping, serde_json::json!({"result": "ok", "data": "pong"}));
        let (_, db) = call_json(&app, Method::GET, "/bunkernet/db").await;
        assert_eq!(db, serde_json::json!({"result": "ok", "data": []}));
    }

    #[tokio::test]
    async fn test_wrong_method_is_rejected() {
        let app = MockServer::default().router();
        assert_eq!(call(&app, Method::GET, "/bunkernet/register").await.0, StatusCode::METHOD_NOT_ALLOWED);
    }
}
