use anyhow::Context as _;
use axum::{
    Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    middleware::from_fn,
    response::Json,
    routing::{get, post},
};
use serde_json::{Value, json};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use swarm_flow::{
    CheckpointStorage, InMemorySessionStorage, ModelClient, PostgresSessionStorage,
    RigModelClient, SwarmError, SwarmRunner, ThreadState, ThreadStorage,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::{
    agents::build_swarm,
    config::Config,
    models::{AskRequest, AskResponse, SeedData},
    store::{InMemoryRecordStore, PostgresRecordStore, RecordStore},
    telemetry::correlation_id_middleware,
};

const BUNDLED_SEED: &str = include_str!("../data/seed.json");

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<Value>)>;
type ApiError = (StatusCode, Json<Value>);

fn bad_request_error(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn not_found_error(message: &str, id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": message,
            "thread_id": id
        })),
    )
}

fn internal_error(message: &str, details: &str) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": message,
            "details": details
        })),
    )
}

/// Map a failed turn to a status code and JSON body.
fn swarm_error(e: &SwarmError, thread_id: Option<&str>) -> ApiError {
    let status = match e {
        SwarmError::ThreadNotFound(id) => return not_found_error("Thread not found", id),
        SwarmError::InvalidToolArguments { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        SwarmError::StepLimitExceeded { .. } => StatusCode::BAD_GATEWAY,
        SwarmError::Upstream(_) => StatusCode::SERVICE_UNAVAILABLE,
        SwarmError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({
            "error": e.to_string(),
            "thread_id": thread_id
        })),
    )
}

#[derive(Clone)]
pub struct AppState {
    pub runner: SwarmRunner,
    pub threads: Arc<dyn ThreadStorage>,
}

pub async fn create_app(config: &Config) -> anyhow::Result<Router> {
    let app_state = create_app_state(config).await?;
    Ok(build_router(app_state))
}

/// Wire the production dependencies: the OpenRouter model client, and Postgres when
/// `DATABASE_URL` is set, in-memory stores otherwise.
pub async fn create_app_state(config: &Config) -> anyhow::Result<AppState> {
    let api_key = config
        .openrouter_api_key
        .as_deref()
        .context("OPENROUTER_API_KEY not set")?;
    let model: Arc<dyn ModelClient> = Arc::new(RigModelClient::new(api_key, config.model.clone()));

    match &config.database_url {
        Some(database_url) => {
            info!("Using PostgreSQL record and session storage");
            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .context("failed to connect to PostgreSQL")?;

            let sessions = Arc::new(PostgresSessionStorage::from_pool(pool.clone()).await?);
            let records = PostgresRecordStore::new(pool, config.collections.clone()).await?;
            if config.seed_file.is_some() {
                records.seed(&load_seed(config).await?).await?;
            }

            build_app_state(Arc::new(records), model, sessions.clone(), sessions, config)
        }
        None => {
            info!("DATABASE_URL not set, using in-memory storage");
            let records = InMemoryRecordStore::seeded(load_seed(config).await?);
            let sessions = Arc::new(InMemorySessionStorage::new());
            build_app_state(Arc::new(records), model, sessions.clone(), sessions, config)
        }
    }
}

pub fn build_app_state(
    store: Arc<dyn RecordStore>,
    model: Arc<dyn ModelClient>,
    threads: Arc<dyn ThreadStorage>,
    checkpoints: Arc<dyn CheckpointStorage>,
    config: &Config,
) -> anyhow::Result<AppState> {
    let swarm = build_swarm(store, model, config)?;
    info!(
        agents = ?swarm.agent_names(),
        default_agent = swarm.default_agent(),
        model = swarm.model_name(),
        max_steps = swarm.max_steps(),
        "Swarm ready"
    );
    Ok(AppState {
        runner: SwarmRunner::new(Arc::new(swarm), threads.clone(), checkpoints)
            .with_timeout(config.request_timeout),
        threads,
    })
}

async fn load_seed(config: &Config) -> anyhow::Result<SeedData> {
    let raw = match &config.seed_file {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read seed file {}", path.display()))?,
        None => BUNDLED_SEED.to_string(),
    };
    serde_json::from_str(&raw).context("invalid seed data")
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/ask", post(ask))
        .route("/threads/{thread_id}", get(get_thread))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(correlation_id_middleware))
        .with_state(app_state)
}

async fn root() -> Json<Value> {
    Json(json!({ "response": "on" }))
}

async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let swarm = state.runner.swarm();
    Json(json!({
        "status": "healthy",
        "model": swarm.model_name(),
        "agents": swarm.agent_names(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn ask(
    State(state): State<AppState>,
    payload: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<AskResponse> {
    let Json(request) = payload.map_err(|e| bad_request_error(&e.body_text()))?;
    if request.user_query.trim().is_empty() {
        return Err(bad_request_error("user_query cannot be empty"));
    }
    if matches!(&request.thread_id, Some(id) if id.trim().is_empty()) {
        return Err(bad_request_error("thread_id cannot be blank"));
    }
    let thread_id = request.thread_id;
    info!(thread_id = ?thread_id, "Received question");

    match state.runner.ask(thread_id.clone(), &request.user_query).await {
        Ok(outcome) => {
            info!(
                thread_id = %outcome.thread_id,
                agent = %outcome.agent,
                created = outcome.created,
                "Answered question"
            );
            Ok(Json(AskResponse {
                thread_id: outcome.thread_id,
                response: outcome.response,
            }))
        }
        Err(e) => {
            match &e {
                SwarmError::ThreadNotFound(_) => warn!(error = %e, "Unknown thread"),
                _ => error!(thread_id = ?thread_id, error = %e, "Turn failed"),
            }
            Err(swarm_error(&e, thread_id.as_deref()))
        }
    }
}

async fn get_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<String>,
) -> ApiResult<ThreadState> {
    match state.threads.get(&thread_id).await {
        Ok(Some(thread)) => Ok(Json(thread)),
        Ok(None) => Err(not_found_error("Thread not found", &thread_id)),
        Err(e) => {
            error!("Failed to load thread {}: {}", thread_id, e);
            Err(internal_error("Failed to load thread", &e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::time::Duration;
    use swarm_flow::testing::ScriptedModelClient;
    use swarm_flow::{AgentAction, ModelReply, ModelRequest, RetryPolicy};
    use tower::ServiceExt;

    use crate::agents::{BOOK_TEST, CHECK_INSURANCE, REPORT_ANALYST};

    fn test_config() -> Config {
        Config {
            retry: RetryPolicy::none().with_initial_backoff(Duration::from_millis(1)),
            ..Config::default()
        }
    }

    struct TestApp {
        router: Router,
        store: Arc<InMemoryRecordStore>,
    }

    fn test_app(model: Arc<dyn ModelClient>, config: &Config) -> TestApp {
        let seed: SeedData = serde_json::from_str(BUNDLED_SEED).unwrap();
        let store = Arc::new(InMemoryRecordStore::seeded(seed));
        let sessions = Arc::new(InMemorySessionStorage::new());
        let state = build_app_state(store.clone(), model, sessions.clone(), sessions, config).unwrap();
        TestApp {
            router: build_router(state),
            store,
        }
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
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

    fn ask_request(body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/ask")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn root_reports_on_every_time() {
        let app = test_app(Arc::new(ScriptedModelClient::new()), &test_config());
        for _ in 0..2 {
            let (status, body) = send(&app.router, get_request("/")).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body, json!({ "response": "on" }));
        }
    }

    #[tokio::test]
    async fn booking_flow_persists_and_continues_on_the_same_thread() {
        let model = Arc::new(
            ScriptedModelClient::new()
                .push(AgentAction::handoff(BOOK_TEST))
                .push(AgentAction::invoke_tool("fetch_tests", json!({})))
                .push(AgentAction::invoke_tool(
                    "book_tests",
                    json!({ "user_name": "Jane", "tests": ["CT Scan"] }),
                ))
                .push(AgentAction::respond("Your CT Scan is booked.")),
        );
        let app = test_app(model.clone(), &test_config());

        let (status, body) = send(
            &app.router,
            ask_request(json!({ "user_query": "Book a CT scan for Jane" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["response"], "Your CT Scan is booked.");
        let thread_id = body["thread_id"].as_str().unwrap().to_string();

        let bookings = app.store.find_bookings_by_patient("u-1001").await.unwrap();
        assert_eq!(bookings.len(), 1);
        assert_eq!(bookings[0].test_names, vec!["CT Scan"]);
        assert_eq!(bookings[0].total_cost, 300.0);

        model
            .enqueue(AgentAction::respond("You booked a CT Scan."))
            .await;
        let (status, body) = send(
            &app.router,
            ask_request(json!({ "user_query": "What did I just book?", "thread_id": thread_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["thread_id"], thread_id.as_str());

        // The second turn starts at the default agent with the first turn's history.
        let requests = model.requests().await;
        let last = requests.last().unwrap();
        assert_eq!(last.agent, REPORT_ANALYST);
        assert!(
            last.history
                .iter()
                .any(|m| m.tool.as_deref() == Some("book_tests"))
        );

        let (status, thread) = send(&app.router, get_request(&format!("/threads/{thread_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            thread["messages"],
            json!(["Your CT Scan is booked.", "You booked a CT Scan."])
        );
        assert_eq!(thread["usage"].as_array().unwrap().len(), 2);
        assert_eq!(thread["metadata"][0]["agent"], BOOK_TEST);
        assert_eq!(thread["metadata"][1]["agent"], REPORT_ANALYST);
    }

    #[tokio::test]
    async fn unknown_thread_is_not_found() {
        let app = test_app(Arc::new(ScriptedModelClient::new()), &test_config());

        let (status, body) = send(
            &app.router,
            ask_request(json!({ "user_query": "hello", "thread_id": "missing" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["thread_id"], "missing");

        let (status, _) = send(&app.router, get_request("/threads/missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let app = test_app(Arc::new(ScriptedModelClient::new()), &test_config());

        let (status, _) = send(&app.router, ask_request(json!({ "user_query": "   " }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app.router, ask_request(json!({ "question": "hi" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app.router,
            ask_request(json!({ "user_query": "hi", "thread_id": " " })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn endless_handoffs_hit_the_step_limit() {
        let model = ScriptedModelClient::new().with_fallback(|request| {
            if request.agent.name() == REPORT_ANALYST {
                AgentAction::handoff(BOOK_TEST)
            } else {
                AgentAction::handoff(REPORT_ANALYST)
            }
        });
        let config = Config {
            max_steps: 4,
            ..test_config()
        };
        let app = test_app(Arc::new(model), &config);

        let (status, body) = send(&app.router, ask_request(json!({ "user_query": "loop" }))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body["error"].as_str().unwrap().contains('4'));
    }

    #[tokio::test]
    async fn unavailable_model_is_service_unavailable() {
        let model = ScriptedModelClient::new().push_unavailable("openrouter down");
        let app = test_app(Arc::new(model), &test_config());

        let (status, _) = send(&app.router, ask_request(json!({ "user_query": "hi" }))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn claim_submitted_before_a_failure_is_not_submitted_twice() {
        let claim_args = json!({ "policy_number": "POL-1001", "treatment": "MRI" });
        let model = Arc::new(
            ScriptedModelClient::new()
                .push(AgentAction::handoff(CHECK_INSURANCE))
                .push(AgentAction::invoke_tool(
                    "fetch_insurance_policy_details",
                    json!({ "user_name": "Jane" }),
                ))
                .push(AgentAction::invoke_tool("check_claim_eligibility", claim_args.clone()))
                .push(AgentAction::invoke_tool("calculate_estimated_coverage", claim_args))
                .push(AgentAction::respond("An MRI is covered at 80%.")),
        );
        let app = test_app(model.clone(), &test_config());

        let (status, body) = send(
            &app.router,
            ask_request(json!({ "user_query": "Is an MRI covered for Jane?" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let thread_id = body["thread_id"].as_str().unwrap().to_string();

        // the claim is stored, then the model fails before replying
        let submit = json!({ "user_name": "Jane", "treatment": "MRI" });
        model.enqueue(AgentAction::handoff(CHECK_INSURANCE)).await;
        model
            .enqueue(AgentAction::invoke_tool("submit_insurance_claim", submit.clone()))
            .await;
        model.enqueue_unavailable("provider overloaded").await;
        let (status, _) = send(
            &app.router,
            ask_request(json!({ "user_query": "Please file the claim", "thread_id": thread_id })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(app.store.claims().await.len(), 1);

        // the client retries the turn
        model.enqueue(AgentAction::handoff(CHECK_INSURANCE)).await;
        model
            .enqueue(AgentAction::invoke_tool("submit_insurance_claim", submit))
            .await;
        model
            .enqueue(AgentAction::respond("Your claim was already filed."))
            .await;
        let (status, _) = send(
            &app.router,
            ask_request(json!({ "user_query": "Please file the claim", "thread_id": thread_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(app.store.claims().await.len(), 1);

        let requests = model.requests().await;
        let history = &requests.last().unwrap().history;
        assert!(history.iter().any(|m| {
            m.tool.as_deref() == Some("submit_insurance_claim") && m.content.contains("\"claim\"")
        }));
        let retried = history
            .iter()
            .rev()
            .find(|m| m.tool.as_deref() == Some("submit_insurance_claim"))
            .unwrap();
        assert!(retried.content.contains("precondition_failed"));
    }

    #[tokio::test]
    async fn malformed_tool_arguments_are_unprocessable() {
        let model = ScriptedModelClient::new()
            .push(AgentAction::invoke_tool("fetch_report", json!({ "name": "jane" })));
        let app = test_app(Arc::new(model), &test_config());

        let (status, _) = send(&app.router, ask_request(json!({ "user_query": "my reports" }))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    struct StalledModel;

    #[async_trait]
    impl ModelClient for StalledModel {
        fn model_name(&self) -> &str {
            "stalled"
        }

        async fn next_action(&self, _request: ModelRequest<'_>) -> swarm_flow::Result<ModelReply> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ModelReply::new(AgentAction::respond("too late")))
        }
    }

    #[tokio::test]
    async fn slow_turns_time_out() {
        let config = Config {
            request_timeout: Duration::from_millis(20),
            ..test_config()
        };
        let app = test_app(Arc::new(StalledModel), &config);

        let (status, _) = send(&app.router, ask_request(json!({ "user_query": "hi" }))).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn health_lists_agents() {
        let app = test_app(Arc::new(ScriptedModelClient::new()), &test_config());
        let (status, body) = send(&app.router, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["agents"].as_array().unwrap().len(), 3);
    }
}
