//! API router

use std::sync::Arc;
use std::time::Instant;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::application::charging::commands::CommandDispatcher;
use crate::infrastructure::crypto::jwt::JwtConfig;
use crate::interfaces::http::middleware::auth_middleware;

use super::handlers::{commands, health, sessions, stations};

/// State shared by every route
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Arc<CommandDispatcher>,
    pub jwt: JwtConfig,
    pub metrics: PrometheusHandle,
    pub started_at: Instant,
}

impl ApiState {
    pub fn new(dispatcher: Arc<CommandDispatcher>, jwt: JwtConfig, metrics: PrometheusHandle) -> Self {
        Self {
            dispatcher,
            jwt,
            metrics,
            started_at: Instant::now(),
        }
    }
}

pub fn create_api_router(state: ApiState) -> Router {
    let protected = Router::new()
        .route("/stations", get(stations::list_stations))
        .route("/stations/{id}", get(stations::get_station))
        .route("/stations/{id}/transactions", get(stations::station_transactions))
        .route("/stations/{id}/remote-start", post(commands::remote_start))
        .route("/stations/{id}/remote-stop", post(commands::remote_stop))
        .route("/stations/{id}/disconnect", post(commands::disconnect))
        .route("/sessions/{id}", get(sessions::get_session))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health::health_check))
        .route("/metrics", get(health::prometheus_metrics))
        .nest("/api/v1", protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::application::relay::{
        CommandOutcome, CommandRelay, DuplicatePolicy, InMemoryCommandRelay, TransactionEvent,
    };
    use crate::domain::{ChargingSession, RepositoryProvider};
    use crate::infrastructure::crypto::jwt::{sign_for_tests, sign_with_role_for_tests};
    use crate::infrastructure::storage::InMemoryRepositoryProvider;

    struct Api {
        router: Router,
        relay: Arc<InMemoryCommandRelay>,
        repos: Arc<InMemoryRepositoryProvider>,
        jwt: JwtConfig,
    }

    fn api() -> Api {
        let relay = InMemoryCommandRelay::shared(100);
        let repos = InMemoryRepositoryProvider::shared();
        let dispatcher = Arc::new(CommandDispatcher::new(
            relay.clone(),
            repos.clone(),
            Duration::from_millis(500),
        ));
        let jwt = JwtConfig {
            secret: "test-secret".to_string(),
            issuer: "charge-gateway".to_string(),
        };
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let router = create_api_router(ApiState::new(dispatcher, jwt.clone(), handle));
        Api {
            router,
            relay,
            repos,
            jwt,
        }
    }

    impl Api {
        fn token(&self, sub: &str) -> String {
            sign_for_tests(sub, &self.jwt, 3600)
        }

        fn admin_token(&self, sub: &str) -> String {
            sign_with_role_for_tests(sub, "admin", &self.jwt, 3600)
        }

        async fn send(&self, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
            let mut builder = Request::builder().method(method).uri(uri);
            if let Some(token) = token {
                builder = builder.header("authorization", format!("Bearer {}", token));
            }
            let body = match body {
                Some(json) => {
                    builder = builder.header("content-type", "application/json");
                    Body::from(json.to_string())
                }
                None => Body::empty(),
            };
            let resp = self
                .router
                .clone()
                .oneshot(builder.body(body).unwrap())
                .await
                .unwrap();
            let status = resp.status();
            let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
            let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, json)
        }
    }

    /// Stand-in for a gateway process: answers every command with `outcome`.
    async fn attach_station(relay: &Arc<InMemoryCommandRelay>, station: &str, outcome: CommandOutcome) {
        let registration = relay.register(station, DuplicatePolicy::Evict).await.unwrap();
        let mut commands = relay.subscribe_commands(&registration).await.unwrap();
        let relay = relay.clone();
        tokio::spawn(async move {
            let _registration = registration;
            while let Some(envelope) = commands.recv().await {
                relay
                    .report_outcome(envelope.correlation_id, outcome.clone())
                    .await
                    .unwrap();
            }
        });
    }

    #[tokio::test]
    async fn health_and_metrics_are_public() {
        let api = api();
        let (status, body) = api.send("GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");

        let resp = api
            .router
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn api_requires_a_valid_token() {
        let api = api();
        let (status, body) = api.send("GET", "/api/v1/stations", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "unauthorized");

        let (status, _) = api
            .send("GET", "/api/v1/stations", Some("not-a-jwt"), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let other = JwtConfig {
            secret: "other-secret".to_string(),
            issuer: "charge-gateway".to_string(),
        };
        let forged = sign_for_tests("1", &other, 3600);
        let (status, _) = api
            .send("GET", "/api/v1/stations", Some(&forged), None)
            .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn lists_and_describes_stations() {
        let api = api();
        let token = api.token("1");
        attach_station(&api.relay, "CP1", CommandOutcome::Accepted).await;
        api.relay
            .record("CP1", TransactionEvent::Connected { connection_id: 7 })
            .await
            .unwrap();

        let (status, body) = api.send("GET", "/api/v1/stations", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stations"], json!(["CP1"]));

        let (status, body) = api
            .send("GET", "/api/v1/stations/CP1", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["connected"], true);
        assert_eq!(body["last_event"]["type"], "connected");

        let (status, body) = api
            .send("GET", "/api/v1/stations/CP1/transactions", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["entries"].as_array().unwrap().len(), 1);

        let (status, body) = api
            .send("GET", "/api/v1/stations/NOPE", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }

    #[tokio::test]
    async fn remote_start_uses_token_subject_and_creates_session() {
        let api = api();
        let user = api.repos.accounts().create("alice", 1_000).await.unwrap();
        let token = api.token(&user.id.to_string());
        attach_station(&api.relay, "CP1", CommandOutcome::Accepted).await;

        let (status, body) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&token),
                Some(json!({"energy_limit": 5.0})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "accepted");
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = api
            .send("GET", &format!("/api/v1/sessions/{}", session_id), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_id"], user.id);
        assert_eq!(body["station_id"], "CP1");
        assert_eq!(body["energy_limit"], 5.0);
    }

    #[tokio::test]
    async fn remote_start_rejects_bad_input() {
        let api = api();
        attach_station(&api.relay, "CP1", CommandOutcome::Accepted).await;

        let token = api.token("1");
        let (status, body) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&token),
                Some(json!({"energy_limit": -1.0})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "bad_request");

        // Non-numeric subject and no explicit user.
        let token = api.token("service-account");
        let (status, _) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&token),
                Some(json!({})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn remote_start_bills_only_the_callers_account() {
        let api = api();
        let alice = api.repos.accounts().create("alice", 1_000).await.unwrap();
        let bob = api.repos.accounts().create("bob", 1_000).await.unwrap();
        attach_station(&api.relay, "CP1", CommandOutcome::Accepted).await;

        let alice_token = api.token(&alice.id.to_string());
        let (status, body) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&alice_token),
                Some(json!({"user_id": bob.id})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "forbidden");
        assert!(api
            .repos
            .charging_sessions()
            .find_by_station("CP1")
            .await
            .unwrap()
            .is_empty());

        let (status, _) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&alice_token),
                Some(json!({"user_id": alice.id})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let admin = api.admin_token("ops");
        let (status, body) = api
            .send(
                "POST",
                "/api/v1/stations/CP1/remote-start",
                Some(&admin),
                Some(json!({"user_id": bob.id})),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        let session_id = body["session_id"].as_str().unwrap().to_string();
        let session = api
            .repos
            .charging_sessions()
            .find_by_id(&session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(session.user_id, bob.id);
    }

    #[tokio::test]
    async fn commands_map_delivery_failures() {
        let api = api();
        let token = api.token("1");

        let (status, body) = api
            .send("POST", "/api/v1/stations/CP9/remote-stop", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_connected");

        // Registered but nobody consuming: undeliverable.
        let registration = api.relay.register("CP2", DuplicatePolicy::Evict).await.unwrap();
        drop(api.relay.subscribe_commands(&registration).await.unwrap());
        let (status, body) = api
            .send("POST", "/api/v1/stations/CP2/remote-stop", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "undeliverable");

        // Subscribed but never answers: timeout.
        let registration = api.relay.register("CP3", DuplicatePolicy::Evict).await.unwrap();
        let _silent = api.relay.subscribe_commands(&registration).await.unwrap();
        let (status, body) = api
            .send("POST", "/api/v1/stations/CP3/disconnect", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "timeout");
    }

    #[tokio::test]
    async fn device_rejection_is_reported_not_failed() {
        let api = api();
        let token = api.token("1");
        attach_station(
            &api.relay,
            "CP1",
            CommandOutcome::Rejected {
                status: "Rejected".to_string(),
            },
        )
        .await;

        let (status, body) = api
            .send("POST", "/api/v1/stations/CP1/remote-stop", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["outcome"], "rejected");
        assert_eq!(body["status"], "Rejected");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let api = api();
        api.repos
            .charging_sessions()
            .save(ChargingSession::new("S1", "CP1", 1, None))
            .await
            .unwrap();
        let token = api.token("1");

        let (status, body) = api.send("GET", "/api/v1/sessions/S1", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "initiated");

        let (status, _) = api.send("GET", "/api/v1/sessions/S2", Some(&token), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
