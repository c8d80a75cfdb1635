use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{
    due_alarms, ensure_partitions, get_alarm, health_check, list_incidents, list_results,
    rotate_partitions, trigger_check, AppState,
};
use crate::checks::{CheckOrchestrator, CheckScheduler, HttpProber};
use crate::clock::{SharedClock, SystemClock};
use crate::config::{Seed, ServiceConfig};
use crate::maintenance::PartitionWorker;
use crate::notify::{
    InMemoryDirectory, LogEmailSender, LogPushPublisher, NotificationDispatcher, PlanResolver,
    SlackWebhookPoster, Transports,
};
use crate::storage::{CounterRepository, Database, DayPartitionedStore};

/// Build the application router
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Alarms
        .route("/alarms/due", get(due_alarms))
        .route("/alarms/:id", get(get_alarm))
        .route("/alarms/:id/check", post(trigger_check))
        // History
        .route("/incidents", get(list_incidents))
        .route("/results", get(list_results))
        // Maintenance
        .route("/maintenance/partitions", post(ensure_partitions))
        .route("/maintenance/rotate", post(rotate_partitions))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the HTTP server together with the scheduler and partition worker
pub async fn run_server(config: ServiceConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: SharedClock = Arc::new(SystemClock);
    let db = Arc::new(Database::new());

    let results = Arc::new(DayPartitionedStore::new(
        Arc::clone(&db),
        Arc::clone(&clock),
        config.partition.clone(),
    ));
    // Today's table must exist before the first result is written
    let created = results.ensure_for(clock.now())?;
    tracing::info!(tables = ?created, "Result partitions ready");

    let directory = Arc::new(InMemoryDirectory::new());
    let transports = Transports {
        email: Arc::new(LogEmailSender),
        push: Arc::new(LogPushPublisher),
        slack: Arc::new(SlackWebhookPoster::new(config.probe.timeout)?),
    };
    let dispatcher = NotificationDispatcher::new(
        PlanResolver::new(directory.clone(), directory.clone()),
        directory.clone(),
        CounterRepository::new(Arc::clone(&db)),
        transports,
        Arc::clone(&clock),
        config.notify.clone(),
    );

    let orchestrator = CheckOrchestrator::new(
        Arc::clone(&db),
        Arc::clone(&results),
        HttpProber::new(config.probe.clone())?,
        dispatcher,
        Arc::clone(&clock),
    );

    if let Some(path) = &config.seed_file {
        let loaded = Seed::load(path)?.apply(orchestrator.alarms(), &directory)?;
        tracing::info!(path = %path.display(), alarms = loaded, "Seed loaded");
    }

    let state = Arc::new(AppState {
        orchestrator: orchestrator.clone(),
        results: Arc::clone(&results),
        clock: Arc::clone(&clock),
    });

    // Start background workers
    let mut scheduler = CheckScheduler::new(orchestrator, Arc::clone(&clock));
    let scheduler_handle = scheduler.start(config.scheduler_tick);

    let partition_worker = Arc::new(PartitionWorker::new(
        Arc::clone(&results),
        Arc::clone(&clock),
        config.partition_interval,
    ));
    let partition_handle = Arc::clone(&partition_worker).start();

    let app = build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    tracing::info!("Starting upcheck server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&partition_worker)))
        .await?;

    scheduler.stop().await;
    if let Err(e) = scheduler_handle.await {
        tracing::warn!(error = %e, "Scheduler task ended abnormally");
    }
    partition_handle.abort();

    tracing::info!("upcheck server stopped");
    Ok(())
}

async fn shutdown_signal(partition_worker: Arc<PartitionWorker>) {
    wait_for_shutdown(tokio::signal::ctrl_c(), partition_worker).await
}

/// Resolves when `signal` fires. If the signal cannot be installed this never
/// resolves and the server runs until killed.
async fn wait_for_shutdown<F>(signal: F, partition_worker: Arc<PartitionWorker>)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal, running until killed");
        std::future::pending::<()>().await;
    }

    tracing::info!("Shutdown signal received, stopping workers...");
    partition_worker.stop();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checks::orchestrator::tests::{harness, Harness};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::sync::atomic::Ordering;
    use tower::util::ServiceExt;

    fn create_test_app(h: &Harness) -> Router {
        let state = Arc::new(AppState {
            orchestrator: h.orchestrator.clone(),
            results: Arc::clone(&h.results),
            clock: Arc::new(h.clock.clone()),
        });
        build_router(state)
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_failed_signal_keeps_running() {
        let h = harness(true).await;
        let worker = Arc::new(PartitionWorker::new(
            Arc::clone(&h.results),
            Arc::new(h.clock.clone()),
            std::time::Duration::from_secs(3600),
        ));
        let handle = Arc::clone(&worker).start();

        let broken = async {
            Err::<(), _>(std::io::Error::new(
                std::io::ErrorKind::Other,
                "no signal handler",
            ))
        };
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(100),
            wait_for_shutdown(broken, Arc::clone(&worker)),
        )
        .await;
        assert!(waited.is_err());
        assert!(worker.is_running());

        wait_for_shutdown(async { Ok::<(), std::io::Error>(()) }, Arc::clone(&worker)).await;
        assert!(!worker.is_running());
        handle.abort();
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_check() {
        let h = harness(true).await;
        let response = create_test_app(&h).oneshot(get("/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_trigger_check_then_conflict() {
        let h = harness(true).await;
        h.status.store(503, Ordering::SeqCst);
        let app = create_test_app(&h);

        let response = app
            .clone()
            .oneshot(post_json(
                "/alarms/1/check",
                serde_json::json!({ "expected_watermark": null }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["alarm_id"], 1);
        assert_eq!(body["status"], "failing");
        assert_eq!(body["kind"], "bad_code");
        assert_eq!(body["new_incident"], true);

        // Same stale watermark again
        let response = app
            .clone()
            .oneshot(post_json(
                "/alarms/1/check",
                serde_json::json!({ "expected_watermark": null }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = json_body(response).await;
        assert!(body["watermark"].is_string());

        let response = app
            .oneshot(get("/alarms/1?incidents=unresolved"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["state"], "ALARM");
        assert_eq!(body["incidents"][0]["type"], "bad_code");
        assert_eq!(body["incidents"][0]["http_code"], 503);
    }

    #[tokio::test]
    async fn test_trigger_check_without_body() {
        let h = harness(true).await;
        let request = Request::builder()
            .method("POST")
            .uri("/alarms/1/check")
            .body(Body::empty())
            .unwrap();

        let response = create_test_app(&h).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_malformed_check_body() {
        let h = harness(true).await;
        let response = create_test_app(&h)
            .oneshot(post_json(
                "/alarms/1/check",
                serde_json::json!({ "expected_watermark": "yesterday" }),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_alarm_is_404() {
        let h = harness(true).await;
        let app = create_test_app(&h);

        let response = app.clone().oneshot(get("/alarms/42")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(post_json("/alarms/42/check", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_missing_partition_is_500() {
        let h = harness(false).await;
        let response = create_test_app(&h)
            .oneshot(post_json("/alarms/1/check", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_due_alarms_and_history() {
        let h = harness(true).await;
        let app = create_test_app(&h);

        let body = json_body(app.clone().oneshot(get("/alarms/due")).await.unwrap()).await;
        assert_eq!(body.as_array().unwrap().len(), 1);

        h.orchestrator.check_alarm(1, None).await.unwrap();

        let body = json_body(app.clone().oneshot(get("/alarms/due")).await.unwrap()).await;
        assert!(body.as_array().unwrap().is_empty());

        let body = json_body(app.clone().oneshot(get("/results?alarm_id=1")).await.unwrap()).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["items"][0]["alarm_id"], 1);

        let body = json_body(
            app.clone()
                .oneshot(get("/results?from=2024-05-21T00:00:00Z"))
                .await
                .unwrap(),
        )
        .await;
        assert_eq!(body["total"], 0);

        let body = json_body(app.oneshot(get("/incidents?user_id=1&limit=10")).await.unwrap()).await;
        assert_eq!(body["total"], 0);
        assert_eq!(body["limit"], 10);
    }

    #[tokio::test]
    async fn test_maintenance_endpoints() {
        let h = harness(false).await;
        let app = create_test_app(&h);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/maintenance/partitions")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["created"][0], "check_results_2024_05_20");

        h.clock.advance(chrono::Duration::days(31));
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/maintenance/rotate")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["rotated"], 1);
    }
}
