use std::net::SocketAddr;

use axum::Router;
use axum::body::Body;
use axum::http::Request;
use clap::Parser;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod extract;
mod middleware;
mod oauth;
mod pages;
mod routes;
mod state;
mod sweep;

use config::Settings;
use state::AppState;

const DEFAULT_LOG_FILTER: &str = "spacebridge=debug,spacebridge_mcp_runtime=info,tower_http=debug";

/// Request span with method and path only. Query strings carry session
/// tokens and OAuth codes and must stay out of the logs.
fn request_span(request: &Request<Body>) -> tracing::Span {
    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
    )
}

fn app(state: AppState) -> Router {
    let settings = state.settings.clone();
    let auth_routes = match middleware::rate_limit::auth_layer() {
        Some(layer) => routes::auth::router().layer(layer),
        None => {
            tracing::warn!(event = "rate_limit_disabled", "Invalid rate limit config; /auth/* is unthrottled");
            routes::auth::router()
        }
    };

    Router::new()
        .merge(routes::health::router())
        .merge(routes::auth::landing_router())
        .merge(auth_routes)
        .merge(routes::sse::router())
        .layer(axum::middleware::from_fn(middleware::security_headers::apply))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .option_layer(settings.require_https.then(|| {
                    axum::middleware::from_fn_with_state(
                        state.clone(),
                        middleware::https::require_https,
                    )
                }))
                .layer(middleware::cors::build_cors_layer(&settings.cors_origins())),
        )
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(event = "signal_error", error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(event = "signal_error", error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let settings = Settings::parse();
    if let Err(missing) = settings.oauth_client() {
        tracing::warn!(
            event = "oauth_not_configured",
            missing = %missing.join(","),
            "OAuth credentials missing; /auth/start will serve the setup guide"
        );
    }
    if settings.session_secret.is_none() {
        tracing::warn!(event = "session_secret_missing", "SESSION_SECRET is not set");
    }

    let state = AppState::new(settings);
    let shutdown = state.shutdown.clone();

    tokio::spawn(sweep::run(
        state.store.clone(),
        state.settings.sweep_interval(),
        state.settings.session_max_age(),
        chrono::Duration::minutes(oauth::PENDING_AUTHORIZATION_TTL_MINUTES),
        shutdown.clone(),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {addr}: {err}"));
    tracing::info!(event = "listening", %addr, "spacebridge listening");

    let serve = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        shutdown_signal().await;
        tracing::info!(event = "shutdown", "Shutting down; closing open streams");
        // Streams never end on their own; cancel them so the drain can finish.
        shutdown.cancel();
    });

    if let Err(err) = serve.await {
        tracing::error!(event = "server_error", error = %err, "Server exited with error");
        std::process::exit(1);
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::Router;

    /// Serve `app` on an ephemeral local port and return its base URL.
    pub(crate) async fn spawn_stub(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub address");
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        format!("http://{addr}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use tower::ServiceExt;

    #[tokio::test]
    async fn full_router_serves_health_with_security_headers() {
        let response = app(AppState::new(Settings::for_tests()))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["x-frame-options"], "DENY");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn request_logs_never_contain_query_secrets() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::registry()
            .with(tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER))
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(move || writer.clone()),
            );
        let _guard = tracing::subscriber::set_default(subscriber);

        let session_token = "d".repeat(64);
        let app = app(AppState::new(Settings::for_tests()));
        for uri in [
            format!("/v1/sse?token={session_token}"),
            "/auth/callback?code=secret-code-123&state=secret-state-456".to_string(),
        ] {
            app.clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
        }

        let output = logs.contents();
        assert!(output.contains("\"path\":\"/v1/sse\""), "{output}");
        assert!(output.contains("/auth/callback"), "{output}");
        assert!(!output.contains(&session_token), "{output}");
        assert!(!output.contains("secret-code-123"), "{output}");
        assert!(!output.contains("secret-state-456"), "{output}");
    }

    #[tokio::test]
    async fn full_router_refuses_unknown_stream_token() {
        let response = app(AppState::new(Settings::for_tests()))
            .oneshot(
                Request::builder()
                    .uri("/v1/sse?token=unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
