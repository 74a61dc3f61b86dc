use axum::extract::{Request, State};
use axum::http::header::{LOCATION, STRICT_TRANSPORT_SECURITY};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::extract::{first_header_token, request_base_url};
use crate::state::AppState;

fn hsts() -> HeaderValue {
    HeaderValue::from_static("max-age=63072000; includeSubDomains")
}

/// Send plain-HTTP requests (as reported by the proxy's `X-Forwarded-Proto`)
/// to the HTTPS origin of this bridge and stamp HSTS on every response.
///
/// Connection URLs carry the session token in the query string, so the
/// redirect is a 308: the method is kept and the client re-sends to the
/// secure origin. The origin is `PUBLIC_BASE_URL` when configured, so a
/// spoofed `Host` cannot bounce tokens elsewhere.
pub async fn require_https(State(state): State<AppState>, req: Request, next: Next) -> Response {
    if first_header_token(req.headers(), "x-forwarded-proto").as_deref() == Some("http") {
        let origin = secure_origin(&state, &req);
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        if let Ok(location) = HeaderValue::from_str(&format!("{origin}{path_and_query}")) {
            tracing::debug!(
                event = "https_redirect",
                path = req.uri().path(),
                "Redirecting plain-HTTP request"
            );
            let mut response = (StatusCode::PERMANENT_REDIRECT, [(LOCATION, location)]).into_response();
            response.headers_mut().insert(STRICT_TRANSPORT_SECURITY, hsts());
            return response;
        }
    }

    let mut response = next.run(req).await;
    response.headers_mut().insert(STRICT_TRANSPORT_SECURITY, hsts());
    response
}

fn secure_origin(state: &AppState, req: &Request) -> String {
    let base = state
        .settings
        .public_base_url()
        .unwrap_or_else(|| request_base_url(req.headers(), state.settings.port));
    match base.split_once("://") {
        Some((_, authority)) => format!("https://{authority}"),
        None => format!("https://{base}"),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::header::{LOCATION, STRICT_TRANSPORT_SECURITY};
    use axum::http::{Request, StatusCode};
    use axum::routing::post;
    use axum::{Router, middleware};
    use tower::ServiceExt;

    use crate::config::Settings;
    use crate::state::AppState;

    fn app(public_base_url: Option<&str>) -> Router {
        let mut settings = Settings::for_tests();
        settings.public_base_url = public_base_url.map(ToOwned::to_owned);
        let state = AppState::new(settings);
        Router::new()
            .route("/v1/messages", post(|| async { StatusCode::ACCEPTED }))
            .layer(middleware::from_fn_with_state(state, super::require_https))
    }

    fn plain_http_post(host: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/messages?sessionId=abc")
            .header("host", host)
            .header("x-forwarded-proto", "http")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn plain_http_goes_to_configured_origin_not_client_host() {
        let response = app(Some("https://bridge.example.com/"))
            .oneshot(plain_http_post("attacker.example.net"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()[LOCATION],
            "https://bridge.example.com/v1/messages?sessionId=abc"
        );
        assert!(response.headers().contains_key(STRICT_TRANSPORT_SECURITY));
    }

    #[tokio::test]
    async fn without_public_base_url_the_request_host_is_upgraded() {
        let response = app(None)
            .oneshot(plain_http_post("bridge.example.com"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
        assert_eq!(
            response.headers()[LOCATION],
            "https://bridge.example.com/v1/messages?sessionId=abc"
        );
    }

    #[tokio::test]
    async fn https_requests_pass_with_hsts() {
        let response = app(None)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/messages")
                    .header("x-forwarded-proto", "https")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(response.headers().contains_key(STRICT_TRANSPORT_SECURITY));
    }
}
