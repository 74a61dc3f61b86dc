use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

/// Hosted MCP clients that open the event stream from a browser.
const CONNECTOR_ORIGINS: &[&str] = &["https://claude.ai"];

/// Build the CORS layer for `configured` origins plus the connector origins.
///
/// - Methods: GET, POST, OPTIONS
/// - Headers: Authorization, Content-Type
/// - Credentials: allowed
/// - Max age: 3600s
pub fn build_cors_layer(configured: &[String]) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origins(configured))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
        ])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

fn allowed_origins(configured: &[String]) -> Vec<HeaderValue> {
    let mut origins: Vec<String> = configured.to_vec();
    for connector_origin in CONNECTOR_ORIGINS {
        if !origins
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(connector_origin))
        {
            origins.push((*connector_origin).to_string());
        }
    }

    origins
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_origin_is_always_allowed_once() {
        let origins = allowed_origins(&[
            "http://localhost:3000".to_string(),
            "HTTPS://CLAUDE.AI".to_string(),
        ]);
        assert_eq!(origins.len(), 2);

        let origins = allowed_origins(&["http://localhost:3000".to_string()]);
        assert!(origins.iter().any(|o| o == "https://claude.ai"));
    }
}
