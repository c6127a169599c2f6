//! Route handlers
//!
//! Each handler validates its one required field, makes exactly one backend
//! call and translates the outcome. Backend error detail goes to the logs; the
//! client only ever sees a fixed message.

use http_body_util::BodyExt;
use hyper::header::{HeaderValue, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use hyper::{Response, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error};

use crate::client::{BackendClient, ClientConfig};
use crate::config::Config;
use crate::error::{json_error_response, json_response, text_response, GatewayBody, GatewayErrorCode};
use crate::text::trim_to_boundary;

/// Body of `GET /`
pub const HEALTH_MESSAGE: &str =
    "Backend running with Summarizer, Description, Idea Generator & PDF services.";

/// `Content-Disposition` sent with generated PDFs
pub const PDF_CONTENT_DISPOSITION: &str = r#"attachment; filename="generated_idea.pdf""#;

/// State shared by all requests
pub struct AppState {
    pub config: Arc<Config>,
    pub client: BackendClient,
}

impl AppState {
    pub fn new(config: Arc<Config>) -> Self {
        let client = BackendClient::new(ClientConfig::from(&config.server));
        Self { config, client }
    }
}

/// Return the named field if it is a string with non-whitespace content
pub fn required_field<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// `GET /`
pub fn health() -> Response<GatewayBody> {
    text_response(StatusCode::OK, HEALTH_MESSAGE)
}

/// `POST /summarize`
pub async fn summarize(state: &AppState, body: &Value) -> Response<GatewayBody> {
    let Some(text) = required_field(body, "text") else {
        return json_error_response(
            GatewayErrorCode::MissingField,
            "Text is required for summarization.",
        );
    };

    let url = &state.config.backends.summarizer.url;
    match state.client.post_json(url, &json!({ "text": text })).await {
        Ok(data) => {
            let summary = data.get("summary").and_then(Value::as_str).unwrap_or("");
            json_response(StatusCode::OK, &json!({ "summary": trim_to_boundary(summary) }))
        }
        Err(e) => {
            error!(route = "summarize", url = %url, error = %e, "Summarization backend call failed");
            json_error_response(GatewayErrorCode::BackendFailed, "Failed to summarize text.")
        }
    }
}

/// `POST /ideagenerator`
pub async fn generate_ideas(state: &AppState, body: &Value) -> Response<GatewayBody> {
    let Some(prompt) = required_field(body, "prompt") else {
        return json_error_response(
            GatewayErrorCode::MissingField,
            "Prompt is required for idea generation.",
        );
    };

    let url = &state.config.backends.ideas.url;
    match state.client.post_json(url, &json!({ "prompt": prompt })).await {
        Ok(mut data) => match data.get_mut("ideas").map(Value::take) {
            Some(ideas @ Value::Array(_)) => json_response(StatusCode::OK, &json!({ "ideas": ideas })),
            other => {
                error!(
                    route = "ideagenerator",
                    url = %url,
                    ideas = ?other,
                    "Idea backend returned a malformed response"
                );
                json_error_response(
                    GatewayErrorCode::InvalidBackendResponse,
                    "Invalid response from idea generator.",
                )
            }
        },
        Err(e) => {
            error!(route = "ideagenerator", url = %url, error = %e, "Idea backend call failed");
            json_error_response(GatewayErrorCode::BackendFailed, "Failed to generate ideas.")
        }
    }
}

/// `POST /describe`
pub async fn describe(state: &AppState, body: &Value) -> Response<GatewayBody> {
    let Some(topic) = required_field(body, "topic") else {
        return json_error_response(
            GatewayErrorCode::MissingField,
            "Topic is required for detailed explanation.",
        );
    };

    let url = &state.config.backends.description.url;
    match state.client.post_json(url, &json!({ "topic": topic })).await {
        Ok(data) => match data.get("description").and_then(Value::as_str) {
            Some(description) if !description.is_empty() => {
                json_response(StatusCode::OK, &json!({ "description": description }))
            }
            _ => {
                // The description service reports its own failures as {"error": ...} with 200
                error!(
                    route = "describe",
                    url = %url,
                    backend_error = ?data.get("error"),
                    "Description backend returned no description"
                );
                json_error_response(
                    GatewayErrorCode::InvalidBackendResponse,
                    "No description received from description backend.",
                )
            }
        },
        Err(e) => {
            error!(route = "describe", url = %url, error = %e, "Description backend call failed");
            json_error_response(GatewayErrorCode::BackendFailed, "Failed to fetch description.")
        }
    }
}

/// `POST /generatepdf`
///
/// The backend body is handed to hyper as-is, so bytes are forwarded as they
/// arrive and flow control pauses the backend when the client is slow. If the
/// client goes away hyper drops the body, which closes the backend connection.
pub async fn generate_pdf(state: &AppState, body: &Value) -> Response<GatewayBody> {
    let Some(text) = required_field(body, "text") else {
        return json_error_response(
            GatewayErrorCode::MissingField,
            "Text is required for PDF generation.",
        );
    };

    let url = &state.config.backends.pdf.url;
    let backend_response = match state.client.post_stream(url, &json!({ "text": text })).await {
        Ok(response) => response,
        Err(e) => {
            error!(route = "generatepdf", url = %url, error = %e, "PDF backend call failed");
            return json_error_response(GatewayErrorCode::BackendFailed, "Failed to generate PDF.");
        }
    };

    let (parts, backend_body) = backend_response.into_parts();
    debug!(
        route = "generatepdf",
        content_length = ?parts.headers.get(CONTENT_LENGTH),
        "Streaming PDF from backend"
    );

    let mut response = Response::new(backend_body.boxed());
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/pdf"));
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_static(PDF_CONTENT_DISPOSITION),
    );
    if let Some(length) = parts.headers.get(CONTENT_LENGTH) {
        headers.insert(CONTENT_LENGTH, length.clone());
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with_unreachable_backends() -> AppState {
        let mut config = Config::default();
        // Port 9 (discard) is almost never served on loopback
        for backend in [
            &mut config.backends.summarizer,
            &mut config.backends.description,
            &mut config.backends.ideas,
            &mut config.backends.pdf,
        ] {
            backend.url = "http://127.0.0.1:9/unreachable".to_string();
        }
        AppState::new(Arc::new(config))
    }

    async fn body_json(response: Response<GatewayBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_required_field() {
        let body = json!({"text": "  hello ", "blank": "   ", "num": 5, "empty": ""});
        assert_eq!(required_field(&body, "text"), Some("  hello "));
        assert_eq!(required_field(&body, "blank"), None);
        assert_eq!(required_field(&body, "empty"), None);
        assert_eq!(required_field(&body, "num"), None);
        assert_eq!(required_field(&body, "missing"), None);
        assert_eq!(required_field(&json!(["text"]), "text"), None);
    }

    #[tokio::test]
    async fn test_health() {
        let response = health();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], HEALTH_MESSAGE.as_bytes());
    }

    #[tokio::test]
    async fn test_validation_happens_before_backend_call() {
        let state = state_with_unreachable_backends();

        let cases = [
            ("text", summarize(&state, &json!({"text": " "})).await),
            ("prompt", generate_ideas(&state, &json!({})).await),
            ("topic", describe(&state, &json!({"topic": "\t\n"})).await),
            ("text", generate_pdf(&state, &json!({"text": ""})).await),
        ];

        for (field, response) in cases {
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "field {}", field);
            let body = body_json(response).await;
            let message = body["error"].as_str().unwrap();
            assert!(message.to_lowercase().contains(field), "message {:?}", message);
        }

        assert_eq!(state.client.stats().get_total_requests(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_backend_yields_generic_500() {
        let state = state_with_unreachable_backends();

        let response = summarize(&state, &json!({"text": "Some text."})).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body_json(response).await, json!({"error": "Failed to summarize text."}));

        let response = generate_pdf(&state, &json!({"text": "Some text."})).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            "application/json"
        );

        assert_eq!(state.client.stats().get_failed_requests(), 2);
    }
}
