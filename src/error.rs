//! Error handling and client-facing error responses for the gateway

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

/// Response body type produced by every gateway route
pub type GatewayBody = BoxBody<Bytes, hyper::Error>;

/// Header carrying the machine-readable error code
pub const X_GATEWAY_ERROR: &str = "x-gateway-error";

/// Error codes for gateway errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorCode {
    /// Required request field is missing or blank
    MissingField,
    /// Request body is not valid JSON
    InvalidBody,
    /// Request body exceeds the configured limit
    PayloadTooLarge,
    /// No route for this method and path
    NotFound,
    /// Backend could not be reached or answered with an error
    BackendFailed,
    /// Backend answered but the payload had the wrong shape
    InvalidBackendResponse,
}

impl GatewayErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayErrorCode::MissingField => StatusCode::BAD_REQUEST,
            GatewayErrorCode::InvalidBody => StatusCode::BAD_REQUEST,
            GatewayErrorCode::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayErrorCode::NotFound => StatusCode::NOT_FOUND,
            GatewayErrorCode::BackendFailed => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayErrorCode::InvalidBackendResponse => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Gateway-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            GatewayErrorCode::MissingField => "MISSING_FIELD",
            GatewayErrorCode::InvalidBody => "INVALID_BODY",
            GatewayErrorCode::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            GatewayErrorCode::NotFound => "NOT_FOUND",
            GatewayErrorCode::BackendFailed => "BACKEND_FAILED",
            GatewayErrorCode::InvalidBackendResponse => "INVALID_BACKEND_RESPONSE",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"error":"{}"}}"#, self.error.replace('\"', "\\\""))
        })
    }
}

/// Wrap a fully buffered body
pub fn full_body(body: impl Into<Bytes>) -> GatewayBody {
    Full::new(body.into()).map_err(|never| match never {}).boxed()
}

/// Create a JSON response with the given status
pub fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .body(full_body(value.to_string()))
        .expect("valid response with StatusCode enum and static header")
}

/// Create a plain-text response with the given status
pub fn text_response(status: StatusCode, body: impl Into<Bytes>) -> Response<GatewayBody> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static header")
}

/// Create a `{"error": ...}` response with X-Gateway-Error header
pub fn json_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<GatewayBody> {
    let body = ErrorResponse::new(message).to_json();

    Response::builder()
        .status(code.status_code())
        .header(hyper::header::CONTENT_TYPE, "application/json")
        .header(X_GATEWAY_ERROR, code.as_header_value())
        .body(full_body(body))
        .expect("valid response with StatusCode enum and static headers")
}

/// Create a plain-text error from the body-parsing layer
///
/// These deliberately do not use the `{"error": ...}` shape so that clients can
/// tell a malformed request apart from a route-level rejection.
pub fn text_error_response(
    code: GatewayErrorCode,
    message: impl Into<String>,
) -> Response<GatewayBody> {
    let mut response = text_response(code.status_code(), message.into());
    response.headers_mut().insert(
        X_GATEWAY_ERROR,
        hyper::header::HeaderValue::from_static(code.as_header_value()),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_status_codes() {
        assert_eq!(
            GatewayErrorCode::MissingField.status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            GatewayErrorCode::PayloadTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            GatewayErrorCode::BackendFailed.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            GatewayErrorCode::InvalidBackendResponse.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_response_json() {
        let json = ErrorResponse::new("Text is required for summarization.").to_json();
        assert_eq!(json, r#"{"error":"Text is required for summarization."}"#);
    }

    #[test]
    fn test_json_error_response() {
        let response = json_error_response(GatewayErrorCode::BackendFailed, "Failed to generate PDF.");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("Content-Type").unwrap(),
            "application/json"
        );
        assert_eq!(
            response.headers().get(X_GATEWAY_ERROR).unwrap(),
            "BACKEND_FAILED"
        );
    }

    #[test]
    fn test_text_error_response_is_not_json() {
        let response = text_error_response(GatewayErrorCode::InvalidBody, "Invalid JSON body");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(response
            .headers()
            .get("Content-Type")
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/plain"));
        assert_eq!(response.headers().get(X_GATEWAY_ERROR).unwrap(), "INVALID_BODY");
    }

    #[tokio::test]
    async fn test_json_response_body() {
        let response = json_response(StatusCode::OK, &serde_json::json!({"summary": "ok"}));
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], br#"{"summary":"ok"}"#);
    }
}
