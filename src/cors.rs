//! Permissive cross-origin handling
//!
//! Every response allows any origin. Preflight requests are answered directly
//! by the gateway and never reach a route handler.

use hyper::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_REQUEST_HEADERS, ACCESS_CONTROL_REQUEST_METHOD,
    CONTENT_LENGTH, VARY,
};
use hyper::{Method, Request, Response, StatusCode};

use crate::error::{full_body, GatewayBody};

const ALLOWED_METHODS: &str = "GET,HEAD,PUT,PATCH,POST,DELETE";

/// Whether `req` is a CORS preflight
pub fn is_preflight<B>(req: &Request<B>) -> bool {
    req.method() == Method::OPTIONS && req.headers().contains_key(ACCESS_CONTROL_REQUEST_METHOD)
}

/// Answer a preflight request with 204 No Content
pub fn preflight_response<B>(req: &Request<B>) -> Response<GatewayBody> {
    let mut response = Response::builder()
        .status(StatusCode::NO_CONTENT)
        .header(ACCESS_CONTROL_ALLOW_METHODS, ALLOWED_METHODS)
        .header(CONTENT_LENGTH, "0")
        .body(full_body(""))
        .expect("valid response with static headers");

    // Reflect whatever headers the browser asked for
    if let Some(requested) = req.headers().get(ACCESS_CONTROL_REQUEST_HEADERS) {
        let headers = response.headers_mut();
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
        headers.append(VARY, HeaderValue::from_static("Access-Control-Request-Headers"));
    }

    apply_cors_headers(response.headers_mut());
    response
}

/// Allow every origin on an outgoing response
pub fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
}
