//! Response constructors and the wire error envelope.
//!
//! Errors leave the service as
//! `{"error": <status-phrase>, "message": <detail>}` with
//! `Cache-Control: no-cache, no-store, must-revalidate`, echoing any
//! `x-request-id` the caller supplied.

use {
    super::Response,
    crate::Error,
    crate::utils::X_REQUEST_ID,
    bytes::Bytes,
    http::{HeaderValue, StatusCode, header},
    serde::Serialize,
};

const NO_CACHE: &str = "no-cache, no-store, must-revalidate";

/// Builds a JSON response from any serializable value.
///
/// Serialization failures degrade to a 500 envelope rather than a panic.
pub fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => {
            let mut response = http::Response::new(Bytes::from(body));
            *response.status_mut() = status;
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            response
        }
        Err(err) => error_response(&Error::internal(format!("response encoding: {err}")), None),
    }
}

/// Builds a plain-text response.
pub fn text_response(status: StatusCode, body: &str) -> Response {
    let mut response = http::Response::new(Bytes::copy_from_slice(body.as_bytes()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

/// Builds an empty-body response, used for CORS pre-flight answers.
pub fn empty_response(status: StatusCode) -> Response {
    let mut response = http::Response::new(Bytes::new());
    *response.status_mut() = status;
    response
}

#[derive(Serialize)]
struct ErrorEnvelope<'a> {
    error: &'a str,
    message: String,
}

/// Builds the wire error envelope for an [`Error`].
///
/// 4xx errors describe a caller problem and are not logged here; 5xx
/// details are logged by the dispatch path with the request ID, and the
/// body carries only an opaque message for internal kinds.
pub fn error_response(err: &Error, request_id: Option<&str>) -> Response {
    let status = err.status_code();
    let message = if status.is_server_error() {
        status
            .canonical_reason()
            .unwrap_or("internal error")
            .to_string()
    } else {
        err.to_string()
    };

    let envelope = ErrorEnvelope {
        error: status.canonical_reason().unwrap_or("error"),
        message,
    };

    let body = serde_json::to_vec(&envelope).unwrap_or_else(|_| b"{}".to_vec());
    let mut response = http::Response::new(Bytes::from(body));
    *response.status_mut() = status;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    if let Some(id) = request_id
        && let Ok(value) = HeaderValue::from_str(id)
    {
        headers.insert(X_REQUEST_ID, value);
    }
    response
}

#[derive(Serialize)]
struct ChallengeBody<'a> {
    challenge: &'a str,
    realm: &'a str,
}

/// Builds a Basic auth challenge: 401 with `WWW-Authenticate` and a JSON
/// body describing the challenge type.
pub fn basic_auth_challenge(realm: &str) -> Response {
    let mut response = json_response(
        StatusCode::UNAUTHORIZED,
        &ChallengeBody {
            challenge: "basic",
            realm,
        },
    );
    if let Ok(value) = HeaderValue::from_str(&format!("Basic realm=\"{realm}\"")) {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, value);
    }
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(NO_CACHE));
    response
}
