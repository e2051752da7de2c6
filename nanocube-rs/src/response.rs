//! Provides the response sent back for an endpoint call.
//!
//! Every response is either JSON or a binary octet stream. Errors are rendered as JSON objects
//! like `{"error": "..."}` so that clients only need a single parsing path.
//!
//! # Example
//!
//! ```
//! # use nanocube::response::Response;
//! # use hyper::StatusCode;
//! let response = Response::error(StatusCode::BAD_REQUEST, "Unknown dimension");
//! assert_eq!(response.status(), StatusCode::BAD_REQUEST);
//! assert_eq!(response.content_type(), Some(nanocube::response::CONTENT_TYPE_JSON));
//! assert_eq!(&response.body()[..], br#"{"error":"Unknown dimension"}"#);
//! ```
use bytes::Bytes;
use hyper::header::{HeaderValue, ACCESS_CONTROL_ALLOW_ORIGIN, CONTENT_TYPE};
use hyper::{Body, StatusCode};
use serde_json::json;

/// The content type used for JSON payloads.
pub const CONTENT_TYPE_JSON: &str = "application/json";

/// The content type used for binary payloads.
pub const CONTENT_TYPE_BINARY: &str = "application/octet-stream";

/// The response of an endpoint before it is handed to the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
}

impl Response {
    /// Creates a response carrying the given JSON document.
    pub fn json(document: &serde_json::Value) -> Response {
        Response {
            status: StatusCode::OK,
            content_type: Some(CONTENT_TYPE_JSON),
            body: Bytes::from(document.to_string()),
        }
    }

    /// Creates a JSON response carrying the given text as JSON string.
    pub fn text(text: &str) -> Response {
        Response::json(&json!(text))
    }

    /// Creates a binary response.
    pub fn octet_stream(data: Vec<u8>) -> Response {
        Response {
            status: StatusCode::OK,
            content_type: Some(CONTENT_TYPE_BINARY),
            body: Bytes::from(data),
        }
    }

    /// Creates a response without content.
    pub fn empty() -> Response {
        Response {
            status: StatusCode::NO_CONTENT,
            content_type: None,
            body: Bytes::new(),
        }
    }

    /// Creates a JSON error response with the given status.
    pub fn error(status: StatusCode, message: &str) -> Response {
        Response {
            status,
            ..Response::json(&json!({ "error": message }))
        }
    }

    /// Returns the HTTP status.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the content type, if there is a body.
    pub fn content_type(&self) -> Option<&'static str> {
        self.content_type
    }

    /// Returns the body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Converts this into an HTTP response.
    pub fn complete(self) -> hyper::Response<Body> {
        let mut response = hyper::Response::new(Body::from(self.body));
        *response.status_mut() = self.status;

        let headers = response.headers_mut();
        let _ = headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        if let Some(content_type) = self.content_type {
            let _ = headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }

        response
    }
}

#[cfg(test)]
mod tests {
    use crate::response::{Response, CONTENT_TYPE_BINARY, CONTENT_TYPE_JSON};
    use hyper::StatusCode;

    #[test]
    fn text_is_wrapped_as_json_string() {
        let response = Response::text("line \"one\"\nline two");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.content_type(), Some(CONTENT_TYPE_JSON));
        assert_eq!(&response.body()[..], br#""line \"one\"\nline two""#);
    }

    #[test]
    fn completed_responses_carry_headers() {
        let response = Response::octet_stream(vec![1, 2, 3]).complete();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            CONTENT_TYPE_BINARY
        );
        assert_eq!(
            response.headers()["access-control-allow-origin"]
                .to_str()
                .unwrap(),
            "*"
        );

        let empty = Response::empty().complete();
        assert_eq!(empty.status(), StatusCode::NO_CONTENT);
        assert_eq!(empty.headers().get("content-type").is_none(), true);
    }
}
