//! Responses returned to the originating client.

use axum::{
    body::Body as AxumBody,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::capture::ResponseCapture;
use crate::error::CaptureError;
use crate::message::Body;

/// The upstream response, unchanged.
pub fn upstream(capture: ResponseCapture) -> Response {
    let status = StatusCode::from_u16(capture.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(AxumBody::from(capture.body));
    *response.status_mut() = status;
    *response.headers_mut() = capture.headers;
    response
}

/// The upstream response with a body replaced at a breakpoint.
///
/// The edit is plain text, so the original encoding and length no longer apply.
pub fn edited(capture: ResponseCapture, body: &Body) -> Response {
    let mut capture = capture;
    capture.headers.remove(header::CONTENT_ENCODING);
    capture.headers.remove(header::CONTENT_LENGTH);
    capture.body = edited_bytes(body).into();
    upstream(capture)
}

/// Serialize an edited body. Non-JSON responses are captured wrapped as
/// `{"body": text}`; that wrapper is undone here.
pub fn edited_bytes(body: &Body) -> Vec<u8> {
    match body {
        Body::Json(Value::Object(map)) if map.len() == 1 => match map.get("body") {
            Some(Value::String(text)) => text.clone().into_bytes(),
            _ => body.text().into_owned().into_bytes(),
        },
        _ => body.text().into_owned().into_bytes(),
    }
}

/// `{ "error": ... }` with the error's status.
pub fn error(err: &CaptureError) -> Response {
    let status = StatusCode::from_u16(err.status()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

/// Description of the proxy, served for `/` when no route claims it.
pub fn landing(routes: usize, viewers: usize) -> Response {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "viewer": "/_viewer/ws",
        "routes": routes,
        "viewers": viewers,
    }))
    .into_response()
}

pub fn connect_not_supported() -> Response {
    (
        StatusCode::NOT_IMPLEMENTED,
        Json(json!({ "error": "CONNECT tunnelling is not supported" })),
    )
        .into_response()
}

pub fn payload_too_large(limit: usize) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(json!({ "error": format!("Request body exceeds {limit} bytes") })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};
    use bytes::Bytes;

    #[test]
    fn test_edited_bytes_unwraps_text_bodies() {
        assert_eq!(edited_bytes(&Body::Json(json!({"body": "<p>hi</p>"}))), b"<p>hi</p>");
        assert_eq!(edited_bytes(&Body::Json(json!({"ok": true}))), br#"{"ok":true}"#);
        assert_eq!(edited_bytes(&Body::Raw("plain".into())), b"plain");
    }

    #[test]
    fn test_edited_drops_encoding() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("20"));
        headers.insert("x-upstream", HeaderValue::from_static("1"));
        let capture = ResponseCapture {
            status: 201,
            headers,
            body: Bytes::from_static(b"compressed"),
        };

        let response = edited(capture, &Body::Json(json!({"id": 1})));
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::CONTENT_ENCODING).is_none());
        assert_eq!(response.headers()["x-upstream"], "1");
    }

    #[test]
    fn test_error_status() {
        let response = error(&CaptureError::RouteNotFound { path: "/unknown".into() });
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
