//! Response-side capture: decompression and body shaping.

use std::borrow::Cow;
use std::io::Read;

use bytes::Bytes;
use flate2::read::{DeflateDecoder, MultiGzDecoder, ZlibDecoder};
use serde_json::json;

use axum::http::HeaderMap;

use crate::capture::request::truncated_text;
use crate::message::Body;

/// An upstream response as returned to the client.
#[derive(Debug, Clone)]
pub struct ResponseCapture {
    pub status: u16,
    /// Headers as received, repeated names included.
    pub headers: HeaderMap,
    /// Body bytes exactly as received (still encoded).
    pub body: Bytes,
}

impl ResponseCapture {
    /// Body as captured in the Message. Returns whether it was truncated.
    pub fn captured_body(&self, limit: usize) -> (Body, bool) {
        let encoding = self
            .headers
            .get(axum::http::header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok());
        capture_response_body(&decode(encoding, &self.body), limit)
    }
}

/// Undo `content-encoding`. Unknown encodings and corrupt streams fall back
/// to the raw bytes.
pub fn decode<'a>(encoding: Option<&str>, bytes: &'a [u8]) -> Cow<'a, [u8]> {
    let encoding = match encoding {
        Some(e) => e.trim().to_ascii_lowercase(),
        None => return Cow::Borrowed(bytes),
    };
    let mut out = Vec::new();
    let decoded = match encoding.as_str() {
        "gzip" | "x-gzip" => MultiGzDecoder::new(bytes).read_to_end(&mut out),
        // RFC 9110 deflate is zlib-wrapped; some servers send raw deflate.
        "deflate" => ZlibDecoder::new(bytes).read_to_end(&mut out).or_else(|_| {
            out.clear();
            DeflateDecoder::new(bytes).read_to_end(&mut out)
        }),
        "" | "identity" => return Cow::Borrowed(bytes),
        other => {
            tracing::debug!(encoding = %other, "Unsupported content-encoding captured as text");
            return Cow::Borrowed(bytes);
        }
    };
    match decoded {
        Ok(_) => Cow::Owned(out),
        Err(e) => {
            tracing::debug!(encoding = %encoding, error = %e, "Failed to decode response body");
            Cow::Borrowed(bytes)
        }
    }
}

/// Parsed JSON, or `{ "body": <raw text> }` when the body is not JSON.
pub fn capture_response_body(bytes: &[u8], limit: usize) -> (Body, bool) {
    let (text, truncated) = truncated_text(bytes, limit);
    if !truncated {
        if let Body::Json(value) = Body::parse(&text) {
            return (Body::Json(value), false);
        }
    }
    (Body::Json(json!({ "body": text })), truncated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::{GzEncoder, ZlibEncoder};
    use flate2::Compression;
    use std::io::Write;

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(data).unwrap();
        enc.finish().unwrap()
    }

    #[test]
    fn test_gzip_json_body() {
        let mut headers = HeaderMap::new();
        headers.insert("content-encoding", axum::http::HeaderValue::from_static("gzip"));
        let capture = ResponseCapture {
            status: 200,
            headers,
            body: Bytes::from(gzip(br#"{"ok":true}"#)),
        };
        assert_eq!(capture.captured_body(1024), (Body::Json(json!({"ok": true})), false));
    }

    #[test]
    fn test_deflate_zlib() {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"hello").unwrap();
        let data = enc.finish().unwrap();
        assert_eq!(decode(Some("deflate"), &data).as_ref(), b"hello");
    }

    #[test]
    fn test_non_json_is_wrapped() {
        assert_eq!(
            capture_response_body(b"<html></html>", 1024),
            (Body::Json(json!({"body": "<html></html>"})), false)
        );
    }

    #[test]
    fn test_truncated_json_is_wrapped() {
        let (body, truncated) = capture_response_body(br#"{"long":"value"}"#, 5);
        assert!(truncated);
        assert_eq!(body, Body::Json(json!({"body": "{\"lon"})));
    }

    #[test]
    fn test_corrupt_gzip_falls_back_to_raw() {
        assert_eq!(decode(Some("gzip"), b"plain").as_ref(), b"plain");
        assert_eq!(decode(Some("br"), b"plain").as_ref(), b"plain");
    }
}
