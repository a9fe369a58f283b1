//! Shared helpers for the integration tests.

#![allow(dead_code)]

use axum::body::Body;
use axum::http::{Request, Response, StatusCode};
use serde_json::Value;
use tower::ServiceExt;

use secret_card::{router, AppState};

pub const BOUNDARY: &str = "----secretcardtestboundary";

/// One multipart part: (field name, file name, content type, bytes).
pub type Part<'a> = (&'a str, &'a str, &'a str, Vec<u8>);

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for (field, filename, content_type, bytes) in parts {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// `n` small fake PNG parts under the `files` field.
pub fn png_parts(n: usize) -> Vec<Part<'static>> {
    (0..n).map(|i| ("files", "card.png", "image/png", vec![0x89, b'P', b'N', b'G', i as u8])).collect()
}

pub async fn upload(state: &AppState, room: &str, parts: &[Part<'_>]) -> Response<Body> {
    let req = Request::post(format!("/upload/{room}"))
        .header("content-type", format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(multipart_body(parts)))
        .unwrap();
    router(state.clone()).oneshot(req).await.unwrap()
}

pub async fn get(state: &AppState, uri: &str) -> Response<Body> {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    router(state.clone()).oneshot(req).await.unwrap()
}

pub async fn body_bytes(resp: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()
}

pub async fn json_body(resp: Response<Body>) -> (StatusCode, Value) {
    let status = resp.status();
    let bytes = body_bytes(resp).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}
