use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;

use crate::logic::operations::Operation;
use crate::model::{ApiUrl, OperationInfo, API_VERSION};

/// Synchronous success envelope
#[derive(Debug)]
pub struct SyncResponse<T: Serialize> {
    metadata: T,
    etag: Option<String>,
}

impl<T: Serialize> SyncResponse<T> {
    pub fn new(metadata: T) -> Self {
        Self {
            metadata,
            etag: None,
        }
    }

    pub fn with_etag(mut self, etag: String) -> Self {
        self.etag = Some(etag);
        self
    }
}

impl<T: Serialize> IntoResponse for SyncResponse<T> {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "type": "sync",
            "status": "Success",
            "status_code": 200,
            "metadata": self.metadata,
        }));

        let mut response = (StatusCode::OK, body).into_response();
        if let Some(etag) = self.etag {
            if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
                response.headers_mut().insert(header::ETAG, value);
            }
        }
        response
    }
}

/// 202 envelope pointing the caller at a freshly created operation
#[derive(Debug)]
pub struct OperationResponse {
    url: String,
    info: OperationInfo,
}

impl OperationResponse {
    pub fn new(op: &Operation) -> Self {
        Self {
            url: operation_url(op.id()),
            info: op.info(),
        }
    }
}

pub fn operation_url(id: &str) -> String {
    ApiUrl::new()
        .path([API_VERSION, "operations", id])
        .to_string()
}

impl IntoResponse for OperationResponse {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "type": "async",
            "status": "Operation created",
            "status_code": 100,
            "operation": self.url,
            "metadata": self.info,
        }));

        let mut response = (StatusCode::ACCEPTED, body).into_response();
        if let Ok(value) = HeaderValue::from_str(&self.url) {
            response.headers_mut().insert(header::LOCATION, value);
        }
        response
    }
}
