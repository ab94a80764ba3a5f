//! The response envelope: `{ statusCode, data, error }` on every API route.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use super::error::ErrorBody;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T: Serialize> {
    pub status_code: u16,
    pub data: Option<T>,
    pub error: Option<ErrorBody>,
}

/// 200 with data.
pub fn ok<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::OK, data)
}

/// 201 with data.
pub fn created<T: Serialize>(data: T) -> Response {
    with_status(StatusCode::CREATED, data)
}

fn with_status<T: Serialize>(status: StatusCode, data: T) -> Response {
    let envelope = Envelope {
        status_code: status.as_u16(),
        data: Some(data),
        error: None,
    };
    (status, Json(envelope)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_serializes_camel_case() {
        let envelope = Envelope {
            status_code: 200,
            data: Some(serde_json::json!({"id": 1})),
            error: None,
        };
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["data"]["id"], 1);
        assert!(json["error"].is_null());
    }
}
