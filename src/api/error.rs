use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;

/// `{"message": "success", "data": ...}`
#[derive(Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub message: &'static str,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            message: "success",
            data,
        })
    }
}

#[derive(Serialize)]
struct ErrorData {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    redirect: Option<String>,
}

/// Error responses, rendered as `{"message": "error", "data": {"error": ..., "redirect": ...}}`
#[derive(Debug, PartialEq)]
pub enum ApiError {
    BadRequest(String),
    /// 401, optionally pointing the client back at the authorization flow
    Unauthorized {
        message: String,
        redirect: Option<String>,
    },
    ServerError(String),
    BadGateway(String),
}

impl ApiError {
    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            message: message.into(),
            redirect: None,
        }
    }

    pub fn reauthorize(message: impl Into<String>, redirect: impl Into<String>) -> Self {
        ApiError::Unauthorized {
            message: message.into(),
            redirect: Some(redirect.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, redirect) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Unauthorized { message, redirect } => {
                (StatusCode::UNAUTHORIZED, message, redirect)
            }
            ApiError::ServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg, None),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg, None),
        };

        let body = Json(ApiResponse {
            message: "error",
            data: ErrorData { error, redirect },
        });

        (status, body).into_response()
    }
}
