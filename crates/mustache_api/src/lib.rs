use std::borrow::Cow;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use glam::{Mat4, Vec2, Vec3};
use serde::{Deserialize, Serialize};

use mustache_core::{AnchorId, RecordingError, RecordingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorCategory {
    Unknown,
    Cancelled,
    InvalidArgument,
    FailedPrecondition,
    NotFound,
    PermissionDenied,
    Unimplemented,
}

impl ErrorCategory {
    pub fn to_status_code(self) -> StatusCode {
        match self {
            ErrorCategory::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorCategory::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCategory::InvalidArgument => StatusCode::BAD_REQUEST,
            ErrorCategory::FailedPrecondition => StatusCode::CONFLICT,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorCategory::Unimplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    pub category: ErrorCategory,
    pub error_code: Cow<'static, str>,
    pub instance_id: String,
    pub message: Cow<'static, str>,
}

impl ApiError {
    pub fn with_message(
        category: ErrorCategory,
        code: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            category,
            error_code: code.into(),
            instance_id: nanoid::nanoid!(),
            message: message.into(),
        }
    }

    pub fn invalid_argument(message: impl Into<Cow<'static, str>>) -> Self {
        Self::with_message(ErrorCategory::InvalidArgument, "invalidArgument", message)
    }

    pub fn unavailable() -> Self {
        Self::with_message(ErrorCategory::Cancelled, "unavailable", "service unavailable")
    }
}

impl From<RecordingError> for ApiError {
    fn from(err: RecordingError) -> Self {
        Self::with_message(ErrorCategory::FailedPrecondition, "recordingState", err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status_code = self.category.to_status_code();
        (status_code, Json(self)).into_response()
    }
}

/// One tracked face as reported by the tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceAnchor {
    pub id: AnchorId,
    /// Anchor-to-world transform.
    #[serde(default = "identity")]
    pub transform: Mat4,
    /// Face mesh vertices in anchor space.
    pub vertices: Vec<Vec3>,
}

fn identity() -> Mat4 {
    Mat4::IDENTITY
}

/// Complete set of faces visible in the latest tracker frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFacesRequest {
    pub faces: Vec<FaceAnchor>,
}

/// A tap at viewport coordinates, in logical pixels from the top left.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TapRequest {
    pub x: f32,
    pub y: f32,
}

impl TapRequest {
    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetRecordingRequest {
    pub recording: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingResponse {
    pub status: RecordingStatus,
}
