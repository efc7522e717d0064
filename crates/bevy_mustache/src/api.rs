use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::routing::{post, put};
use axum::{Json, Router};
use bevy::prelude::{Commands, EventWriter, Res, ResMut, Resource};
use tokio::sync::mpsc;

use mustache_api::{
    ApiError, RecordingResponse, SetFacesRequest, SetRecordingRequest, TapRequest,
};
use mustache_core::RecordingSession;

use crate::overlay::{Tap, VariantVisuals};
use crate::tracking::Tracking;

/// Largest accepted request body. A face snapshot with a full mesh is well
/// under this.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

pub enum Command {
    SetFaces(SetFacesRequest),
    Tap(TapRequest),
}

pub struct ApiState {
    tx: mpsc::UnboundedSender<Command>,
    session: RecordingSession,
}

impl ApiState {
    pub fn new(session: RecordingSession) -> (Arc<Self>, ApiResource) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx, session }), ApiResource { rx })
    }

    fn send(&self, command: Command) -> Result<StatusCode, ApiError> {
        self.tx
            .send(command)
            .map(|_| StatusCode::NO_CONTENT)
            .map_err(|_| ApiError::unavailable())
    }
}

async fn put_faces(
    State(state): State<Arc<ApiState>>,
    Json(faces): Json<SetFacesRequest>,
) -> Result<StatusCode, ApiError> {
    if let Some(face) = faces.faces.iter().find(|f| f.vertices.is_empty()) {
        return Err(ApiError::invalid_argument(format!("face {} has no vertices", face.id)));
    }
    state.send(Command::SetFaces(faces))
}

async fn post_tap(
    State(state): State<Arc<ApiState>>,
    Json(tap): Json<TapRequest>,
) -> Result<StatusCode, ApiError> {
    if !tap.x.is_finite() || !tap.y.is_finite() {
        return Err(ApiError::invalid_argument("tap position must be finite"));
    }
    state.send(Command::Tap(tap))
}

async fn get_recording(State(state): State<Arc<ApiState>>) -> Json<RecordingResponse> {
    Json(RecordingResponse {
        status: state.session.status(),
    })
}

async fn put_recording(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<SetRecordingRequest>,
) -> Result<Json<RecordingResponse>, ApiError> {
    if request.recording {
        state.session.start()?;
    } else {
        state.session.stop_and_export()?;
    }
    Ok(Json(RecordingResponse {
        status: state.session.status(),
    }))
}

pub fn new_api() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/v1/faces", put(put_faces))
        .route("/v1/tap", post(post_tap))
        .route("/v1/recording", put(put_recording).get(get_recording))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}

#[derive(Resource)]
pub struct ApiResource {
    rx: mpsc::UnboundedReceiver<Command>,
}

pub fn update_api(
    mut api: ResMut<ApiResource>,
    mut commands: Commands,
    mut tracking: ResMut<Tracking>,
    visuals: Res<VariantVisuals>,
    mut taps: EventWriter<Tap>,
) {
    // Only the newest face snapshot matters; older ones are already stale.
    let mut faces = None;
    while let Ok(command) = api.rx.try_recv() {
        match command {
            Command::SetFaces(request) => faces = Some(request),
            Command::Tap(tap) => {
                taps.send(Tap(tap.position()));
            }
        }
    }

    if let Some(request) = faces {
        tracking.apply_faces(&mut commands, &visuals, &request);
    }
}
