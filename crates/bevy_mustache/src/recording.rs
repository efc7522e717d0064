use bevy::prelude::*;
use tracing::{info, warn};

use mustache_core::{
    CompositedFrame, FailureReason, OverlaySnapshot, RecordingError, RecordingEvent,
    RecordingEvents, RecordingSession, RecordingStatus,
};

use crate::overlay::OverlayEntity;
use crate::tracking::{FaceAnchorEntity, Tracking};

/// A user-facing message about the outcome of an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: &'static str,
    pub message: String,
    pub action: &'static str,
}

impl Notice {
    pub fn for_event(event: &RecordingEvent) -> Self {
        match event {
            RecordingEvent::Saved(path) => Self {
                title: "Saved",
                message: format!("Video successfully saved to {}", path.display()),
                action: "Yay",
            },
            RecordingEvent::Failed(FailureReason::PermissionUndetermined) => Self {
                title: "Enable Access",
                message: "Please allow access to the media library to save video.".into(),
                action: "Later",
            },
            RecordingEvent::Failed(reason) if reason.needs_settings() => Self {
                title: "Enable Access",
                message: format!("{}. Grant access in your settings to save video.", capitalize(&reason.to_string())),
                action: "OK",
            },
            RecordingEvent::Failed(reason) => Self {
                title: "Recording Failed",
                message: format!("The video could not be saved: {}", reason),
                action: "OK",
            },
        }
    }
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[derive(Resource)]
pub struct Recorder {
    session: RecordingSession,
    events: RecordingEvents,
    pub notice: Option<Notice>,
}

impl Recorder {
    pub fn new(session: RecordingSession, events: RecordingEvents) -> Self {
        Self {
            session,
            events,
            notice: None,
        }
    }

    pub fn status(&self) -> RecordingStatus {
        self.session.status()
    }

    /// Starts recording when ready, stops and exports when recording.
    pub fn toggle(&self) -> Result<(), RecordingError> {
        if self.session.is_recording() {
            self.session.stop_and_export()
        } else {
            self.session.start()
        }
    }
}

pub fn prepare_recorder(recorder: Res<Recorder>) {
    if let Err(err) = recorder.session.prepare() {
        warn!("recorder not ready: {}", err);
    }
}

pub fn toggle_recording(keys: Res<ButtonInput<KeyCode>>, recorder: Res<Recorder>) {
    if keys.just_pressed(KeyCode::Space) {
        // Rejections are already logged by the session.
        recorder.toggle().ok();
    }
}

/// Hands the current overlay scene to the recorder while recording.
pub fn capture_frames(
    recorder: Res<Recorder>,
    tracking: Res<Tracking>,
    time: Res<Time>,
    anchors: Query<(&FaceAnchorEntity, &Transform)>,
    overlays: Query<(&OverlayEntity, &Transform, &Parent)>,
) {
    if !recorder.session.is_recording() {
        return;
    }

    let features = tracking.features();
    let overlays = overlays
        .iter()
        .filter_map(|(overlay, local, parent)| {
            let (anchor, anchor_transform) = anchors.get(parent.get()).ok()?;
            let node = overlay.node.lock();
            node.placement()?;
            let world = anchor_transform.mul_transform(*local);
            Some(OverlaySnapshot {
                anchor: anchor.id.clone(),
                node: node.id(),
                feature: features.entry(node.feature()).ok()?.feature.name.clone(),
                variant: features.variant_at(node.feature(), node.variant()).ok()?.to_string(),
                translation: world.translation,
                rotation: world.rotation,
            })
        })
        .collect();

    recorder.session.capture_frame(CompositedFrame {
        timestamp: time.elapsed_seconds_f64(),
        overlays,
    });
}

pub fn poll_recording_events(mut recorder: ResMut<Recorder>) {
    while let Some(event) = recorder.events.try_next() {
        match &event {
            RecordingEvent::Saved(path) => info!(path = %path.display(), "recording exported"),
            RecordingEvent::Failed(reason) => warn!("recording not exported: {}", reason),
        }
        recorder.notice = Some(Notice::for_event(&event));
    }
}
