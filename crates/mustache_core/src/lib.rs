//! Engine-agnostic core of the mustache face filter: keeping overlays pinned
//! to tracked faces, and recording the composited result.

pub mod capture;
pub mod controller;
pub mod error;
pub mod feature;
pub mod media;
pub mod node;
pub mod recording;

pub use capture::{
    CaptureBackend, CaptureError, CaptureSink, CompositedFrame, FrameLogCapture, OverlaySnapshot,
};
pub use controller::{AnchorEvent, AnchorId, OverlayController, SceneGraph, SceneNode};
pub use error::OverlayError;
pub use feature::{Feature, FeatureEntry, OverlayFeatureMap, VariantSet};
pub use media::{Authorization, DirectoryLibrary, ExportError, MediaLibrary};
pub use node::{NodeId, OverlayHandle, OverlayNode, Placement};
pub use recording::{
    FailureReason, RecordingError, RecordingEvent, RecordingEvents, RecordingSession,
    RecordingStatus,
};
