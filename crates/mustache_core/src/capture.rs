use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::controller::AnchorId;
use crate::node::NodeId;

/// One overlay as it appeared in a rendered frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySnapshot {
    pub anchor: AnchorId,
    pub node: NodeId,
    pub feature: String,
    pub variant: String,
    pub translation: Vec3,
    pub rotation: Quat,
}

/// Description of a composited frame handed to the capture backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositedFrame {
    /// Seconds since the application started.
    pub timestamp: f64,
    pub overlays: Vec<OverlaySnapshot>,
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("capture has not been started")]
    NotStarted,
    #[error("capture worker stopped unexpectedly")]
    WorkerLost,
}

/// Opens recordings. Each call to [`start`](Self::start) yields an
/// independent [`CaptureSink`], so a recording still draining after teardown
/// never shares state with the next one.
pub trait CaptureBackend: Send + Sync + 'static {
    fn start(&self) -> Result<Box<dyn CaptureSink>, CaptureError>;
}

/// One recording in progress.
///
/// All methods may block and are only called from the background worker.
pub trait CaptureSink: Send {
    fn write_frame(&mut self, frame: &CompositedFrame) -> Result<(), CaptureError>;
    /// Closes the recording and returns the file it was written to.
    fn finish(self: Box<Self>) -> Result<PathBuf, CaptureError>;
    /// Abandons the recording.
    fn discard(self: Box<Self>);
}

/// Writes each frame as one JSON line into `recording-<id>.jsonl`.
pub struct FrameLogCapture {
    dir: PathBuf,
}

impl FrameLogCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl CaptureBackend for FrameLogCapture {
    fn start(&self) -> Result<Box<dyn CaptureSink>, CaptureError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(format!("recording-{}.jsonl", nanoid::nanoid!()));
        let writer = BufWriter::new(File::create(&path)?);
        debug!(path = %path.display(), "capture file opened");
        Ok(Box::new(FrameLog { path, writer }))
    }
}

struct FrameLog {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl CaptureSink for FrameLog {
    fn write_frame(&mut self, frame: &CompositedFrame) -> Result<(), CaptureError> {
        serde_json::to_writer(&mut self.writer, frame)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    fn finish(mut self: Box<Self>) -> Result<PathBuf, CaptureError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(self.path)
    }

    fn discard(self: Box<Self>) {
        let FrameLog { path, writer } = *self;
        drop(writer);
        if let Err(err) = fs::remove_file(&path) {
            warn!(path = %path.display(), "failed to remove discarded capture: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::BufRead;

    use super::*;
    use crate::feature::VariantSet;
    use crate::node::OverlayNode;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("mustache-capture-{}-{}", name, nanoid::nanoid!(8)))
    }

    fn node_id() -> NodeId {
        let variants = VariantSet::new(["mustache1"]).unwrap();
        OverlayNode::create(0, &variants).id()
    }

    fn read_lines(path: &Path) -> Vec<String> {
        io::BufReader::new(File::open(path).unwrap())
            .lines()
            .collect::<Result<_, _>>()
            .unwrap()
    }

    fn frame(node: NodeId, timestamp: f64) -> CompositedFrame {
        CompositedFrame {
            timestamp,
            overlays: vec![OverlaySnapshot {
                anchor: AnchorId::from("face"),
                node,
                feature: "mustache".into(),
                variant: "mustache2".into(),
                translation: Vec3::new(0.0, -0.25, 0.5),
                rotation: Quat::IDENTITY,
            }],
        }
    }

    #[test]
    fn writes_one_line_per_frame() {
        let dir = scratch_dir("lines");
        let node = node_id();
        let capture = FrameLogCapture::new(&dir);
        let mut sink = capture.start().unwrap();
        for i in 0..3 {
            sink.write_frame(&frame(node, i as f64 / 30.0)).unwrap();
        }
        let path = sink.finish().unwrap();
        assert!(path.starts_with(&dir));

        let lines = read_lines(&path);
        assert_eq!(lines.len(), 3);
        let decoded: CompositedFrame = serde_json::from_str(&lines[2]).unwrap();
        assert_eq!(decoded, frame(node, 2.0 / 30.0));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn overlapping_recordings_stay_separate() {
        let dir = scratch_dir("overlap");
        let node = node_id();
        let capture = FrameLogCapture::new(&dir);
        let mut first = capture.start().unwrap();
        first.write_frame(&frame(node, 0.0)).unwrap();

        let mut second = capture.start().unwrap();
        second.write_frame(&frame(node, 1.0)).unwrap();
        first.write_frame(&frame(node, 0.5)).unwrap();

        let first = first.finish().unwrap();
        let second = second.finish().unwrap();
        assert_ne!(first, second);
        assert_eq!(read_lines(&first).len(), 2);
        assert_eq!(read_lines(&second).len(), 1);

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn discard_removes_file() {
        let dir = scratch_dir("discard");
        let capture = FrameLogCapture::new(&dir);
        let mut sink = capture.start().unwrap();
        sink.write_frame(&frame(node_id(), 0.0)).unwrap();
        sink.discard();
        assert_eq!(fs::read_dir(&dir).unwrap().count(), 0);
        fs::remove_dir_all(dir).unwrap();
    }
}
