use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::capture::{CaptureBackend, CaptureError, CaptureSink, CompositedFrame};
use crate::media::{Authorization, ExportError, MediaLibrary};

/// Frames buffered between the render loop and the capture writer.
pub const DEFAULT_FRAME_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecordingStatus {
    Idle,
    ReadyToRecord,
    Recording,
    Exporting,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("media library access was denied")]
    PermissionDenied,
    #[error("media library access is restricted")]
    PermissionRestricted,
    #[error("media library access has not been granted yet")]
    PermissionUndetermined,
    #[error("{0}")]
    Other(String),
}

impl FailureReason {
    /// Whether the user has to change a system setting before exporting can
    /// succeed, as opposed to simply being asked again later.
    pub fn needs_settings(&self) -> bool {
        matches!(
            self,
            FailureReason::PermissionDenied | FailureReason::PermissionRestricted
        )
    }

    pub fn is_permission(&self) -> bool {
        !matches!(self, FailureReason::Other(_))
    }
}

impl From<ExportError> for FailureReason {
    fn from(err: ExportError) -> Self {
        match err {
            ExportError::Permission(Authorization::Denied) => FailureReason::PermissionDenied,
            ExportError::Permission(Authorization::Restricted) => FailureReason::PermissionRestricted,
            ExportError::Permission(Authorization::NotDetermined) => FailureReason::PermissionUndetermined,
            other => FailureReason::Other(other.to_string()),
        }
    }
}

impl From<CaptureError> for FailureReason {
    fn from(err: CaptureError) -> Self {
        FailureReason::Other(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordingEvent {
    /// The recording was written to the media library at this location.
    Saved(PathBuf),
    Failed(FailureReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordingError {
    #[error("cannot {operation} while {status:?}")]
    PreconditionViolation {
        operation: &'static str,
        status: RecordingStatus,
    },
    #[error("{0} is not the finalized recording")]
    UnknownRecording(PathBuf),
}

struct State {
    status: RecordingStatus,
    generation: u64,
    frames: Option<mpsc::Sender<CompositedFrame>>,
    writer: Option<JoinHandle<Result<PathBuf, CaptureError>>>,
    finalized: Option<PathBuf>,
    pending: Vec<JoinHandle<()>>,
}

impl State {
    fn require(&self, expected: RecordingStatus, operation: &'static str) -> Result<(), RecordingError> {
        if self.status == expected {
            return Ok(());
        }
        warn!(operation, status = ?self.status, "recording request rejected");
        Err(RecordingError::PreconditionViolation {
            operation,
            status: self.status,
        })
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.pending.retain(|t| !t.is_finished());
        self.pending.push(task);
    }
}

struct Shared {
    state: Mutex<State>,
    backend: Arc<dyn CaptureBackend>,
    library: Arc<dyn MediaLibrary>,
    events: mpsc::UnboundedSender<RecordingEvent>,
    runtime: Handle,
    frame_capacity: usize,
}

impl Shared {
    fn emit(&self, event: RecordingEvent) {
        // The receiver goes away when the UI shuts down first.
        self.events.send(event).ok();
    }

    /// Returns to `ReadyToRecord` if `generation` is still the current
    /// cycle. Detached work passes `None` and leaves the status alone.
    fn resolve(&self, generation: Option<u64>) {
        let mut state = self.state.lock();
        if generation == Some(state.generation) && state.status == RecordingStatus::Exporting {
            state.status = RecordingStatus::ReadyToRecord;
            state.finalized = None;
        }
    }

    /// Records the finalized file for the current cycle. Returns false when
    /// the session was torn down while finalizing.
    fn finalized(&self, generation: u64, path: &Path) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || state.status != RecordingStatus::Exporting {
            return false;
        }
        state.finalized = Some(path.to_path_buf());
        true
    }
}

fn write_frames(
    backend: &dyn CaptureBackend,
    mut frames: mpsc::Receiver<CompositedFrame>,
) -> Result<PathBuf, CaptureError> {
    let mut sink = backend.start()?;
    let mut written = 0usize;
    while let Some(frame) = frames.blocking_recv() {
        if let Err(err) = sink.write_frame(&frame) {
            sink.discard();
            return Err(err);
        }
        written += 1;
    }
    let path = sink.finish()?;
    info!(frames = written, path = %path.display(), "recording finalized");
    Ok(path)
}

async fn finalize(
    writer: Option<JoinHandle<Result<PathBuf, CaptureError>>>,
) -> Result<PathBuf, CaptureError> {
    let writer = writer.ok_or(CaptureError::NotStarted)?;
    writer.await.map_err(|_| CaptureError::WorkerLost)?
}

async fn export_recording(shared: Arc<Shared>, path: PathBuf, generation: Option<u64>) {
    let library = shared.library.clone();
    let result = shared
        .runtime
        .spawn_blocking(move || {
            let authorization = library.authorization();
            if authorization != Authorization::Authorized {
                return Err(ExportError::Permission(authorization));
            }
            library.save_video(&path)
        })
        .await;

    let event = match result {
        Ok(Ok(saved)) => RecordingEvent::Saved(saved),
        Ok(Err(err)) => {
            warn!("export failed: {}", err);
            RecordingEvent::Failed(err.into())
        }
        Err(err) => {
            error!("export worker failed: {}", err);
            RecordingEvent::Failed(FailureReason::Other(err.to_string()))
        }
    };
    shared.resolve(generation);
    shared.emit(event);
}

/// Receiving side of the session's notifications. Drain it from the UI.
pub struct RecordingEvents {
    rx: mpsc::UnboundedReceiver<RecordingEvent>,
}

impl RecordingEvents {
    pub fn try_next(&mut self) -> Option<RecordingEvent> {
        self.rx.try_recv().ok()
    }

    pub async fn next(&mut self) -> Option<RecordingEvent> {
        self.rx.recv().await
    }
}

/// Record/stop/export lifecycle around a capture backend and a media library.
///
/// Every method returns without blocking; capture, finalization and export
/// run on `runtime`'s blocking pool and report back through
/// [`RecordingEvents`].
#[derive(Clone)]
pub struct RecordingSession {
    shared: Arc<Shared>,
}

impl RecordingSession {
    pub fn new(
        backend: Arc<dyn CaptureBackend>,
        library: Arc<dyn MediaLibrary>,
        runtime: Handle,
    ) -> (Self, RecordingEvents) {
        Self::with_frame_capacity(backend, library, runtime, DEFAULT_FRAME_CAPACITY)
    }

    pub fn with_frame_capacity(
        backend: Arc<dyn CaptureBackend>,
        library: Arc<dyn MediaLibrary>,
        runtime: Handle,
        frame_capacity: usize,
    ) -> (Self, RecordingEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Shared {
            state: Mutex::new(State {
                status: RecordingStatus::Idle,
                generation: 0,
                frames: None,
                writer: None,
                finalized: None,
                pending: Vec::new(),
            }),
            backend,
            library,
            events: tx,
            runtime,
            frame_capacity: frame_capacity.max(1),
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            RecordingEvents { rx },
        )
    }

    pub fn status(&self) -> RecordingStatus {
        self.shared.state.lock().status
    }

    pub fn is_recording(&self) -> bool {
        self.status() == RecordingStatus::Recording
    }

    /// Makes an idle session ready to record once tracking is running.
    pub fn prepare(&self) -> Result<(), RecordingError> {
        let mut state = self.shared.state.lock();
        match state.status {
            RecordingStatus::Idle => {
                state.status = RecordingStatus::ReadyToRecord;
                info!("recorder ready");
                Ok(())
            }
            RecordingStatus::ReadyToRecord => Ok(()),
            _ => state.require(RecordingStatus::Idle, "prepare"),
        }
    }

    pub fn start(&self) -> Result<(), RecordingError> {
        let mut state = self.shared.state.lock();
        state.require(RecordingStatus::ReadyToRecord, "start")?;

        let (tx, rx) = mpsc::channel(self.shared.frame_capacity);
        let backend = self.shared.backend.clone();
        let writer = self
            .shared
            .runtime
            .spawn_blocking(move || write_frames(backend.as_ref(), rx));

        state.generation += 1;
        state.status = RecordingStatus::Recording;
        state.frames = Some(tx);
        state.writer = Some(writer);
        state.finalized = None;
        info!(generation = state.generation, "recording started");
        Ok(())
    }

    /// Hands a composited frame to the capture writer. Never blocks: the
    /// frame is dropped when not recording or when the writer is behind.
    pub fn capture_frame(&self, frame: CompositedFrame) -> bool {
        let state = self.shared.state.lock();
        let Some(frames) = state.frames.as_ref() else {
            return false;
        };
        match frames.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("capture writer behind, frame dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Stops capturing. `on_finalized` runs on the worker runtime with the
    /// location of the finished file; pass that location to
    /// [`export`](Self::export).
    ///
    /// If finalizing fails, `on_finalized` is not called, a
    /// [`RecordingEvent::Failed`] is emitted and the session becomes ready
    /// again.
    pub fn stop<F>(&self, on_finalized: F) -> Result<(), RecordingError>
    where
        F: FnOnce(PathBuf) + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        state.require(RecordingStatus::Recording, "stop")?;

        state.status = RecordingStatus::Exporting;
        state.frames = None;
        let writer = state.writer.take();
        let generation = state.generation;
        let shared = self.shared.clone();
        let task = self.shared.runtime.spawn(async move {
            match finalize(writer).await {
                Ok(path) if shared.finalized(generation, &path) => on_finalized(path),
                Ok(path) => {
                    info!(path = %path.display(), "session torn down while finalizing, exporting detached");
                    export_recording(shared, path, None).await;
                }
                Err(err) => {
                    error!("failed to finalize recording: {}", err);
                    shared.resolve(Some(generation));
                    shared.emit(RecordingEvent::Failed(err.into()));
                }
            }
        });
        state.track(task);
        info!(generation, "recording stopped");
        Ok(())
    }

    /// Saves a finalized recording into the media library. The outcome is
    /// reported as [`RecordingEvent::Saved`] or [`RecordingEvent::Failed`],
    /// after which the session is ready to record again.
    pub fn export(&self, path: PathBuf) -> Result<(), RecordingError> {
        let mut state = self.shared.state.lock();
        state.require(RecordingStatus::Exporting, "export")?;
        if state.finalized.as_ref() != Some(&path) {
            warn!(path = %path.display(), "export of unknown recording rejected");
            return Err(RecordingError::UnknownRecording(path));
        }

        state.finalized = None;
        let generation = state.generation;
        let task = self
            .shared
            .runtime
            .spawn(export_recording(self.shared.clone(), path, Some(generation)));
        state.track(task);
        Ok(())
    }

    /// [`stop`](Self::stop) followed by [`export`](Self::export) of the
    /// finalized file.
    pub fn stop_and_export(&self) -> Result<(), RecordingError> {
        let session = self.clone();
        self.stop(move |path| {
            if let Err(err) = session.export(path) {
                warn!("export after stop rejected: {}", err);
            }
        })
    }

    /// Returns the session to `Idle`.
    ///
    /// A recording in progress is stopped and exported rather than lost; an
    /// export already in flight is left to finish. Either way the outcome is
    /// still reported through [`RecordingEvents`] but no longer changes the
    /// status.
    pub fn teardown(&self) {
        let mut state = self.shared.state.lock();
        let previous = state.status;
        state.status = RecordingStatus::Idle;
        state.generation += 1;
        state.frames = None;
        let writer = state.writer.take();
        let finalized = state.finalized.take();

        match previous {
            RecordingStatus::Recording => {
                let shared = self.shared.clone();
                let task = self.shared.runtime.spawn(async move {
                    match finalize(writer).await {
                        Ok(path) => export_recording(shared, path, None).await,
                        Err(err) => {
                            error!("failed to finalize recording during teardown: {}", err);
                            shared.emit(RecordingEvent::Failed(err.into()));
                        }
                    }
                });
                state.track(task);
                info!("recorder torn down, exporting in-flight recording");
            }
            RecordingStatus::Exporting => {
                if let Some(path) = finalized {
                    let task = self
                        .shared
                        .runtime
                        .spawn(export_recording(self.shared.clone(), path, None));
                    state.track(task);
                }
                info!("recorder torn down during export");
            }
            RecordingStatus::ReadyToRecord | RecordingStatus::Idle => {}
        }
    }

    /// Waits for all background work started so far, including exports
    /// forced by [`teardown`](Self::teardown).
    pub async fn flush(&self) {
        loop {
            let pending = std::mem::take(&mut self.shared.state.lock().pending);
            if pending.is_empty() {
                return;
            }
            for task in pending {
                if let Err(err) = task.await {
                    error!("recording task failed: {}", err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::oneshot;
    use tokio::time::timeout;

    use super::*;

    #[derive(Default)]
    struct MemoryCapture {
        frames: Arc<AtomicUsize>,
        fail_finish: bool,
        finish_delay: Duration,
    }

    struct MemorySink {
        frames: Arc<AtomicUsize>,
        fail_finish: bool,
        finish_delay: Duration,
    }

    impl CaptureBackend for MemoryCapture {
        fn start(&self) -> Result<Box<dyn CaptureSink>, CaptureError> {
            Ok(Box::new(MemorySink {
                frames: self.frames.clone(),
                fail_finish: self.fail_finish,
                finish_delay: self.finish_delay,
            }))
        }
    }

    impl CaptureSink for MemorySink {
        fn write_frame(&mut self, _frame: &CompositedFrame) -> Result<(), CaptureError> {
            self.frames.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<PathBuf, CaptureError> {
            std::thread::sleep(self.finish_delay);
            if self.fail_finish {
                return Err(CaptureError::Io(std::io::Error::other("disk full")));
            }
            Ok(PathBuf::from("/captures/recording-test.jsonl"))
        }

        fn discard(self: Box<Self>) {}
    }

    struct MemoryLibrary {
        authorization: Authorization,
        delay: Duration,
        saved: parking_lot::Mutex<Vec<PathBuf>>,
    }

    impl MemoryLibrary {
        fn new(authorization: Authorization) -> Arc<Self> {
            Self::slow(authorization, Duration::ZERO)
        }

        fn slow(authorization: Authorization, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                authorization,
                delay,
                saved: parking_lot::Mutex::new(Vec::new()),
            })
        }
    }

    impl MediaLibrary for MemoryLibrary {
        fn authorization(&self) -> Authorization {
            self.authorization
        }

        fn save_video(&self, path: &Path) -> Result<PathBuf, ExportError> {
            std::thread::sleep(self.delay);
            let saved = Path::new("/library").join(path.file_name().unwrap());
            self.saved.lock().push(path.to_path_buf());
            Ok(saved)
        }
    }

    fn session(
        capture: Arc<MemoryCapture>,
        library: Arc<MemoryLibrary>,
    ) -> (RecordingSession, RecordingEvents) {
        let (session, events) = RecordingSession::new(capture, library, Handle::current());
        session.prepare().unwrap();
        (session, events)
    }

    fn frame() -> CompositedFrame {
        CompositedFrame {
            timestamp: 0.0,
            overlays: Vec::new(),
        }
    }

    async fn next_event(events: &mut RecordingEvents) -> RecordingEvent {
        timeout(Duration::from_secs(5), events.next())
            .await
            .expect("timed out waiting for recording event")
            .expect("event channel closed")
    }

    async fn stop_and_wait(session: &RecordingSession) -> PathBuf {
        let (tx, rx) = oneshot::channel();
        session
            .stop(move |path| {
                tx.send(path).ok();
            })
            .unwrap();
        assert_eq!(session.status(), RecordingStatus::Exporting);
        timeout(Duration::from_secs(5), rx).await.unwrap().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn record_stop_export() {
        let capture = Arc::new(MemoryCapture::default());
        let library = MemoryLibrary::new(Authorization::Authorized);
        let (session, mut events) = session(capture.clone(), library.clone());
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);

        session.start().unwrap();
        assert_eq!(session.status(), RecordingStatus::Recording);
        for _ in 0..3 {
            assert!(session.capture_frame(frame()));
        }

        let path = stop_and_wait(&session).await;
        assert_eq!(path, PathBuf::from("/captures/recording-test.jsonl"));
        assert_eq!(capture.frames.load(Ordering::SeqCst), 3);

        session.export(path.clone()).unwrap();
        assert_eq!(
            next_event(&mut events).await,
            RecordingEvent::Saved(PathBuf::from("/library/recording-test.jsonl"))
        );
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
        assert_eq!(*library.saved.lock(), vec![path]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn double_start_is_rejected() {
        let (session, _events) = session(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::Authorized),
        );
        session.start().unwrap();
        assert_eq!(
            session.start(),
            Err(RecordingError::PreconditionViolation {
                operation: "start",
                status: RecordingStatus::Recording,
            })
        );
        assert_eq!(session.status(), RecordingStatus::Recording);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_when_ready_is_a_no_op() {
        let (session, mut events) = session(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::Authorized),
        );
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let result = session.stop(move |_| flag.store(true, Ordering::SeqCst));
        assert!(matches!(result, Err(RecordingError::PreconditionViolation { .. })));

        session.flush().await;
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
        assert!(events.try_next().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn start_requires_prepare() {
        let (session, _events) = RecordingSession::new(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::Authorized),
            Handle::current(),
        );
        assert_eq!(session.status(), RecordingStatus::Idle);
        assert!(session.start().is_err());
        assert!(!session.capture_frame(frame()));
        session.prepare().unwrap();
        session.prepare().unwrap();
        session.start().unwrap();
        assert!(session.prepare().is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn permission_denied_resets_to_ready() {
        let library = MemoryLibrary::new(Authorization::Denied);
        let (session, mut events) = session(Arc::new(MemoryCapture::default()), library.clone());
        session.start().unwrap();
        let path = stop_and_wait(&session).await;
        session.export(path).unwrap();

        let event = next_event(&mut events).await;
        assert_eq!(event, RecordingEvent::Failed(FailureReason::PermissionDenied));
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
        assert!(library.saved.lock().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn undetermined_permission_is_reported() {
        let (session, mut events) = session(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::NotDetermined),
        );
        session.start().unwrap();
        session.stop_and_export().unwrap();

        let RecordingEvent::Failed(reason) = next_event(&mut events).await else {
            panic!("expected failure");
        };
        assert_eq!(reason, FailureReason::PermissionUndetermined);
        assert!(!reason.needs_settings());
        assert!(reason.is_permission());
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn export_requires_the_finalized_path() {
        let (session, _events) = session(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::Authorized),
        );
        assert!(session.export(PathBuf::from("/elsewhere.jsonl")).is_err());

        session.start().unwrap();
        let path = stop_and_wait(&session).await;
        assert_eq!(
            session.export(PathBuf::from("/elsewhere.jsonl")),
            Err(RecordingError::UnknownRecording(PathBuf::from("/elsewhere.jsonl")))
        );
        session.export(path.clone()).unwrap();
        assert!(session.export(path).is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn finalize_failure_resets_to_ready() {
        let capture = Arc::new(MemoryCapture {
            fail_finish: true,
            ..MemoryCapture::default()
        });
        let (session, mut events) = session(capture, MemoryLibrary::new(Authorization::Authorized));
        session.start().unwrap();

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        session.stop(move |_| flag.store(true, Ordering::SeqCst)).unwrap();

        let event = next_event(&mut events).await;
        assert!(matches!(event, RecordingEvent::Failed(FailureReason::Other(_))));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_and_export_saves() {
        let library = MemoryLibrary::new(Authorization::Authorized);
        let (session, mut events) = session(Arc::new(MemoryCapture::default()), library.clone());
        session.start().unwrap();
        session.stop_and_export().unwrap();

        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
        session.start().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_while_recording_exports() {
        let capture = Arc::new(MemoryCapture::default());
        let library = MemoryLibrary::new(Authorization::Authorized);
        let (session, mut events) = session(capture.clone(), library.clone());
        session.start().unwrap();
        assert!(session.capture_frame(frame()));

        session.teardown();
        assert_eq!(session.status(), RecordingStatus::Idle);
        session.flush().await;

        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert_eq!(library.saved.lock().len(), 1);
        assert_eq!(capture.frames.load(Ordering::SeqCst), 1);
        assert_eq!(session.status(), RecordingStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_while_exporting_detaches() {
        let library = MemoryLibrary::new(Authorization::Authorized);
        let (session, mut events) = session(Arc::new(MemoryCapture::default()), library.clone());
        session.start().unwrap();
        let path = stop_and_wait(&session).await;

        // Finalized but not yet exported: teardown exports it on its own.
        session.teardown();
        assert_eq!(session.status(), RecordingStatus::Idle);
        assert!(session.export(path).is_err());
        session.flush().await;

        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert_eq!(library.saved.lock().len(), 1);

        session.prepare().unwrap();
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_while_finalizing_exports_detached() {
        let capture = Arc::new(MemoryCapture {
            finish_delay: Duration::from_millis(200),
            ..MemoryCapture::default()
        });
        let library = MemoryLibrary::new(Authorization::Authorized);
        let (session, mut events) = session(capture, library.clone());
        session.start().unwrap();

        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        session.stop(move |_| flag.store(true, Ordering::SeqCst)).unwrap();
        session.teardown();
        assert_eq!(session.status(), RecordingStatus::Idle);
        session.flush().await;

        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert!(!called.load(Ordering::SeqCst));
        assert_eq!(library.saved.lock().len(), 1);
        assert_eq!(session.status(), RecordingStatus::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_during_export_leaves_next_cycle_alone() {
        let library = MemoryLibrary::slow(Authorization::Authorized, Duration::from_millis(200));
        let (session, mut events) = session(Arc::new(MemoryCapture::default()), library.clone());
        session.start().unwrap();
        let path = stop_and_wait(&session).await;
        session.export(path).unwrap();
        assert_eq!(session.status(), RecordingStatus::Exporting);

        session.teardown();
        assert_eq!(session.status(), RecordingStatus::Idle);
        session.prepare().unwrap();
        session.start().unwrap();

        // The old export completes while the new recording is running.
        session.flush().await;
        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert_eq!(session.status(), RecordingStatus::Recording);

        session.stop_and_export().unwrap();
        assert!(matches!(next_event(&mut events).await, RecordingEvent::Saved(_)));
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);
        assert_eq!(library.saved.lock().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn restart_after_teardown_keeps_both_recordings() {
        use std::fs;

        use crate::capture::FrameLogCapture;
        use crate::media::DirectoryLibrary;

        let root = std::env::temp_dir().join(format!("mustache-restart-{}", nanoid::nanoid!(8)));
        let library_dir = root.join("library");
        let (session, mut events) = RecordingSession::new(
            Arc::new(FrameLogCapture::new(root.join("captures"))),
            Arc::new(DirectoryLibrary::new(&library_dir, Authorization::Authorized)),
            Handle::current(),
        );
        session.prepare().unwrap();
        session.start().unwrap();
        for _ in 0..10 {
            assert!(session.capture_frame(frame()));
        }

        session.teardown();
        session.prepare().unwrap();
        session.start().unwrap();
        assert!(session.capture_frame(frame()));
        session.stop_and_export().unwrap();
        session.flush().await;

        let mut saved = Vec::new();
        for _ in 0..2 {
            match next_event(&mut events).await {
                RecordingEvent::Saved(path) => saved.push(path),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_ne!(saved[0], saved[1]);
        let mut frames: Vec<usize> = saved
            .iter()
            .map(|path| fs::read_to_string(path).unwrap().lines().count())
            .collect();
        frames.sort();
        assert_eq!(frames, vec![1, 10]);
        assert_eq!(session.status(), RecordingStatus::ReadyToRecord);

        fs::remove_dir_all(root).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn teardown_when_idle_does_nothing() {
        let (session, mut events) = session(
            Arc::new(MemoryCapture::default()),
            MemoryLibrary::new(Authorization::Authorized),
        );
        session.teardown();
        session.flush().await;
        assert_eq!(session.status(), RecordingStatus::Idle);
        assert!(events.try_next().is_none());
    }
}
