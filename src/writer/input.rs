//! Typed encoder input
//!
//! Each input owns a bounded queue drained by a dedicated worker thread that
//! feeds a `TrackSink`. Appends never block: a full queue reports
//! `NotReady` and the caller drops the sample.

use super::{TrackKind, TrackSink, WriterError};
use crate::media::{MediaTime, Sample};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

/// Result of a non-failing append attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted,
    /// Queue full; the sample was not taken
    NotReady,
    /// Presentation time earlier than the last accepted sample
    OutOfOrder,
}

struct InputState {
    tx: Option<mpsc::Sender<Sample>>,
    last_presentation: Option<MediaTime>,
}

type WorkerResult = Result<Option<PathBuf>, WriterError>;

pub struct EncoderInput {
    kind: TrackKind,
    state: Mutex<InputState>,
    finished: AtomicBool,
    failed: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    appended: AtomicU64,
    worker: Mutex<Option<JoinHandle<WorkerResult>>>,
}

impl EncoderInput {
    /// Create the input and start its worker thread
    pub fn spawn(
        kind: TrackKind,
        mut sink: Box<dyn TrackSink>,
        capacity: usize,
        session_start: Arc<OnceLock<MediaTime>>,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Sample>(capacity.max(1));
        let failed = Arc::new(AtomicBool::new(false));
        let failure = Arc::new(Mutex::new(None));

        let worker_failed = failed.clone();
        let worker_failure = failure.clone();
        let handle = std::thread::Builder::new()
            .name(format!("encoder-{}", kind.label()))
            .spawn(move || {
                let mut written: u64 = 0;
                while let Some(sample) = rx.blocking_recv() {
                    let result = match session_start.get() {
                        Some(start) => sink.write(&sample, *start),
                        None => Err(WriterError::SessionNotStarted),
                    };
                    if let Err(e) = result {
                        tracing::error!("{} encoder input failed: {}", kind, e);
                        *worker_failure.lock() = Some(e.to_string());
                        worker_failed.store(true, Ordering::Release);
                        break;
                    }
                    written += 1;
                }
                drop(rx);

                tracing::debug!("{} encoder input drained after {} samples", kind, written);
                let finished = sink.finish();
                match worker_failure.lock().clone() {
                    Some(message) => Err(WriterError::InputFailed(kind, message)),
                    None => finished,
                }
            });

        let worker = match handle {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::error!("Failed to spawn {} encoder thread: {}", kind, e);
                *failure.lock() = Some(e.to_string());
                failed.store(true, Ordering::Release);
                None
            }
        };

        Self {
            kind,
            state: Mutex::new(InputState {
                tx: Some(tx),
                last_presentation: None,
            }),
            finished: AtomicBool::new(false),
            failed,
            failure,
            appended: AtomicU64::new(0),
            worker: Mutex::new(worker),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Whether an append right now would be taken
    pub fn is_ready(&self) -> bool {
        if self.finished.load(Ordering::Acquire) || self.failed.load(Ordering::Acquire) {
            return false;
        }
        self.state
            .lock()
            .tx
            .as_ref()
            .map(|tx| tx.capacity() > 0)
            .unwrap_or(false)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Samples accepted so far
    pub fn appended(&self) -> u64 {
        self.appended.load(Ordering::Relaxed)
    }

    /// Append a sample without blocking.
    ///
    /// Appending to a finished or failed input is an error.
    pub fn append(&self, sample: Sample) -> Result<AppendOutcome, WriterError> {
        if self.finished.load(Ordering::Acquire) {
            return Err(WriterError::InputFinished(self.kind));
        }

        let mut state = self.state.lock();
        let Some(tx) = state.tx.as_ref() else {
            return Err(WriterError::InputFinished(self.kind));
        };

        let presentation = sample.presentation();
        if matches!(state.last_presentation, Some(last) if presentation < last) {
            return Ok(AppendOutcome::OutOfOrder);
        }

        match tx.try_send(sample) {
            Ok(()) => {
                state.last_presentation = Some(presentation);
                self.appended.fetch_add(1, Ordering::Relaxed);
                Ok(AppendOutcome::Accepted)
            }
            Err(mpsc::error::TrySendError::Full(_)) => Ok(AppendOutcome::NotReady),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                let message = self
                    .failure
                    .lock()
                    .clone()
                    .unwrap_or_else(|| "worker stopped".to_string());
                Err(WriterError::InputFailed(self.kind, message))
            }
        }
    }

    /// Mark the input finished. Terminal; returns false if it already was.
    pub fn mark_finished(&self) -> bool {
        let mut state = self.state.lock();
        let first = !self.finished.swap(true, Ordering::AcqRel);
        state.tx = None;
        if first {
            tracing::debug!(
                "{} input finished after {} samples",
                self.kind,
                self.appended()
            );
        }
        first
    }

    /// Wait for the worker to flush and close its sink.
    ///
    /// Blocks; call only after `mark_finished`, off the sample path.
    pub fn join(&self) -> Result<Option<PathBuf>, WriterError> {
        let handle = self.worker.lock().take();
        match handle {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(WriterError::InputFailed(self.kind, "encoder thread panicked".to_string()))
            }),
            None => match self.failure.lock().clone() {
                Some(message) => Err(WriterError::InputFailed(self.kind, message)),
                None => Ok(None),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SampleKind, VideoFrame};
    use std::sync::Barrier;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Recorded {
        presentations: Vec<MediaTime>,
    }

    struct CollectingSink {
        recorded: Arc<Mutex<Recorded>>,
        gate: Option<(Arc<Barrier>, Arc<Barrier>)>,
    }

    impl TrackSink for CollectingSink {
        fn write(&mut self, sample: &Sample, session_start: MediaTime) -> Result<(), WriterError> {
            if let Some((entered, release)) = self.gate.take() {
                entered.wait();
                release.wait();
            }
            self.recorded
                .lock()
                .presentations
                .push(sample.presentation() - session_start);
            Ok(())
        }

        fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
            Ok(Some(PathBuf::from("collected")))
        }
    }

    struct FailingSink;

    impl TrackSink for FailingSink {
        fn write(&mut self, _: &Sample, _: MediaTime) -> Result<(), WriterError> {
            Err(WriterError::Ffmpeg("broken pipe".into()))
        }

        fn finish(self: Box<Self>) -> Result<Option<PathBuf>, WriterError> {
            Ok(None)
        }
    }

    fn frame_at(ms: i64) -> Sample {
        Sample::video(
            SampleKind::Video,
            VideoFrame::packed(1, 1, vec![0, 0, 0, 255]),
            MediaTime::from_millis(ms),
            MediaTime::from_millis(33),
        )
    }

    fn started(at: MediaTime) -> Arc<OnceLock<MediaTime>> {
        let start = Arc::new(OnceLock::new());
        let _ = start.set(at);
        start
    }

    #[test]
    fn test_samples_reach_sink_relative_to_session_start() {
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let sink = CollectingSink { recorded: recorded.clone(), gate: None };
        let input = EncoderInput::spawn(TrackKind::Video, Box::new(sink), 8, started(MediaTime::from_millis(100)));

        for ms in [100, 133, 166] {
            assert_eq!(input.append(frame_at(ms)).unwrap(), AppendOutcome::Accepted);
        }
        input.mark_finished();
        assert_eq!(input.join().unwrap(), Some(PathBuf::from("collected")));

        let times: Vec<i64> = recorded.lock().presentations.iter().map(|t| t.as_millis()).collect();
        assert_eq!(times, vec![0, 33, 66]);
    }

    #[test]
    fn test_append_after_finish_is_rejected() {
        let sink = CollectingSink { recorded: Default::default(), gate: None };
        let input = EncoderInput::spawn(TrackKind::Video, Box::new(sink), 4, started(MediaTime::ZERO));

        assert!(input.mark_finished());
        assert!(!input.mark_finished());
        assert!(!input.is_ready());
        assert!(matches!(
            input.append(frame_at(0)),
            Err(WriterError::InputFinished(TrackKind::Video))
        ));
        input.join().unwrap();
    }

    #[test]
    fn test_full_queue_reports_not_ready_immediately() {
        let entered = Arc::new(Barrier::new(2));
        let release = Arc::new(Barrier::new(2));
        let sink = CollectingSink {
            recorded: Default::default(),
            gate: Some((entered.clone(), release.clone())),
        };
        let input = EncoderInput::spawn(TrackKind::Video, Box::new(sink), 1, started(MediaTime::ZERO));

        assert_eq!(input.append(frame_at(0)).unwrap(), AppendOutcome::Accepted);
        // Worker now holds the first sample inside the sink
        entered.wait();
        assert_eq!(input.append(frame_at(33)).unwrap(), AppendOutcome::Accepted);

        let begin = Instant::now();
        assert!(!input.is_ready());
        assert_eq!(input.append(frame_at(66)).unwrap(), AppendOutcome::NotReady);
        assert!(begin.elapsed() < Duration::from_millis(100));

        release.wait();
        input.mark_finished();
        input.join().unwrap();
        assert_eq!(input.appended(), 2);
    }

    #[test]
    fn test_regressing_timestamp_is_refused() {
        let sink = CollectingSink { recorded: Default::default(), gate: None };
        let input = EncoderInput::spawn(TrackKind::SystemAudio, Box::new(sink), 4, started(MediaTime::ZERO));

        assert_eq!(input.append(frame_at(50)).unwrap(), AppendOutcome::Accepted);
        assert_eq!(input.append(frame_at(40)).unwrap(), AppendOutcome::OutOfOrder);
        assert_eq!(input.append(frame_at(50)).unwrap(), AppendOutcome::Accepted);
        input.mark_finished();
        input.join().unwrap();
    }

    #[test]
    fn test_sink_failure_surfaces_on_join() {
        let input = EncoderInput::spawn(TrackKind::Microphone, Box::new(FailingSink), 4, started(MediaTime::ZERO));
        assert_eq!(input.append(frame_at(0)).unwrap(), AppendOutcome::Accepted);
        input.mark_finished();
        assert!(matches!(
            input.join(),
            Err(WriterError::InputFailed(TrackKind::Microphone, _))
        ));
    }
}
