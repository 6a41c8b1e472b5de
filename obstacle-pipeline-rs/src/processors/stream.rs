//! Single-worker frame stream for live sensor input.
//!
//! A [`FrameStream`] owns one worker thread that runs the pipeline on one
//! frame at a time. Frames arriving while the worker is busy are dropped, not
//! queued, so a slow frame never makes the output fall behind the sensor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::error::ProcessingError;
use super::pipeline::{process_cloud_with_deadline, FrameResult};
use crate::config::PipelineConfig;
use crate::core::loaders::PointCloud;

/// What happened to a submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Handed to the worker.
    Accepted,
    /// The worker was still busy with an earlier frame.
    Dropped,
    /// The worker has stopped.
    Closed,
}

/// Counters reported by [`FrameStream::finish`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub accepted: usize,
    pub dropped: usize,
    pub completed: usize,
    pub failed: usize,
}

/// What the stream hands to its sink for each accepted frame.
pub type FrameOutcome = Result<FrameResult, ProcessingError>;

pub struct FrameStream {
    sender: Option<SyncSender<PointCloud>>,
    busy: Arc<AtomicBool>,
    worker: Option<JoinHandle<(usize, usize)>>,
    accepted: usize,
    dropped: usize,
}

impl FrameStream {
    /// Start the worker. Every accepted frame's outcome is passed to `sink` on
    /// the worker thread; the next frame is accepted once `sink` returns.
    ///
    /// With `config.stream.frame_budget_ms` set, the plane fit of each frame
    /// stops sampling once that budget has elapsed.
    pub fn spawn<F>(config: PipelineConfig, mut sink: F) -> Self
    where
        F: FnMut(FrameOutcome) + Send + 'static,
    {
        let (sender, receiver) = sync_channel::<PointCloud>(1);
        let busy = Arc::new(AtomicBool::new(false));
        let worker_busy = Arc::clone(&busy);
        let budget = config.stream.frame_budget_ms.map(Duration::from_millis);

        let worker = thread::spawn(move || {
            let (mut completed, mut failed) = (0, 0);
            for cloud in receiver {
                let deadline = budget.map(|b| Instant::now() + b);
                let outcome = process_cloud_with_deadline(&cloud, &config, deadline);
                match &outcome {
                    Ok(_) => completed += 1,
                    Err(e) => {
                        log::error!("Frame failed: {}", e);
                        failed += 1;
                    }
                }
                sink(outcome);
                worker_busy.store(false, Ordering::Release);
            }
            (completed, failed)
        });

        Self {
            sender: Some(sender),
            busy,
            worker: Some(worker),
            accepted: 0,
            dropped: 0,
        }
    }

    /// Offer a frame to the worker without blocking.
    ///
    /// A closed stream is never left busy.
    pub fn submit(&mut self, cloud: PointCloud) -> Submission {
        if self.is_closed() {
            self.busy.store(false, Ordering::Release);
            return Submission::Closed;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.dropped += 1;
            log::debug!("Frame dropped: worker busy");
            return Submission::Dropped;
        }

        let Some(sender) = self.sender.as_ref() else {
            self.busy.store(false, Ordering::Release);
            return Submission::Closed;
        };
        match sender.try_send(cloud) {
            Ok(()) => {
                self.accepted += 1;
                Submission::Accepted
            }
            Err(TrySendError::Full(_)) => {
                self.busy.store(false, Ordering::Release);
                self.dropped += 1;
                Submission::Dropped
            }
            Err(TrySendError::Disconnected(_)) => {
                self.busy.store(false, Ordering::Release);
                Submission::Closed
            }
        }
    }

    /// True while a frame is being processed.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// True once the worker thread has exited.
    pub fn is_closed(&self) -> bool {
        self.worker.as_ref().map_or(true, |w| w.is_finished())
    }

    /// Stop accepting frames, wait for the in-flight frame and return the
    /// counters.
    pub fn finish(mut self) -> StreamStats {
        self.sender.take();
        let (completed, failed) = match self.worker.take().map(JoinHandle::join) {
            Some(Ok(counts)) => counts,
            Some(Err(_)) => {
                log::error!("Stream worker panicked");
                (0, 0)
            }
            None => (0, 0),
        };

        StreamStats {
            accepted: self.accepted,
            dropped: self.dropped,
            completed,
            failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processors::pipeline::tests::{scene_config, street_scene};
    use std::sync::mpsc::{channel, Receiver};

    fn wait_until_idle(stream: &FrameStream) {
        while stream.is_busy() {
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Sink that holds the worker until the test sends on the gate.
    fn gated_sink(gate: Receiver<()>, results: std::sync::mpsc::Sender<FrameOutcome>) -> impl FnMut(FrameOutcome) + Send {
        move |outcome| {
            let _ = gate.recv();
            let _ = results.send(outcome);
        }
    }

    #[test]
    fn test_busy_worker_drops_frames() {
        let (gate_tx, gate_rx) = channel();
        let (result_tx, result_rx) = channel();
        let mut stream = FrameStream::spawn(scene_config(), gated_sink(gate_rx, result_tx));

        assert_eq!(stream.submit(street_scene()), Submission::Accepted);
        assert_eq!(stream.submit(street_scene()), Submission::Dropped);
        assert_eq!(stream.submit(street_scene()), Submission::Dropped);

        gate_tx.send(()).unwrap();
        let first = result_rx.recv().unwrap().unwrap();
        assert_eq!(first.clusters.len(), 2);
        wait_until_idle(&stream);

        assert_eq!(stream.submit(street_scene()), Submission::Accepted);
        gate_tx.send(()).unwrap();

        let stats = stream.finish();
        assert_eq!(
            stats,
            StreamStats {
                accepted: 2,
                dropped: 2,
                completed: 2,
                failed: 0
            }
        );
        assert_eq!(result_rx.try_iter().count(), 1);
    }

    #[test]
    fn test_failed_frames_are_counted() {
        let (result_tx, result_rx) = channel();
        let mut stream = FrameStream::spawn(scene_config(), move |outcome| {
            let _ = result_tx.send(outcome);
        });

        assert_eq!(stream.submit(PointCloud::new()), Submission::Accepted);
        let outcome = result_rx.recv().unwrap();
        assert!(matches!(outcome, Err(ProcessingError::InsufficientData { .. })));

        let stats = stream.finish();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn test_frame_budget_sets_deadline() {
        let mut config = scene_config();
        config.stream.frame_budget_ms = Some(0);
        config.segmentation.max_iterations = 10_000;

        let (result_tx, result_rx) = channel();
        let mut stream = FrameStream::spawn(config, move |outcome| {
            let _ = result_tx.send(outcome);
        });
        stream.submit(street_scene());

        let result = result_rx.recv().unwrap().unwrap();
        assert!(result.segmentation.timed_out);
        assert!(result.segmentation.iterations >= 1);
        assert!(result.segmentation.iterations < 10_000);
        assert_eq!(stream.finish().failed, 0);
    }

    #[test]
    fn test_submit_after_worker_exit_is_closed() {
        let mut stream = FrameStream::spawn(scene_config(), |_| panic!("sink failure"));
        assert_eq!(stream.submit(street_scene()), Submission::Accepted);

        while !stream.is_closed() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(stream.submit(street_scene()), Submission::Closed);
        assert!(!stream.is_busy());
        assert_eq!(stream.submit(street_scene()), Submission::Closed);
        assert_eq!(stream.finish().completed, 0);
    }
}
