//! Prediction Worker
//!
//! Serializes predictions off the caller's task: requests queue on a bounded
//! channel and run one at a time on the blocking pool.

use std::sync::Arc;

use radiograph::Sample;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::{Detector, DetectorError, PredictionResult};

type Reply = oneshot::Sender<Result<PredictionResult, DetectorError>>;

struct Request {
    sample: Sample,
    reply: Reply,
}

/// Cloneable sender side of a prediction worker
#[derive(Debug, Clone)]
pub struct PredictionHandle {
    sender: mpsc::Sender<Request>,
}

impl PredictionHandle {
    /// Queue a sample and wait for its prediction
    pub async fn predict(&self, sample: Sample) -> Result<PredictionResult, DetectorError> {
        let (reply, response) = oneshot::channel();
        self.sender
            .send(Request { sample, reply })
            .await
            .map_err(|_| DetectorError::Worker("request channel closed".to_string()))?;
        response
            .await
            .map_err(|_| DetectorError::Worker("worker dropped the request".to_string()))?
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request").field("shape", &self.sample.shape()).finish()
    }
}

/// Worker that owns the detector and drains the request queue
pub struct PredictionWorker {
    receiver: mpsc::Receiver<Request>,
    detector: Arc<Detector>,
}

impl PredictionWorker {
    /// Create a worker and its handle
    pub fn channel(detector: Arc<Detector>, capacity: usize) -> (PredictionHandle, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        info!("Creating prediction worker: queue={}", capacity.max(1));
        (PredictionHandle { sender }, Self { receiver, detector })
    }

    /// Create a worker and run it on the current runtime
    pub fn spawn(detector: Arc<Detector>, capacity: usize) -> (PredictionHandle, JoinHandle<()>) {
        let (handle, worker) = Self::channel(detector, capacity);
        (handle, tokio::spawn(worker.run()))
    }

    /// Process requests until every handle is dropped
    pub async fn run(mut self) {
        info!("Starting prediction worker");

        while let Some(Request { sample, reply }) = self.receiver.recv().await {
            let detector = Arc::clone(&self.detector);
            let result = tokio::task::spawn_blocking(move || detector.predict(&sample))
                .await
                .unwrap_or_else(|e| Err(DetectorError::Worker(format!("prediction task failed: {}", e))));

            if let Err(e) = &result {
                debug!("Prediction error: {}", e);
            }
            if reply.send(result).is_err() {
                debug!("Caller went away before the prediction finished");
            }
        }

        info!("Prediction worker stopped");
    }
}
