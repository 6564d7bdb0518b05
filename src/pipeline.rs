//! Async host adapter for the sink writer.
//!
//! The writer itself is synchronous and single-threaded by contract.
//! This module binds it to a tokio runtime: one task owns the writer,
//! serializes elements, checkpoint requests, and processing-time ticks
//! over a single `select!` loop, and honors a shutdown token by closing
//! the writer. Any fatal writer error aborts the task and surfaces to
//! the runner, which is expected to restart from the last checkpoint.

use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bucket::{BucketState, Committable};
use crate::error::WriterError;
use crate::writer::{MultiTableSinkWriter, WriteContext};

/// Result of one checkpoint: harvested committables plus the bucket
/// states to persist.
#[derive(Debug)]
pub struct CheckpointOutcome {
    /// Finished files ready for the external commit stage.
    pub committables: Vec<Committable>,
    /// One state per live bucket, to be persisted with the checkpoint.
    pub bucket_states: Vec<BucketState>,
}

/// Messages accepted by a running writer pipeline.
#[derive(Debug)]
pub enum WriterMessage<In> {
    /// Route one element through the writer.
    Element {
        element: In,
        /// Event timestamp of the element, if any.
        timestamp: Option<i64>,
        /// Watermark at enqueue time, epoch millis.
        watermark: i64,
    },
    /// Run the checkpoint sequence (prepare commit, then snapshot).
    Checkpoint {
        id: u64,
        /// Force in-progress files closed (used for the final checkpoint).
        flush: bool,
        reply: oneshot::Sender<CheckpointOutcome>,
    },
}

/// Drives one [`MultiTableSinkWriter`] on a tokio task.
pub struct WriterPipeline<In, R> {
    key: String,
    writer: MultiTableSinkWriter<In, R>,
    restored: Vec<BucketState>,
    rx: mpsc::Receiver<WriterMessage<In>>,
    shutdown: CancellationToken,
}

impl<In, R> WriterPipeline<In, R>
where
    In: Send + 'static,
    R: Send + 'static,
{
    /// Wrap a writer and the bucket states recovered for it.
    ///
    /// State restoration happens inside [`run`], on the same task that
    /// will serve writes, so no writer operation ever runs concurrently
    /// with another.
    ///
    /// [`run`]: Self::run
    pub fn new(
        key: impl Into<String>,
        writer: MultiTableSinkWriter<In, R>,
        restored: Vec<BucketState>,
        shutdown: CancellationToken,
        channel_capacity: usize,
    ) -> (Self, mpsc::Sender<WriterMessage<In>>) {
        let (tx, rx) = mpsc::channel(channel_capacity);
        (
            Self {
                key: key.into(),
                writer,
                restored,
                rx,
                shutdown,
            },
            tx,
        )
    }

    /// Run the pipeline until shutdown, channel close, or a fatal error.
    pub async fn run(mut self) -> Result<(), WriterError> {
        self.writer
            .initialize_state(std::mem::take(&mut self.restored))?;
        info!(target = %self.key, "Writer pipeline started");

        loop {
            let deadline = self.writer.next_inspection_time();
            let now = self.writer.current_processing_time();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    info!(target = %self.key, "Shutdown requested, closing writer");
                    self.writer.close();
                    return Ok(());
                }

                _ = inspection_due(deadline, now) => {
                    let tick = self.writer.current_processing_time();
                    self.writer.on_processing_time(tick)?;
                }

                message = self.rx.recv() => match message {
                    Some(message) => self.handle(message)?,
                    None => {
                        debug!(target = %self.key, "Input channel closed, closing writer");
                        self.writer.close();
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Spawn the pipeline onto the current tokio runtime.
    pub fn spawn(self) -> JoinHandle<Result<(), WriterError>> {
        tokio::spawn(self.run())
    }

    fn handle(&mut self, message: WriterMessage<In>) -> Result<(), WriterError> {
        match message {
            WriterMessage::Element {
                element,
                timestamp,
                watermark,
            } => self.writer.write(
                &element,
                &WriteContext {
                    timestamp,
                    watermark,
                },
            ),
            WriterMessage::Checkpoint { id, flush, reply } => {
                let committables = self.writer.prepare_commit(flush)?;
                let bucket_states = self.writer.snapshot_state(id)?;
                debug!(
                    target = %self.key,
                    checkpoint_id = id,
                    committables = committables.len(),
                    bucket_states = bucket_states.len(),
                    "Checkpoint prepared"
                );
                if reply
                    .send(CheckpointOutcome {
                        committables,
                        bucket_states,
                    })
                    .is_err()
                {
                    warn!(
                        target = %self.key,
                        checkpoint_id = id,
                        "Checkpoint requester went away before receiving the outcome"
                    );
                }
                Ok(())
            }
        }
    }
}

/// Resolves when the registered inspection instant is due; pends forever
/// when no timer is armed.
async fn inspection_due(deadline: Option<i64>, now: i64) {
    match deadline {
        Some(at) => {
            let delay = at.saturating_sub(now).max(0) as u64;
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        None => std::future::pending::<()>().await,
    }
}
