//! Fan-out stream engine.
//!
//! One reader task pulls the source stream exactly once and forwards every
//! chunk to each branch over its own bounded channel. The reader only moves
//! on once every live branch has accepted the chunk, so memory stays bounded
//! by `buffer_chunks` per branch and the slowest branch sets the pace. Each
//! branch owns its transform and its destination write; a branch that fails
//! drops its receiver and the reader simply stops feeding it. A source that
//! streams more than `max_source_bytes` fails every branch, whatever size the
//! triggering event claimed.

use crate::{
    models::{
        object::StoredObject,
        run::{JobError, RenditionJob},
    },
    services::{
        object_store::{ByteStream, ObjectStore, StoreError},
        transform::Transform,
    },
};
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{io, sync::Arc};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Marker carried inside the `io::Error` each branch receives when the shared
/// source fails, so the branch can report it as a source failure.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SourceReadError(String);

/// Marker sent to every branch once the source outgrows the size limit.
#[derive(Debug, Error)]
#[error("more than {max} bytes streamed")]
pub struct SourceTooLarge {
    max: u64,
}

fn carries<E: std::error::Error + 'static>(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.downcast_ref::<E>().is_some())
}

impl From<StoreError> for JobError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Body(inner) if carries::<SourceTooLarge>(&inner) => {
                JobError::Oversized(inner.to_string())
            }
            StoreError::Body(inner) if carries::<SourceReadError>(&inner) => {
                JobError::SourceRead(inner.to_string())
            }
            StoreError::Body(inner) => JobError::Transform(inner.to_string()),
            other => JobError::Write(other.to_string()),
        }
    }
}

#[derive(Clone)]
pub struct FanoutEngine {
    store: Arc<dyn ObjectStore>,
    transform: Arc<dyn Transform>,
    buffer_chunks: usize,
    max_source_bytes: u64,
}

impl FanoutEngine {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        transform: Arc<dyn Transform>,
        buffer_chunks: usize,
        max_source_bytes: u64,
    ) -> Self {
        Self {
            store,
            transform,
            buffer_chunks: buffer_chunks.max(1),
            max_source_bytes,
        }
    }

    /// Drive every job to a terminal state and hand them back in order.
    /// Renditions are recorded with the source's `content_type`; the
    /// transform keeps the source format.
    pub async fn run(
        &self,
        source: ByteStream,
        content_type: &str,
        mut jobs: Vec<RenditionJob>,
    ) -> Vec<RenditionJob> {
        let mut senders = Vec::with_capacity(jobs.len());
        let mut branches = Vec::with_capacity(jobs.len());

        for job in &jobs {
            let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(self.buffer_chunks);
            senders.push(tx);

            let input = receiver_stream(rx);
            let output = self.transform.resize(input, job.spec.resize);
            let store = self.store.clone();
            let destination = job.destination.clone();
            let rendition = job.spec.name.clone();
            let content_type = content_type.to_string();

            branches.push(tokio::spawn(async move {
                let result = store
                    .write_stream(&destination, output, Some(&content_type))
                    .await
                    .map_err(JobError::from);
                match &result {
                    Ok(object) => debug!(
                        %rendition,
                        destination = %destination,
                        size_bytes = object.size_bytes,
                        "rendition written"
                    ),
                    Err(err) => warn!(
                        %rendition,
                        destination = %destination,
                        error = %err,
                        "rendition failed"
                    ),
                }
                result
            }));
        }

        let reader = tokio::spawn(pump_source(source, senders, self.max_source_bytes));

        for (job, branch) in jobs.iter_mut().zip(branches) {
            let result: Result<StoredObject, JobError> = match branch.await {
                Ok(result) => result,
                Err(err) => Err(JobError::Aborted(err.to_string())),
            };
            job.finish(result);
        }

        // Every branch is terminal, so the reader has either hit the end of
        // the source or seen every receiver close.
        match reader.await {
            Ok(Ok(bytes_read)) => debug!(bytes_read, "source stream closed"),
            Ok(Err(err)) => warn!(error = %err, "source stream failed"),
            Err(err) => warn!(error = %err, "source reader task aborted"),
        }

        jobs
    }
}

fn receiver_stream(rx: mpsc::Receiver<io::Result<Bytes>>) -> ByteStream {
    Box::pin(stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// Send the same failure to every still-open branch.
async fn fail_branches<E>(
    senders: &[mpsc::Sender<io::Result<Bytes>>],
    kind: io::ErrorKind,
    error: impl Fn() -> E,
) where
    E: std::error::Error + Send + Sync + 'static,
{
    for tx in senders {
        let _ = tx.send(Err(io::Error::new(kind, error()))).await;
    }
}

/// Read the source once, broadcasting each chunk to every still-open branch.
async fn pump_source(
    mut source: ByteStream,
    mut senders: Vec<mpsc::Sender<io::Result<Bytes>>>,
    max_source_bytes: u64,
) -> io::Result<u64> {
    let mut bytes_read = 0u64;

    while let Some(item) = source.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                let reason = err.to_string();
                fail_branches(&senders, err.kind(), || SourceReadError(reason.clone())).await;
                return Err(err);
            }
        };
        bytes_read += chunk.len() as u64;
        if bytes_read > max_source_bytes {
            warn!(bytes_read, max_source_bytes, "source exceeds size limit");
            let max = max_source_bytes;
            fail_branches(&senders, io::ErrorKind::InvalidData, || SourceTooLarge { max }).await;
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                SourceTooLarge { max },
            ));
        }

        let mut open = Vec::with_capacity(senders.len());
        for tx in senders.drain(..) {
            if tx.send(Ok(chunk.clone())).await.is_ok() {
                open.push(tx);
            }
        }
        senders = open;

        if senders.is_empty() {
            info!(bytes_read, "every branch closed; stopping source read");
            break;
        }
    }

    Ok(bytes_read)
}
