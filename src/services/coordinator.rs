//! Completion coordinator: the pipeline's single entry point.
//!
//! One call per trigger delivery. Admission and planning happen up front,
//! the fan-out engine drives every branch to a terminal state, and only then
//! are the metadata merge and the source delete performed, each exactly once.

use crate::{
    config::{ConfigError, FailedSourcePolicy, PipelineConfig},
    models::{
        event::StorageEvent,
        metadata::DerivedMetadata,
        object::ObjectLocation,
        run::{PipelineRun, RunOutcome, RunReport, RunStateError},
    },
    services::{
        classifier::{Admission, EventClassifier},
        fanout::FanoutEngine,
        metadata_store::MetadataStore,
        object_store::{ByteStream, ObjectStore, StoreError, stream_from_chunks},
        planner::RenditionPlanner,
        run_guard::RunGuard,
        transform::Transform,
    },
};
use chrono::Utc;
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Every rendition failed; the deliverer may retry.
    #[error("every rendition failed for {}/{}", .0.bucket, .0.path)]
    RunFailed(Box<RunReport>),
    #[error(transparent)]
    State(#[from] RunStateError),
}

enum Source {
    Open(ByteStream),
    /// Nothing to process; the run is skipped with this reason.
    Unavailable(String),
}

pub struct Pipeline {
    classifier: EventClassifier,
    planner: RenditionPlanner,
    engine: FanoutEngine,
    store: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    failed_source_policy: FailedSourcePolicy,
    guard: RunGuard,
}

impl Pipeline {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        transform: Arc<dyn Transform>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let planner = RenditionPlanner::new(config.renditions.clone())?;
        let classifier = EventClassifier::new(config.max_source_bytes, planner.specs());
        let engine = FanoutEngine::new(
            store.clone(),
            transform,
            config.fanout_buffer_chunks,
            config.max_source_bytes,
        );

        Ok(Self {
            classifier,
            planner,
            engine,
            store,
            metadata,
            failed_source_policy: config.failed_source_policy,
            guard: RunGuard::new(),
        })
    }

    /// Process one storage event to completion.
    ///
    /// Rejected, duplicate and already-consumed events come back as skipped
    /// reports. A run where every rendition failed is an error so the
    /// delivery layer can apply its retry policy.
    pub async fn handle_event(&self, event: StorageEvent) -> Result<RunReport, PipelineError> {
        let asset = match self.classifier.classify(&event) {
            Admission::Admit(asset) => asset,
            Admission::Reject(reason) => {
                info!(
                    bucket = %event.bucket,
                    path = %event.name,
                    %reason,
                    "event not admitted"
                );
                return Ok(RunReport::skipped(&event, reason.to_string()));
            }
        };

        let Some(_ticket) = self.guard.try_acquire(&asset) else {
            warn!(object = %asset.location, "run already in flight for this object; skipping");
            return Ok(RunReport::skipped(&event, "run already in flight"));
        };

        let source = match self.open_source(&asset.location).await {
            Source::Open(source) => source,
            Source::Unavailable(reason) => {
                return Ok(RunReport::skipped(&event, reason));
            }
        };

        let specs = self.planner.plan(&asset);
        let mut run = PipelineRun::dispatch(asset, specs);
        info!(
            run_id = %run.id,
            object = %run.asset.location,
            renditions = run.jobs.len(),
            "run dispatched"
        );

        let jobs = run.await_jobs()?;
        let jobs = self.engine.run(source, &run.asset.content_type, jobs).await;
        let outcome = run.settle(jobs)?;
        info!(run_id = %run.id, ?outcome, "all renditions settled");

        run.begin_cleanup()?;
        let mut report = RunReport::for_run(&run, outcome);
        self.cleanup(&run, outcome, &mut report).await;
        run.finish()?;

        info!(
            run_id = %run.id,
            state = ?run.state(),
            outcome = ?run.outcome(),
            metadata_written = report.metadata_written,
            source_deleted = report.source_deleted,
            cleanup_errors = report.cleanup_errors.len(),
            "run finished"
        );

        match outcome {
            RunOutcome::AllFailed => Err(PipelineError::RunFailed(Box::new(report))),
            _ => Ok(report),
        }
    }

    /// A missing object, or one the store can never address, is nothing to
    /// process. Other open failures become a stream that fails immediately,
    /// which fails every branch as a source error.
    async fn open_source(&self, location: &ObjectLocation) -> Source {
        match self.store.open_read(location).await {
            Ok(stream) => Source::Open(stream),
            Err(StoreError::NotFound { .. }) => {
                info!(object = %location, "source no longer exists; nothing to do");
                Source::Unavailable("source object not found".into())
            }
            Err(
                err @ (StoreError::InvalidBucketName { .. } | StoreError::InvalidObjectKey(_)),
            ) => {
                warn!(object = %location, error = %err, "source location is not addressable");
                Source::Unavailable(err.to_string())
            }
            Err(err) => {
                error!(object = %location, error = %err, "failed to open source");
                let kind = match &err {
                    StoreError::Io(io_err) => io_err.kind(),
                    _ => io::ErrorKind::Other,
                };
                Source::Open(stream_from_chunks(vec![Err(io::Error::new(kind, err))]))
            }
        }
    }

    async fn cleanup(&self, run: &PipelineRun, outcome: RunOutcome, report: &mut RunReport) {
        if outcome != RunOutcome::AllFailed {
            let metadata = run
                .succeeded_jobs()
                .filter_map(|job| job.spec.metadata_flag.as_deref())
                .fold(
                    DerivedMetadata::new(run.asset.base_name(), Utc::now()),
                    DerivedMetadata::with_flag,
                );
            let key = metadata.key.clone();
            match self.metadata.merge_document(&key, metadata.into_fields()).await {
                Ok(()) => report.metadata_written = true,
                Err(err) => {
                    error!(run_id = %run.id, %key, error = %err, "metadata merge failed");
                    report
                        .cleanup_errors
                        .push(format!("metadata merge failed: {}", err));
                }
            }
        }

        // A read failure says nothing about the upload, and a retry needs it.
        if run.source_unreadable() {
            warn!(
                run_id = %run.id,
                object = %run.asset.location,
                "source could not be read; retaining it for redelivery"
            );
            report.reason = Some("source could not be read; retained for redelivery".into());
            return;
        }

        if outcome == RunOutcome::AllFailed && self.failed_source_policy == FailedSourcePolicy::Retain
        {
            warn!(
                run_id = %run.id,
                object = %run.asset.location,
                "every rendition failed; retaining source for diagnosis"
            );
            return;
        }

        match self.store.delete(&run.asset.location).await {
            Ok(()) => {
                info!(run_id = %run.id, object = %run.asset.location, "source deleted");
                report.source_deleted = true;
            }
            Err(StoreError::NotFound { .. }) => {
                info!(run_id = %run.id, object = %run.asset.location, "source already gone");
            }
            Err(err) => {
                error!(
                    run_id = %run.id,
                    object = %run.asset.location,
                    error = %err,
                    "failed to delete source"
                );
                report
                    .cleanup_errors
                    .push(format!("source delete failed: {}", err));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{object::StoredObject, run::RunStatus},
        services::{
            metadata_store::SqliteMetadataStore,
            object_store::{FsObjectStore, collect_stream},
            transform::ImageResizer,
        },
        test_support::{dimensions, jpeg_bytes, memory_pool},
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{StreamExt, stream};
    use serde_json::{Value, json};
    use std::sync::Mutex;

    #[derive(Clone, Copy)]
    enum ReadFailure {
        /// `open_read` itself fails with an I/O error.
        Open,
        /// The first chunk arrives, then the connection drops.
        AfterFirstChunk,
    }

    /// Filesystem store that can refuse writes by path prefix, break source
    /// reads, and records the order of completed writes and delete attempts.
    struct ScriptedStore {
        inner: FsObjectStore,
        reject_prefixes: Mutex<Vec<String>>,
        read_failure: Option<ReadFailure>,
        fail_delete: bool,
        log: Mutex<Vec<String>>,
    }

    impl ScriptedStore {
        fn new(inner: FsObjectStore) -> Self {
            Self {
                inner,
                reject_prefixes: Mutex::new(Vec::new()),
                read_failure: None,
                fail_delete: false,
                log: Mutex::new(Vec::new()),
            }
        }

        fn reject(&self, prefix: &str) {
            self.reject_prefixes.lock().unwrap().push(prefix.into());
        }

        fn deletes(&self) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|entry| entry.starts_with("delete:"))
                .count()
        }
    }

    #[async_trait]
    impl ObjectStore for ScriptedStore {
        async fn open_read(&self, location: &ObjectLocation) -> Result<ByteStream, StoreError> {
            match self.read_failure {
                None => self.inner.open_read(location).await,
                Some(ReadFailure::Open) => Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "storage backend timed out",
                ))),
                Some(ReadFailure::AfterFirstChunk) => {
                    let inner = self.inner.open_read(location).await?;
                    let reset = stream::once(async {
                        Err(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "connection reset by peer",
                        ))
                    });
                    Ok(Box::pin(inner.take(1).chain(reset)))
                }
            }
        }

        async fn write_stream(
            &self,
            location: &ObjectLocation,
            body: ByteStream,
            content_type: Option<&str>,
        ) -> Result<StoredObject, StoreError> {
            let rejected = self
                .reject_prefixes
                .lock()
                .unwrap()
                .iter()
                .any(|prefix| location.path.starts_with(prefix.as_str()));
            let result = if rejected {
                drop(body);
                Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "quota exceeded",
                )))
            } else {
                self.inner.write_stream(location, body, content_type).await
            };
            self.log.lock().unwrap().push(format!("write:{}", location));
            result
        }

        async fn stat(&self, location: &ObjectLocation) -> Result<StoredObject, StoreError> {
            self.inner.stat(location).await
        }

        async fn delete(&self, location: &ObjectLocation) -> Result<(), StoreError> {
            self.log.lock().unwrap().push(format!("delete:{}", location));
            if self.fail_delete {
                return Err(StoreError::Io(io::Error::new(
                    io::ErrorKind::PermissionDenied,
                    "retention lock",
                )));
            }
            self.inner.delete(location).await
        }

        async fn exists(&self, location: &ObjectLocation) -> Result<bool, StoreError> {
            self.inner.exists(location).await
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        store: Arc<ScriptedStore>,
        metadata: Arc<SqliteMetadataStore>,
        pipeline: Pipeline,
    }

    async fn harness_with(
        policy: FailedSourcePolicy,
        configure: impl FnOnce(&mut ScriptedStore),
    ) -> Harness {
        let config = PipelineConfig {
            failed_source_policy: policy,
            ..PipelineConfig::default()
        };
        harness_from(config, configure).await
    }

    async fn harness_from(
        config: PipelineConfig,
        configure: impl FnOnce(&mut ScriptedStore),
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ScriptedStore::new(FsObjectStore::new(dir.path()));
        configure(&mut store);
        let store = Arc::new(store);
        let metadata = Arc::new(SqliteMetadataStore::new(memory_pool().await, "uploadFileInfo"));
        let pipeline = Pipeline::new(
            &config,
            store.clone(),
            metadata.clone(),
            Arc::new(ImageResizer::default()),
        )
        .unwrap();
        Harness {
            _dir: dir,
            store,
            metadata,
            pipeline,
        }
    }

    async fn harness() -> Harness {
        harness_with(FailedSourcePolicy::Delete, |_| {}).await
    }

    const SOURCE_BUCKET: &str = "uploads";

    async fn upload(h: &Harness, path: &str, bytes: Vec<u8>, content_type: &str) -> StorageEvent {
        let body = stream_from_chunks(vec![Ok(Bytes::from(bytes))]);
        let stored = h
            .store
            .inner
            .write_stream(
                &ObjectLocation::new(SOURCE_BUCKET, path),
                body,
                Some(content_type),
            )
            .await
            .unwrap();
        StorageEvent {
            bucket: SOURCE_BUCKET.into(),
            name: path.into(),
            content_type: Some(content_type.into()),
            size: stored.size_bytes,
            generation: Some(stored.etag),
        }
    }

    async fn read(h: &Harness, bucket: &str, path: &str) -> Option<Vec<u8>> {
        let stream = h
            .store
            .inner
            .open_read(&ObjectLocation::new(bucket, path))
            .await
            .ok()?;
        Some(collect_stream(stream).await.unwrap())
    }

    #[tokio::test]
    async fn uploaded_cat_fans_out_and_is_cleaned_up() {
        let h = harness().await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(1000, 600), "image/jpeg").await;

        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert!(report.metadata_written);
        assert!(report.source_deleted);
        assert!(report.cleanup_errors.is_empty());

        let thumb = read(&h, "rendition-resize", "thumbnail/cat.jpg").await.unwrap();
        let full = read(&h, "rendition-resize", "full/cat.jpg").await.unwrap();
        let analysis = read(&h, "rendition-analysis", "cat.jpg").await.unwrap();
        assert_eq!(dimensions(&thumb), (150, 150));
        assert_eq!(dimensions(&full), (1000, 600));
        assert_eq!(dimensions(&analysis), (640, 480));

        let doc = h.metadata.get_document("cat").await.unwrap().unwrap();
        assert_eq!(doc["thumbnail"], json!(true));
        assert_eq!(doc["resized"], json!(true));
        assert!(doc["processedAt"].is_string());

        let record = h
            .store
            .stat(&ObjectLocation::new("rendition-resize", "thumbnail/cat.jpg"))
            .await
            .unwrap();
        assert_eq!(record.content_type.as_deref(), Some("image/jpeg"));

        assert!(read(&h, SOURCE_BUCKET, "upload/cat.jpg").await.is_none());
    }

    #[tokio::test]
    async fn small_sources_are_not_upscaled() {
        let h = harness().await;
        let event = upload(&h, "upload/tiny.jpg", jpeg_bytes(120, 40), "image/jpeg").await;

        h.pipeline.handle_event(event).await.unwrap();

        let full = read(&h, "rendition-resize", "full/tiny.jpg").await.unwrap();
        assert_eq!(dimensions(&full), (120, 40));
        let thumb = read(&h, "rendition-resize", "thumbnail/tiny.jpg").await.unwrap();
        assert_eq!(dimensions(&thumb), (120, 40));
    }

    #[tokio::test]
    async fn derived_output_is_never_reprocessed() {
        let h = harness().await;
        let event = upload(&h, "thumbnail/cat.jpg", jpeg_bytes(300, 300), "image/jpeg").await;

        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::Skipped);
        assert!(report.jobs.is_empty());

        assert!(read(&h, SOURCE_BUCKET, "thumbnail/cat.jpg").await.is_some());
        assert!(h.metadata.get_document("cat").await.unwrap().is_none());
        assert_eq!(h.store.log.lock().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn non_images_are_left_alone() {
        let h = harness().await;
        let event = upload(&h, "upload/notes.txt", b"hello".to_vec(), "text/plain").await;

        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::Skipped);
        assert!(read(&h, SOURCE_BUCKET, "upload/notes.txt").await.is_some());
    }

    #[tokio::test]
    async fn one_failed_branch_yields_partial_success() {
        let h = harness_with(FailedSourcePolicy::Delete, |s| s.reject("full/")).await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(800, 600), "image/jpeg").await;

        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::PartialSuccess);
        let failed: Vec<_> = report.jobs.iter().filter(|j| !j.succeeded).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].rendition, "full");

        assert!(read(&h, "rendition-resize", "thumbnail/cat.jpg").await.is_some());
        assert!(read(&h, "rendition-resize", "full/cat.jpg").await.is_none());

        let doc = h.metadata.get_document("cat").await.unwrap().unwrap();
        assert_eq!(doc["thumbnail"], json!(true));
        assert!(!doc.contains_key("resized"));
        assert!(report.source_deleted);
    }

    #[tokio::test]
    async fn all_failed_run_is_an_error_and_deletes_by_default() {
        let h = harness().await;
        let event = upload(&h, "upload/broken.png", b"definitely not a png".to_vec(), "image/png").await;

        let err = h.pipeline.handle_event(event).await.unwrap_err();
        let report = match err {
            PipelineError::RunFailed(report) => report,
            other => panic!("expected run failure, got {:?}", other),
        };
        assert_eq!(report.status, RunStatus::AllFailed);
        assert!(!report.metadata_written);
        assert!(report.source_deleted);
        assert!(h.metadata.get_document("broken").await.unwrap().is_none());
        assert!(read(&h, SOURCE_BUCKET, "upload/broken.png").await.is_none());
    }

    #[tokio::test]
    async fn retain_policy_keeps_failed_sources() {
        let h = harness_with(FailedSourcePolicy::Retain, |_| {}).await;
        let event = upload(&h, "upload/broken.png", b"garbage".to_vec(), "image/png").await;

        let err = h.pipeline.handle_event(event).await.unwrap_err();
        assert!(matches!(err, PipelineError::RunFailed(ref r) if !r.source_deleted));
        assert!(read(&h, SOURCE_BUCKET, "upload/broken.png").await.is_some());
        assert_eq!(h.store.deletes(), 0);
    }

    #[tokio::test]
    async fn source_is_deleted_once_after_every_branch() {
        let h = harness().await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(640, 640), "image/jpeg").await;

        h.pipeline.handle_event(event).await.unwrap();

        let log = h.store.log.lock().unwrap().clone();
        assert_eq!(h.store.deletes(), 1);
        assert_eq!(log.len(), 4);
        assert_eq!(log.last().unwrap(), "delete:uploads/upload/cat.jpg");
    }

    #[tokio::test]
    async fn delete_failure_is_reported_not_fatal() {
        let h = harness_with(FailedSourcePolicy::Delete, |s| s.fail_delete = true).await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(300, 200), "image/jpeg").await;

        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::AllSucceeded);
        assert!(!report.source_deleted);
        assert_eq!(report.cleanup_errors.len(), 1);
        assert!(report.cleanup_errors[0].contains("retention lock"));
        assert_eq!(h.store.deletes(), 1);
    }

    #[tokio::test]
    async fn redelivery_never_loses_metadata() {
        let h = harness().await;
        let first = upload(&h, "upload/cat.jpg", jpeg_bytes(500, 500), "image/jpeg").await;
        h.pipeline.handle_event(first.clone()).await.unwrap();
        let before = h.metadata.get_document("cat").await.unwrap().unwrap();

        // source already consumed: redelivery is a no-op
        let report = h.pipeline.handle_event(first).await.unwrap();
        assert_eq!(report.status, RunStatus::Skipped);

        // same logical asset again, this time the thumbnail write fails
        h.store.reject("thumbnail/");
        let again = upload(&h, "upload/cat.jpg", jpeg_bytes(500, 500), "image/jpeg").await;
        let report = h.pipeline.handle_event(again).await.unwrap();
        assert_eq!(report.status, RunStatus::PartialSuccess);

        let after = h.metadata.get_document("cat").await.unwrap().unwrap();
        for (field, value) in &before {
            if field != "processedAt" {
                assert_eq!(after.get(field), Some(value), "field {} reverted", field);
            }
        }
        assert_eq!(after["thumbnail"], Value::Bool(true));
    }

    #[tokio::test]
    async fn concurrent_duplicate_is_skipped() {
        let h = harness().await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(200, 200), "image/jpeg").await;

        let asset = match h.pipeline.classifier.classify(&event) {
            Admission::Admit(asset) => asset,
            other => panic!("expected admit, got {:?}", other),
        };
        let ticket = h.pipeline.guard.try_acquire(&asset).unwrap();

        let report = h.pipeline.handle_event(event.clone()).await.unwrap();
        assert_eq!(report.status, RunStatus::Skipped);
        assert_eq!(report.reason.as_deref(), Some("run already in flight"));
        assert!(read(&h, SOURCE_BUCKET, "upload/cat.jpg").await.is_some());

        drop(ticket);
        let report = h.pipeline.handle_event(event).await.unwrap();
        assert_eq!(report.status, RunStatus::AllSucceeded);
    }

    #[tokio::test]
    async fn unaddressable_sources_are_skipped() {
        let h = harness().await;
        let events = [
            ("Uploads", "upload/cat.jpg"),
            ("uploads", "upload/../cat.jpg"),
        ];
        for (bucket, name) in events {
            let event = StorageEvent {
                bucket: bucket.into(),
                name: name.into(),
                content_type: Some("image/jpeg".into()),
                size: 1024,
                generation: None,
            };
            let report = h.pipeline.handle_event(event).await.unwrap();
            assert_eq!(report.status, RunStatus::Skipped, "{}/{}", bucket, name);
            assert!(report.jobs.is_empty());
        }
        assert!(h.store.log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn understated_size_is_caught_while_streaming() {
        let config = PipelineConfig {
            max_source_bytes: 2048,
            ..PipelineConfig::default()
        };
        let h = harness_from(config, |_| {}).await;
        let bytes = jpeg_bytes(400, 400);
        assert!(bytes.len() > 2048);
        let mut event = upload(&h, "upload/big.jpg", bytes, "image/jpeg").await;
        event.size = 100;

        let err = h.pipeline.handle_event(event).await.unwrap_err();
        let report = match err {
            PipelineError::RunFailed(report) => report,
            other => panic!("expected run failure, got {:?}", other),
        };
        assert_eq!(report.status, RunStatus::AllFailed);
        for job in &report.jobs {
            let error = job.error.as_deref().unwrap();
            assert!(error.starts_with("source too large"), "{}", error);
        }
        assert!(!report.metadata_written);
        assert!(read(&h, "rendition-resize", "thumbnail/big.jpg").await.is_none());
    }

    #[tokio::test]
    async fn source_dropped_mid_stream_fails_the_run_and_keeps_the_source() {
        for policy in [FailedSourcePolicy::Delete, FailedSourcePolicy::Retain] {
            let h = harness_with(policy, |s| {
                s.read_failure = Some(ReadFailure::AfterFirstChunk)
            })
            .await;
            let event = upload(&h, "upload/cat.jpg", jpeg_bytes(600, 400), "image/jpeg").await;

            let err = h.pipeline.handle_event(event).await.unwrap_err();
            let report = match err {
                PipelineError::RunFailed(report) => report,
                other => panic!("expected run failure, got {:?}", other),
            };
            assert_eq!(report.status, RunStatus::AllFailed);
            assert_eq!(report.jobs.len(), 3);
            for job in &report.jobs {
                let error = job.error.as_deref().unwrap();
                assert!(error.contains("connection reset by peer"), "{}", error);
            }
            assert!(!report.metadata_written);
            assert!(!report.source_deleted);
            assert!(report.reason.is_some());

            assert!(h.metadata.get_document("cat").await.unwrap().is_none());
            assert_eq!(h.store.deletes(), 0);
            assert!(read(&h, SOURCE_BUCKET, "upload/cat.jpg").await.is_some());
            assert!(read(&h, "rendition-resize", "full/cat.jpg").await.is_none());
        }
    }

    #[tokio::test]
    async fn source_that_cannot_be_opened_is_retried_not_lost() {
        let h = harness_with(FailedSourcePolicy::Delete, |s| {
            s.read_failure = Some(ReadFailure::Open)
        })
        .await;
        let event = upload(&h, "upload/cat.jpg", jpeg_bytes(300, 200), "image/jpeg").await;

        let err = h.pipeline.handle_event(event).await.unwrap_err();
        assert!(matches!(
            err,
            PipelineError::RunFailed(ref r) if !r.source_deleted && !r.metadata_written
        ));
        assert_eq!(h.store.deletes(), 0);
        assert!(read(&h, SOURCE_BUCKET, "upload/cat.jpg").await.is_some());
    }
}
