// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Processing service — chains identity, quota, and the pipeline for one
// submitted file.
//
// The SQLite stores are `Send + Sync` behind their own mutexes and every
// call is a sub-millisecond query, so they are called inline from async code.
// Engine work runs on the blocking pool via `Pipeline::process_async`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dokwerk_access::{
    ApiKeyDirectory, Decision, QuotaEnforcer, QuotaStatus, SqliteUsageStore, UsageRecord, UsageStore,
};
use dokwerk_core::config::ServiceConfig;
use dokwerk_core::error::{DokwerkError, Result, StageError};
use dokwerk_core::failure::Failure;
use dokwerk_core::types::{Artifact, DocumentFormat, Operation, UserId};
use dokwerk_document::pipeline::Output;
use dokwerk_document::{
    ArtifactManager, Capabilities, Job, OcrEngine, OperationParams, OperationResult, Pipeline,
    Processed, Task,
};
use serde::Serialize;
use tracing::{info, instrument, warn};

/// One uploaded file plus what to do with it.
#[derive(Debug, Clone)]
pub struct Submission {
    /// `Bearer <key>` or a bare API key.
    pub credential: String,
    /// The upload, already inside the managed temp root.
    pub upload: Artifact,
    /// Name the client gave the file.
    pub source_name: String,
    pub operation: Operation,
    pub params: OperationParams,
}

/// A completed, metered operation.
#[derive(Debug)]
pub struct Served {
    pub quota: Decision,
    pub processed: Processed,
}

/// A refused or failed submission. `quota` is filled when the monthly
/// allowance was the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub failure: Failure,
    pub quota: Option<Decision>,
}

impl From<DokwerkError> for Rejection {
    fn from(err: DokwerkError) -> Self {
        Self {
            quota: Decision::rejected_by(&err),
            failure: Failure::from(err),
        }
    }
}

impl From<StageError> for Rejection {
    fn from(err: StageError) -> Self {
        Self {
            quota: Decision::rejected_by(&err.error),
            failure: Failure::from(err),
        }
    }
}

pub type Outcome = std::result::Result<Served, Rejection>;

/// What the transport layer renders for a submission.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub result: OperationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<Decision>,
}

impl Envelope {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        match outcome {
            Ok(served) => Self {
                result: OperationResult::success(&served.processed),
                quota: Some(served.quota),
            },
            Err(rejection) => Self {
                result: OperationResult::Failure(rejection.failure.clone()),
                quota: rejection.quota,
            },
        }
    }
}

/// Usage summary printed by the `quota` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaReport {
    pub name: String,
    #[serde(flatten)]
    pub status: QuotaStatus,
    pub recent: Vec<UsageRecord>,
}

#[derive(Clone)]
pub struct ProcessingService {
    pipeline: Pipeline,
    enforcer: Arc<QuotaEnforcer>,
    directory: Arc<ApiKeyDirectory>,
    config: Arc<ServiceConfig>,
}

impl ProcessingService {
    /// Open the database and temp root named in `config`.
    pub fn init(config: ServiceConfig) -> Result<Self> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let usage = SqliteUsageStore::open(&config.database_path)?;
        let directory = ApiKeyDirectory::open(&config.database_path)?;
        let artifacts = ArtifactManager::new(&config.temp_root);
        artifacts.ensure_root()?;

        info!(
            temp_root = %config.temp_root.display(),
            database = %config.database_path.display(),
            limit = config.monthly_limit,
            "processing service initialised"
        );
        let ocr = ocr_engine(&config);
        Ok(Self::from_parts(config, artifacts, ocr, Arc::new(usage), directory))
    }

    pub fn from_parts(
        config: ServiceConfig,
        artifacts: ArtifactManager,
        ocr: OcrEngine,
        usage: Arc<dyn UsageStore>,
        directory: ApiKeyDirectory,
    ) -> Self {
        let pipeline = Pipeline::new(artifacts, ocr, &config);
        let enforcer = QuotaEnforcer::new(usage, config.monthly_limit, config.quota_fail_mode);
        Self {
            pipeline,
            enforcer: Arc::new(enforcer),
            directory: Arc::new(directory),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        self.pipeline.artifacts()
    }

    /// Authenticate, admit against the monthly quota, then process.
    ///
    /// The upload is deleted on every path, including rejections that happen
    /// before the pipeline runs. Malformed parameters are refused before the
    /// quota is charged.
    #[instrument(skip_all, fields(operation = %submission.operation, source = %submission.source_name))]
    pub async fn submit(&self, submission: Submission) -> Outcome {
        let Submission {
            credential,
            upload,
            source_name,
            operation,
            params,
        } = submission;
        let upload = self.artifacts().lease(upload);

        let user = self.directory.resolve(&credential)?;
        let task = Task::from_params(operation, &params)?;
        let quota = self.enforcer.admit(user, operation.as_str())?;

        let job = Job::new(upload.keep(), source_name, task);
        let processed = self.pipeline.process_async(job).await?;
        Ok(Served { quota, processed })
    }

    /// This month's figures plus the latest `recent` operations for the key's
    /// owner.
    pub fn quota_report(&self, credential: &str, recent: u32) -> Result<QuotaReport> {
        let user = self.directory.resolve(credential)?;
        Ok(QuotaReport {
            name: self.directory.name_of(user)?.unwrap_or_default(),
            status: self.enforcer.status(user)?,
            recent: self.enforcer.recent(user, recent)?,
        })
    }

    pub fn add_user(&self, name: &str, key: &str) -> Result<UserId> {
        self.directory.add_user(name, key)
    }

    pub fn user_count(&self) -> Result<u64> {
        self.directory.user_count()
    }

    /// Delete temp files older than the retention window.
    pub fn sweep(&self) -> usize {
        self.artifacts()
            .sweep_expired(Duration::from_secs(self.config.retention_secs))
    }

    /// Sweep run on every start. Other processes may share the temp root, so
    /// only files older than the grace period go.
    pub fn startup_sweep(&self) -> usize {
        let grace = self.config.sweep_grace_secs.max(self.config.retention_secs);
        self.artifacts().sweep_expired(Duration::from_secs(grace))
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities::collect(
            &self.config.default_language,
            self.pipeline.ocr_engine().backend_name(),
        )
    }

    /// Copy a client file into the temp root, as an HTTP upload handler would.
    pub fn stage_upload(&self, source: &Path, format: DocumentFormat) -> Result<Artifact> {
        let hint = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mut artifact = self.artifacts().allocate(&hint, format)?;
        if let Err(err) = std::fs::copy(source, &artifact.path) {
            self.artifacts().release(&artifact);
            return Err(DokwerkError::SourceUnreadable(format!(
                "{}: {err}",
                source.display()
            )));
        }
        self.artifacts().refresh(&mut artifact)?;
        Ok(artifact)
    }
}

/// Copy an output to `out_dir` under its download name, then signal that it
/// has been consumed.
pub fn deliver(output: Output, out_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)?;
    let target = out_dir.join(&output.download_name);
    let copied = std::fs::copy(output.lease.path(), &target);
    output.lease.consumed();
    copied.map_err(|err| {
        warn!(target = %target.display(), %err, "delivery failed");
        DokwerkError::WriteFailure(format!("{}: {err}", target.display()))
    })?;
    Ok(target)
}

#[cfg(feature = "ocr")]
fn ocr_engine(config: &ServiceConfig) -> OcrEngine {
    use dokwerk_document::ocr::ocrs_backend::default_model_dir;
    use dokwerk_document::{OcrsBackend, OcrsConfig};

    let dir = config.ocr_model_dir.clone().unwrap_or_else(default_model_dir);
    OcrEngine::new(Arc::new(OcrsBackend::new(OcrsConfig::from_dir(dir))))
}

#[cfg(not(feature = "ocr"))]
fn ocr_engine(_config: &ServiceConfig) -> OcrEngine {
    OcrEngine::unavailable("built without the `ocr` feature")
}

#[cfg(test)]
mod tests {
    use dokwerk_core::error::{ErrorKind, Stage};
    use dokwerk_core::types::ImageKind;
    use dokwerk_document::PdfWriter;
    use dokwerk_document::docx::writer::DocxWriter;

    use super::*;

    const KEY: &str = "API_test_key";

    fn service(limit: u64) -> (tempfile::TempDir, ProcessingService) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            temp_root: dir.path().join("temp"),
            monthly_limit: limit,
            ..ServiceConfig::default()
        };
        let artifacts = ArtifactManager::new(&config.temp_root);
        let service = ProcessingService::from_parts(
            config,
            artifacts,
            OcrEngine::unavailable("no backend in tests"),
            Arc::new(SqliteUsageStore::open_in_memory().unwrap()),
            ApiKeyDirectory::open_in_memory().unwrap(),
        );
        service.add_user("tester", KEY).unwrap();
        (dir, service)
    }

    fn docx_upload(service: &ProcessingService) -> Artifact {
        let mut artifact = service.artifacts().allocate("notes.docx", DocumentFormat::Docx).unwrap();
        DocxWriter::from_text("Agenda\nBudget\nAny other business")
            .write_to_file(&artifact.path)
            .unwrap();
        service.artifacts().refresh(&mut artifact).unwrap();
        artifact
    }

    fn submission(upload: Artifact, operation: Operation, params: OperationParams) -> Submission {
        let source_name = upload.file_name();
        Submission {
            credential: format!("Bearer {KEY}"),
            upload,
            source_name,
            operation,
            params,
        }
    }

    fn used(service: &ProcessingService) -> u64 {
        service.quota_report(KEY, 0).unwrap().status.used
    }

    fn to_pdf() -> OperationParams {
        OperationParams {
            target_format: Some("pdf".into()),
            ..OperationParams::default()
        }
    }

    #[tokio::test]
    async fn conversion_is_metered_and_cleans_up() {
        let (dir, service) = service(5);
        let upload = docx_upload(&service);
        let input_path = upload.path.clone();

        let served = service
            .submit(submission(upload, Operation::Convert, to_pdf()))
            .await
            .unwrap();
        assert!(!input_path.exists());
        assert_eq!(served.quota.status.used, 1);
        assert_eq!(served.quota.remaining(), 4);

        let envelope = Envelope::from_outcome(&Ok(served));
        assert!(envelope.result.is_success());
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["result"]["outcome"], "success");
        assert_eq!(json["quota"]["remaining"], 4);

        let Ok(mut served) = service
            .submit(submission(docx_upload(&service), Operation::Convert, to_pdf()))
            .await
        else {
            panic!("second conversion failed");
        };
        let output = served.processed.outputs.remove(0);
        let scratch = output.lease.path().to_path_buf();
        let delivered = deliver(output, &dir.path().join("out")).unwrap();
        assert_eq!(delivered.parent(), Some(dir.path().join("out").as_path()));
        assert!(delivered.extension().is_some_and(|e| e == "pdf"));
        assert!(delivered.exists());
        assert!(!scratch.exists());
        assert_eq!(used(&service), 2);

        let report = service.quota_report(KEY, 1).unwrap();
        assert_eq!(report.name, "tester");
        assert_eq!(report.status.remaining, 3);
        assert_eq!(report.recent.len(), 1);
        assert_eq!(report.recent[0].endpoint, "convert");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["used"], 2);
        assert_eq!(json["recent"][0]["endpoint"], "convert");
    }

    #[tokio::test]
    async fn unknown_key_is_rejected_and_upload_released() {
        let (_dir, service) = service(5);
        let upload = docx_upload(&service);
        let input_path = upload.path.clone();
        let mut request = submission(upload, Operation::Convert, to_pdf());
        request.credential = "Bearer API_wrong".into();

        let rejection = service.submit(request).await.unwrap_err();
        assert!(rejection.quota.is_none());
        let failure = rejection.failure;
        assert_eq!(failure.kind, ErrorKind::Unauthenticated);
        assert_eq!(failure.status, 401);
        assert!(!input_path.exists());
        assert_eq!(used(&service), 0);
        assert!(service.quota_report("API_wrong", 5).is_err());
        assert_eq!(service.user_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn exhausted_quota_returns_429() {
        let (_dir, service) = service(1);
        service
            .submit(submission(docx_upload(&service), Operation::Convert, to_pdf()))
            .await
            .unwrap();

        let upload = docx_upload(&service);
        let input_path = upload.path.clone();
        let outcome = service
            .submit(submission(upload, Operation::Convert, to_pdf()))
            .await;
        let envelope = Envelope::from_outcome(&outcome);
        let rejection = outcome.unwrap_err();
        assert_eq!(rejection.failure.kind, ErrorKind::QuotaExceeded);
        assert_eq!(rejection.failure.status, 429);
        assert!(!input_path.exists());

        let quota = rejection.quota.unwrap();
        assert!(!quota.admitted);
        assert_eq!(quota.remaining(), 0);
        assert_eq!(quota.status.limit, 1);
        assert_eq!(quota.status.used, 1);
        assert_eq!(quota.status.reset_at, service.quota_report(KEY, 0).unwrap().status.reset_at);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["result"]["outcome"], "failure");
        assert_eq!(json["quota"]["admitted"], false);
        assert_eq!(json["quota"]["remaining"], 0);
        assert_eq!(json["quota"]["limit"], 1);
    }

    #[tokio::test]
    async fn malformed_parameters_are_not_charged() {
        let (_dir, service) = service(5);
        let failure = service
            .submit(submission(
                docx_upload(&service),
                Operation::Convert,
                OperationParams::default(),
            ))
            .await
            .unwrap_err()
            .failure;
        assert_eq!(failure.status, 400);
        assert_eq!(failure.code, "invalid_parameter");
        assert_eq!(used(&service), 0);
    }

    #[tokio::test]
    async fn compression_reports_metrics() {
        let (_dir, service) = service(5);
        let mut upload = service.artifacts().allocate("report.pdf", DocumentFormat::Pdf).unwrap();
        PdfWriter::a4()
            .write_text_to_file("Quarterly report\nFigures follow.", &upload.path)
            .unwrap();
        service.artifacts().refresh(&mut upload).unwrap();

        let served = service
            .submit(submission(upload, Operation::Compress, OperationParams::default()))
            .await
            .unwrap();
        let json = serde_json::to_value(Envelope::from_outcome(&Ok(served))).unwrap();
        assert_eq!(json["result"]["metrics"]["kind"], "compression");
        assert!(json["result"]["metrics"]["original_size"].as_u64().unwrap() > 0);
        assert_eq!(json["result"]["outputs"][0]["download_name"]
            .as_str()
            .unwrap()
            .split('_')
            .last(), Some("compressed.pdf"));
    }

    #[tokio::test]
    async fn ocr_without_backend_fails_in_recognition() {
        let (_dir, service) = service(5);

        let gif = service
            .artifacts()
            .allocate("anim.gif", DocumentFormat::Image(ImageKind::Gif))
            .unwrap();
        let failure = service
            .submit(submission(gif, Operation::Ocr, OperationParams::default()))
            .await
            .unwrap_err()
            .failure;
        assert_eq!(failure.code, "unsupported_image_format");
        assert_eq!(failure.stage, Some(Stage::Validation));

        let mut png = service
            .artifacts()
            .allocate("scan.png", DocumentFormat::Image(ImageKind::Png))
            .unwrap();
        image::RgbImage::from_pixel(64, 32, image::Rgb([255, 255, 255]))
            .save_with_format(&png.path, image::ImageFormat::Png)
            .unwrap();
        service.artifacts().refresh(&mut png).unwrap();
        let png_path = png.path.clone();
        let failure = service
            .submit(submission(png, Operation::Ocr, OperationParams::default()))
            .await
            .unwrap_err()
            .failure;
        assert_eq!(failure.code, "worker_init_failure");
        assert_eq!(failure.stage, Some(Stage::Recognition));
        assert_eq!(failure.status, 500);
        assert!(!png_path.exists());
    }

    #[test]
    fn staged_uploads_live_in_the_temp_root() {
        let (dir, service) = service(5);
        let source = dir.path().join("client.pdf");
        std::fs::write(&source, b"%PDF-1.7\n").unwrap();

        let artifact = service.stage_upload(&source, DocumentFormat::Pdf).unwrap();
        assert!(artifact.path.starts_with(service.artifacts().root()));
        assert_eq!(artifact.size_bytes, 9);
        assert!(source.exists());

        let err = service
            .stage_upload(&dir.path().join("missing.pdf"), DocumentFormat::Pdf)
            .unwrap_err();
        assert!(matches!(err, DokwerkError::SourceUnreadable(_)));
    }

    #[test]
    fn startup_sweep_spares_recent_files() {
        let (_dir, service) = service(5);
        let recent = service.artifacts().allocate("busy.pdf", DocumentFormat::Pdf).unwrap();
        let stale = service.artifacts().allocate("old.pdf", DocumentFormat::Pdf).unwrap();
        let now = std::time::SystemTime::now();
        for (artifact, age) in [(&recent, 120), (&stale, 7200)] {
            std::fs::File::options()
                .write(true)
                .open(&artifact.path)
                .unwrap()
                .set_modified(now - Duration::from_secs(age))
                .unwrap();
        }

        assert_eq!(service.startup_sweep(), 1);
        assert!(recent.path.exists());
        assert!(!stale.path.exists());

        assert_eq!(service.sweep(), 1);
        assert!(!recent.path.exists());
    }

    #[test]
    fn capabilities_name_the_backend() {
        let (_dir, service) = service(5);
        let caps = service.capabilities();
        assert_eq!(caps.ocr_backend, "unavailable");
        assert_eq!(caps.default_language, "eng");
    }
}
