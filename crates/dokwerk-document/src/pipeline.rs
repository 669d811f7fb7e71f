// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Pipeline dispatcher — routes a job to the conversion, compression, or OCR
// engine and owns the input artifact for the duration of the call.
//
// The input is leased as soon as the job arrives, so it is deleted on every
// exit path: success, validation failure, engine failure, or a panic inside an
// engine. Outputs are handed back as leases; the caller releases them once the
// bytes have been delivered.

use dokwerk_core::config::ServiceConfig;
use dokwerk_core::error::{DokwerkError, Stage, StageError};
use dokwerk_core::failure::Failure;
use dokwerk_core::types::{
    Artifact, CompressionLevel, CompressionRequest, ConversionRequest, DocumentFormat, Fidelity, OcrRequest, Operation,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::artifact::{ArtifactLease, ArtifactManager};
use crate::convert::{self, ConversionEngine};
use crate::ocr::OcrEngine;
use crate::pdf::compress::{self, CompressionMetrics};

type StageResult<T> = std::result::Result<T, StageError>;

/// Operation-specific parameters as they arrive from the transport layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationParams {
    pub target_format: Option<String>,
    pub compression_level: Option<String>,
    pub language: Option<String>,
}

/// A fully parsed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    Convert { target: DocumentFormat },
    Compress { level: CompressionLevel },
    Ocr { language: Option<String> },
}

impl Task {
    /// Parse `params` for `operation`. Compression defaults to medium, OCR to
    /// the default language; conversion requires a target format.
    pub fn from_params(operation: Operation, params: &OperationParams) -> Result<Self, StageError> {
        let invalid = |err| StageError::new(Stage::Validation, err);
        match operation {
            Operation::Convert => {
                let target = params.target_format.as_deref().ok_or_else(|| {
                    invalid(DokwerkError::InvalidParameter(
                        "targetFormat is required for conversion".into(),
                    ))
                })?;
                Ok(Self::Convert {
                    target: target.parse().map_err(invalid)?,
                })
            }
            Operation::Compress => Ok(Self::Compress {
                level: match params.compression_level.as_deref() {
                    Some(level) => level.parse().map_err(invalid)?,
                    None => CompressionLevel::default(),
                },
            }),
            Operation::Ocr => Ok(Self::Ocr {
                language: params.language.clone(),
            }),
        }
    }

    pub fn operation(&self) -> Operation {
        match self {
            Self::Convert { .. } => Operation::Convert,
            Self::Compress { .. } => Operation::Compress,
            Self::Ocr { .. } => Operation::Ocr,
        }
    }
}

/// One unit of work: an input artifact the pipeline takes ownership of.
#[derive(Debug, Clone)]
pub struct Job {
    pub input: Artifact,
    /// Name the caller knows the input by (the upload's original file name).
    pub source_name: String,
    pub task: Task,
}

impl Job {
    pub fn new(input: Artifact, source_name: impl Into<String>, task: Task) -> Self {
        Self {
            input,
            source_name: source_name.into(),
            task,
        }
    }
}

/// An output artifact plus the name it should be delivered under.
#[derive(Debug)]
pub struct Output {
    pub lease: ArtifactLease,
    pub download_name: String,
}

/// Operation-specific metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Metrics {
    Conversion {
        from: DocumentFormat,
        to: DocumentFormat,
        fidelity: Fidelity,
    },
    Compression(CompressionMetrics),
    Ocr {
        text: String,
        confidence: f32,
        language: String,
    },
}

/// Successful pipeline run. OCR returns its text in the metrics and has no
/// output artifact.
#[derive(Debug)]
pub struct Processed {
    pub operation: Operation,
    pub outputs: Vec<Output>,
    pub metrics: Metrics,
}

/// Serialisable view of an output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDescriptor {
    pub path: std::path::PathBuf,
    pub download_name: String,
    pub format: DocumentFormat,
    pub size_bytes: u64,
}

/// Tagged outcome for the transport layer. Exactly one side is populated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum OperationResult {
    Success {
        outputs: Vec<OutputDescriptor>,
        metrics: Metrics,
    },
    Failure(Failure),
}

impl OperationResult {
    pub fn from_outcome(outcome: &StageResult<Processed>) -> Self {
        match outcome {
            Ok(processed) => Self::success(processed),
            Err(err) => Self::Failure(Failure::from(err)),
        }
    }

    pub fn success(processed: &Processed) -> Self {
        Self::Success {
            outputs: processed
                .outputs
                .iter()
                .map(|output| {
                    let artifact = output.lease.artifact();
                    OutputDescriptor {
                        path: artifact.path.clone(),
                        download_name: output.download_name.clone(),
                        format: artifact.format,
                        size_bytes: artifact.size_bytes,
                    }
                })
                .collect(),
            metrics: processed.metrics.clone(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Per-operation upload caps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadLimits {
    pub conversion: u64,
    pub compression: u64,
    pub ocr: u64,
}

impl UploadLimits {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            conversion: config.upload_limit(Operation::Convert),
            compression: config.upload_limit(Operation::Compress),
            ocr: config.upload_limit(Operation::Ocr),
        }
    }

    pub fn for_operation(&self, operation: Operation) -> u64 {
        match operation {
            Operation::Convert => self.conversion,
            Operation::Compress => self.compression,
            Operation::Ocr => self.ocr,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Pipeline {
    artifacts: ArtifactManager,
    converter: ConversionEngine,
    ocr: OcrEngine,
    limits: UploadLimits,
    default_language: String,
}

impl Pipeline {
    pub fn new(artifacts: ArtifactManager, ocr: OcrEngine, config: &ServiceConfig) -> Self {
        Self {
            converter: ConversionEngine::new(artifacts.clone(), config.paper_size),
            artifacts,
            ocr,
            limits: UploadLimits::from_config(config),
            default_language: config.default_language.clone(),
        }
    }

    pub fn artifacts(&self) -> &ArtifactManager {
        &self.artifacts
    }

    pub fn ocr_engine(&self) -> &OcrEngine {
        &self.ocr
    }

    pub fn limits(&self) -> UploadLimits {
        self.limits
    }

    /// Run `job` to completion on the current thread.
    #[instrument(skip(self, job), fields(operation = %job.task.operation(), source = %job.source_name))]
    pub fn process(&self, job: Job) -> StageResult<Processed> {
        let Job {
            input,
            source_name,
            task,
        } = job;
        let input = self.artifacts.lease(input);
        let operation = task.operation();

        self.check_size(&input, operation)?;

        let result = match task {
            Task::Convert { target } => self.convert(&input, &source_name, target),
            Task::Compress { level } => self.compress(&input, &source_name, level),
            Task::Ocr { language } => self.recognize(&input, language.as_deref()),
        };

        match &result {
            Ok(processed) => info!(outputs = processed.outputs.len(), "operation succeeded"),
            Err(err) => warn!(stage = %err.stage, code = err.error.code(), "operation failed"),
        }
        drop(input);
        result
    }

    /// Run `job` on the blocking pool.
    ///
    /// The job moves into the blocking task, so dropping this future does not
    /// interrupt the engine; the task finishes and its leases release both
    /// the input and any outputs nobody collected.
    pub async fn process_async(&self, job: Job) -> StageResult<Processed> {
        let stage = engine_stage(job.task.operation());
        let pipeline = self.clone();
        tokio::task::spawn_blocking(move || pipeline.process(job))
            .await
            .map_err(|err| {
                StageError::new(
                    stage,
                    DokwerkError::Io(std::io::Error::other(format!(
                        "processing task aborted: {err}"
                    ))),
                )
            })?
    }

    fn check_size(&self, input: &ArtifactLease, operation: Operation) -> StageResult<()> {
        let size = std::fs::metadata(input.path())
            .map(|m| m.len())
            .map_err(|err| {
                StageError::new(
                    Stage::Validation,
                    DokwerkError::SourceUnreadable(format!("{}: {err}", input.path().display())),
                )
            })?;
        let limit = self.limits.for_operation(operation);
        if size > limit {
            return Err(StageError::new(
                Stage::Validation,
                DokwerkError::PayloadTooLarge { size, limit },
            ));
        }
        Ok(())
    }

    fn convert(
        &self,
        input: &ArtifactLease,
        source_name: &str,
        target: DocumentFormat,
    ) -> StageResult<Processed> {
        let from = input.artifact().format;
        let request = ConversionRequest::new(input.artifact().clone(), target)
            .map_err(|err| StageError::new(Stage::Validation, err))?;
        if !convert::is_supported(from, target) {
            return Err(StageError::new(
                Stage::Validation,
                DokwerkError::UnsupportedConversion { from, to: target },
            ));
        }

        let conversion = self
            .converter
            .convert(&request, source_name)
            .map_err(|err| StageError::new(Stage::Conversion, err))?;

        Ok(Processed {
            operation: Operation::Convert,
            outputs: vec![Output {
                lease: conversion.output,
                download_name: convert::converted_name(source_name, target),
            }],
            metrics: Metrics::Conversion {
                from,
                to: target,
                fidelity: conversion.fidelity,
            },
        })
    }

    fn compress(
        &self,
        input: &ArtifactLease,
        source_name: &str,
        level: CompressionLevel,
    ) -> StageResult<Processed> {
        let invalid = |err| StageError::new(Stage::Validation, err);
        let request = CompressionRequest::new(input.artifact().clone(), level).map_err(invalid)?;
        if !compress::file_has_pdf_header(input.path()).map_err(invalid)? {
            return Err(invalid(DokwerkError::NotAPdf("missing %PDF- header".into())));
        }

        let in_stage = |err| StageError::new(Stage::Compression, err);
        let output = self
            .artifacts
            .allocate(source_name, DocumentFormat::Pdf)
            .map_err(in_stage)?;
        let mut output = self.artifacts.lease(output);
        let metrics = compress::compress_file(&request, output.path()).map_err(in_stage)?;
        output.refresh().map_err(in_stage)?;

        Ok(Processed {
            operation: Operation::Compress,
            outputs: vec![Output {
                lease: output,
                download_name: compressed_name(source_name),
            }],
            metrics: Metrics::Compression(metrics),
        })
    }

    fn recognize(&self, input: &ArtifactLease, language: Option<&str>) -> StageResult<Processed> {
        let language = language
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(self.default_language.as_str());
        let request = OcrRequest::new(input.artifact().clone(), Some(language));

        if let DocumentFormat::Image(kind) = request.source.format
            && !kind.is_ocr_supported()
        {
            return Err(StageError::new(
                Stage::Validation,
                DokwerkError::UnsupportedImageFormat(kind.mime_type().to_string()),
            ));
        }

        let recognition = self
            .ocr
            .recognize(&request)
            .map_err(|err| StageError::new(Stage::Recognition, err))?;
        debug!(chars = recognition.text.len(), "recognition returned");

        Ok(Processed {
            operation: Operation::Ocr,
            outputs: Vec::new(),
            metrics: Metrics::Ocr {
                text: recognition.text,
                confidence: recognition.confidence,
                language: request.language,
            },
        })
    }
}

fn engine_stage(operation: Operation) -> Stage {
    match operation {
        Operation::Convert => Stage::Conversion,
        Operation::Compress => Stage::Compression,
        Operation::Ocr => Stage::Recognition,
    }
}

/// `<stem>_compressed.pdf`.
pub fn compressed_name(source_name: &str) -> String {
    format!("{}_compressed.pdf", convert::stem_of(source_name))
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use dokwerk_core::error::ErrorKind;
    use dokwerk_core::types::ImageKind;

    use super::*;
    use crate::docx::writer::DocxWriter;
    use crate::ocr::testing::{FakeBackend, engine as fake_ocr, write_png};
    use crate::pdf::writer::PdfWriter;

    struct Fixture {
        _dir: tempfile::TempDir,
        artifacts: ArtifactManager,
        pipeline: Pipeline,
        backend: std::sync::Arc<FakeBackend>,
    }

    fn fixture_with(config: ServiceConfig) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = ArtifactManager::new(dir.path().join("scratch"));
        let (backend, ocr) = fake_ocr(FakeBackend::default());
        let pipeline = Pipeline::new(artifacts.clone(), ocr, &config);
        Fixture {
            _dir: dir,
            artifacts,
            pipeline,
            backend,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(ServiceConfig::default())
    }

    fn upload(artifacts: &ArtifactManager, name: &str, format: DocumentFormat, write: impl FnOnce(&Path)) -> Artifact {
        let mut artifact = artifacts.allocate(name, format).unwrap();
        write(&artifact.path);
        artifacts.refresh(&mut artifact).unwrap();
        artifact
    }

    fn docx(artifacts: &ArtifactManager, text: &str) -> Artifact {
        upload(artifacts, "minutes.docx", DocumentFormat::Docx, |p| {
            DocxWriter::from_text(text).write_to_file(p).unwrap()
        })
    }

    fn pdf(artifacts: &ArtifactManager) -> Artifact {
        let text = (0..80).map(|i| format!("row {i}")).collect::<Vec<_>>().join("\n");
        upload(artifacts, "report.pdf", DocumentFormat::Pdf, |p| {
            PdfWriter::a4().write_text_to_file(&text, p).unwrap()
        })
    }

    fn files_in(artifacts: &ArtifactManager) -> usize {
        std::fs::read_dir(artifacts.root()).map(|d| d.count()).unwrap_or(0)
    }

    #[test]
    fn params_parse_per_operation() {
        let params = OperationParams {
            target_format: Some("pdf".into()),
            ..Default::default()
        };
        assert_eq!(
            Task::from_params(Operation::Convert, &params).unwrap(),
            Task::Convert {
                target: DocumentFormat::Pdf
            }
        );
        assert_eq!(
            Task::from_params(Operation::Compress, &OperationParams::default()).unwrap(),
            Task::Compress {
                level: CompressionLevel::Medium
            }
        );

        let missing = Task::from_params(Operation::Convert, &OperationParams::default()).unwrap_err();
        assert_eq!(missing.stage, Stage::Validation);
        let bad_level = OperationParams {
            compression_level: Some("extreme".into()),
            ..Default::default()
        };
        assert!(Task::from_params(Operation::Compress, &bad_level).is_err());
    }

    #[test]
    fn conversion_success_releases_input_and_names_output() {
        let fx = fixture();
        let input = docx(&fx.artifacts, "Agenda\nBudget");
        let input_path = input.path.clone();

        let processed = fx
            .pipeline
            .process(Job::new(input, "minutes.docx", Task::Convert { target: DocumentFormat::Pdf }))
            .unwrap();

        assert!(!input_path.exists());
        assert_eq!(processed.outputs.len(), 1);
        let output = &processed.outputs[0];
        assert_eq!(output.download_name, "minutes.pdf");
        assert!(output.lease.path().exists());
        assert!(matches!(
            processed.metrics,
            Metrics::Conversion {
                fidelity: Fidelity::Faithful,
                ..
            }
        ));

        let output_path = output.lease.path().to_path_buf();
        drop(processed);
        assert!(!output_path.exists());
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn conversion_failure_releases_everything() {
        let fx = fixture();
        let input = upload(&fx.artifacts, "broken.docx", DocumentFormat::Docx, |p| {
            std::fs::write(p, b"garbage").unwrap()
        });

        let err = fx
            .pipeline
            .process(Job::new(input, "broken.docx", Task::Convert { target: DocumentFormat::Pdf }))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Conversion);
        assert!(matches!(err.error, DokwerkError::SourceUnreadable(_)));
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn no_op_conversion_never_reaches_an_engine() {
        let fx = fixture();
        let input = docx(&fx.artifacts, "same");

        let err = fx
            .pipeline
            .process(Job::new(input, "same.docx", Task::Convert { target: DocumentFormat::Docx }))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Validation);
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(err.error, DokwerkError::NoOpConversion(_)));
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn compression_reports_metrics_and_names_output() {
        let fx = fixture();
        let input = pdf(&fx.artifacts);
        let original = input.size_bytes;

        let processed = fx
            .pipeline
            .process(Job::new(input, "report.pdf", Task::Compress { level: CompressionLevel::High }))
            .unwrap();

        let Metrics::Compression(metrics) = &processed.metrics else {
            panic!("expected compression metrics");
        };
        assert_eq!(metrics.original_size, original);
        assert_eq!(metrics.compressed_size, processed.outputs[0].lease.artifact().size_bytes);
        assert_eq!(
            metrics.saved_bytes,
            metrics.original_size as i64 - metrics.compressed_size as i64
        );
        assert_eq!(processed.outputs[0].download_name, "report_compressed.pdf");
        assert_eq!(files_in(&fx.artifacts), 1);
    }

    #[test]
    fn compressing_a_non_pdf_is_rejected_up_front() {
        let fx = fixture();
        let declared = docx(&fx.artifacts, "not a pdf");
        let err = fx
            .pipeline
            .process(Job::new(declared, "x.docx", Task::Compress { level: CompressionLevel::Low }))
            .unwrap_err();
        assert_eq!(err.stage, Stage::Validation);
        assert!(matches!(err.error, DokwerkError::NotAPdf(_)));

        let disguised = upload(&fx.artifacts, "fake.pdf", DocumentFormat::Pdf, |p| {
            std::fs::write(p, b"PK\x03\x04").unwrap()
        });
        let err = fx
            .pipeline
            .process(Job::new(disguised, "fake.pdf", Task::Compress { level: CompressionLevel::Low }))
            .unwrap_err();
        assert!(matches!(err.error, DokwerkError::NotAPdf(_)));
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn gif_ocr_is_rejected_without_a_worker() {
        let fx = fixture();
        let input = upload(&fx.artifacts, "anim.gif", DocumentFormat::Image(ImageKind::Gif), |p| {
            std::fs::write(p, b"GIF89a").unwrap()
        });

        let err = fx
            .pipeline
            .process(Job::new(input, "anim.gif", Task::Ocr { language: None }))
            .unwrap_err();
        assert!(matches!(err.error, DokwerkError::UnsupportedImageFormat(_)));
        assert_eq!(fx.backend.spawned(), 0);
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn ocr_success_uses_default_language_and_releases_input() {
        let fx = fixture();
        let input = upload(&fx.artifacts, "scan.png", DocumentFormat::Image(ImageKind::Png), |p| {
            write_png(p, 30, 10)
        });

        let processed = fx
            .pipeline
            .process(Job::new(input, "scan.png", Task::Ocr { language: Some("  ".into()) }))
            .unwrap();
        assert!(processed.outputs.is_empty());
        assert_eq!(
            processed.metrics,
            Metrics::Ocr {
                text: "30x10 eng".into(),
                confidence: 91.5,
                language: "eng".into(),
            }
        );
        assert_eq!(fx.backend.spawned(), 1);
        assert_eq!(fx.backend.terminated(), 1);
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn oversized_uploads_are_rejected() {
        let config = ServiceConfig {
            max_compression_bytes: 16,
            ..Default::default()
        };
        let fx = fixture_with(config);
        let input = pdf(&fx.artifacts);

        let err = fx
            .pipeline
            .process(Job::new(input, "report.pdf", Task::Compress { level: CompressionLevel::Medium }))
            .unwrap_err();
        assert!(matches!(err.error, DokwerkError::PayloadTooLarge { limit: 16, .. }));
        assert_eq!(files_in(&fx.artifacts), 0);
    }

    #[test]
    fn result_envelope_has_exactly_one_side() {
        let fx = fixture();
        let input = docx(&fx.artifacts, "x");
        let outcome = fx
            .pipeline
            .process(Job::new(input, "x.docx", Task::Convert { target: DocumentFormat::Docx }));
        let json = serde_json::to_value(OperationResult::from_outcome(&outcome)).unwrap();
        assert_eq!(json["outcome"], "failure");
        assert_eq!(json["code"], "no_op_conversion");
        assert_eq!(json["status"], 400);
        assert!(json.get("outputs").is_none());

        let input = docx(&fx.artifacts, "y");
        let outcome = fx
            .pipeline
            .process(Job::new(input, "y.docx", Task::Convert { target: DocumentFormat::Pdf }));
        let json = serde_json::to_value(OperationResult::from_outcome(&outcome)).unwrap();
        assert_eq!(json["outcome"], "success");
        assert_eq!(json["outputs"][0]["download_name"], "y.pdf");
        assert_eq!(json["metrics"]["kind"], "conversion");
    }

    #[test]
    fn compressed_names() {
        assert_eq!(compressed_name("scan.pdf"), "scan_compressed.pdf");
        assert_eq!(compressed_name("dir/a.b.pdf"), "a.b_compressed.pdf");
    }

    #[tokio::test]
    async fn async_processing_releases_input() {
        let fx = fixture();
        let input = docx(&fx.artifacts, "async");
        let input_path = input.path.clone();

        let processed = fx
            .pipeline
            .process_async(Job::new(input, "async.docx", Task::Convert { target: DocumentFormat::Pdf }))
            .await
            .unwrap();
        assert!(!input_path.exists());
        assert_eq!(processed.outputs[0].download_name, "async.pdf");
    }
}
