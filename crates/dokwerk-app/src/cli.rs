// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Command-line surface. Plays the transport layer: copies the client file
// into the temp root, submits it, prints the JSON envelope, and writes the
// outputs next to the caller before signalling them consumed.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use dokwerk_core::error::{DokwerkError, Result};
use dokwerk_core::types::{DocumentFormat, Operation};
use dokwerk_document::OperationParams;
use serde::Serialize;
use tracing::{info, warn};

use crate::services::processing::{Envelope, ProcessingService, Submission, deliver};

#[derive(Debug, Parser)]
#[command(
    name = "dokwerk",
    version,
    about = "Metered DOCX/PDF conversion, PDF compression, and OCR"
)]
pub struct Cli {
    /// Scratch directory for uploads and outputs
    #[arg(long, global = true)]
    pub temp_root: Option<PathBuf>,
    /// SQLite database holding usage records and API keys
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args)]
pub struct Upload {
    /// File to process
    pub file: PathBuf,
    /// API key, bare or as "Bearer <key>"
    #[arg(long)]
    pub key: String,
    /// Declared MIME type; inferred from the extension when omitted
    #[arg(long)]
    pub mime: Option<String>,
    /// Directory the output is written to
    #[arg(long, short, default_value = ".")]
    pub out: PathBuf,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Convert DOCX to PDF or PDF to DOCX
    Convert {
        #[command(flatten)]
        upload: Upload,
        /// Target format: pdf or docx
        #[arg(long, short)]
        to: String,
    },
    /// Re-pack a PDF to make it smaller
    Compress {
        #[command(flatten)]
        upload: Upload,
        /// low, medium, or high
        #[arg(long)]
        level: Option<String>,
    },
    /// Extract text from an image
    Ocr {
        #[command(flatten)]
        upload: Upload,
        /// Tesseract-style language code, e.g. eng or eng+deu
        #[arg(long)]
        lang: Option<String>,
    },
    /// Show this month's usage and latest operations for a key
    Quota {
        #[arg(long)]
        key: String,
        /// How many recent operations to list
        #[arg(long, default_value_t = 5)]
        recent: u32,
    },
    /// Manage API users
    User {
        #[command(subcommand)]
        command: UserCommand,
    },
    /// Delete temp files older than the retention window
    Sweep,
    /// List supported conversions, compression levels, and OCR languages
    Capabilities,
}

#[derive(Debug, Subcommand)]
pub enum UserCommand {
    /// Register a user under an operator-chosen API key
    Add {
        name: String,
        #[arg(long)]
        key: String,
    },
}

#[derive(Serialize)]
struct UserAdded<'a> {
    user_id: i64,
    name: &'a str,
    users: u64,
}

#[derive(Serialize)]
struct Swept {
    removed: usize,
}

pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(command: Command, service: &ProcessingService) -> Result<ExitCode> {
    match command {
        Command::Convert { upload, to } => {
            let params = OperationParams {
                target_format: Some(to),
                ..OperationParams::default()
            };
            submit(service, upload, Operation::Convert, params).await
        }
        Command::Compress { upload, level } => {
            let params = OperationParams {
                compression_level: level,
                ..OperationParams::default()
            };
            submit(service, upload, Operation::Compress, params).await
        }
        Command::Ocr { upload, lang } => {
            let params = OperationParams {
                language: lang,
                ..OperationParams::default()
            };
            submit(service, upload, Operation::Ocr, params).await
        }
        Command::Quota { key, recent } => {
            print_json(&service.quota_report(&key, recent)?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::User {
            command: UserCommand::Add { name, key },
        } => {
            let id = service.add_user(&name, &key)?;
            print_json(&UserAdded {
                user_id: id.0,
                name: &name,
                users: service.user_count()?,
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sweep => {
            print_json(&Swept {
                removed: service.sweep(),
            })?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Capabilities => {
            print_json(&service.capabilities())?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn submit(
    service: &ProcessingService,
    upload: Upload,
    operation: Operation,
    params: OperationParams,
) -> Result<ExitCode> {
    let format = declared_format(&upload.file, upload.mime.as_deref())?;
    let artifact = service.stage_upload(&upload.file, format)?;
    let source_name = upload
        .file
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| artifact.file_name());

    let outcome = service
        .submit(Submission {
            credential: upload.key,
            upload: artifact,
            source_name,
            operation,
            params,
        })
        .await;
    print_json(&Envelope::from_outcome(&outcome))?;

    match outcome {
        Ok(served) => {
            for output in served.processed.outputs {
                let written = deliver(output, &upload.out)?;
                info!(path = %written.display(), "output written");
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(rejection) => {
            let failure = &rejection.failure;
            warn!(code = %failure.code, status = failure.status, "request failed");
            Ok(ExitCode::FAILURE)
        }
    }
}

/// The MIME type if given, otherwise the file extension.
fn declared_format(file: &Path, mime: Option<&str>) -> Result<DocumentFormat> {
    if let Some(mime) = mime {
        return DocumentFormat::from_mime_type(mime)
            .ok_or_else(|| DokwerkError::InvalidParameter(format!("unsupported MIME type {mime}")));
    }
    DocumentFormat::from_path(file).ok_or_else(|| {
        DokwerkError::InvalidParameter(format!(
            "cannot tell the format of {}; pass --mime",
            file.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use dokwerk_core::types::ImageKind;

    use super::*;

    #[test]
    fn parses_convert_with_global_flags() {
        let cli = Cli::try_parse_from([
            "dokwerk",
            "--temp-root",
            "/tmp/dw",
            "convert",
            "report.docx",
            "--key",
            "API_1",
            "--to",
            "pdf",
        ])
        .unwrap();
        assert_eq!(cli.temp_root, Some(PathBuf::from("/tmp/dw")));
        match cli.command {
            Command::Convert { upload, to } => {
                assert_eq!(upload.file, PathBuf::from("report.docx"));
                assert_eq!(upload.out, PathBuf::from("."));
                assert_eq!(to, "pdf");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn quota_lists_five_recent_by_default() {
        let cli = Cli::try_parse_from(["dokwerk", "quota", "--key", "API_1"]).unwrap();
        assert!(matches!(cli.command, Command::Quota { recent: 5, .. }));
        let cli =
            Cli::try_parse_from(["dokwerk", "quota", "--key", "API_1", "--recent", "20"]).unwrap();
        assert!(matches!(cli.command, Command::Quota { recent: 20, .. }));
    }

    #[test]
    fn user_add_requires_a_key() {
        assert!(Cli::try_parse_from(["dokwerk", "user", "add", "alice"]).is_err());
        assert!(Cli::try_parse_from(["dokwerk", "user", "add", "alice", "--key", "API_a"]).is_ok());
    }

    #[test]
    fn format_from_mime_then_extension() {
        let path = Path::new("scan.bin");
        assert_eq!(
            declared_format(path, Some("image/png")).unwrap(),
            DocumentFormat::Image(ImageKind::Png)
        );
        assert!(declared_format(path, None).is_err());
        assert_eq!(
            declared_format(Path::new("Letter.DOCX"), None).unwrap(),
            DocumentFormat::Docx
        );
    }
}
