// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Dokwerk — metered document conversion, PDF compression, and OCR
//
// Entry point. Initialises logging, loads config, opens the backend services,
// sweeps abandoned temp files, and runs the requested command.

mod cli;
mod services;

use std::process::ExitCode;

use clap::Parser;
use dokwerk_core::error::DokwerkError;
use dokwerk_core::failure::Failure;

use cli::Cli;
use services::data_dir;
use services::processing::ProcessingService;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let dir = data_dir::data_dir();
    let mut config = data_dir::load_config(&data_dir::config_path(&dir), &dir);
    if let Some(temp_root) = cli.temp_root {
        config.temp_root = temp_root;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    tracing::info!("Dokwerk starting");

    let service = match ProcessingService::init(config) {
        Ok(service) => service,
        Err(e) => {
            tracing::error!(error = %e, "backend services failed to start");
            return report(&e);
        }
    };

    let swept = service.startup_sweep();
    tracing::debug!(swept, "startup sweep done");

    match cli::run(cli.command, &service).await {
        Ok(code) => code,
        Err(e) => report(&e),
    }
}

fn report(err: &DokwerkError) -> ExitCode {
    if let Err(print_err) = cli::print_json(&Failure::from(err)) {
        tracing::error!(error = %print_err, "cannot print failure");
    }
    ExitCode::FAILURE
}
