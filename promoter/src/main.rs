//! Promoter - Entry Point
//!
//! Runs the approval-gated deployment promotion engine: the pipeline
//! supervisor, the approval expiry sweeper and the read-only status server.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::process::ExitCode;

use promoter::app::options::AppOptions;
use promoter::app::run::run;
use promoter::audit::{AuditLog, HashChainAuditLog};
use promoter::filesys::file::File;
use promoter::logs::{init_logging, LogOptions};
use promoter::storage::layout::StorageLayout;
use promoter::storage::settings::Settings;
use promoter::utils::version_info;

use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("config") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Unable to load settings: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Verify the audit chain and exit
    let audit_path = settings
        .audit_file
        .clone()
        .unwrap_or_else(|| layout.audit_file().path().to_path_buf());
    if cli_args.contains_key("verify-audit") {
        return verify_audit(&audit_path).await;
    }

    // Initialize logging; the guard flushes the file writer on exit
    let log_options = LogOptions {
        log_level: settings.log_level.clone(),
        log_dir: settings.log_dir.clone(),
        json_format: settings.json_logs,
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    // Run the engine
    let mut options = AppOptions::from_settings(&settings);
    options.audit_file = Some(audit_path);
    info!("Running promotion engine with options: {:?}", options);
    match run(version.version, options, await_shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to run the promotion engine: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn verify_audit(path: &Path) -> ExitCode {
    let result = match HashChainAuditLog::open(path).await {
        Ok(log) => log.verify().await,
        Err(e) => Err(e),
    };
    match result {
        Ok(verification) => {
            match serde_json::to_string_pretty(&verification) {
                Ok(json) => println!("{}", json),
                Err(_) => println!("valid: {}", verification.valid),
            }
            if verification.valid {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(e) => {
            eprintln!("Unable to verify audit chain {}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) =
            match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                (Ok(term), Ok(int)) => (term, int),
                _ => {
                    error!("Failed to install signal handlers, falling back to Ctrl+C");
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl+C received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
        }
        info!("Ctrl+C received, shutting down...");
    }
}
