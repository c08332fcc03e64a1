use crate::config::loader::ServiceConfig;
use crate::config::types::CodeSubmission;
use crate::config::validator::validate_config;
use crate::core::types::BackendKind;
use crate::exec::executor::{build_backend, Sandbox};
use crate::http::router::{run_body, Router, INTERNAL_ERROR_MESSAGE};
use crate::http::HttpServer;
use crate::kernel::signal::{should_continue, ShutdownSignal};
use crate::lessons::StaticLessonStore;
use crate::observability::audit::{SecurityEvent, SecurityEventType, SecurityLogger};
use crate::observability::metrics::get_metrics;
use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "learnbox", author, version, about, long_about = None)]
struct Cli {
    /// Internal role selector (hidden; used by the process backend)
    #[arg(long, hide = true)]
    internal_role: Option<String>,
    /// JSON configuration file
    #[arg(long, global = true, env = "LEARNBOX_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args, Debug, Default)]
struct PolicyOverrides {
    /// Execution backend: thread or process
    #[arg(long)]
    backend: Option<BackendKind>,
    /// Named policy preset
    #[arg(long)]
    preset: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API
    Serve {
        /// Listen address (host:port)
        #[arg(long)]
        bind: Option<String>,
        #[command(flatten)]
        overrides: PolicyOverrides,
    },
    /// Run one snippet locally and print the API response
    Run {
        /// Source code as a string
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// File holding the source code
        #[arg(required_unless_present = "code")]
        file: Option<PathBuf>,
        #[command(flatten)]
        overrides: PolicyOverrides,
    },
    /// Validate configuration and lesson data, then exit
    CheckConfig,
    /// List the available policy presets
    Presets,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Some(role) = cli.internal_role.as_deref() {
        if role == "worker" {
            std::process::exit(crate::core::proxy::worker_main());
        }
        return Err(anyhow!("unsupported internal role: {}", role));
    }

    env_logger::init();

    let command = cli
        .command
        .ok_or_else(|| anyhow!("missing command (try `learnbox --help`)"))?;
    let config = ServiceConfig::load(cli.config.as_deref())?;

    match command {
        Commands::Serve { bind, overrides } => serve(config, bind, overrides),
        Commands::Run {
            code,
            file,
            overrides,
        } => run_once(config, code, file, overrides),
        Commands::CheckConfig => check_config(config, cli.config.as_deref()),
        Commands::Presets => {
            list_presets();
            Ok(())
        }
    }
}

fn apply_overrides(config: &mut ServiceConfig, overrides: PolicyOverrides) {
    if let Some(backend) = overrides.backend {
        config.governor.backend = backend;
    }
    if let Some(preset) = overrides.preset {
        // A preset named on the command line replaces an inline policy.
        config.policy = None;
        config.preset = Some(preset);
    }
}

/// Validate, then report warnings through the log and the audit trail
fn checked(config: &ServiceConfig, audit: &SecurityLogger) -> Result<()> {
    match validate_config(config) {
        Ok(result) => {
            for warning in &result.warnings {
                warn!("config: {}", warning);
            }
            Ok(())
        }
        Err(e) => {
            audit.log_security_event(&SecurityEvent::new(
                SecurityEventType::ConfigurationViolation,
                e.to_string(),
            ));
            Err(e.into())
        }
    }
}

fn build_sandbox(config: &ServiceConfig, audit: Arc<SecurityLogger>) -> Result<Sandbox> {
    let policy = config.effective_policy()?;
    let backend = build_backend(&config.governor).context("building execution backend")?;
    Ok(Sandbox::new(policy, backend)
        .with_metrics(get_metrics())
        .with_audit(audit))
}

fn serve(mut config: ServiceConfig, bind: Option<String>, overrides: PolicyOverrides) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    apply_overrides(&mut config, overrides);

    let audit = Arc::new(SecurityLogger::from_config(config.audit_log_path.as_deref())?);
    checked(&config, &audit)?;

    let lessons = StaticLessonStore::load(config.lessons_path.as_deref())?;
    let sandbox = build_sandbox(&config, audit)?;
    info!(
        "Serving {} lessons, backend {}, policy {:?}",
        lessons.len(),
        sandbox.backend_name(),
        sandbox.policy()
    );

    let signals = ShutdownSignal::install().map_err(|e| anyhow!(e))?;
    let router = Router::new(Arc::new(sandbox), Arc::new(lessons));
    let server = HttpServer::bind(&config.server, router)?;
    server.serve_until(should_continue)?;

    if signals.requested() {
        info!("Shutdown requested by signal {}", signals.received());
    }
    Ok(())
}

fn run_once(
    mut config: ServiceConfig,
    code: Option<String>,
    file: Option<PathBuf>,
    overrides: PolicyOverrides,
) -> Result<()> {
    apply_overrides(&mut config, overrides);
    let source = match (code, file) {
        (Some(code), _) => code,
        (None, Some(path)) => std::fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?,
        (None, None) => return Err(anyhow!("pass --code or a file")),
    };

    let audit = Arc::new(SecurityLogger::from_config(config.audit_log_path.as_deref())?);
    checked(&config, &audit)?;
    let sandbox = build_sandbox(&config, audit)?;

    let (body, ok) = match sandbox.submit(CodeSubmission::new(source)) {
        Ok(outcome) => (run_body(&outcome), outcome.is_success()),
        Err(e) => {
            warn!("Run failed on the host side: {}", e);
            (json!({ "output": "", "error": INTERNAL_ERROR_MESSAGE }), false)
        }
    };
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

fn check_config(config: ServiceConfig, path: Option<&Path>) -> Result<()> {
    let audit = SecurityLogger::from_config(config.audit_log_path.as_deref())?;
    checked(&config, &audit)?;
    let lessons = StaticLessonStore::load(config.lessons_path.as_deref())?;

    match path {
        Some(path) => println!("Configuration {} is valid", path.display()),
        None => println!("Default configuration is valid"),
    }
    println!("  bind:    {}", config.server.bind);
    println!("  backend: {}", config.governor.backend);
    println!("  lessons: {}", lessons.len());
    Ok(())
}

fn list_presets() {
    let presets = crate::config::presets::get_presets();
    for id in presets.list_ids() {
        if let Some(preset) = presets.get(id) {
            println!("{:<22} {} (v{})", id, preset.name, preset.version);
        }
    }
}
