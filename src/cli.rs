use crate::config::settings::ServerConfig;
use crate::config::types::{Bindings, ExecutionRequest, ExecutorConfig};
use crate::core::worker::run_worker_main;
use crate::exec::Executor;
use crate::server::LimitsBody;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Internal role selector (hidden; used by the worker re-exec path)
    #[arg(long, hide = true)]
    internal_role: Option<String>,
    /// Status fd for the internal worker role
    #[arg(long, hide = true)]
    status_fd: Option<i32>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one snippet and print the result as JSON
    Run {
        /// Source code as string
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Wall clock time limit in seconds
        #[arg(long, default_value_t = 5)]
        timeout: i64,
        /// Memory limit in MB
        #[arg(long, default_value_t = 128)]
        mem: i64,
        /// Include the final local namespace in the result
        #[arg(long)]
        capture_locals: bool,
        /// Initial globals as a JSON object
        #[arg(long)]
        globals: Option<String>,
        /// Initial locals as a JSON object
        #[arg(long)]
        locals: Option<String>,
        /// Milliseconds between SIGTERM and SIGKILL on timeout
        #[arg(long, default_value_t = 1000)]
        grace_ms: u64,
        /// Python interpreter to run the snippet with
        #[arg(long)]
        python: Option<PathBuf>,
    },
    /// Serve the HTTP API
    Serve {
        /// Address to bind, overrides the config file
        #[arg(long)]
        bind: Option<String>,
        /// Server configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Append audit records to this file
        #[arg(long)]
        audit_log: Option<PathBuf>,
    },
    /// Print the configured limits
    Limits {
        /// Server configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn parse_bindings(flag: &str, raw: Option<&str>) -> Result<Option<Bindings>> {
    raw.map(|raw| {
        serde_json::from_str::<Bindings>(raw)
            .with_context(|| format!("--{} must be a JSON object", flag))
    })
    .transpose()
}

fn read_code(code: Option<String>, file: Option<&Path>) -> Result<String> {
    match (code, file) {
        (Some(code), _) => Ok(code),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display())),
        (None, None) => Err(anyhow::anyhow!("one of --code or --file is required")),
    }
}

fn executor_for(config: &ServerConfig) -> Result<Executor> {
    let mut executor = match &config.worker_program {
        Some(program) => Executor::with_program(program),
        None => Executor::current_exe().context("cannot locate the snipbox binary")?,
    };
    if let Some(python) = &config.python_program {
        executor = executor.with_interpreter(python);
    }
    Ok(executor.with_grace(config.grace_period()))
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    if let Some(role) = cli.internal_role.as_deref() {
        if role == "worker" {
            let status_fd = cli.status_fd.ok_or_else(|| {
                anyhow::anyhow!("--status-fd is required for --internal-role=worker")
            })?;
            run_worker_main(status_fd);
        }
        return Err(anyhow::anyhow!("unsupported internal role: {}", role));
    }

    env_logger::init();

    let command = cli.command.ok_or_else(|| anyhow::anyhow!("missing command"))?;
    match command {
        Commands::Run {
            code,
            file,
            timeout,
            mem,
            capture_locals,
            globals,
            locals,
            grace_ms,
            python,
        } => {
            let config = ExecutorConfig::new(timeout, mem)?;
            let mut request = ExecutionRequest::new(read_code(code, file.as_deref())?)
                .capture_locals(capture_locals);
            request.initial_globals = parse_bindings("globals", globals.as_deref())?;
            request.initial_locals = parse_bindings("locals", locals.as_deref())?;

            let mut executor = Executor::current_exe()?
                .with_grace(std::time::Duration::from_millis(grace_ms));
            if let Some(python) = python {
                executor = executor.with_interpreter(python);
            }
            let result = executor.execute(&config, &request);
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Serve {
            bind,
            config,
            audit_log,
        } => {
            let mut server_config = ServerConfig::load_or_default(config.as_deref())?;
            server_config.validate()?;
            if let Some(bind) = bind {
                server_config.bind_addr = bind;
            }
            if let Some(path) = audit_log {
                server_config.audit_log = Some(path);
            }
            if let Some(path) = &server_config.audit_log {
                crate::observability::audit::init_audit_log(path)?;
            }

            let executor = executor_for(&server_config)?;
            let runtime = tokio::runtime::Runtime::new()?;
            runtime.block_on(crate::server::serve(server_config, executor))
        }
        Commands::Limits { config } => {
            let server_config = ServerConfig::load_or_default(config.as_deref())?;
            let limits = LimitsBody::from_config(&server_config);
            println!("{}", serde_json::to_string_pretty(&limits)?);
            Ok(())
        }
    }
}
