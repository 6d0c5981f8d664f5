use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use sandbox_core::executors::{CodeExecutor, DockerCodeExecutor, ProcessExecutor};
use sandbox_core::{
    CompilerRegistry, ConfigLoader, SandboxConfig, SandboxRequest, SandboxService, SandboxTest,
};
use sandbox_server::{shutdown_signal, SandboxServer, ServerConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[clap(name = "sandbox", author, version, about = "Run untrusted code in throwaway containers")]
struct Cli {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(
        long,
        short,
        global = true,
        default_value = "sandbox.yaml",
        help = "Path to the YAML configuration file (defaults are used when it is missing)"
    )]
    config: PathBuf,

    #[clap(long, global = true, help = "Log level, overrides logging.level")]
    log_level: Option<String>,

    #[clap(
        long,
        global = true,
        help = "Run programs directly on the host instead of in Docker (no isolation)"
    )]
    local: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server (default command)
    Serve {
        #[clap(long, help = "Address to listen on, overrides server.bind_addr")]
        bind_addr: Option<String>,
    },
    /// Execute one source file and print the JSON response
    Run {
        #[clap(long, short)]
        language: String,

        #[clap(long, short)]
        file: PathBuf,

        #[clap(long, help = "File whose lines are fed to the program's stdin")]
        stdin: Option<PathBuf>,

        #[clap(long, help = "File with the expected stdout")]
        expected: Option<PathBuf>,

        #[clap(long, short, help = "Timeout in seconds")]
        timeout: Option<u64>,
    },
    /// List the configured languages
    Languages,
    /// Check that the executor and runtime image are usable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::from_file_or_default(&cli.config)
        .await
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;

    let level_filter = log_level_filter(cli.log_level.as_deref(), &config.logging.level)?;
    env_logger::Builder::new().filter_level(level_filter).init();

    match cli.command.unwrap_or(Commands::Serve { bind_addr: None }) {
        Commands::Serve { bind_addr } => serve(config, bind_addr, cli.local).await,
        Commands::Run {
            language,
            file,
            stdin,
            expected,
            timeout,
        } => {
            let request = build_request(
                &language,
                &file,
                stdin.as_deref(),
                expected.as_deref(),
                timeout,
            )
            .await?;
            run_once(config, request, cli.local).await
        }
        Commands::Languages => {
            list_languages(&config);
            Ok(())
        }
        Commands::Check => check(config, cli.local).await,
    }
}

/// The `--log-level` flag wins over `logging.level`.
fn log_level_filter(flag: Option<&str>, configured: &str) -> Result<LevelFilter> {
    let level = flag.unwrap_or(configured);
    level.parse().map_err(|_| {
        anyhow::anyhow!(
            "Invalid log level '{}', expected one of off, error, warn, info, debug, trace",
            level
        )
    })
}

fn create_executor(config: &SandboxConfig, local: bool) -> Result<Arc<dyn CodeExecutor>> {
    if local {
        log::warn!("Using the local process executor: programs run on the host without isolation");
        return Ok(Arc::new(ProcessExecutor::new()));
    }
    let executor = DockerCodeExecutor::new(config.docker.clone())
        .context("Failed to connect to the Docker daemon")?;
    Ok(Arc::new(executor))
}

async fn serve(config: SandboxConfig, bind_addr: Option<String>, local: bool) -> Result<()> {
    let mut server_config = ServerConfig::from_section(&config.server)?;
    if let Some(addr) = bind_addr {
        server_config = server_config.with_bind_addr_str(&addr)?;
    }

    let executor = create_executor(&config, local)?;
    if let Err(e) = executor.prepare().await {
        // The server still starts; /health reports the executor as degraded.
        log::error!("Executor '{}' is not ready: {}", executor.name(), e);
    }

    let service = SandboxService::new(config, executor);
    SandboxServer::with_config(service, server_config)
        .serve_with_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn read_lines(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content.lines().map(str::to_string).collect())
}

async fn build_request(
    language: &str,
    file: &Path,
    stdin: Option<&Path>,
    expected: Option<&Path>,
    timeout: Option<u64>,
) -> Result<SandboxRequest> {
    let source = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read source file {}", file.display()))?;

    let mut request = SandboxRequest::new(language, source);
    if let Some(timeout) = timeout {
        request = request.with_timeout(timeout);
    }

    if stdin.is_some() || expected.is_some() {
        let stdin_data = match stdin {
            Some(path) => read_lines(path).await?,
            None => Vec::new(),
        };
        let expected_stdout_data = match expected {
            Some(path) => Some(read_lines(path).await?),
            None => None,
        };
        request = request.with_test(SandboxTest {
            id: "cli".to_string(),
            stdin_data,
            expected_stdout_data,
        });
    }
    Ok(request)
}

async fn run_once(config: SandboxConfig, request: SandboxRequest, local: bool) -> Result<()> {
    let executor = create_executor(&config, local)?;
    executor.prepare().await?;

    let service = SandboxService::new(config, executor);
    let execution = service.execute(request);
    tokio::pin!(execution);

    let response = tokio::select! {
        response = &mut execution => response?,
        _ = tokio::signal::ctrl_c() => {
            // exiting now would leave the container behind
            log::warn!("Interrupted, waiting for the sandbox to time out and clean up");
            execution.await?
        }
    };
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn list_languages(config: &SandboxConfig) {
    let registry = CompilerRegistry::new(&config.languages);
    for compiler in registry.languages() {
        let aliases = if compiler.aliases.is_empty() {
            String::new()
        } else {
            format!(" (aliases: {})", compiler.aliases.join(", "))
        };
        println!(
            "{:<10} {:<8} {}{}",
            compiler.language, compiler.compiler, compiler.source_file, aliases
        );
    }
}

async fn check(config: SandboxConfig, local: bool) -> Result<()> {
    let executor = create_executor(&config, local)?;
    if !executor.is_available().await {
        anyhow::bail!("Executor '{}' is not available", executor.name());
    }
    println!("executor '{}' is available", executor.name());

    executor
        .prepare()
        .await
        .with_context(|| format!("Executor '{}' failed to prepare", executor.name()))?;
    if !local {
        println!("image '{}' is ready", config.docker.image);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_flag_overrides_config_and_is_validated() {
        assert_eq!(log_level_filter(None, "warn").unwrap(), LevelFilter::Warn);
        assert_eq!(
            log_level_filter(Some("debug"), "warn").unwrap(),
            LevelFilter::Debug
        );
        assert!(log_level_filter(Some("verbose"), "info").is_err());
    }
}
