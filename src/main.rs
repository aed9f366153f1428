use anyhow::Result;
use clap::Parser;
use std::process::ExitCode;
use std::time::Duration;

use agentsandbox::cli::{self, Cli, Commands, ConfigSource, EXIT_SANDBOX_ERROR};

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {e}");
            return ExitCode::from(EXIT_SANDBOX_ERROR);
        }
    };

    let code = runtime.block_on(async_main(cli));
    // Tasks left behind by an abandoned sandboxed command must not delay exit
    runtime.shutdown_timeout(Duration::from_millis(100));
    code
}

async fn async_main(cli: Cli) -> ExitCode {
    // Logs go to stderr; stdout carries the sandboxed command's output
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let source = match ConfigSource::from_cli(&cli) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::from(EXIT_SANDBOX_ERROR);
        }
    };

    match cli.command {
        Commands::Exec(args) => match cli::exec::run(args, &source).await {
            Ok(code) => ExitCode::from(code),
            Err(e) => {
                eprintln!("sandbox error: {e:#}");
                ExitCode::from(EXIT_SANDBOX_ERROR)
            }
        },
        Commands::Config(args) => report(cli::config::run(args, &source).await),
        Commands::Status => report(cli::status::run(&source).await),
    }
}

fn report(result: Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
