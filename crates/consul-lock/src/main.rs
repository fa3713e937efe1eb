mod cli;

use clap::Parser;
use cli::Cli;
use consul_lock::{EXIT_CODE_ERROR, LockedRunner};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start runtime: {e}");
            std::process::exit(EXIT_CODE_ERROR);
        }
    };

    let code = runtime.block_on(start(cli)).unwrap_or_else(|e| {
        tracing::error!("{e:#}");
        EXIT_CODE_ERROR
    });

    // The stdin relay may still sit in a blocking read; exiting here skips
    // waiting for it during runtime shutdown.
    std::process::exit(code);
}

async fn start(cli: Cli) -> anyhow::Result<i32> {
    let options = cli.lock_options()?;
    let config = cli.backend_config()?;
    let runner = LockedRunner::connect(&config, options)?;

    let (program, args) = cli.program();
    Ok(runner.run(&cli.key, program, args).await)
}

/// Log to stderr so the child's relayed stdout stays clean. `RUST_LOG` wins,
/// then `DEBUG`, otherwise warnings and errors only.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let debug = std::env::var("DEBUG").is_ok_and(|v| !v.is_empty());
        EnvFilter::new(if debug { "debug" } else { "warn" })
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = if std::env::var("CONSUL_LOCK_LOG_FORMAT").is_ok_and(|v| v == "json") {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
