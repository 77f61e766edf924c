//! blockbar - status line generator for i3bar and swaybar.
//!
//! This is the binary entry point. It wires stdout, stdin and signals to
//! the `blockbar` library.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use blockbar::constants::LOG_FILE_ENV;
use blockbar::{click, config, BarConfig, Navigator, Publisher};
use clap::Parser;
use mimalloc::MiMalloc;
use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

// CLI
#[derive(Parser, Debug)]
#[command(name = "blockbar")]
#[command(version)]
#[command(about = "Clickable status line generator for i3bar and swaybar")]
struct Cli {
    /// Path to the JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the config, print a summary and exit
    #[arg(long)]
    check: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// Logs go to stderr unless `BLOCKBAR_LOG_FILE` names a file; stdout belongs
/// to the bar protocol.
fn init_logging(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format_timestamp_secs();
    if let Ok(path) = std::env::var(LOG_FILE_ENV) {
        match std::fs::File::create(&path) {
            Ok(file) => {
                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
            Err(e) => eprintln!("Cannot open log file {}: {}", path, e),
        }
    }
    builder.init();
}

/// Validates the config without touching the bar protocol.
fn check(cli: &Cli) -> Result<()> {
    let path = BarConfig::resolve_path(cli.config.as_deref())?;
    let layout = BarConfig::load(&path)?.into_layout()?;
    println!("{}", serde_json::to_string_pretty(&config::describe(&layout))?);
    Ok(())
}

/// Closes the output and exits on SIGINT, SIGTERM or SIGHUP.
///
/// Block tasks are not joined; persistent children die with us.
fn watch_signals(navigator: Arc<Navigator>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP]).context("Failed to register signal handlers")?;
    std::thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                log::info!("Received signal {}, shutting down", signal);
                navigator.shutdown();
                std::process::exit(0);
            }
        })
        .context("Failed to spawn signal thread")?;
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut publisher = Publisher::stdout();
    publisher.begin()?;

    // Startup failures past this point still terminate the frame array.
    let publisher = scopeguard::guard(publisher, |mut publisher| {
        if let Err(e) = publisher.close() {
            log::error!("Failed to close output: {:#}", e);
        }
    });

    let path = BarConfig::resolve_path(cli.config.as_deref())?;
    log::info!("Loading config from {}", path.display());
    let layout = BarConfig::load(&path)?.into_layout()?;

    let navigator = Navigator::new(layout, scopeguard::ScopeGuard::into_inner(publisher));
    let navigator = scopeguard::guard(navigator, |navigator| navigator.shutdown());

    watch_signals(Arc::clone(&*navigator))?;
    navigator.start().await;

    click::read_clicks(tokio::io::stdin(), &navigator).await?;

    // The bar stopped sending clicks; blocks keep updating until a signal.
    std::future::pending::<()>().await;
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    // Log panics before the default handler prints them.
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        log::error!("PANIC: {:?}", panic_info);
        default_hook(panic_info);
    }));

    if cli.check {
        return match check(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    log::info!("Starting blockbar v{}", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
