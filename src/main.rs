use std::io::{IsTerminal, Write};
use std::os::unix::process::CommandExt;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use aivm::build::BuildInvoker;
use aivm::cli::Cli;
use aivm::collect;
use aivm::config;
use aivm::error::AivmError;
use aivm::launcher;
use aivm::policy::Interactivity;
use aivm::progress::{OutputMode, StepProgress};
use aivm::source;

#[tokio::main]
async fn main() -> miette::Result<()> {
    let cli = Cli::parse();

    // Tracing stays off the terminal unless asked for — the spinner owns it.
    let filter = if cli.verbose {
        EnvFilter::new("aivm=debug")
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(filter),
        )
        .init();

    match run(cli).await {
        Ok(()) => Ok(()),
        // Cancellation is an outcome, not an error: exit 0.
        Err(AivmError::Cancelled) => {
            println!("Cancelled.");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

async fn run(cli: Cli) -> Result<(), AivmError> {
    let interactivity = resolve_interactivity(&cli);

    // Source resolution is independent of user input and happens exactly
    // once, before collection.
    let source = source::resolve();

    let config = match interactivity {
        Interactivity::NonInteractive => config::from_flags(&cli)?,
        Interactivity::Interactive => collect::run_wizard(&cli)?,
    };

    collect::confirm_host_capacity(&config, interactivity)?;

    let work_dir = std::env::current_dir().map_err(|e| AivmError::Io {
        context: "resolving current directory".into(),
        source: e,
    })?;
    collect::check_disk_space(&config, &work_dir, interactivity)?;

    println!("Configuration: {} (VM '{}')", config.summary(), config.name);
    if config.overlay == config::OverlayMode::Ephemeral {
        println!("  overlay: enabled");
    }
    if let Some(line) = config.share_summary() {
        println!("  {line}");
    }
    tracing::info!(source = %source.location, origin = source.origin, "using flake source");

    let mode = if std::io::stdout().is_terminal() {
        OutputMode::Normal
    } else {
        OutputMode::Plain
    };
    let mut progress = StepProgress::new(2, mode);

    let mut invoker = BuildInvoker::new();
    let output = progress
        .run("Building VM configuration", |step| {
            let config = &config;
            let source = &source;
            let work_dir = &work_dir;
            let invoker = &mut invoker;
            async move {
                invoker
                    .run(config, source, work_dir, |line| step.log(line))
                    .await
            }
        })
        .await?;

    let script_name = format!("start-{}.sh", config.name);
    let script_path = progress
        .run(&format!("Creating startup script: {script_name}"), |_step| {
            let config = &config;
            let work_dir = &work_dir;
            async move { launcher::write_script(work_dir, config, interactivity) }
        })
        .await?;

    progress.println(&format!(
        "{} VM '{}' built. Restart later with ./{script_name}",
        style("\u{2713}").green(),
        config.name
    ));
    progress.info(&format!("startup script: {}", script_path.display()));
    drop(progress);

    // Chain into the freshly built VM so first run and restart share the
    // same tail. exec replaces this process; flush what we printed first.
    std::io::stdout().flush().ok();
    let err = std::process::Command::new(&output.vm_binary).exec();
    Err(AivmError::Io {
        context: format!("launching {}", output.vm_binary.display()),
        source: err,
    })
}

/// Direct mode when any resource flag is present, when a wrapper disabled
/// prompting via INTERACTIVE=false, or when stdin is not a terminal.
fn resolve_interactivity(cli: &Cli) -> Interactivity {
    if cli.has_resource_flags() {
        return Interactivity::NonInteractive;
    }
    if std::env::var("INTERACTIVE").is_ok_and(|v| v.eq_ignore_ascii_case("false")) {
        return Interactivity::NonInteractive;
    }
    if !std::io::stdin().is_terminal() {
        return Interactivity::NonInteractive;
    }
    Interactivity::Interactive
}
