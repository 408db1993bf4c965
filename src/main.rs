//! BulkMail - rate-limited bulk mail dispatcher
//!
//! Main entry point for the BulkMail CLI.

mod commands;

use bulkmail::config::{validate_config, validate_config_result, BulkMailConfig};
use bulkmail::dispatcher::{
    metrics, Dispatcher, DispatcherConfig, DispatcherEvent, MessageTemplate,
};
use bulkmail::mail::{DryRunSender, MailSender, SmtpSender};
use bulkmail::watcher::QueueWatcher;
use bulkmail::{control, import, samples, style, BulkMailError, Result};
use clap::Parser;
use commands::{Cli, Commands};
use dialoguer::Confirm;
use queuefile::{Queue, Status};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn main() {
    let cli = Cli::parse();

    // The dispatcher logs every send; one-shot commands only warnings
    let default_level = if cli.verbose {
        "debug"
    } else if matches!(cli.command, Commands::Run { .. }) {
        "info"
    } else {
        "warn"
    };
    if let Err(e) = bulkmail::logging::init(default_level) {
        eprintln!("Failed to initialize logging: {}", e);
    }

    if let Err(e) = run(cli) {
        eprintln!("{} {}", style::error("Error:"), e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = PathBuf::from(&cli.config);

    // Handle init first (creates config)
    if let Commands::Init { yes } = cli.command {
        return handle_init_command(&config_path, yes);
    }

    if let Commands::Run { .. } = cli.command {
        let missing = samples::missing_files(&config_path);
        if !missing.is_empty() {
            return Err(missing_files_error(&missing));
        }
    }

    let config = load_config(&config_path)?;
    let queue = Queue::new(config.queue_path());

    match cli.command {
        Commands::Run {
            dry_run,
            paused,
            delay,
            no_watch,
            metrics,
        } => handle_run_command(
            &config,
            queue,
            RunOptions {
                dry_run,
                paused,
                delay,
                watch: !no_watch,
                metrics,
            },
        ),
        Commands::Stats { json } => handle_stats_command(&queue, json),
        Commands::Pending { json } => handle_pending_command(&queue, json),
        Commands::Import { file } => handle_import_command(&queue, file.as_deref()),
        Commands::ResetStale { timeout_secs } => handle_reset_stale_command(&queue, timeout_secs),
        Commands::Reconcile => handle_reconcile_command(&queue),
        Commands::Check => handle_check_command(&config),
        Commands::Init { .. } => unreachable!("Init is handled before loading configuration"),
    }
}

fn load_config(path: &Path) -> Result<BulkMailConfig> {
    match BulkMailConfig::load(path) {
        Ok(config) => Ok(config),
        Err(BulkMailError::Config(msg)) if msg.contains("Config file not found") => {
            Err(missing_files_error(&[path.to_path_buf()]))
        }
        Err(e) => Err(e),
    }
}

fn missing_files_error(missing: &[PathBuf]) -> BulkMailError {
    let names: Vec<String> = missing.iter().map(|p| p.display().to_string()).collect();
    BulkMailError::Config(format!(
        "Required files not found ({}).\n\n\
         Run 'bulkmail init' to create sample files.",
        names.join(", ")
    ))
}

// =============================================================================
// RUN
// =============================================================================

struct RunOptions {
    dry_run: bool,
    paused: bool,
    delay: Option<u64>,
    watch: bool,
    metrics: bool,
}

fn handle_run_command(config: &BulkMailConfig, queue: Queue, options: RunOptions) -> Result<()> {
    validate_config_result(config)?;
    let template = config.load_template()?;

    let sender: Arc<dyn MailSender> = if options.dry_run {
        Arc::new(DryRunSender::new())
    } else {
        Arc::new(SmtpSender::new(
            &config.smtp,
            config.mail.unsubscribe_url.clone(),
        )?)
    };

    let delay_seconds = options.delay.unwrap_or(config.mail.delay_seconds);
    let dispatcher_config = DispatcherConfig::new(delay_seconds).with_start_running(!options.paused);
    let mut dispatcher = Dispatcher::new(
        dispatcher_config,
        queue,
        sender,
        MessageTemplate::new(config.mail.subject.clone(), template),
    );

    // Held for the whole run; dropping it ends notifications
    let _watcher = if options.watch {
        let (watcher, events) = QueueWatcher::watch(config.queue_path())?;
        dispatcher = dispatcher.with_watcher(events);
        Some(watcher)
    } else {
        None
    };

    println!(
        "{} {} (delay {}s{})",
        style::header("Dispatching from"),
        config.queue_path().display(),
        delay_seconds,
        if options.dry_run { ", dry run" } else { "" }
    );
    if options.paused {
        println!("{}", style::dim("Started paused; type 'start' to begin sending."));
    }
    println!(
        "{}",
        style::dim("Commands: start, stop, delay <seconds>, status, quit. Ctrl-C also quits.")
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let outcome = runtime.block_on(async move {
        let handle = dispatcher.handle();
        let events = dispatcher.subscribe();

        let reporter = tokio::spawn(report_events(events));
        let input = tokio::spawn(control::drive(
            tokio::io::BufReader::new(tokio::io::stdin()),
            handle.clone(),
        ));
        let mut task = tokio::spawn(async move { dispatcher.run().await });

        let result = tokio::select! {
            result = &mut task => result,
            _ = shutdown_signal() => {
                println!();
                println!("{}", style::warning("Shutting down..."));
                handle.shutdown().await?;
                task.await
            }
        };
        reporter.abort();
        input.abort();

        let stats = handle.stats();
        println!(
            "Sent: {}  Failed: {}  Pending: {}",
            style::count(stats.sent),
            style::count_failed(stats.failed),
            style::count(stats.pending)
        );

        if options.metrics {
            println!();
            print!("{}", metrics::encode_metrics());
        }

        result.map_err(|e| BulkMailError::Dispatcher(format!("Dispatcher task failed: {}", e)))?
    });

    // A stdin read still blocked on the blocking pool must not hold up exit
    runtime.shutdown_background();
    outcome
}

async fn report_events(mut events: broadcast::Receiver<DispatcherEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event reporter lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &DispatcherEvent) {
    match event {
        DispatcherEvent::Sent { email } => println!("  {} {}", style::success("✓"), email),
        DispatcherEvent::Failed { email, error } => {
            println!("  {} {} {}", style::error("✗"), email, style::dim(error))
        }
        DispatcherEvent::Waiting { email, wait } => println!(
            "  {} {} in {}s",
            style::dim("…"),
            email,
            wait.as_secs()
        ),
        DispatcherEvent::AutoStopped => {
            println!("{}", style::dim("Queue empty, dispatcher stopped."))
        }
        DispatcherEvent::Reconciled { addresses } => println!(
            "{} {} new address(es) queued",
            style::header("+"),
            addresses.len()
        ),
        _ => {}
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                let _ = sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

// =============================================================================
// QUEUE INSPECTION
// =============================================================================

fn handle_stats_command(queue: &Queue, json: bool) -> Result<()> {
    let stats = queue.stats()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{} {}", style::header("Queue:"), queue.path().display());
    println!();
    println!("  Total:         {}", style::count(stats.total));
    println!("  Pending:       {}", style::count(stats.pending));
    println!("  Sending:       {}", style::count(stats.sending));
    println!("  Sent:          {}", style::count(stats.sent));
    println!("  Failed:        {}", style::count_failed(stats.failed));
    println!("  Unsubscribed:  {}", style::count(stats.unsubscribed));

    if let Some(last) = queue.last_completion_time()? {
        println!();
        println!("  Last completion: {}", last.to_rfc3339());
    }
    Ok(())
}

fn handle_pending_command(queue: &Queue, json: bool) -> Result<()> {
    let pending = queue.pending_emails()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pending)?);
        return Ok(());
    }

    if pending.is_empty() {
        println!("{}", style::dim("No pending recipients."));
        return Ok(());
    }

    for entry in &pending {
        let status = if entry.sending {
            Status::Sending
        } else {
            Status::Pending
        };
        println!("  {:<8} {}", style::status_style(status), entry.email);
    }
    println!();
    println!("{} recipient(s)", pending.len());
    Ok(())
}

// =============================================================================
// QUEUE MAINTENANCE
// =============================================================================

fn handle_import_command(queue: &Queue, file: Option<&str>) -> Result<()> {
    let Some(file) = file else {
        let candidates = import::candidate_files(Path::new("."), queue.path())?;
        if candidates.is_empty() {
            println!("{}", style::dim("No .txt or .csv files found in the current directory."));
        } else {
            println!("{}", style::header("Files available for import:"));
            for path in &candidates {
                println!("  {}", path.display());
            }
            println!();
            println!("Run 'bulkmail import <file>' to import one.");
        }
        return Ok(());
    };

    let summary = import::import_file(queue, Path::new(file))?;
    println!(
        "Found {} address(es): {} added, {} already queued",
        summary.found,
        style::success(&summary.added.to_string()),
        style::dim(&summary.skipped.to_string())
    );
    Ok(())
}

fn handle_reset_stale_command(queue: &Queue, timeout_secs: u64) -> Result<()> {
    let count = queue.reset_stale_claims(Duration::from_secs(timeout_secs))?;
    if count == 0 {
        println!("{}", style::dim("No stale claims."));
    } else {
        println!("Reset {} stale claim(s) to PENDING", count);
    }
    Ok(())
}

fn handle_reconcile_command(queue: &Queue) -> Result<()> {
    let converted = queue.reconcile()?;
    if converted.is_empty() {
        println!("{}", style::dim("Nothing to reconcile."));
        return Ok(());
    }

    for email in &converted {
        println!("  {} {}", style::status_style(Status::Pending), email);
    }
    println!("Queued {} bare address(es)", converted.len());
    Ok(())
}

fn handle_check_command(config: &BulkMailConfig) -> Result<()> {
    let mut problems: Vec<String> = match validate_config(config) {
        Ok(()) => Vec::new(),
        Err(errors) => errors.iter().map(|e| e.to_string()).collect(),
    };

    if !config.mail.template.exists() {
        problems.push(format!(
            "mail.template: {} does not exist",
            config.mail.template.display()
        ));
    }
    if !config.queue_path().exists() {
        problems.push(format!(
            "database.path: {} does not exist",
            config.queue_path().display()
        ));
    }

    if problems.is_empty() {
        println!("{}", style::success("✓ Configuration OK"));
        return Ok(());
    }

    for problem in &problems {
        println!("  {} {}", style::error("✗"), problem);
    }
    Err(BulkMailError::Config(format!(
        "{} configuration problem(s)",
        problems.len()
    )))
}

// =============================================================================
// SETUP
// =============================================================================

fn handle_init_command(config_path: &Path, yes: bool) -> Result<()> {
    let missing = samples::missing_files(config_path);
    if missing.is_empty() {
        println!("{}", style::success("All required files already exist."));
        return Ok(());
    }

    println!("{}", style::header("Required files not found:"));
    for path in &missing {
        println!("  {}", path.display());
    }
    println!();

    let proceed = yes
        || Confirm::new()
            .with_prompt("Create sample files?")
            .default(true)
            .interact()
            .map_err(|e| BulkMailError::Other(format!("Prompt failed: {}", e)))?;

    if !proceed {
        println!("{}", style::dim("Skipped."));
        return Ok(());
    }

    let report = samples::create_samples(Path::new("."), config_path)?;
    for path in &report.created {
        println!("  {} {}", style::success("created"), path.display());
    }
    for path in &report.skipped {
        println!("  {} {}", style::dim("exists "), path.display());
    }

    println!();
    println!(
        "Edit {} with your SMTP settings, then run 'bulkmail run'.",
        config_path.display()
    );
    Ok(())
}
