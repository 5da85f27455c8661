use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use wp_theme_builder::config::{Cli, Config};
use wp_theme_builder::graph::{TaskGraph, TaskId};
use wp_theme_builder::server::{self, ServerHandle};
use wp_theme_builder::tasks::{collect_results, run_task, BuildContext, TaskStatus};
use wp_theme_builder::watch;

fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = Config::from_cli(cli)?;
    init_tracing(config.verbose);

    // Setup Ctrl+C handler
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();
    ctrlc::set_handler(move || {
        shutdown_clone.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    // Configure Rayon thread pool
    rayon::ThreadPoolBuilder::new()
        .num_threads(config.jobs)
        .build_global()
        .ok();

    let task = config.task;
    let graph = TaskGraph::for_targets(&[task], config.needs_install()).context("Invalid task graph")?;

    if config.verbose {
        let plan: Vec<String> = graph.plan(&[task]).iter().map(|t| t.to_string()).collect();
        eprintln!(
            "Running {} with {} worker(s): {}",
            task,
            config.jobs,
            plan.join(" -> ")
        );
    }

    let bridge = server::select(&config);
    let ctx = BuildContext::new(config, bridge, shutdown.clone());

    let start = Instant::now();
    let results = graph.execute(&[task], |t| run_task(t, &ctx));

    // Check for cancellation
    if shutdown.load(Ordering::Relaxed) {
        eprintln!("\nBuild cancelled");
        return Ok(ExitCode::from(130));
    }

    // Aggregate results
    let (results, has_success, has_failure) = collect_results(results);
    let duration = start.elapsed();
    let total_files = ctx.stats.files_written.get();
    let throughput = if duration.as_secs_f64() > 0.0 {
        total_files as f64 / duration.as_secs_f64()
    } else {
        0.0
    };

    // Print summary
    println!(
        "Wrote {} files in {:.2}s ({:.0} files/sec)",
        total_files,
        duration.as_secs_f64(),
        throughput
    );

    // Per-task breakdown
    for result in results.iter().filter(|r| !r.task.is_aggregate()) {
        let status_str = match &result.status {
            TaskStatus::Success => format!("{} files", result.file_count),
            TaskStatus::Failed(e) => format!("FAILED: {}", e.chain()),
            TaskStatus::Skipped => "skipped".to_string(),
            TaskStatus::Cancelled => "cancelled".to_string(),
        };
        println!("  {}: {}", result.task, status_str);
    }

    let errors = ctx.stats.errors.get();
    if errors > 0 {
        println!("  {errors} error(s), see log above");
    }

    // Long-running follow-ups
    let production = ctx.config.production();
    match task {
        TaskId::Watch => watch::run(&ctx)?,
        TaskId::LiveReload => {
            let handle = ctx.bridge.serve(&ctx.config.settings.server)?;
            serve_until_cancelled(handle, &shutdown);
        }
        TaskId::Default if !production => {
            let handle = if ctx.config.settings.server.proxy.is_some() {
                ctx.bridge.serve(&ctx.config.settings.server)?
            } else {
                ServerHandle::inactive()
            };
            let watched = watch::run(&ctx);
            handle.stop();
            watched?;
        }
        _ => {}
    }

    if shutdown.load(Ordering::Relaxed) {
        return Ok(ExitCode::from(130));
    }

    // Determine exit code
    if has_failure && !has_success {
        Ok(ExitCode::from(2))
    } else if has_failure {
        Ok(ExitCode::from(1))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn serve_until_cancelled(handle: ServerHandle, shutdown: &AtomicBool) {
    while handle.is_running() && !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(200));
    }
    handle.stop();
}
