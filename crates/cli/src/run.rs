//! `orbitscope run`: analyse a batch, optionally retry and export.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::task::JoinSet;
use tracing::{info, warn};

use orbitscope_core::JobId;
use orbitscope_batch::{BatchConfig, BatchController, BatchSummary, ExportOutcome, ExportSink};
use orbitscope_infra::{
    CommandInferenceClient, CommandInferenceConfig, FileExportSink, TracingAuditSink,
    build_export,
};

use crate::cli::RunArgs;

type Controller = BatchController<CommandInferenceClient>;

/// Exit code when jobs are still failed after the run.
const EXIT_FAILED_JOBS: u8 = 1;
/// Exit code when the operator interrupted the run.
const EXIT_INTERRUPTED: u8 = 130;

pub async fn execute(args: RunArgs) -> anyhow::Result<ExitCode> {
    let engine = engine_config(&args)?;
    let mut batch = BatchConfig::from_env().context("invalid batch configuration")?;
    if let Some(n) = args.concurrency {
        batch = batch.with_concurrency(n);
    }
    batch = batch.with_audit(!args.no_audit);
    let concurrency = batch.concurrency;

    let client = Arc::new(CommandInferenceClient::new(engine));
    let controller: Arc<Controller> = Arc::new(
        BatchController::new(client, batch)
            .context("invalid batch configuration")?
            .with_audit(Arc::new(TracingAuditSink)),
    );

    let mut progress = controller.reporter().subscribe_channel();
    let progress_log = tokio::spawn(async move {
        while let Some(p) = progress.recv().await {
            info!(
                batch_id = %p.batch_id,
                completed = p.completed,
                failed = p.failed,
                running = p.running_count,
                pending = p.pending,
                total = p.total,
                done = %format!("{:.0}%", p.fraction_done() * 100.0),
                "progress"
            );
        }
    });

    let interrupt = tokio::spawn({
        let controller = controller.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received; finishing in-flight jobs");
                controller.cancel();
            }
        }
    });

    let identifiers: Vec<String> = args.files.iter().map(|p| p.display().to_string()).collect();
    let result = controller.run(identifiers, concurrency).await;

    interrupt.abort();
    controller.reporter().unsubscribe();
    let _ = progress_log.await;
    let summary = result.context("batch rejected")?;

    if args.retry_failed && !summary.cancelled {
        retry_failed(&controller).await;
    }

    if let Some(format) = args.export {
        let out = args.out.as_ref().context("--export requires --out")?;
        let jobs = controller.jobs().context("no batch to export")?;
        let document = build_export(&jobs, format)
            .await
            .context("failed to build export")?;

        let sink = FileExportSink::new(out).with_overwrite(args.force);
        match sink.write(&document).await.context("failed to write export")? {
            ExportOutcome::Written { destination, bytes } => {
                println!("exported {format} to {destination} ({bytes} bytes)");
            }
            ExportOutcome::Cancelled => {
                println!("export skipped: {} exists (use --force to replace it)", out.display());
            }
        }
    }

    // Retries may have changed the counts since the run settled.
    let (settled, still_failed) = match controller.jobs() {
        Some(jobs) => (jobs.summary(), jobs.failed()),
        None => (summary, Vec::new()),
    };
    report(&settled, &still_failed);

    Ok(if settled.cancelled {
        ExitCode::from(EXIT_INTERRUPTED)
    } else if !still_failed.is_empty() {
        ExitCode::from(EXIT_FAILED_JOBS)
    } else {
        ExitCode::SUCCESS
    })
}

fn engine_config(args: &RunArgs) -> anyhow::Result<CommandInferenceConfig> {
    let mut engine = match &args.engine {
        Some(program) => CommandInferenceConfig::new(program.clone()),
        None => CommandInferenceConfig::from_env()?,
    };
    if !args.engine_args.is_empty() {
        engine = engine.with_args(args.engine_args.iter().cloned());
    }
    if let Some(timeout) = args.engine_timeout {
        engine = engine.with_timeout(timeout);
    }
    Ok(engine)
}

/// Retry every failed job once, concurrently.
async fn retry_failed(controller: &Arc<Controller>) {
    let Some(jobs) = controller.jobs() else {
        return;
    };

    let mut retries = JoinSet::new();
    for job in jobs.failed() {
        let controller = controller.clone();
        retries.spawn(async move {
            let outcome = controller.retry(job.as_str()).await;
            (job, outcome)
        });
    }

    while let Some(joined) = retries.join_next().await {
        match joined {
            Ok((job, Ok(record))) => {
                info!(job = %job, status = %record.status(), attempts = record.attempts(), "retry finished")
            }
            Ok((job, Err(e))) => warn!(job = %job, error = %e, "retry rejected"),
            Err(e) => warn!(error = %e, "retry task failed"),
        }
    }
}

fn report(summary: &BatchSummary, still_failed: &[JobId]) {
    println!(
        "batch {}: {} completed, {} failed, {} not started{}",
        summary.batch_id,
        summary.completed,
        summary.failed,
        summary.abandoned,
        if summary.cancelled { " (cancelled)" } else { "" }
    );
    for job in still_failed {
        println!("  failed: {job}");
    }
}
