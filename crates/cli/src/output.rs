use crate::error::CliError;
use engine_runtime::{controller::InvocationReport, scheduler::SettledRun};
use model::{
    batch::summary::{BatchStatus, FailedRowRef},
    events::BatchEvent,
};
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

pub fn print_status(status: &BatchStatus) {
    let batch = status
        .batch_id
        .as_ref()
        .map(|id| id.to_string())
        .unwrap_or_else(|| "none".to_string());
    println!("Batch '{batch}':");
    println!("-----------------------------");
    println!("{:<16} {}", "State", status.state);
    if let (Some(input), Some(output)) = (&status.input_sheet, &status.output_sheet) {
        println!("{:<16} {input} -> {output}", "Sheets");
    }
    println!(
        "{:<16} {}/{} ({:.1}%)",
        "Processed",
        status.processed,
        status.total_target,
        status.percent_complete()
    );
    println!("{:<16} {}", "Remaining", status.remaining);
    println!("{:<16} {}", "Succeeded", status.succeeded);
    println!("{:<16} {}", "Skipped", status.skipped);
    println!("{:<16} {}", "Failed", status.failed);
    if let Some(until) = status.backoff_until {
        println!("{:<16} {}", "Backoff until", until.to_rfc3339());
    }
    if let Some(err) = &status.last_error {
        println!("{:<16} {err}", "Last error");
    }
    let updated = status
        .updated_at
        .map(|ts| ts.to_rfc3339())
        .unwrap_or_else(|| "n/a".to_string());
    println!("{:<16} {}", "Updated", updated);
    if !status.failed_rows.is_empty() {
        println!();
        print_failures(&status.failed_rows);
    }
}

pub fn print_failures(failures: &[FailedRowRef]) {
    if failures.is_empty() {
        println!("No failed rows.");
        return;
    }
    println!("{:<8} {:<24} Reason", "Row", "Identifier");
    for failure in failures {
        println!(
            "{:<8} {:<24} {}",
            failure.row_index, failure.row_id, failure.reason
        );
    }
}

pub fn print_report(report: &InvocationReport) {
    println!(
        "Batch {}: {} | processed {} (ok {}, skipped {}, failed {}) | {} remaining",
        report.batch_id,
        report.state,
        report.processed,
        report.succeeded,
        report.skipped,
        report.failed,
        report.remaining
    );
    if let Some(until) = report.backoff_until {
        println!("Rate limited; next attempt after {}", until.to_rfc3339());
    }
    if let Some(err) = &report.last_error {
        println!("Last error: {err}");
    }
}

pub fn print_settled(run: &SettledRun) {
    match &run.last {
        Some(report) => print_report(report),
        None => println!("No invocation ran."),
    }
    println!("Invocations: {}", run.invocations);
    if run.interrupted {
        println!("Interrupted; run `continue` or `watch` to pick up where it stopped.");
    }
}

pub fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::RowCompleted {
            row_index,
            row_id,
            status,
            remaining,
            ..
        } => println!("row {row_index:>6}  {row_id:<24} {status}  ({remaining} left)"),
        BatchEvent::BackoffScheduled { row_index, until, .. } => {
            println!("row {row_index:>6}  rate limited, backing off until {}", until.to_rfc3339())
        }
        BatchEvent::LockReclaimed { holder, acquired_at, .. } => println!(
            "reclaimed stale lock held by {holder} since {}",
            acquired_at.to_rfc3339()
        ),
        _ => {}
    }
}
