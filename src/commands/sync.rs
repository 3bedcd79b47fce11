use anyhow::Result;

use crate::commands::CommandReport;
use crate::error::error_code;
use crate::muzzik::sync::{SyncOptions, SyncOutcome, run_once};
use crate::muzzik::warn::{self, WarnEvent};

fn summarize(outcome: &SyncOutcome) -> CommandReport {
    let mut report = CommandReport::new("sync");
    report.detail(format!("state_file={}", outcome.state_file));
    report.detail(format!("source={}", outcome.source));
    report.detail(format!(
        "harvest messages={} candidates={} new={}",
        outcome.messages, outcome.candidates, outcome.new_resources
    ));

    if outcome.nothing_to_do {
        report.detail("nothing to do: no new resources and empty backlog");
        return report;
    }

    report.detail(format!(
        "enqueue recorded={} enqueued={} already_published={}",
        outcome.recorded, outcome.enqueued, outcome.already_published
    ));

    if outcome.dry_run {
        report.detail(format!(
            "dry run: would publish up to {} of {} queued",
            outcome.would_publish, outcome.backlog_remaining
        ));
        return report;
    }

    match &outcome.reconcile {
        Some(rec) => {
            report.detail(format!(
                "publish published={} already_remote={} rejected={} retries={}",
                rec.published,
                rec.already_remote.len(),
                rec.rejected.len(),
                rec.transient_retries
            ));
            for id in &rec.volumes_created {
                report.detail(format!("volume created id={id}"));
            }
            for id in &rec.rejected {
                report.detail(format!("rejected id={id} (will not retry)"));
            }
            if let Some(reason) = &rec.abort_reason {
                report.detail(format!(
                    "stopped early: {reason}; {} queued for the next run",
                    rec.remaining
                ));
            }
            report.detail(format!("phase={}", rec.final_phase().as_str()));
        }
        None => report.detail("backlog empty after enqueue"),
    }
    report.detail(format!("backlog_remaining={}", outcome.backlog_remaining));
    report
}

pub fn run(opts: &SyncOptions) -> Result<CommandReport> {
    let outcome = run_once(opts).inspect_err(|err| {
        if let Some(code) = error_code(err) {
            warn::emit(WarnEvent {
                code: code.as_str(),
                stage: "sync",
                action: "fail",
                err: &format!("{err:#}"),
                ..WarnEvent::default()
            });
        }
    })?;
    Ok(summarize(&outcome))
}
