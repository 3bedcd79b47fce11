use crate::error::MuzzikError;
use crate::muzzik::audit;
use crate::muzzik::config::{MuzzikConfig, load_config};
use crate::muzzik::harvest::{ExportFileSource, MessageSource, harvest};
use crate::muzzik::paths::{MuzzikPaths, resolve_paths};
use crate::muzzik::reconcile::{
    Destination, ReconcileLimits, ReconcileOutcome, RetryPolicy, reconcile,
};
use crate::muzzik::state::{self, diff_new, record_and_enqueue};
use crate::muzzik::warn::{self, WarnEvent};
use crate::slack::history::SlackHistory;
use crate::youtube::playlist::YouTubePlaylists;
use anyhow::{Context, Result};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub messages_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncOutcome {
    pub state_file: String,
    pub source: String,
    pub messages: usize,
    pub candidates: usize,
    pub new_resources: usize,
    pub recorded: usize,
    pub enqueued: usize,
    pub already_published: usize,
    pub dry_run: bool,
    pub nothing_to_do: bool,
    pub would_publish: u64,
    pub backlog_remaining: usize,
    pub reconcile: Option<ReconcileOutcome>,
}

/// Exclusive advisory lock on the state file's directory, held for one run.
pub struct RunLock {
    file: File,
}

impl RunLock {
    pub fn acquire(paths: &MuzzikPaths) -> Result<Self> {
        let path = paths.lock_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        if file.try_lock_exclusive().is_err() {
            return Err(MuzzikError::Locked(path.display().to_string()).into());
        }
        file.set_len(0)?;
        writeln!(file, "{}", std::process::id())?;
        Ok(Self { file })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub fn limits_from(cfg: &MuzzikConfig) -> ReconcileLimits {
    ReconcileLimits {
        capacity: cfg.playlist.capacity,
        quota: cfg.playlist.daily_insert_cap,
        title_prefix: cfg.playlist.title_prefix.clone(),
        retry: RetryPolicy {
            max_attempts: cfg.retry.max_attempts,
            base_delay: cfg.retry.base_delay(),
        },
    }
}

fn publish_status(outcome: &ReconcileOutcome) -> &'static str {
    if outcome.aborted() {
        "aborted"
    } else if !outcome.rejected.is_empty() {
        "degraded"
    } else {
        "ok"
    }
}

/// One harvest-and-publish run. State is written after enqueueing (so the
/// harvest survives a failing destination) and again after the walk, whether
/// the walk finished, aborted on quota or failed. A failed walk still leaves
/// volumes it created and ids it published in the saved state.
pub fn run_cycle<F>(
    paths: &MuzzikPaths,
    cfg: &MuzzikConfig,
    source: &dyn MessageSource,
    dry_run: bool,
    connect: F,
) -> Result<SyncOutcome>
where
    F: FnOnce(&MuzzikConfig) -> Result<Box<dyn Destination>>,
{
    let mut out = SyncOutcome {
        state_file: paths.state_file.display().to_string(),
        source: source.describe(),
        dry_run,
        ..SyncOutcome::default()
    };

    let messages = source
        .fetch_all()
        .with_context(|| format!("failed to read messages from {}", out.source))?;
    let candidates = harvest(&messages);
    out.messages = messages.len();
    out.candidates = candidates.len();

    let mut state = state::load(&paths.state_file)?;
    let new_ones = diff_new(&candidates, &state.resources);
    out.new_resources = new_ones.len();
    audit::append_event(
        paths,
        "harvest",
        "ok",
        &format!(
            "source={} messages={} candidates={} new={}",
            out.source, out.messages, out.candidates, out.new_resources
        ),
    )?;

    if new_ones.is_empty() && state.backlog.is_empty() {
        state::save(&paths.state_file, &state)?;
        out.nothing_to_do = true;
        return Ok(out);
    }

    let enqueue = record_and_enqueue(&mut state, &new_ones);
    out.recorded = enqueue.recorded;
    out.enqueued = enqueue.enqueued;
    out.already_published = enqueue.already_published;
    state::save(&paths.state_file, &state)?;
    audit::append_event(
        paths,
        "enqueue",
        "ok",
        &format!(
            "recorded={} enqueued={} already_published={} backlog={}",
            enqueue.recorded,
            enqueue.enqueued,
            enqueue.already_published,
            state.backlog.len()
        ),
    )?;

    out.would_publish = (state.backlog.len() as u64).min(cfg.playlist.daily_insert_cap);
    out.backlog_remaining = state.backlog.len();
    if dry_run || state.backlog.is_empty() {
        return Ok(out);
    }

    let limits = limits_from(cfg);
    let mut dest = connect(cfg)?;
    let walked = reconcile(&mut state, &mut *dest, &limits);
    let outcome = match walked {
        Ok(outcome) => outcome,
        Err(err) => {
            if let Err(save_err) = state::save(&paths.state_file, &state) {
                warn::emit(WarnEvent {
                    stage: "publish",
                    action: "save",
                    retry: "next-run",
                    reason: "state not saved after publish failure",
                    err: &format!("{save_err:#}"),
                    ..WarnEvent::default()
                });
            }
            audit::append_event(
                paths,
                "publish",
                "failed",
                &format!("backlog={} error={err:#}", state.backlog.len()),
            )?;
            return Err(err);
        }
    };

    state::save(&paths.state_file, &state)?;
    audit::append_event(
        paths,
        "publish",
        publish_status(&outcome),
        &format!(
            "published={} already_remote={} rejected={} volumes_created={} remaining={} phase={}",
            outcome.published,
            outcome.already_remote.len(),
            outcome.rejected.len(),
            outcome.volumes_created.len(),
            outcome.remaining,
            outcome.final_phase().as_str()
        ),
    )?;
    out.backlog_remaining = state.backlog.len();
    out.reconcile = Some(outcome);
    Ok(out)
}

pub fn run_once(opts: &SyncOptions) -> Result<SyncOutcome> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let _lock = RunLock::acquire(&paths)?;

    let source: Box<dyn MessageSource> = match &opts.messages_file {
        Some(path) => Box::new(ExportFileSource { path: path.clone() }),
        None => Box::new(SlackHistory::from_env(&cfg.channel.name)?),
    };

    run_cycle(&paths, &cfg, &*source, opts.dry_run, |cfg| {
        let dest = YouTubePlaylists::connect(&cfg.playlist)?;
        Ok(Box::new(dest) as Box<dyn Destination>)
    })
}
