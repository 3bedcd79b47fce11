//! Backlog walk against the destination playlist.
//!
//! The walk publishes queued video ids into the current volume, skipping ids
//! the destination already holds, rolling over to a fresh volume when the
//! current one is full, and stopping at the per-run quota. Ids that were not
//! processed stay in the backlog in their original order.

use crate::error::{MuzzikError, MuzzikErrorCode, is_quota_exhausted};
use crate::muzzik::state::{RunState, Volume};
use crate::muzzik::warn::{self, WarnEvent};
use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::thread;
use std::time::Duration;

/// Result of one insert attempt as reported by the destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The video itself is unusable (deleted, private, invalid). Never retried.
    Rejected(String),
    QuotaExhausted(String),
    /// Worth retrying within this run.
    Transient(String),
}

/// Playlist service the backlog is published into. An `Err` from any method
/// is a fatal transport or auth failure for the run.
pub trait Destination {
    fn create_volume(&mut self, title: &str) -> Result<String>;
    /// Complete membership of a volume, all pages included.
    fn list_members(&mut self, volume_id: &str) -> Result<BTreeSet<String>>;
    fn insert_member(&mut self, volume_id: &str, external_id: &str) -> Result<InsertOutcome>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

#[derive(Debug, Clone)]
pub struct ReconcileLimits {
    pub capacity: u64,
    pub quota: u64,
    pub title_prefix: String,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Idle,
    FetchingRemote,
    Publishing,
    VolumeRollover,
    Done,
    Aborted,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::FetchingRemote => "fetching_remote",
            RunPhase::Publishing => "publishing",
            RunPhase::VolumeRollover => "volume_rollover",
            RunPhase::Done => "done",
            RunPhase::Aborted => "aborted",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileOutcome {
    pub phases: Vec<RunPhase>,
    pub published: u64,
    pub already_remote: Vec<String>,
    pub rejected: Vec<String>,
    pub volumes_created: Vec<String>,
    pub transient_retries: u32,
    pub remaining: usize,
    pub abort_reason: Option<String>,
}

impl ReconcileOutcome {
    fn enter(&mut self, phase: RunPhase) {
        self.phases.push(phase);
    }

    pub fn final_phase(&self) -> RunPhase {
        self.phases.last().copied().unwrap_or(RunPhase::Idle)
    }

    pub fn aborted(&self) -> bool {
        self.final_phase() == RunPhase::Aborted
    }
}

/// Walk `state.backlog` against `dest`. Quota exhaustion ends the walk as
/// `Aborted`; any other destination error is returned after the backlog has
/// been trimmed to the ids that are still pending.
pub fn reconcile(
    state: &mut RunState,
    dest: &mut dyn Destination,
    limits: &ReconcileLimits,
) -> Result<ReconcileOutcome> {
    let mut outcome = ReconcileOutcome::default();
    outcome.enter(RunPhase::Idle);

    if state.backlog.is_empty() || limits.quota == 0 {
        outcome.remaining = state.backlog.len();
        outcome.enter(RunPhase::Done);
        return Ok(outcome);
    }

    let queue = state.backlog.clone();
    let mut done = HashSet::new();
    let walked = walk_backlog(state, dest, limits, &queue, &mut done, &mut outcome);
    state.backlog.retain(|id| !done.contains(id));
    outcome.remaining = state.backlog.len();

    match walked {
        Ok(()) => outcome.enter(RunPhase::Done),
        Err(err) if is_quota_exhausted(&err) => {
            warn::emit(WarnEvent {
                code: MuzzikErrorCode::E008QuotaExhausted.as_str(),
                stage: "publish",
                action: "abort",
                retry: "next-run",
                reason: &format!("remaining={}", outcome.remaining),
                err: &format!("{err:#}"),
                ..WarnEvent::default()
            });
            outcome.abort_reason = Some(format!("{err:#}"));
            outcome.enter(RunPhase::Aborted);
        }
        Err(err) => return Err(err),
    }
    Ok(outcome)
}

fn walk_backlog(
    state: &mut RunState,
    dest: &mut dyn Destination,
    limits: &ReconcileLimits,
    queue: &[String],
    done: &mut HashSet<String>,
    outcome: &mut ReconcileOutcome,
) -> Result<()> {
    let mut current = current_volume(state, dest, limits, outcome)?;
    let mut remote = fetch_members(state, dest, current, outcome)?;
    outcome.enter(RunPhase::Publishing);

    for id in queue {
        if outcome.published >= limits.quota {
            break;
        }
        if done.contains(id) {
            continue;
        }

        if remote.contains(id) {
            state.mark_published(id);
            done.insert(id.clone());
            outcome.already_remote.push(id.clone());
            continue;
        }

        if state.volumes[current].member_count >= limits.capacity {
            current = roll_over(state, dest, limits, outcome)?;
            remote = fetch_members(state, dest, current, outcome)?;
            outcome.enter(RunPhase::Publishing);
            if remote.contains(id) {
                state.mark_published(id);
                done.insert(id.clone());
                outcome.already_remote.push(id.clone());
                continue;
            }
        }

        let volume_id = state.volumes[current].id.clone();
        match insert_with_retry(dest, &volume_id, id, &limits.retry, outcome)? {
            InsertOutcome::Inserted => {
                state.volumes[current].member_count += 1;
                remote.insert(id.clone());
                state.mark_published(id);
                done.insert(id.clone());
                outcome.published += 1;
            }
            InsertOutcome::Rejected(reason) => {
                warn::emit(WarnEvent {
                    stage: "publish",
                    action: "skip",
                    resource: id,
                    volume: &volume_id,
                    retry: "never",
                    reason: &reason,
                    ..WarnEvent::default()
                });
                state.mark_published(id);
                done.insert(id.clone());
                outcome.rejected.push(id.clone());
            }
            InsertOutcome::QuotaExhausted(reason) => {
                return Err(MuzzikError::QuotaExhausted(reason).into());
            }
            InsertOutcome::Transient(reason) => {
                anyhow::bail!(
                    "insert of {id} into {volume_id} still failing after {} attempts: {reason}",
                    limits.retry.max_attempts
                );
            }
        }
    }

    Ok(())
}

fn current_volume(
    state: &mut RunState,
    dest: &mut dyn Destination,
    limits: &ReconcileLimits,
    outcome: &mut ReconcileOutcome,
) -> Result<usize> {
    let has_room = state
        .volumes
        .last()
        .is_some_and(|volume| volume.member_count < limits.capacity);
    if has_room {
        Ok(state.volumes.len() - 1)
    } else {
        roll_over(state, dest, limits, outcome)
    }
}

fn roll_over(
    state: &mut RunState,
    dest: &mut dyn Destination,
    limits: &ReconcileLimits,
    outcome: &mut ReconcileOutcome,
) -> Result<usize> {
    outcome.enter(RunPhase::VolumeRollover);
    let title = format!("{} {}", limits.title_prefix, state.volumes.len() + 1);
    let id = dest
        .create_volume(&title)
        .with_context(|| format!("failed to create volume `{title}`"))?;
    state.volumes.push(Volume {
        id: id.clone(),
        title,
        member_count: 0,
    });
    outcome.volumes_created.push(id);
    Ok(state.volumes.len() - 1)
}

/// Remote membership of one volume. The local member count is raised to the
/// remote size so inserts that landed before a crash still count toward capacity.
fn fetch_members(
    state: &mut RunState,
    dest: &mut dyn Destination,
    index: usize,
    outcome: &mut ReconcileOutcome,
) -> Result<BTreeSet<String>> {
    outcome.enter(RunPhase::FetchingRemote);
    let volume = &mut state.volumes[index];
    let members = dest
        .list_members(&volume.id)
        .with_context(|| format!("failed to list members of {}", volume.id))?;
    volume.member_count = volume.member_count.max(members.len() as u64);
    Ok(members)
}

/// Linear backoff, saturating instead of overflowing.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.checked_mul(attempt).unwrap_or(Duration::MAX)
}

fn insert_with_retry(
    dest: &mut dyn Destination,
    volume_id: &str,
    external_id: &str,
    retry: &RetryPolicy,
    outcome: &mut ReconcileOutcome,
) -> Result<InsertOutcome> {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let result = dest
            .insert_member(volume_id, external_id)
            .with_context(|| format!("failed to insert {external_id} into {volume_id}"))?;
        match result {
            InsertOutcome::Transient(reason) if attempt < retry.max_attempts => {
                outcome.transient_retries += 1;
                warn::emit(WarnEvent {
                    stage: "publish",
                    action: "retry",
                    resource: external_id,
                    volume: volume_id,
                    retry: &format!("{attempt}/{}", retry.max_attempts),
                    reason: &reason,
                    ..WarnEvent::default()
                });
                thread::sleep(backoff_delay(retry.base_delay, attempt));
            }
            other => return Ok(other),
        }
    }
}
