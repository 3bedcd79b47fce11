use crate::error::MuzzikError;
use crate::muzzik::classify::ResourceKind;
use crate::muzzik::harvest::Candidate;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub id: String,
    pub title: String,
    pub member_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRecord {
    pub reference: String,
    #[serde(flatten)]
    pub kind: ResourceKind,
    #[serde(default)]
    pub first_seen: Option<String>,
    #[serde(default)]
    pub observed_by: Option<String>,
    #[serde(default)]
    pub published: bool,
}

impl ResourceRecord {
    pub fn external_id(&self) -> Option<&str> {
        self.kind.external_id()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunState {
    pub schema_version: u32,
    pub volumes: Vec<Volume>,
    pub resources: Vec<ResourceRecord>,
    pub backlog: Vec<String>,
}

impl Default for RunState {
    fn default() -> Self {
        Self {
            schema_version: 1,
            volumes: Vec::new(),
            resources: Vec::new(),
            backlog: Vec::new(),
        }
    }
}

impl RunState {
    /// Flag every unpublished record carrying `external_id` as published.
    /// Returns how many records flipped.
    pub fn mark_published(&mut self, external_id: &str) -> usize {
        let mut flipped = 0usize;
        for record in &mut self.resources {
            if !record.published && record.external_id() == Some(external_id) {
                record.published = true;
                flipped += 1;
            }
        }
        flipped
    }

    pub fn published_count(&self) -> usize {
        self.resources.iter().filter(|r| r.published).count()
    }

    /// Backlog entries that break the queue invariants: duplicates, or ids
    /// with no unpublished publishable record behind them.
    pub fn backlog_violations(&self) -> Vec<String> {
        let pending = self
            .resources
            .iter()
            .filter(|r| !r.published)
            .filter_map(ResourceRecord::external_id)
            .collect::<HashSet<_>>();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for id in &self.backlog {
            if !seen.insert(id.as_str()) {
                out.push(format!("duplicate backlog id {id}"));
            } else if !pending.contains(id.as_str()) {
                out.push(format!("backlog id {id} has no unpublished resource"));
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub recorded: usize,
    pub enqueued: usize,
    pub already_published: usize,
}

pub fn load(path: &Path) -> Result<RunState> {
    if !path.exists() {
        return Ok(RunState::default());
    }

    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let parsed: RunState = serde_json::from_str(&raw)
        .map_err(|err| MuzzikError::CorruptState(format!("{}: {err}", path.display())))?;
    Ok(parsed)
}

/// Replace the state file atomically: a failed save leaves the previous file intact.
pub fn save(path: &Path, state: &RunState) -> Result<PathBuf> {
    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let data = serde_json::to_string_pretty(state)?;
    let mut tmp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(format!("{data}\n").as_bytes())
        .with_context(|| format!("failed to write temp state for {}", path.display()))?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to sync temp state for {}", path.display()))?;
    tmp.persist(path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Candidates whose reference is not yet in `known`, in input order.
pub fn diff_new(candidates: &[Candidate], known: &[ResourceRecord]) -> Vec<Candidate> {
    let known = known
        .iter()
        .map(|r| r.reference.as_str())
        .collect::<HashSet<_>>();
    candidates
        .iter()
        .filter(|c| !known.contains(c.reference.as_str()))
        .cloned()
        .collect()
}

/// Record unseen references and put their video ids at the front of the
/// backlog, keeping extraction order among the new ids.
pub fn record_and_enqueue(state: &mut RunState, new_ones: &[Candidate]) -> EnqueueOutcome {
    let mut outcome = EnqueueOutcome::default();
    let mut known = state
        .resources
        .iter()
        .map(|r| r.reference.clone())
        .collect::<HashSet<_>>();
    let published_ids = state
        .resources
        .iter()
        .filter(|r| r.published)
        .filter_map(|r| r.external_id().map(ToOwned::to_owned))
        .collect::<HashSet<_>>();
    let mut queued = state.backlog.iter().cloned().collect::<HashSet<_>>();
    let mut new_ids = Vec::new();

    for candidate in new_ones {
        if !known.insert(candidate.reference.clone()) {
            continue;
        }

        let external_id = candidate.kind.external_id();
        let published = external_id.is_some_and(|id| published_ids.contains(id));
        state.resources.push(ResourceRecord {
            reference: candidate.reference.clone(),
            kind: candidate.kind.clone(),
            first_seen: candidate.first_seen.clone(),
            observed_by: Some(candidate.observed_by.clone()),
            published,
        });
        outcome.recorded += 1;

        let Some(id) = external_id else {
            continue;
        };
        if published {
            outcome.already_published += 1;
            continue;
        }
        if queued.insert(id.to_string()) {
            new_ids.push(id.to_string());
        }
    }

    outcome.enqueued = new_ids.len();
    if !new_ids.is_empty() {
        new_ids.append(&mut state.backlog);
        state.backlog = new_ids;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muzzik::classify::resource_kind;
    use tempfile::tempdir;

    fn candidate(reference: &str) -> Candidate {
        Candidate {
            reference: reference.to_string(),
            kind: resource_kind(reference),
            first_seen: Some("2025-01-01".into()),
            observed_by: "U1".into(),
        }
    }

    fn sample_state() -> RunState {
        RunState {
            schema_version: 1,
            volumes: vec![Volume {
                id: "PL1".into(),
                title: "muzzik vol. 1".into(),
                member_count: 5,
            }],
            resources: vec![
                ResourceRecord {
                    reference: "https://youtu.be/abc".into(),
                    kind: resource_kind("https://youtu.be/abc"),
                    first_seen: Some("2025-01-01".into()),
                    observed_by: Some("U1".into()),
                    published: true,
                },
                ResourceRecord {
                    reference: "https://soundcloud.com/a".into(),
                    kind: ResourceKind::Other,
                    first_seen: None,
                    observed_by: None,
                    published: false,
                },
            ],
            backlog: Vec::new(),
        }
    }

    #[test]
    fn load_missing_file_returns_empty_state() {
        let tmp = tempdir().expect("tempdir");
        let state = load(&tmp.path().join("state.json")).expect("load");
        assert_eq!(state, RunState::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("nested").join("state.json");
        let mut state = sample_state();
        state.backlog.push("zzz".into());

        save(&path, &state).expect("save");
        let loaded = load(&path).expect("load");
        assert_eq!(loaded, state);
    }

    #[test]
    fn save_replaces_existing_file_without_leftovers() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        save(&path, &RunState::default()).expect("first save");
        save(&path, &sample_state()).expect("second save");

        let entries = fs::read_dir(tmp.path())
            .expect("read dir")
            .map(|e| e.expect("entry").file_name())
            .collect::<Vec<_>>();
        assert_eq!(entries, vec![std::ffi::OsString::from("state.json")]);
        assert_eq!(load(&path).expect("load"), sample_state());
    }

    #[test]
    fn load_rejects_corrupt_file() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        fs::write(&path, "{ not json").expect("write");
        let err = load(&path).expect_err("corrupt");
        assert!(format!("{err:#}").contains("corrupt"));
    }

    #[test]
    fn persisted_layout_uses_top_level_fields() {
        let tmp = tempdir().expect("tempdir");
        let path = tmp.path().join("state.json");
        save(&path, &sample_state()).expect("save");
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("read")).expect("json");
        assert!(raw.get("volumes").is_some());
        assert!(raw.get("backlog").is_some());
        assert_eq!(raw["resources"][0]["kind"], "publishable");
        assert_eq!(raw["resources"][0]["external_id"], "abc");
        assert_eq!(raw["resources"][1]["kind"], "other");
    }

    #[test]
    fn diff_new_filters_known_and_keeps_order() {
        let state = sample_state();
        let candidates = vec![
            candidate("https://youtu.be/n2"),
            candidate("https://youtu.be/abc"),
            candidate("https://youtu.be/n1"),
        ];
        let got = diff_new(&candidates, &state.resources);
        let refs = got.iter().map(|c| c.reference.as_str()).collect::<Vec<_>>();
        assert_eq!(refs, vec!["https://youtu.be/n2", "https://youtu.be/n1"]);
    }

    #[test]
    fn new_ids_are_prepended_in_extraction_order() {
        let mut state = RunState::default();
        state.backlog = vec!["x".into(), "y".into()];
        let new_ones = vec![candidate("https://youtu.be/n1"), candidate("https://youtu.be/n2")];

        let outcome = record_and_enqueue(&mut state, &new_ones);
        assert_eq!(state.backlog, vec!["n1", "n2", "x", "y"]);
        assert_eq!(outcome.recorded, 2);
        assert_eq!(outcome.enqueued, 2);
        assert!(state.resources.iter().all(|r| !r.published));
    }

    #[test]
    fn other_links_and_channel_pages_are_recorded_but_not_queued() {
        let mut state = RunState::default();
        let new_ones = vec![
            candidate("https://soundcloud.com/a"),
            candidate("https://youtube.com/channel/XXXX"),
        ];
        let outcome = record_and_enqueue(&mut state, &new_ones);
        assert_eq!(outcome.recorded, 2);
        assert!(state.backlog.is_empty());
    }

    #[test]
    fn record_and_enqueue_is_idempotent() {
        let mut state = RunState::default();
        let new_ones = vec![candidate("https://youtu.be/n1"), candidate("https://youtu.be/n1")];
        record_and_enqueue(&mut state, &new_ones);
        let again = record_and_enqueue(&mut state, &new_ones);

        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.backlog, vec!["n1"]);
        assert_eq!(again, EnqueueOutcome::default());
    }

    #[test]
    fn same_video_via_other_url_is_queued_once() {
        let mut state = RunState::default();
        let new_ones = vec![
            candidate("https://youtu.be/vid"),
            candidate("https://www.youtube.com/watch?v=vid"),
        ];
        let outcome = record_and_enqueue(&mut state, &new_ones);
        assert_eq!(state.resources.len(), 2);
        assert_eq!(state.backlog, vec!["vid"]);
        assert_eq!(outcome.enqueued, 1);
        assert!(state.backlog_violations().is_empty());
    }

    #[test]
    fn already_published_video_is_recorded_as_published() {
        let mut state = sample_state();
        let outcome =
            record_and_enqueue(&mut state, &[candidate("https://www.youtube.com/watch?v=abc")]);
        assert_eq!(outcome.already_published, 1);
        assert!(state.backlog.is_empty());
        assert!(state.resources.last().expect("record").published);
    }

    #[test]
    fn mark_published_flips_every_matching_record_once() {
        let mut state = RunState::default();
        record_and_enqueue(
            &mut state,
            &[
                candidate("https://youtu.be/vid"),
                candidate("https://youtube.com/shorts/vid"),
            ],
        );
        assert_eq!(state.mark_published("vid"), 2);
        assert_eq!(state.mark_published("vid"), 0);
        assert_eq!(state.published_count(), 2);
    }

    #[test]
    fn backlog_violations_reports_orphans_and_duplicates() {
        let mut state = sample_state();
        state.backlog = vec!["abc".into(), "ghost".into(), "ghost".into()];
        let violations = state.backlog_violations();
        assert_eq!(violations.len(), 3);
    }
}
