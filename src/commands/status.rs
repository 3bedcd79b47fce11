use anyhow::Result;

use crate::commands::CommandReport;
use crate::muzzik::config::{MuzzikConfig, load_config};
use crate::muzzik::paths::{MuzzikPaths, resolve_paths};
use crate::muzzik::state::{self, RunState};

const BACKLOG_PREVIEW: usize = 5;

fn describe(report: &mut CommandReport, paths: &MuzzikPaths, cfg: &MuzzikConfig) {
    report.detail(format!("muzzik_home={}", paths.muzzik_home.display()));
    report.detail(format!("state_file={}", paths.state_file.display()));
    report.detail(format!("logs_dir={}", paths.logs_dir.display()));
    report.detail(format!("channel={}", cfg.channel.name));
    report.detail(format!(
        "playlist title_prefix=\"{}\" privacy={} capacity={} daily_insert_cap={}",
        cfg.playlist.title_prefix,
        cfg.playlist.privacy,
        cfg.playlist.capacity,
        cfg.playlist.daily_insert_cap
    ));
}

fn describe_state(report: &mut CommandReport, state: &RunState, capacity: u64) {
    report.detail(format!("volumes={}", state.volumes.len()));
    for volume in &state.volumes {
        report.detail(format!(
            "volume \"{}\" id={} members={}/{capacity}",
            volume.title, volume.id, volume.member_count
        ));
    }
    let publishable = state
        .resources
        .iter()
        .filter(|r| r.kind.is_publishable())
        .count();
    report.detail(format!(
        "resources total={} publishable={} published={}",
        state.resources.len(),
        publishable,
        state.published_count()
    ));
    report.detail(format!("backlog={}", state.backlog.len()));
    if !state.backlog.is_empty() {
        let head = state
            .backlog
            .iter()
            .take(BACKLOG_PREVIEW)
            .cloned()
            .collect::<Vec<_>>()
            .join(",");
        report.detail(format!("backlog_head={head}"));
    }

    for violation in state.backlog_violations() {
        report.issue(violation);
    }
}

pub fn run() -> Result<CommandReport> {
    let paths = resolve_paths()?;
    let cfg = load_config()?;
    let mut report = CommandReport::new("status");
    describe(&mut report, &paths, &cfg);

    if !paths.state_file.exists() {
        report.issue(format!(
            "missing state file ({}); run `muzzik sync` first",
            paths.state_file.display()
        ));
        return Ok(report);
    }

    match state::load(&paths.state_file) {
        Ok(state) => describe_state(&mut report, &state, cfg.playlist.capacity),
        Err(err) => report.issue(format!("{err:#}")),
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::muzzik::classify::resource_kind;
    use crate::muzzik::state::{ResourceRecord, Volume};

    fn record(reference: &str, published: bool) -> ResourceRecord {
        ResourceRecord {
            reference: reference.to_string(),
            kind: resource_kind(reference),
            first_seen: None,
            observed_by: None,
            published,
        }
    }

    #[test]
    fn consistent_state_has_no_issues() {
        let state = RunState {
            volumes: vec![Volume {
                id: "PL1".into(),
                title: "muzzik vol. 1".into(),
                member_count: 1,
            }],
            resources: vec![
                record("https://youtu.be/a", true),
                record("https://youtu.be/b", false),
                record("https://soundcloud.com/x", false),
            ],
            backlog: vec!["b".into()],
            ..RunState::default()
        };
        let mut report = CommandReport::new("status");
        describe_state(&mut report, &state, 5000);
        assert!(report.ok, "{:?}", report.issues);
        assert!(
            report
                .details
                .contains(&"resources total=3 publishable=2 published=1".to_string())
        );
        assert!(report.details.contains(&"backlog_head=b".to_string()));
    }

    #[test]
    fn broken_backlog_is_an_issue() {
        let state = RunState {
            resources: vec![record("https://youtu.be/a", true)],
            backlog: vec!["a".into(), "ghost".into()],
            ..RunState::default()
        };
        let mut report = CommandReport::new("status");
        describe_state(&mut report, &state, 5000);
        assert!(!report.ok);
        assert_eq!(report.issues.len(), 2);
    }
}
