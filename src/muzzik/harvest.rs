use crate::muzzik::classify::{ResourceKind, resource_kind};
use crate::muzzik::extract::extract_references;
use anyhow::{Context, Result};
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

const UNKNOWN_OBSERVER: &str = "unknown";

/// One message from the channel history, in the shape the chat API returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
}

/// A classified reference seen in the history, not yet checked against state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub reference: String,
    pub kind: ResourceKind,
    pub first_seen: Option<String>,
    pub observed_by: String,
}

pub trait MessageSource {
    fn describe(&self) -> String;
    fn fetch_all(&self) -> Result<Vec<ChannelMessage>>;
}

/// Reads a JSON array of messages exported from the channel.
pub struct ExportFileSource {
    pub path: PathBuf,
}

impl MessageSource for ExportFileSource {
    fn describe(&self) -> String {
        format!("export:{}", self.path.display())
    }

    fn fetch_all(&self) -> Result<Vec<ChannelMessage>> {
        read_export(&self.path)
    }
}

pub fn read_export(path: &Path) -> Result<Vec<ChannelMessage>> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let messages = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse message export {}", path.display()))?;
    Ok(messages)
}

/// UTC calendar date of a chat timestamp such as `1700000000.000100`.
pub fn ts_to_date(ts: &str) -> Option<String> {
    let secs = ts.split('.').next()?.trim().parse::<i64>().ok()?;
    let at = DateTime::from_timestamp(secs, 0)?;
    Some(at.format("%Y-%m-%d").to_string())
}

/// Sort key for a chat timestamp: whole seconds, then the fraction padded
/// to microseconds so `1.5` and `1.000005` compare correctly.
fn ts_key(ts: &str) -> Option<(i64, u32)> {
    let (secs, frac) = ts.trim().split_once('.').unwrap_or((ts.trim(), ""));
    let secs = secs.parse::<i64>().ok()?;
    let frac = format!("{:0<6}", frac.get(..frac.len().min(6))?);
    Some((secs, frac.parse::<u32>().ok()?))
}

/// Extract and classify every reference in `messages`. Candidates keep the
/// order in which references first appear in the history; `first_seen` and
/// `observed_by` come from the earliest timestamped sighting, whatever order
/// the history arrives in.
pub fn harvest(messages: &[ChannelMessage]) -> Vec<Candidate> {
    let mut index: HashMap<String, (usize, Option<(i64, u32)>)> = HashMap::new();
    let mut out: Vec<Candidate> = Vec::new();
    for message in messages {
        if message.text.trim().is_empty() {
            continue;
        }
        let key = ts_key(&message.ts);
        let first_seen = ts_to_date(&message.ts);
        let observed_by = message
            .user
            .as_deref()
            .filter(|user| !user.trim().is_empty())
            .unwrap_or(UNKNOWN_OBSERVER);

        for reference in extract_references(&message.text) {
            if let Some((pos, earliest)) = index.get_mut(&reference) {
                let earlier = match (key, *earliest) {
                    (Some(new), Some(old)) => new < old,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if earlier {
                    *earliest = key;
                    out[*pos].first_seen = first_seen.clone();
                    out[*pos].observed_by = observed_by.to_string();
                }
                continue;
            }
            index.insert(reference.clone(), (out.len(), key));
            out.push(Candidate {
                kind: resource_kind(&reference),
                reference,
                first_seen: first_seen.clone(),
                observed_by: observed_by.to_string(),
            });
        }
    }
    out
}
