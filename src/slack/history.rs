use crate::error::MuzzikError;
use crate::muzzik::harvest::{ChannelMessage, MessageSource};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use serde_json::Value;
use std::env;
use std::thread;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://slack.com/api";
const PAGE_LIMIT: &str = "200";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const MAX_RATE_LIMIT_RETRIES: usize = 5;
const DEFAULT_RETRY_AFTER_SECS: u64 = 5;

#[derive(Debug, Deserialize)]
struct ChannelEntry {
    id: String,
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Debug, Deserialize)]
struct ChannelsPage {
    #[serde(default)]
    channels: Vec<ChannelEntry>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct HistoryPage {
    #[serde(default)]
    messages: Vec<ChannelMessage>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

fn next_cursor(meta: Option<ResponseMetadata>) -> Option<String> {
    meta.map(|m| m.next_cursor)
        .filter(|cursor| !cursor.trim().is_empty())
}

/// Reads the full history of one channel through the Web API.
pub struct SlackHistory {
    client: Client,
    api_base: String,
    token: String,
    channel_name: String,
}

impl SlackHistory {
    pub fn from_env(channel_name: &str) -> Result<Self> {
        let token = match env::var("SLACK_BOT_TOKEN") {
            Ok(v) if !v.trim().is_empty() => v.trim().to_string(),
            _ => return Err(MuzzikError::MissingCredential("SLACK_BOT_TOKEN".into()).into()),
        };
        let api_base = match env::var("MUZZIK_SLACK_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            _ => DEFAULT_API_BASE.to_string(),
        };
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_base,
            token,
            channel_name: channel_name.trim_start_matches('#').to_string(),
        })
    }

    fn call(&self, method: &str, params: &[(&str, &str)]) -> Result<Value> {
        let url = format!("{}/{method}", self.api_base);
        let mut last_status = None;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.token)
                .query(params)
                .send()
                .with_context(|| format!("slack {method} request failed"))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                last_status = Some(response.status());
                if attempt < MAX_RATE_LIMIT_RETRIES {
                    thread::sleep(Duration::from_secs(retry_after_secs(&response)));
                }
                continue;
            }
            if !response.status().is_success() {
                anyhow::bail!("slack {method} failed with status {}", response.status());
            }

            let json: Value = response
                .json()
                .with_context(|| format!("invalid JSON from slack {method}"))?;
            if json.get("ok").and_then(Value::as_bool) != Some(true) {
                let reason = json
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown_error");
                anyhow::bail!("slack {method} returned error: {reason}");
            }
            return Ok(json);
        }

        anyhow::bail!(
            "slack {method} still rate limited after {} retries (last status {})",
            MAX_RATE_LIMIT_RETRIES,
            last_status.map(|s| s.to_string()).unwrap_or_default()
        )
    }

    pub fn find_channel_id(&self) -> Result<Option<String>> {
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![("types", "public_channel"), ("limit", PAGE_LIMIT)];
            if let Some(c) = cursor.as_deref() {
                params.push(("cursor", c));
            }
            let page: ChannelsPage = serde_json::from_value(self.call("conversations.list", &params)?)
                .context("unexpected conversations.list payload")?;
            if let Some(found) = page.channels.iter().find(|ch| ch.name == self.channel_name) {
                return Ok(Some(found.id.clone()));
            }
            cursor = next_cursor(page.response_metadata);
            if cursor.is_none() {
                return Ok(None);
            }
        }
    }

    pub fn fetch_history(&self, channel_id: &str) -> Result<Vec<ChannelMessage>> {
        let mut messages = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut params = vec![("channel", channel_id), ("limit", PAGE_LIMIT)];
            if let Some(c) = cursor.as_deref() {
                params.push(("cursor", c));
            }
            let page: HistoryPage =
                serde_json::from_value(self.call("conversations.history", &params)?)
                    .context("unexpected conversations.history payload")?;
            messages.extend(page.messages);
            cursor = next_cursor(page.response_metadata);
            if cursor.is_none() {
                return Ok(messages);
            }
        }
    }
}

fn retry_after_secs(response: &Response) -> u64 {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(DEFAULT_RETRY_AFTER_SECS)
}

impl MessageSource for SlackHistory {
    fn describe(&self) -> String {
        format!("slack:#{}", self.channel_name)
    }

    fn fetch_all(&self) -> Result<Vec<ChannelMessage>> {
        let channel_id = self
            .find_channel_id()?
            .with_context(|| format!("channel #{} not found", self.channel_name))?;
        self.fetch_history(&channel_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_cursor_ends_pagination() {
        assert_eq!(next_cursor(None), None);
        assert_eq!(
            next_cursor(Some(ResponseMetadata {
                next_cursor: "  ".into()
            })),
            None
        );
        assert_eq!(
            next_cursor(Some(ResponseMetadata {
                next_cursor: "dXNlcjpVMEc5V0ZYTlo=".into()
            }))
            .as_deref(),
            Some("dXNlcjpVMEc5V0ZYTlo=")
        );
    }

    #[test]
    fn history_page_parses_messages_and_cursor() {
        let raw = serde_json::json!({
            "ok": true,
            "messages": [
                {"type": "message", "user": "U1", "text": "<https://youtu.be/abc>", "ts": "1700000000.000100"},
                {"type": "message", "subtype": "bot_message", "ts": "1700000001.000100"}
            ],
            "has_more": true,
            "response_metadata": {"next_cursor": "bmV4dA=="}
        });
        let page: HistoryPage = serde_json::from_value(raw).expect("parse");
        assert_eq!(page.messages.len(), 2);
        assert_eq!(page.messages[0].user.as_deref(), Some("U1"));
        assert!(page.messages[1].text.is_empty());
        assert_eq!(next_cursor(page.response_metadata).as_deref(), Some("bmV4dA=="));
    }

    #[test]
    fn channels_page_tolerates_missing_metadata() {
        let raw = serde_json::json!({
            "ok": true,
            "channels": [{"id": "C1", "name": "muzzik", "is_private": false}]
        });
        let page: ChannelsPage = serde_json::from_value(raw).expect("parse");
        assert_eq!(page.channels[0].id, "C1");
        assert_eq!(next_cursor(page.response_metadata), None);
    }
}
