use crate::error::MuzzikError;
use crate::muzzik::config::PlaylistConfig;
use crate::muzzik::reconcile::{Destination, InsertOutcome};
use crate::youtube::auth::{OAuthCredentials, exchange_refresh_token, token_url};
use anyhow::{Context, Result};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::collections::BTreeSet;
use std::env;
use std::thread;
use std::time::Duration;

const DEFAULT_API_BASE: &str = "https://www.googleapis.com/youtube/v3";
const REQUEST_TIMEOUT_SECS: u64 = 30;
const PAGE_SIZE: &str = "50";
const READ_RETRIES: usize = 2;

/// YouTube playlists as publish volumes.
pub struct YouTubePlaylists {
    client: Client,
    api_base: String,
    access_token: String,
    description: String,
    privacy: String,
}

impl YouTubePlaylists {
    pub fn connect(cfg: &PlaylistConfig) -> Result<Self> {
        let creds = OAuthCredentials::from_env()?;
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        let access_token = exchange_refresh_token(&client, &token_url(), &creds)?;
        let api_base = match env::var("MUZZIK_YOUTUBE_API_BASE") {
            Ok(v) if !v.trim().is_empty() => v.trim().trim_end_matches('/').to_string(),
            _ => DEFAULT_API_BASE.to_string(),
        };
        Ok(Self {
            client,
            api_base,
            access_token,
            description: cfg.description.clone(),
            privacy: cfg.privacy.clone(),
        })
    }

    fn url(&self, resource: &str) -> String {
        format!("{}/{resource}", self.api_base)
    }

    /// Send with a short linear backoff on retryable statuses. Used for the
    /// calls that have no per-item disposition of their own.
    fn send_retrying(
        &self,
        what: &str,
        idempotent: bool,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<Response> {
        let mut last_status = None;
        for attempt in 0..=READ_RETRIES {
            let response = build()
                .bearer_auth(&self.access_token)
                .send()
                .with_context(|| format!("{what} request failed"))?;
            let status = response.status();
            if should_retry(status, idempotent) {
                last_status = Some(status);
                if attempt < READ_RETRIES {
                    thread::sleep(Duration::from_millis(250 * (attempt as u64 + 1)));
                }
                continue;
            }
            return Ok(response);
        }
        anyhow::bail!(
            "{what} failed after retries with status {}",
            last_status.map(|s| s.to_string()).unwrap_or_default()
        )
    }
}

/// A 429 was never processed and is always safe to resend. A 5xx may have
/// been applied, so only idempotent calls resend it.
fn should_retry(status: StatusCode, idempotent: bool) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || (idempotent && status.is_server_error())
}

/// `error.errors[0].reason` from a Google API error body, falling back to
/// `error.status` and then `error.message`.
pub fn error_reason(body: &str) -> Option<String> {
    let json: Value = serde_json::from_str(body).ok()?;
    let error = json.get("error")?;
    error
        .get("errors")
        .and_then(Value::as_array)
        .and_then(|errors| errors.first())
        .and_then(|first| first.get("reason"))
        .or_else(|| error.get("status"))
        .or_else(|| error.get("message"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
}

fn is_quota_signal(status: u16, reason: &str, body: &str) -> bool {
    if status != 403 {
        return false;
    }
    let reason = reason.to_ascii_lowercase();
    if reason.contains("ratelimitexceeded") {
        return false;
    }
    reason.contains("quota")
        || reason == "dailylimitexceeded"
        || body.to_ascii_lowercase().contains("quota")
}

/// Decision table for a failed insert.
pub fn classify_insert_failure(status: u16, body: &str) -> Result<InsertOutcome> {
    let reason = error_reason(body).unwrap_or_else(|| format!("http {status}"));
    if status == 401 {
        anyhow::bail!("youtube rejected credentials (401): {reason}");
    }
    if is_quota_signal(status, &reason, body) {
        return Ok(InsertOutcome::QuotaExhausted(reason));
    }
    let rate_limited = reason.to_ascii_lowercase().contains("ratelimitexceeded");
    if status == 429 || status >= 500 || rate_limited {
        return Ok(InsertOutcome::Transient(reason));
    }
    if matches!(status, 400 | 403 | 404) {
        return Ok(InsertOutcome::Rejected(reason));
    }
    Ok(InsertOutcome::Transient(reason))
}

fn api_failure(what: &str, status: StatusCode, body: &str) -> anyhow::Error {
    let reason = error_reason(body).unwrap_or_else(|| format!("http {}", status.as_u16()));
    if is_quota_signal(status.as_u16(), &reason, body) {
        return MuzzikError::QuotaExhausted(format!("{what}: {reason}")).into();
    }
    anyhow::anyhow!("{what} failed with status {status}: {reason}")
}

fn member_ids(page: &Value) -> impl Iterator<Item = String> + '_ {
    page.get("items")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|item| {
            item.get("contentDetails")
                .and_then(|details| details.get("videoId"))
                .and_then(Value::as_str)
                .map(ToOwned::to_owned)
        })
}

impl Destination for YouTubePlaylists {
    fn create_volume(&mut self, title: &str) -> Result<String> {
        let payload = serde_json::json!({
            "snippet": {"title": title, "description": self.description},
            "status": {"privacyStatus": self.privacy},
        });
        let url = self.url("playlists");
        let response = self.send_retrying("playlists.insert", false, || {
            self.client
                .post(&url)
                .query(&[("part", "snippet,status")])
                .json(&payload)
        })?;
        let status = response.status();
        let body = response.text().unwrap_or_default();
        if !status.is_success() {
            return Err(api_failure("playlists.insert", status, &body));
        }
        let json: Value =
            serde_json::from_str(&body).context("invalid JSON from playlists.insert")?;
        json.get("id")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .context("playlists.insert response missing id")
    }

    fn list_members(&mut self, volume_id: &str) -> Result<BTreeSet<String>> {
        let url = self.url("playlistItems");
        let mut members = BTreeSet::new();
        let mut page_token: Option<String> = None;
        loop {
            let response = self.send_retrying("playlistItems.list", true, || {
                let mut params = vec![
                    ("part", "contentDetails"),
                    ("playlistId", volume_id),
                    ("maxResults", PAGE_SIZE),
                ];
                if let Some(token) = page_token.as_deref() {
                    params.push(("pageToken", token));
                }
                self.client.get(&url).query(&params)
            })?;
            let status = response.status();
            let body = response.text().unwrap_or_default();
            if !status.is_success() {
                return Err(api_failure("playlistItems.list", status, &body));
            }
            let page: Value =
                serde_json::from_str(&body).context("invalid JSON from playlistItems.list")?;
            members.extend(member_ids(&page));
            page_token = page
                .get("nextPageToken")
                .and_then(Value::as_str)
                .filter(|token| !token.is_empty())
                .map(ToOwned::to_owned);
            if page_token.is_none() {
                return Ok(members);
            }
        }
    }

    fn insert_member(&mut self, volume_id: &str, external_id: &str) -> Result<InsertOutcome> {
        let payload = serde_json::json!({
            "snippet": {
                "playlistId": volume_id,
                "position": 0,
                "resourceId": {"kind": "youtube#video", "videoId": external_id},
            },
        });
        let sent = self
            .client
            .post(self.url("playlistItems"))
            .query(&[("part", "snippet")])
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send();
        let response = match sent {
            Ok(response) => response,
            Err(err) if err.is_timeout() || err.is_connect() => {
                return Ok(InsertOutcome::Transient(err.to_string()));
            }
            Err(err) => return Err(err).context("playlistItems.insert request failed"),
        };
        let status = response.status();
        if status.is_success() {
            return Ok(InsertOutcome::Inserted);
        }
        let body = response.text().unwrap_or_default();
        classify_insert_failure(status.as_u16(), &body)
    }
}
