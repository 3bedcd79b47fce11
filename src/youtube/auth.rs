use crate::error::MuzzikError;
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use serde_json::Value;
use std::env;

pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CREDENTIAL_VARS: [&str; 3] = [
    "YOUTUBE_CLIENT_ID",
    "YOUTUBE_CLIENT_SECRET",
    "YOUTUBE_REFRESH_TOKEN",
];

#[derive(Debug, Clone)]
pub struct OAuthCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
}

fn env_non_empty(var: &str) -> Option<String> {
    match env::var(var) {
        Ok(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
        _ => None,
    }
}

fn missing_vars(lookup: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
    CREDENTIAL_VARS
        .into_iter()
        .filter(|&var| lookup(var).is_none())
        .collect()
}

impl OAuthCredentials {
    pub fn from_env() -> Result<Self> {
        let missing = missing_vars(env_non_empty);
        if !missing.is_empty() {
            return Err(MuzzikError::MissingCredential(missing.join(", ")).into());
        }
        Ok(Self {
            client_id: env_non_empty("YOUTUBE_CLIENT_ID").unwrap_or_default(),
            client_secret: env_non_empty("YOUTUBE_CLIENT_SECRET").unwrap_or_default(),
            refresh_token: env_non_empty("YOUTUBE_REFRESH_TOKEN").unwrap_or_default(),
        })
    }
}

pub fn token_url() -> String {
    env_non_empty("MUZZIK_OAUTH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string())
}

/// Trade the long-lived refresh token for a short-lived access token.
pub fn exchange_refresh_token(
    client: &Client,
    token_url: &str,
    creds: &OAuthCredentials,
) -> Result<String> {
    let form = [
        ("grant_type", "refresh_token"),
        ("client_id", creds.client_id.as_str()),
        ("client_secret", creds.client_secret.as_str()),
        ("refresh_token", creds.refresh_token.as_str()),
    ];
    let response = client
        .post(token_url)
        .form(&form)
        .send()
        .context("oauth token request failed")?;
    let status = response.status();
    let json: Value = response
        .json()
        .context("invalid JSON from oauth token endpoint")?;
    if !status.is_success() {
        let reason = json
            .get("error_description")
            .or_else(|| json.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        anyhow::bail!("oauth token exchange failed with status {status}: {reason}");
    }
    access_token_from(&json)
}

fn access_token_from(json: &Value) -> Result<String> {
    json.get("access_token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .map(ToOwned::to_owned)
        .context("oauth token response missing access_token")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vars_lists_every_unset_credential() {
        let got = missing_vars(|var| (var == "YOUTUBE_CLIENT_ID").then(|| "id".to_string()));
        assert_eq!(got, vec!["YOUTUBE_CLIENT_SECRET", "YOUTUBE_REFRESH_TOKEN"]);
        assert!(missing_vars(|_| Some("x".into())).is_empty());
    }

    #[test]
    fn access_token_is_read_from_token_response() {
        let json = serde_json::json!({"access_token": "ya29.abc", "expires_in": 3599});
        assert_eq!(access_token_from(&json).expect("token"), "ya29.abc");
        assert!(access_token_from(&serde_json::json!({"access_token": ""})).is_err());
    }
}
