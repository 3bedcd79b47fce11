use serde::{Deserialize, Serialize};
use url::Url;

const VIDEO_HOSTS: [&str; 4] = [
    "youtube.com",
    "m.youtube.com",
    "music.youtube.com",
    "youtu.be",
];
const SHORT_LINK_HOST: &str = "youtu.be";
const ID_PATH_PREFIXES: [&str; 3] = ["/shorts/", "/live/", "/embed/"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkClass {
    Publishable,
    Other,
}

/// Kind of a stored resource. Only publishable links carry an external id,
/// and even then only when the link points at a single video.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceKind {
    Publishable {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        external_id: Option<String>,
    },
    Other,
}

impl ResourceKind {
    pub fn external_id(&self) -> Option<&str> {
        match self {
            ResourceKind::Publishable { external_id } => external_id.as_deref(),
            ResourceKind::Other => None,
        }
    }

    pub fn is_publishable(&self) -> bool {
        matches!(self, ResourceKind::Publishable { .. })
    }
}

fn normalized_host(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_ascii_lowercase();
    Some(match host.strip_prefix("www.") {
        Some(stripped) => stripped.to_string(),
        None => host,
    })
}

fn non_empty(segment: &str) -> Option<String> {
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

pub fn classify(reference: &str) -> LinkClass {
    let Ok(url) = Url::parse(reference) else {
        return LinkClass::Other;
    };
    match normalized_host(&url) {
        Some(host) if VIDEO_HOSTS.contains(&host.as_str()) => LinkClass::Publishable,
        _ => LinkClass::Other,
    }
}

/// Video id for a publishable reference; `None` for channel, playlist and
/// other non-video pages.
pub fn derive_external_id(reference: &str) -> Option<String> {
    let url = Url::parse(reference).ok()?;
    let host = normalized_host(&url)?;
    if !VIDEO_HOSTS.contains(&host.as_str()) {
        return None;
    }

    let path = url.path();
    if host == SHORT_LINK_HOST {
        return non_empty(path.trim_start_matches('/').split('/').next()?);
    }

    if path == "/watch" {
        return url
            .query_pairs()
            .find(|(key, _)| key == "v")
            .and_then(|(_, value)| non_empty(&value));
    }

    for prefix in ID_PATH_PREFIXES {
        if let Some(rest) = path.strip_prefix(prefix) {
            return non_empty(rest.split('/').next()?);
        }
    }

    None
}

pub fn resource_kind(reference: &str) -> ResourceKind {
    match classify(reference) {
        LinkClass::Publishable => ResourceKind::Publishable {
            external_id: derive_external_id(reference),
        },
        LinkClass::Other => ResourceKind::Other,
    }
}
