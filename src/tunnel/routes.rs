//! Path classification for automation platforms.
//!
//! Tags only add headers; every relay goes to the same target with the same path.

use crate::constants::{
    PLATFORM_HEADER, PROCESSED_HEADER, TIMESTAMP_HEADER, TYPE_HEADER, WEBHOOK_PREFIX, WORKFLOW_HEADER,
};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteTag {
    Generic,
    N8n { workflow: Option<String> },
    Automation { platform: String },
}

/// Tags a relay path. `None` when the path is outside `/webhook`.
pub fn classify(path: &str) -> Option<RouteTag> {
    let rest = path.strip_prefix(WEBHOOK_PREFIX)?;
    if !(rest.is_empty() || rest.starts_with('/')) {
        return None;
    }

    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    let tag = match segments.as_slice() {
        ["n8n"] => RouteTag::N8n { workflow: None },
        ["n8n", workflow] => RouteTag::N8n { workflow: Some((*workflow).to_string()) },
        [platform @ ("zapier" | "make")] => RouteTag::Automation { platform: (*platform).to_string() },
        ["automation", platform] => RouteTag::Automation { platform: (*platform).to_string() },
        _ => RouteTag::Generic,
    };
    Some(tag)
}

impl RouteTag {
    pub fn platform(&self) -> Option<&str> {
        match self {
            RouteTag::Generic => None,
            RouteTag::N8n { .. } => Some("n8n"),
            RouteTag::Automation { platform } => Some(platform.as_str()),
        }
    }

    /// Headers added to the request relayed upstream.
    pub fn apply_request_headers(&self, headers: &mut HeaderMap, unix_secs: i64) {
        match self {
            RouteTag::Generic => {}
            RouteTag::N8n { workflow } => {
                set(headers, PLATFORM_HEADER, "n8n");
                set(headers, TIMESTAMP_HEADER, &unix_secs.to_string());
                if let Some(id) = workflow {
                    set(headers, WORKFLOW_HEADER, id);
                }
            }
            RouteTag::Automation { platform } => {
                set(headers, PLATFORM_HEADER, platform);
                set(headers, TYPE_HEADER, "automation");
            }
        }
    }

    /// Headers added to the response returned to the caller.
    pub fn apply_response_headers(&self, headers: &mut HeaderMap) {
        match self {
            RouteTag::Generic => {}
            RouteTag::N8n { workflow } => {
                set(headers, PLATFORM_HEADER, "n8n");
                set(headers, PROCESSED_HEADER, "true");
                if let Some(id) = workflow {
                    set(headers, WORKFLOW_HEADER, id);
                }
            }
            RouteTag::Automation { platform } => set(headers, PLATFORM_HEADER, platform),
        }
    }
}

fn set(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(name), value);
        }
        Err(_) => warn!(header = name, "dropping header with invalid value"),
    }
}
