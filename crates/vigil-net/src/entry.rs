//! Captured-request records supplied by the capture collaborator

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One captured network request/response pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    pub id: String,
    pub request: RequestRecord,
    pub response: ResponseRecord,
    pub timing: Timing,
    pub metadata: EntryMetadata,
}

/// The outbound half of a captured exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestRecord {
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    /// Epoch milliseconds, as reported by the capture side
    pub timestamp: f64,
}

/// The inbound half of a captured exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseRecord {
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timing {
    pub start_time: f64,
    pub end_time: f64,
    pub duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    /// Resource class reported by the capture side (xhr, fetch, document, ...)
    pub request_type: String,
    #[serde(default)]
    pub has_error: bool,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Cookie header observed on the request, when present
    #[serde(default)]
    pub cookies: Option<String>,
    /// Names of credential-bearing request headers
    #[serde(default)]
    pub auth_headers: Option<Vec<String>>,
}

impl NetworkEntry {
    /// Whether the response content type suggests a JSON body
    pub fn has_json_body(&self) -> bool {
        self.response
            .content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}
