//! Per-target store of captured network traffic.
//!
//! The capture pipeline writes through `record`; the agent tools only read.
//! Query results are snapshots taken under the read lock, so ordering is
//! stable within a single call.

use crate::entry::NetworkEntry;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;

/// Filter for `NetworkCache::filter`
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub method: Option<String>,
    pub min_status: Option<u16>,
    pub max_status: Option<u16>,
}

impl EntryFilter {
    fn matches(&self, entry: &NetworkEntry) -> bool {
        if let Some(method) = &self.method {
            if !entry.request.method.eq_ignore_ascii_case(method) {
                return false;
            }
        }
        if let Some(min) = self.min_status {
            if entry.response.status < min {
                return false;
            }
        }
        if let Some(max) = self.max_status {
            if entry.response.status > max {
                return false;
            }
        }
        true
    }
}

/// Aggregate counts over one target's captured traffic
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatistics {
    pub total_entries: usize,
    pub by_method: HashMap<String, usize>,
    pub by_status: HashMap<String, usize>,
    pub by_type: HashMap<String, usize>,
    pub error_count: usize,
}

/// Captured traffic keyed by browsing-context target, oldest first
#[derive(Default)]
pub struct NetworkCache {
    targets: RwLock<HashMap<String, Vec<NetworkEntry>>>,
}

impl NetworkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a captured entry for a target (capture-pipeline side)
    pub fn record(&self, target_id: &str, entry: NetworkEntry) {
        tracing::debug!(target_id, id = %entry.id, url = %entry.request.url, "recording entry");
        self.targets
            .write()
            .entry(target_id.to_string())
            .or_default()
            .push(entry);
    }

    /// All entries captured for a target, oldest first
    pub fn entries_for_target(&self, target_id: &str) -> Vec<NetworkEntry> {
        self.targets
            .read()
            .get(target_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Look up one entry by id
    pub fn entry(&self, target_id: &str, id: &str) -> Option<NetworkEntry> {
        self.targets
            .read()
            .get(target_id)
            .and_then(|entries| entries.iter().find(|e| e.id == id).cloned())
    }

    /// Case-insensitive substring match on the request URL
    pub fn search_by_url(&self, target_id: &str, substring: &str) -> Vec<NetworkEntry> {
        let needle = substring.to_lowercase();
        self.targets
            .read()
            .get(target_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.request.url.to_lowercase().contains(&needle))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries matching a method/status filter
    pub fn filter(&self, target_id: &str, filter: &EntryFilter) -> Vec<NetworkEntry> {
        self.targets
            .read()
            .get(target_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Aggregate counts for a target
    pub fn statistics(&self, target_id: &str) -> CacheStatistics {
        let targets = self.targets.read();
        let Some(entries) = targets.get(target_id) else {
            return CacheStatistics::default();
        };

        let mut stats = CacheStatistics {
            total_entries: entries.len(),
            ..Default::default()
        };
        for entry in entries {
            *stats
                .by_method
                .entry(entry.request.method.to_uppercase())
                .or_default() += 1;
            *stats
                .by_status
                .entry(entry.response.status.to_string())
                .or_default() += 1;
            *stats
                .by_type
                .entry(entry.metadata.request_type.clone())
                .or_default() += 1;
            if entry.metadata.has_error {
                stats.error_count += 1;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{EntryMetadata, RequestRecord, ResponseRecord, Timing};

    fn entry(id: &str, method: &str, url: &str, status: u16) -> NetworkEntry {
        NetworkEntry {
            id: id.to_string(),
            request: RequestRecord {
                url: url.to_string(),
                method: method.to_string(),
                headers: HashMap::new(),
                body: None,
                timestamp: 1_000.0,
            },
            response: ResponseRecord {
                status,
                status_text: "OK".to_string(),
                headers: HashMap::new(),
                body: None,
                content_type: Some("application/json".to_string()),
            },
            timing: Timing {
                start_time: 0.0,
                end_time: 12.0,
                duration_ms: 12.0,
            },
            metadata: EntryMetadata {
                request_type: "xhr".to_string(),
                has_error: status >= 400,
                error_message: None,
                cookies: None,
                auth_headers: None,
            },
        }
    }

    fn seeded() -> NetworkCache {
        let cache = NetworkCache::new();
        cache.record("tab-1", entry("r1", "GET", "https://api.example.com/users", 200));
        cache.record("tab-1", entry("r2", "POST", "https://api.example.com/Login", 401));
        cache.record("tab-1", entry("r3", "GET", "https://cdn.example.com/app.js", 200));
        cache.record("tab-2", entry("r4", "GET", "https://other.example.com/", 500));
        cache
    }

    #[test]
    fn test_entries_are_scoped_by_target() {
        let cache = seeded();
        assert_eq!(cache.entries_for_target("tab-1").len(), 3);
        assert_eq!(cache.entries_for_target("tab-2").len(), 1);
        assert!(cache.entries_for_target("tab-3").is_empty());
    }

    #[test]
    fn test_entry_lookup() {
        let cache = seeded();
        assert_eq!(cache.entry("tab-1", "r2").unwrap().response.status, 401);
        assert!(cache.entry("tab-1", "r4").is_none());
        assert!(cache.entry("tab-2", "r1").is_none());
    }

    #[test]
    fn test_search_by_url_is_case_insensitive() {
        let cache = seeded();
        let hits = cache.search_by_url("tab-1", "login");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "r2");
    }

    #[test]
    fn test_filter_by_method_and_status() {
        let cache = seeded();
        let hits = cache.filter(
            "tab-1",
            &EntryFilter {
                method: Some("get".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(hits.len(), 2);

        let hits = cache.filter(
            "tab-1",
            &EntryFilter {
                min_status: Some(400),
                max_status: Some(499),
                ..Default::default()
            },
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "r2");
    }

    #[test]
    fn test_statistics() {
        let cache = seeded();
        let stats = cache.statistics("tab-1");
        assert_eq!(stats.total_entries, 3);
        assert_eq!(stats.by_method.get("GET"), Some(&2));
        assert_eq!(stats.by_method.get("POST"), Some(&1));
        assert_eq!(stats.by_status.get("401"), Some(&1));
        assert_eq!(stats.by_type.get("xhr"), Some(&3));
        assert_eq!(stats.error_count, 1);

        let empty = cache.statistics("tab-3");
        assert_eq!(empty.total_entries, 0);
        assert_eq!(empty.error_count, 0);
    }
}
