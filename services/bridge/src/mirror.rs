//! State Mirror: the live view of backend printer-object state.
//!
//! Wraps a [`Snapshot`] behind a single-writer/multi-reader lock. The caller
//! is responsible for awaiting [`StateMirror::populate_initial`] before
//! spawning anything that reads from the mirror — the bridge's startup
//! sequence in `bridge.rs` does this by construction, so there is no
//! internal readiness gate here. Also carries the file-list cache seeded by
//! `server.files.list` and kept current by `notify_filelist_changed` deltas,
//! so `M20` need not re-query the backend on every call.

use std::sync::Arc;

use moonraker_proto::Snapshot;
use serde_json::Value;
use tokio::sync::RwLock;

/// One entry in the file-list cache.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: String,
    pub size: u64,
}

#[derive(Default)]
struct Inner {
    snapshot: Snapshot,
    files: Vec<FileEntry>,
    files_populated: bool,
}

/// Shared, cloneable handle to the bridge's printer-object mirror.
#[derive(Clone)]
pub struct StateMirror {
    inner: Arc<RwLock<Inner>>,
}

impl Default for StateMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMirror {
    pub fn new() -> Self {
        StateMirror {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Applies the initial synchronous `printer.objects.query` result, or a
    /// full re-query after a reconnect.
    pub async fn populate_initial(&self, status: &Value) {
        self.inner.write().await.snapshot.merge_delta(status);
    }

    /// Merges one `notify_status_update` delta. Fields not present in the
    /// delta are left untouched.
    pub async fn merge(&self, delta: &Value) {
        self.inner.write().await.snapshot.merge_delta(delta);
    }

    pub async fn get_f64(&self, object: &str, field: &str) -> f64 {
        self.inner.read().await.snapshot.get_f64(object, field)
    }

    pub async fn get_array(&self, object: &str, field: &str) -> Vec<f64> {
        self.inner.read().await.snapshot.get_array(object, field)
    }

    pub async fn get_str(&self, object: &str, field: &str) -> Option<String> {
        self.inner.read().await.snapshot.get_str(object, field)
    }

    pub async fn get_bool(&self, object: &str, field: &str) -> bool {
        self.inner.read().await.snapshot.get_bool(object, field)
    }

    /// Reads a field's raw JSON value, for callers that need to navigate
    /// nested config (e.g. `configfile.settings.bltouch.x_offset`).
    pub async fn get_value(&self, object: &str, field: &str) -> Value {
        self.inner.read().await.snapshot.get(object, field)
    }

    pub async fn has_object(&self, object: &str) -> bool {
        self.inner.read().await.snapshot.has_object(object)
    }

    /// Seeds the file-list cache from a `server.files.list` response.
    pub async fn set_files(&self, files: Vec<FileEntry>) {
        let mut inner = self.inner.write().await;
        inner.files = files;
        inner.files_populated = true;
    }

    pub async fn files_populated(&self) -> bool {
        self.inner.read().await.files_populated
    }

    pub async fn files(&self) -> Vec<FileEntry> {
        self.inner.read().await.files.clone()
    }

    /// Applies one `notify_filelist_changed` delta.
    pub async fn apply_file_change(&self, action: &str, path: &str, size: Option<u64>) {
        let mut inner = self.inner.write().await;
        match action {
            "delete_file" => inner.files.retain(|f| f.path != path),
            "create_file" | "modify_file" => {
                let size = size.unwrap_or(0);
                if let Some(existing) = inner.files.iter_mut().find(|f| f.path == path) {
                    existing.size = size;
                } else {
                    inner.files.push(FileEntry {
                        path: path.to_owned(),
                        size,
                    });
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn populate_then_merge_preserves_untouched_fields() {
        let mirror = StateMirror::new();
        mirror
            .populate_initial(&json!({"extruder": {"temperature": 200.0, "target": 210.0}}))
            .await;
        mirror.merge(&json!({"extruder": {"temperature": 201.0}})).await;
        assert_eq!(mirror.get_f64("extruder", "temperature").await, 201.0);
        assert_eq!(mirror.get_f64("extruder", "target").await, 210.0);
    }

    #[tokio::test]
    async fn file_cache_create_modify_delete() {
        let mirror = StateMirror::new();
        mirror.apply_file_change("create_file", "/cube.gcode", Some(1024)).await;
        assert_eq!(mirror.files().await, vec![FileEntry { path: "/cube.gcode".into(), size: 1024 }]);
        mirror.apply_file_change("modify_file", "/cube.gcode", Some(2048)).await;
        assert_eq!(mirror.files().await[0].size, 2048);
        mirror.apply_file_change("delete_file", "/cube.gcode", None).await;
        assert!(mirror.files().await.is_empty());
    }
}
