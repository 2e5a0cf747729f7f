//! The printer-object snapshot: a live mirror of backend state, built from
//! the initial `printer.objects.query` and kept current by merging
//! `notify_status_update` deltas. Fields are merge-only — a field once
//! observed is never removed, only overwritten.

use std::collections::BTreeMap;

use serde_json::Value;

/// A flat `object name -> field name -> value` mirror of Klipper printer
/// objects. Reading a field that has never been observed returns
/// `Value::Null` rather than panicking.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    objects: BTreeMap<String, BTreeMap<String, Value>>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges one object's fields in place. Fields not present in `fields`
    /// are left untouched; fields present overwrite any prior value.
    pub fn merge_object(&mut self, object: &str, fields: &serde_json::Map<String, Value>) {
        let entry = self.objects.entry(object.to_owned()).or_default();
        for (k, v) in fields {
            entry.insert(k.clone(), v.clone());
        }
    }

    /// Merges a full `{object: {field: value, ...}, ...}` delta, as
    /// delivered by `notify_status_update` or an initial query response.
    pub fn merge_delta(&mut self, delta: &Value) {
        let Some(map) = delta.as_object() else {
            return;
        };
        for (object, fields) in map {
            if let Some(fields) = fields.as_object() {
                self.merge_object(object, fields);
            }
        }
    }

    /// Reads a single field, defaulting to `Value::Null` when the object or
    /// field has not yet been observed.
    pub fn get(&self, object: &str, field: &str) -> Value {
        self.objects
            .get(object)
            .and_then(|f| f.get(field))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Reads a numeric field, defaulting to 0.0 when absent or non-numeric.
    pub fn get_f64(&self, object: &str, field: &str) -> f64 {
        self.get(object, field).as_f64().unwrap_or(0.0)
    }

    pub fn get_str(&self, object: &str, field: &str) -> Option<String> {
        self.get(object, field).as_str().map(str::to_owned)
    }

    pub fn get_bool(&self, object: &str, field: &str) -> bool {
        self.get(object, field).as_bool().unwrap_or(false)
    }

    /// Reads a fixed-length numeric tuple field (e.g. `gcode_move.position`).
    pub fn get_array(&self, object: &str, field: &str) -> Vec<f64> {
        self.get(object, field)
            .as_array()
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default()
    }

    pub fn has_object(&self, object: &str) -> bool {
        self.objects.contains_key(object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_populates_new_object() {
        let mut s = Snapshot::new();
        s.merge_delta(&json!({"extruder": {"temperature": 200.0, "target": 210.0}}));
        assert_eq!(s.get_f64("extruder", "temperature"), 200.0);
        assert_eq!(s.get_f64("extruder", "target"), 210.0);
    }

    #[test]
    fn merge_never_removes_untouched_fields() {
        let mut s = Snapshot::new();
        s.merge_delta(&json!({"extruder": {"temperature": 200.0, "target": 210.0}}));
        s.merge_delta(&json!({"extruder": {"temperature": 201.5}}));
        assert_eq!(s.get_f64("extruder", "temperature"), 201.5);
        assert_eq!(s.get_f64("extruder", "target"), 210.0);
    }

    #[test]
    fn unobserved_field_defaults() {
        let s = Snapshot::new();
        assert_eq!(s.get("extruder", "temperature"), Value::Null);
        assert_eq!(s.get_f64("extruder", "temperature"), 0.0);
        assert!(!s.has_object("extruder"));
    }

    #[test]
    fn array_field_round_trips() {
        let mut s = Snapshot::new();
        s.merge_delta(&json!({"gcode_move": {"position": [12.5, 30.0, 5.25, 1.4]}}));
        assert_eq!(s.get_array("gcode_move", "position"), vec![12.5, 30.0, 5.25, 1.4]);
    }

    #[test]
    fn updates_are_independent_across_objects() {
        let mut s = Snapshot::new();
        s.merge_delta(&json!({"extruder": {"temperature": 200.0}}));
        s.merge_delta(&json!({"heater_bed": {"temperature": 60.0}}));
        assert_eq!(s.get_f64("extruder", "temperature"), 200.0);
        assert_eq!(s.get_f64("heater_bed", "temperature"), 60.0);
    }
}
