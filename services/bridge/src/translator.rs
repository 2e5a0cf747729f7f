//! Command Translator: the core dispatch state machine.
//!
//! Parses one serial line, classifies it into a bucket (local report,
//! passthrough, rewrite, state-setter, ack-only, silent-ignore, or
//! unknown) and produces the Marlin-shaped reply, if any. Commands are
//! processed to completion — including any RPC round trip — before the
//! next line is read, which is what gives the bridge its strict FIFO
//! single-in-flight ordering: there is no separate queue, just one loop
//! that never starts command N+1 until command N has replied.

use gcode_proto::{is_emergency_stop, parse_line, Command, Kind, ParamValue, ParseError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::mirror::StateMirror;
use crate::rpc_client::RpcSender;
use crate::templates;
use crate::autoreport::AutoReportIntervals;
use crate::mirror::FileEntry;

use std::sync::Arc;

pub struct Translator<R> {
    mirror: StateMirror,
    rpc: Arc<R>,
    intervals: AutoReportIntervals,
    selected_file: Mutex<Option<String>>,
    require_checksum: bool,
    machine_type: String,
}

impl<R: RpcSender> Translator<R> {
    pub fn new(
        mirror: StateMirror,
        rpc: Arc<R>,
        intervals: AutoReportIntervals,
        require_checksum: bool,
    ) -> Self {
        Translator {
            mirror,
            rpc,
            intervals,
            selected_file: Mutex::new(None),
            require_checksum,
            machine_type: "Klipper".to_owned(),
        }
    }

    /// Parses and dispatches one line, returning the reply text if the
    /// bucket it falls into produces one. The caller (`bridge.rs`, or a
    /// test harness) is responsible for writing the reply wherever it goes.
    pub async fn handle_line(&self, raw: &str) -> Option<String> {
        if is_emergency_stop(raw) {
            let _ = self.rpc.gcode_script("M112".to_owned()).await;
            return Some("Error:Emergency Stop".to_owned());
        }

        let cmd = match parse_line(raw, self.require_checksum) {
            Ok(cmd) => cmd,
            Err(ParseError::ChecksumMismatch { .. })
            | Err(ParseError::ChecksumMissing)
            | Err(ParseError::MalformedChecksum) => {
                return Some("Error:Invalid Checksum".to_owned());
            }
            Err(e) => {
                debug!(error = %e, line = raw, "dropping unparseable line");
                return None;
            }
        };

        self.dispatch(&cmd).await
    }

    async fn dispatch(&self, cmd: &Command) -> Option<String> {
        match (cmd.kind, cmd.number) {
            (Kind::M, 105) => Some(templates::temperature_reply(&self.mirror).await),
            (Kind::M, 114) => Some(templates::position_reply(&self.mirror).await),
            (Kind::M, 115) => {
                Some(templates::firmware_info_reply(&self.mirror, &self.machine_type).await)
            }
            (Kind::M, 211) => Some(templates::soft_endstops_reply(&self.mirror).await),
            (Kind::M, 220) => Some(match cmd.get_int('S') {
                Some(s) => self.run_single(format!("M220 S{s}")).await,
                None => templates::feed_rate_reply(&self.mirror).await,
            }),
            (Kind::M, 221) => Some(match cmd.get_int('S') {
                Some(s) => self.run_single(format!("M221 S{s}")).await,
                None => templates::flow_rate_reply(&self.mirror).await,
            }),
            (Kind::M, 503) => Some(templates::report_settings_reply(&self.mirror).await),
            (Kind::M, 20) => Some(self.handle_m20().await),
            (Kind::M, 23) => Some(self.handle_m23(cmd).await),
            (Kind::M, 24) => Some(self.handle_m24().await),
            (Kind::M, 25) => Some(self.handle_m25().await),
            (Kind::M, 524) => Some(self.run_single_call("printer.print.cancel").await),
            (Kind::M, 27) => {
                if let Some(n) = cmd.get_int('S') {
                    self.intervals.set_print_status(n.max(0) as u32);
                }
                Some("ok".to_owned())
            }
            (Kind::M, 154) => {
                if let Some(n) = cmd.get_int('S') {
                    self.intervals.set_position(n.max(0) as u32);
                }
                Some("ok".to_owned())
            }
            (Kind::M, 155) => {
                if let Some(n) = cmd.get_int('S') {
                    self.intervals.set_temperature(n.max(0) as u32);
                }
                Some("ok".to_owned())
            }
            (Kind::M, 150) => Some(self.handle_m150(cmd).await),
            (Kind::M, 201) => Some(self.handle_m201(cmd).await),
            (Kind::M, 203) => Some(self.handle_m203(cmd).await),
            (Kind::M, 206) => Some(self.handle_m206(cmd).await),
            (Kind::M, 280) => Some(self.handle_m280(cmd).await),
            (Kind::M, 290) => Some(self.handle_m290(cmd).await),
            (Kind::M, 851) => Some(templates::probe_offset_reply(&self.mirror).await),
            (Kind::M, 500) => Some(self.handle_m500().await),
            (Kind::G, 29) => Some(self.handle_g29(cmd).await),
            (Kind::M, 701) => Some(self.filament_macro(cmd, 1.0).await),
            (Kind::M, 702) => Some(self.filament_macro(cmd, -1.0).await),
            (Kind::M, 118) => Some(self.handle_m118(cmd).await),
            (Kind::M, 108) => None,
            (Kind::M, 420) => {
                if cmd.has('S') {
                    Some(self.run_single(render_command(cmd)).await)
                } else {
                    Some("ok".to_owned())
                }
            }
            _ if is_ack_only(cmd) => Some("ok".to_owned()),
            _ if is_passthrough(cmd) => Some(self.run_single(render_command(cmd)).await),
            _ => {
                debug!(kind = ?cmd.kind, number = cmd.number, "unknown command, dropping");
                None
            }
        }
    }

    async fn run_single(&self, script: String) -> String {
        match self.rpc.gcode_script(script).await {
            Ok(_) => "ok".to_owned(),
            Err(e) => format!("Error:{e}"),
        }
    }

    async fn run_single_call(&self, method: &str) -> String {
        match self.rpc.call(method, None).await {
            Ok(_) => "ok".to_owned(),
            Err(e) => format!("Error:{e}"),
        }
    }

    async fn handle_m20(&self) -> String {
        if !self.mirror.files_populated().await {
            match self
                .rpc
                .call("server.files.list", Some(serde_json::json!({"path": ""})))
                .await
            {
                Ok(value) => self.mirror.set_files(parse_file_list(&value)).await,
                Err(e) => return format!("Error:{e}"),
            }
        }
        templates::file_list_reply(&self.mirror.files().await)
    }

    async fn handle_m23(&self, cmd: &Command) -> String {
        let raw_name = cmd.tail.clone().unwrap_or_default();
        let normalized = normalize_filename(&raw_name);
        *self.selected_file.lock().await = Some(normalized.clone());
        self.run_single(format!("M23 {normalized}")).await
    }

    async fn handle_m24(&self) -> String {
        let state = self.mirror.get_str("print_stats", "state").await.unwrap_or_default();
        match state.as_str() {
            "paused" => self.run_single_call("printer.print.resume").await,
            "standby" | "cancelled" | "complete" => {
                if let Err(e) = self.rpc.gcode_script("CLEAR_PAUSE".to_owned()).await {
                    return format!("Error:{e}");
                }
                let filename = self.selected_file.lock().await.clone().unwrap_or_default();
                match self
                    .rpc
                    .call("printer.print.start", Some(serde_json::json!({"filename": filename})))
                    .await
                {
                    Ok(_) => "ok".to_owned(),
                    Err(e) => format!("Error:{e}"),
                }
            }
            _ => "echo:already printing\nok".to_owned(),
        }
    }

    async fn handle_m25(&self) -> String {
        let state = self.mirror.get_str("print_stats", "state").await.unwrap_or_default();
        if state == "printing" {
            self.run_single_call("printer.print.pause").await
        } else {
            "ok".to_owned()
        }
    }

    async fn handle_m150(&self, cmd: &Command) -> String {
        let p = cmd.get_float('P').unwrap_or(255.0);
        let channel = |letter: char| -> f64 {
            let v = cmd.get_float(letter).unwrap_or(0.0);
            (v / 255.0) * (p / 255.0)
        };
        let script = format!(
            "SET_LED LED=statusled RED={:.3} GREEN={:.3} BLUE={:.3} WHITE={:.3} TRANSMIT=1 SYNC=1",
            channel('R'),
            channel('U'),
            channel('B'),
            channel('W'),
        );
        self.run_single(script).await
    }

    async fn handle_m201(&self, cmd: &Command) -> String {
        let Some(a) = cmd.get_float('X').or_else(|| cmd.get_float('Y')) else {
            return "ok".to_owned();
        };
        self.run_single(format!("SET_VELOCITY_LIMIT ACCEL={a} ACCEL_TO_DECEL={:.3}", a / 2.0))
            .await
    }

    async fn handle_m203(&self, cmd: &Command) -> String {
        let Some(v) = cmd.get_float('X').or_else(|| cmd.get_float('Y')) else {
            return "ok".to_owned();
        };
        self.run_single(format!("SET_VELOCITY_LIMIT VELOCITY={v}")).await
    }

    async fn handle_m206(&self, cmd: &Command) -> String {
        let mut parts = vec!["SET_GCODE_OFFSET".to_owned()];
        for letter in ['X', 'Y', 'Z', 'E'] {
            if let Some(v) = cmd.get_float(letter) {
                parts.push(format!("{letter}={v}"));
            }
        }
        if parts.len() == 1 {
            return "ok".to_owned();
        }
        self.run_single(parts.join(" ")).await
    }

    async fn handle_m280(&self, cmd: &Command) -> String {
        let Some(n) = cmd.get_int('S') else {
            return "ok".to_owned();
        };
        let settings = self.mirror.get_value("configfile", "settings").await;
        let has_bltouch = settings.get("bltouch").is_some();
        if has_bltouch {
            match n {
                10 => self.run_single("BLTOUCH_DEBUG COMMAND=pin_down".to_owned()).await,
                90 => self.run_single("BLTOUCH_DEBUG COMMAND=pin_up".to_owned()).await,
                160 => self.run_single("BLTOUCH_DEBUG COMMAND=reset".to_owned()).await,
                120 => {
                    if let Err(e) = self.rpc.gcode_script("QUERY_PROBE".to_owned()).await {
                        return format!("Error:{e}");
                    }
                    templates::probe_test_reply(&self.mirror).await
                }
                _ => "ok".to_owned(),
            }
        } else {
            match n {
                10 => self.run_single("SET_PIN PIN=_probe_enable VALUE=1".to_owned()).await,
                90 | 160 => self.run_single("SET_PIN PIN=_probe_enable VALUE=0".to_owned()).await,
                _ => "ok".to_owned(),
            }
        }
    }

    async fn handle_m290(&self, cmd: &Command) -> String {
        let Some(v) = cmd.get_float('Z') else {
            return "ok".to_owned();
        };
        self.run_single(format!("SET_GCODE_OFFSET Z_ADJUST={v}")).await
    }

    async fn handle_m500(&self) -> String {
        let state = self.mirror.get_str("print_stats", "state").await.unwrap_or_default();
        if state == "printing" || state == "paused" {
            return "Error:Not saved - Printing".to_owned();
        }
        for script in ["Z_OFFSET_APPLY_PROBE", "SAVE_CONFIG"] {
            if let Err(e) = self.rpc.gcode_script(script.to_owned()).await {
                return format!("Error:{e}");
            }
        }
        "ok".to_owned()
    }

    async fn handle_g29(&self, cmd: &Command) -> String {
        if let Err(e) = self.rpc.gcode_script("BED_MESH_CLEAR".to_owned()).await {
            return format!("Error:{e}");
        }
        let args = render_params_tail(cmd);
        let script = if args.is_empty() {
            "BED_MESH_CALIBRATE".to_owned()
        } else {
            format!("BED_MESH_CALIBRATE {args}")
        };
        self.run_single(script).await
    }

    /// `G91`, `G92 E<extruder>`, `G1 Z<z> E<±length> F180`, `G92 E0`.
    async fn filament_macro(&self, cmd: &Command, direction: f64) -> String {
        let length = cmd.get_float('L').unwrap_or(25.0);
        let extruder = cmd.get_int('T').unwrap_or(0);
        let z = cmd.get_float('Z').unwrap_or(0.0);
        let signed_length = length * direction;
        let scripts = [
            "G91".to_owned(),
            format!("G92 E{extruder}"),
            format!("G1 Z{z} E{signed_length} F180"),
            "G92 E0".to_owned(),
        ];
        for script in scripts {
            if let Err(e) = self.rpc.gcode_script(script).await {
                return format!("Error:{e}");
            }
        }
        "ok".to_owned()
    }

    async fn handle_m118(&self, cmd: &Command) -> String {
        let is_action_cancel = cmd
            .tail
            .as_deref()
            .is_some_and(|t| t.to_ascii_lowercase().contains("action:cancel"));
        if cmd.get_int('P') == Some(0) && cmd.has('A') && is_action_cancel {
            return "//action:cancel\nok".to_owned();
        }
        self.run_single(render_command(cmd)).await
    }
}

fn is_ack_only(cmd: &Command) -> bool {
    matches!((cmd.kind, cmd.number), (Kind::M, 22) | (Kind::M, 92) | (Kind::T, 0))
}

fn is_passthrough(cmd: &Command) -> bool {
    matches!(
        (cmd.kind, cmd.number),
        (Kind::M, 33)
            | (Kind::M, 21)
            | (Kind::M, 82)
            | (Kind::M, 84)
            | (Kind::M, 106)
            | (Kind::M, 104)
            | (Kind::M, 140)
            | (Kind::M, 48)
            | (Kind::G, 0)
            | (Kind::G, 1)
            | (Kind::G, 28)
            | (Kind::G, 90)
            | (Kind::G, 91)
    )
}

fn render_command(cmd: &Command) -> String {
    let mut s = format!("{}{}", cmd.kind, cmd.number);
    let tail = render_params_tail(cmd);
    if !tail.is_empty() {
        s.push(' ');
        s.push_str(&tail);
    }
    s
}

fn render_params_tail(cmd: &Command) -> String {
    let mut parts = Vec::new();
    for (letter, value) in &cmd.params {
        match value {
            ParamValue::Int(i) => parts.push(format!("{letter}{i}")),
            ParamValue::Float(f) => parts.push(format!("{letter}{f}")),
            ParamValue::Text(t) if t.is_empty() => parts.push(letter.to_string()),
            ParamValue::Text(t) => parts.push(format!("{letter}{t}")),
        }
    }
    if let Some(tail) = &cmd.tail {
        parts.push(tail.clone());
    }
    parts.join(" ")
}

/// Strips quoting/whitespace, an `0:/` device prefix, and a `gcodes/` SD
/// root, then ensures a leading `/`.
pub fn normalize_filename(raw: &str) -> String {
    let mut s = raw.trim().trim_matches('"').to_owned();
    if let Some(rest) = s.strip_prefix("0:/") {
        s = rest.to_owned();
    }
    if let Some(rest) = s.strip_prefix("/gcodes/") {
        s = rest.to_owned();
    } else if let Some(rest) = s.strip_prefix("gcodes/") {
        s = rest.to_owned();
    }
    if !s.starts_with('/') {
        s = format!("/{s}");
    }
    s
}

fn parse_file_list(value: &serde_json::Value) -> Vec<FileEntry> {
    let array = value
        .as_array()
        .cloned()
        .or_else(|| value.get("files").and_then(serde_json::Value::as_array).cloned())
        .unwrap_or_default();
    array
        .iter()
        .filter_map(|item| {
            let path = item.get("path").and_then(serde_json::Value::as_str)?.to_owned();
            let size = item.get("size").and_then(serde_json::Value::as_u64).unwrap_or(0);
            Some(FileEntry { path, size })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_device_and_sd_root_prefixes() {
        assert_eq!(normalize_filename("0:/gcodes/cube.gcode"), "/cube.gcode");
        assert_eq!(normalize_filename("\"0:/gcodes/cube.gcode\""), "/cube.gcode");
        assert_eq!(normalize_filename("gcodes/bench.gcode"), "/bench.gcode");
        assert_eq!(normalize_filename("already/rooted.gcode"), "/already/rooted.gcode");
    }

    #[test]
    fn is_passthrough_covers_standard_motion_and_sd_commands() {
        let g28 = Command {
            kind: Kind::G,
            number: 28,
            line_number: None,
            params: Default::default(),
            tail: None,
        };
        assert!(is_passthrough(&g28));
    }

    #[test]
    fn is_ack_only_covers_t0_and_m22_m92() {
        let t0 = Command {
            kind: Kind::T,
            number: 0,
            line_number: None,
            params: Default::default(),
            tail: None,
        };
        assert!(is_ack_only(&t0));
    }

    #[test]
    fn render_command_reconstructs_params_and_tail() {
        let cmd = parse_line("G1 X12.5 Y-3 F180", false).unwrap();
        assert_eq!(render_command(&cmd), "G1 F180 X12.5 Y-3");
    }

    #[test]
    fn parse_file_list_accepts_bare_array() {
        let value = serde_json::json!([{"path": "cube.gcode", "size": 1024}]);
        let files = parse_file_list(&value);
        assert_eq!(files, vec![FileEntry { path: "cube.gcode".into(), size: 1024 }]);
    }

    #[test]
    fn parse_file_list_accepts_files_key() {
        let value = serde_json::json!({"files": [{"path": "cube.gcode", "size": 1024}]});
        let files = parse_file_list(&value);
        assert_eq!(files.len(), 1);
    }
}
