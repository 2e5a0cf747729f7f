//! Marlin-shaped reply renderers.
//!
//! Every function here is a plain formatted string built from the current
//! [`StateMirror`] contents — there is no general template engine, since
//! the reply shapes are fixed (§6 of the wire contract this bridge honors).

use serde_json::Value;

use crate::mirror::{FileEntry, StateMirror};

pub async fn temperature_reply(mirror: &StateMirror) -> String {
    let (ext, ext_t, bed, bed_t) = temperatures(mirror).await;
    format!("T:{ext:.2} /{ext_t:.2} B:{bed:.2} /{bed_t:.2} @:0 B@:0\nok")
}

/// The auto-report temperature shape is a reply-position sibling of
/// [`temperature_reply`], not a variant of it: `ok` leads instead of
/// trailing (see DESIGN.md's open-question resolution).
pub async fn temperature_autoreport(mirror: &StateMirror) -> String {
    let (ext, ext_t, bed, bed_t) = temperatures(mirror).await;
    format!("ok T:{ext:.2} /{ext_t:.2} B:{bed:.2} /{bed_t:.2} @:0 B@:0")
}

async fn temperatures(mirror: &StateMirror) -> (f64, f64, f64, f64) {
    (
        mirror.get_f64("extruder", "temperature").await,
        mirror.get_f64("extruder", "target").await,
        mirror.get_f64("heater_bed", "temperature").await,
        mirror.get_f64("heater_bed", "target").await,
    )
}

pub async fn position_reply(mirror: &StateMirror) -> String {
    let pos = mirror.get_array("gcode_move", "position").await;
    format!(
        "X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}\nok",
        axis(&pos, 0),
        axis(&pos, 1),
        axis(&pos, 2),
        axis(&pos, 3),
    )
}

/// Auto-report position shape leads with `ok` like the temperature sibling.
pub async fn position_autoreport(mirror: &StateMirror) -> String {
    let pos = mirror.get_array("gcode_move", "position").await;
    format!(
        "ok X:{:.2} Y:{:.2} Z:{:.2} E:{:.2}",
        axis(&pos, 0),
        axis(&pos, 1),
        axis(&pos, 2),
        axis(&pos, 3),
    )
}

fn axis(pos: &[f64], index: usize) -> f64 {
    pos.get(index).copied().unwrap_or(0.0)
}

pub async fn feed_rate_reply(mirror: &StateMirror) -> String {
    let factor = mirror.get_f64("gcode_move", "speed_factor").await;
    format!("FR:{}%\nok", (factor * 100.0).round() as i64)
}

pub async fn flow_rate_reply(mirror: &StateMirror) -> String {
    let factor = mirror.get_f64("gcode_move", "extrude_factor").await;
    format!("E0 Flow:{}%\nok", (factor * 100.0).round() as i64)
}

pub async fn soft_endstops_reply(mirror: &StateMirror) -> String {
    let enabled = mirror
        .get_bool("filament_switch_sensor filament_sensor", "enabled")
        .await;
    let state = if enabled { "On" } else { "Off" };
    format!("Soft endstops: {state}\nok")
}

pub async fn print_status_autoreport(mirror: &StateMirror) -> String {
    let state = mirror
        .get_str("print_stats", "state")
        .await
        .unwrap_or_else(|| "standby".to_owned());
    let file_position = mirror.get_f64("virtual_sdcard", "file_position").await;
    let file_size = mirror.get_f64("virtual_sdcard", "file_size").await;
    format!("ok SD printing byte {file_position}/{file_size} state:{state}")
}

/// Firmware info banner followed by the fixed `Cap:` capability block.
pub async fn firmware_info_reply(mirror: &StateMirror, machine_type: &str) -> String {
    let version = mirror
        .get_str("mcu", "mcu_version")
        .await
        .unwrap_or_else(|| "unknown".to_owned());
    let mut lines = vec![format!(
        "FIRMWARE_NAME:Klipper {version} SOURCE_CODE_URL:https://github.com/Klipper3d/klipper PROTOCOL_VERSION:1.0 MACHINE_TYPE:{machine_type}"
    )];
    for cap in CAPABILITIES {
        lines.push(format!("Cap:{cap}"));
    }
    lines.push("ok".to_owned());
    lines.join("\n")
}

const CAPABILITIES: &[&str] = &[
    "EEPROM:1",
    "AUTOREPORT_TEMP:1",
    "AUTOREPORT_POS:1",
    "AUTOLEVEL:1",
    "Z_PROBE:1",
    "LEVELING_DATA:0",
    "SOFTWARE_POWER:0",
    "TOGGLE_LIGHTS:0",
    "CASE_LIGHT_BRIGHTNESS:0",
    "EMERGENCY_PARSER:1",
    "PROMPT_SUPPORT:0",
    "SDCARD:1",
    "MULTI_VOLUME:0",
    "AUTOREPORT_SD_STATUS:1",
    "LONG_FILENAME:1",
    "BABYSTEPPING:1",
    "BUILD_PERCENT:1",
    "CHAMBER_TEMPERATURE:0",
];

fn bltouch_setting(settings: &Value, field: &str) -> f64 {
    settings
        .get("bltouch")
        .and_then(|b| b.get(field))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// `M851 X<bltouch.x_offset − gcode_move.homing_origin[0]> Y<…> Z<…>`.
pub async fn probe_offset_reply(mirror: &StateMirror) -> String {
    let settings = mirror.get_value("configfile", "settings").await;
    let origin = mirror.get_array("gcode_move", "homing_origin").await;
    let x = bltouch_setting(&settings, "x_offset") - axis(&origin, 0);
    let y = bltouch_setting(&settings, "y_offset") - axis(&origin, 1);
    let z = bltouch_setting(&settings, "z_offset") - axis(&origin, 2);
    format!("M851 X{x:.2} Y{y:.2} Z{z:.2}\nok")
}

fn nested_f64(settings: &Value, object: &str, field: &str) -> f64 {
    settings
        .get(object)
        .and_then(|o| o.get(field))
        .and_then(Value::as_f64)
        .unwrap_or(0.0)
}

/// `M503`: a multi-line settings dump read from backend config + state.
///
/// Field sourcing follows the printer-object paths Klipper actually exposes
/// these under (`configfile.settings.printer.*`, `...extruder.*`,
/// `...bed_mesh.fade_end`) rather than reusing the X/Y toolhead limits for
/// every column.
pub async fn report_settings_reply(mirror: &StateMirror) -> String {
    let settings = mirror.get_value("configfile", "settings").await;
    let xy_velocity = mirror.get_f64("toolhead", "max_velocity").await;
    let xy_accel = mirror.get_f64("toolhead", "max_accel").await;
    let z_velocity = nested_f64(&settings, "printer", "max_z_velocity");
    let z_accel = nested_f64(&settings, "printer", "max_z_accel");
    let e_velocity = nested_f64(&settings, "extruder", "max_extrude_only_velocity");
    let e_accel = nested_f64(&settings, "extruder", "max_extrude_only_accel");
    let origin = mirror.get_array("gcode_move", "homing_origin").await;
    let probe_offset = probe_offset_axes(&settings, &origin);
    let fade_end = nested_f64(&settings, "bed_mesh", "fade_end");
    let fan_speed = mirror.get_f64("fan", "speed").await;

    [
        format!("M203 X{xy_velocity:.2} Y{xy_velocity:.2} Z{z_velocity:.2} E{e_velocity:.2}"),
        format!("M201 X{xy_accel:.2} Y{xy_accel:.2} Z{z_accel:.2} E{e_accel:.2}"),
        format!(
            "M206 X{:.2} Y{:.2} Z{:.2}",
            axis(&origin, 0),
            axis(&origin, 1),
            axis(&origin, 2)
        ),
        format!(
            "M851 X{:.2} Y{:.2} Z{:.2}",
            probe_offset.0, probe_offset.1, probe_offset.2
        ),
        format!("M420 S1 Z{fade_end:.2}"),
        format!("M106 S{}", (fan_speed * 255.0).round() as i64),
        "ok".to_owned(),
    ]
    .join("\n")
}

fn probe_offset_axes(settings: &Value, origin: &[f64]) -> (f64, f64, f64) {
    (
        bltouch_setting(settings, "x_offset") - axis(origin, 0),
        bltouch_setting(settings, "y_offset") - axis(origin, 1),
        bltouch_setting(settings, "z_offset") - axis(origin, 2),
    )
}

pub fn file_list_reply(files: &[FileEntry]) -> String {
    let mut lines = vec!["Begin file list".to_owned()];
    for f in files {
        lines.push(format!("{} {}", f.path, f.size));
    }
    lines.push("End file list".to_owned());
    lines.push("ok".to_owned());
    lines.join("\n")
}

/// `M280 S120` probe-test query reply.
pub async fn probe_test_reply(mirror: &StateMirror) -> String {
    let last_query = mirror.get_bool("probe", "last_query").await;
    let last_z_result = mirror.get_f64("probe", "last_z_result").await;
    format!("TestResult: query={last_query} z={last_z_result:.2}\nok")
}
