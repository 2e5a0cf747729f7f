use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use bridge::autoreport::AutoReportIntervals;
use bridge::mirror::StateMirror;
use bridge::rpc_client::{CallError, RpcSender};
use bridge::translator::Translator;
use serde_json::{json, Value};

/// Records every call made against it, with a handful of canned responses
/// for the methods that read one back (`server.files.list` and friends).
#[derive(Default)]
struct FakeRpc {
    calls: StdMutex<Vec<(String, Option<Value>)>>,
    responses: StdMutex<HashMap<String, Value>>,
}

impl FakeRpc {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with_response(self: Arc<Self>, method: &str, value: Value) -> Arc<Self> {
        self.responses.lock().unwrap().insert(method.to_owned(), value);
        self
    }

    fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    /// The `script` field of every `printer.gcode.script` call made, in order.
    fn scripts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(m, _)| m == "printer.gcode.script")
            .map(|(_, p)| p.unwrap().get("script").unwrap().as_str().unwrap().to_owned())
            .collect()
    }
}

impl RpcSender for FakeRpc {
    async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, CallError> {
        self.calls.lock().unwrap().push((method.to_owned(), params));
        Ok(self.responses.lock().unwrap().get(method).cloned().unwrap_or(Value::Null))
    }
}

fn translator(rpc: Arc<FakeRpc>, mirror: StateMirror) -> Translator<FakeRpc> {
    Translator::new(mirror, rpc, AutoReportIntervals::default(), false)
}

/// §8 scenario: `M105` renders the live extruder/bed temperatures.
#[tokio::test]
async fn scenario_m105_temperature_report() {
    let mirror = StateMirror::new();
    mirror
        .populate_initial(&json!({
            "extruder": {"temperature": 205.12, "target": 210.0},
            "heater_bed": {"temperature": 60.03, "target": 60.0}
        }))
        .await;
    let t = translator(FakeRpc::new(), mirror);

    let reply = t.handle_line("M105").await;

    assert_eq!(reply.as_deref(), Some("T:205.12 /210.00 B:60.03 /60.00 @:0 B@:0\nok"));
}

/// §8 scenario: `M114` renders the live toolhead position.
#[tokio::test]
async fn scenario_m114_position_report() {
    let mirror = StateMirror::new();
    mirror
        .populate_initial(&json!({"gcode_move": {"position": [12.5, 30.0, 5.25, 1.4]}}))
        .await;
    let t = translator(FakeRpc::new(), mirror);

    let reply = t.handle_line("M114").await;

    assert_eq!(reply.as_deref(), Some("X:12.50 Y:30.00 Z:5.25 E:1.40\nok"));
}

/// §8 scenario: `M150` is translated to a single `SET_LED` gcode script.
#[tokio::test]
async fn scenario_m150_led_translates_to_set_led_script() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("M150 R255 U0 B0 P128").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(
        rpc.scripts(),
        vec!["SET_LED LED=statusled RED=0.502 GREEN=0.000 BLUE=0.000 WHITE=0.000 TRANSMIT=1 SYNC=1"]
    );
}

/// §8 scenario: `M23` normalizes the SD path and forwards the bare filename.
#[tokio::test]
async fn scenario_m23_select_file_normalizes_and_forwards() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("M23 0:/gcodes/cube.gcode").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(rpc.scripts(), vec!["M23 /cube.gcode"]);
}

/// §8 scenario: `M112` issues the backend's emergency-stop script and never
/// falls through to the normal dispatch table.
#[tokio::test]
async fn scenario_m112_emergency_stop() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("M112").await;

    assert_eq!(reply.as_deref(), Some("Error:Emergency Stop"));
    assert_eq!(rpc.scripts(), vec!["M112"]);
}

/// §8 scenario: `G29 P1` clears the mesh before calibrating, in that order.
#[tokio::test]
async fn scenario_g29_bed_mesh_clear_then_calibrate() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("G29 P1").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(rpc.scripts(), vec!["BED_MESH_CLEAR", "BED_MESH_CALIBRATE P1"]);
}

/// `M118 P0 A1 action:cancel` replies directly instead of forwarding the
/// garbled script a naive re-render would produce.
#[tokio::test]
async fn m118_action_cancel_short_circuits_dispatch() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("M118 P0 A1 action:cancel").await;

    assert_eq!(reply.as_deref(), Some("//action:cancel\nok"));
    assert!(rpc.calls().is_empty());
}

/// `M701`/`M702` run the four-script filament load/unload macro in order.
#[tokio::test]
async fn filament_load_macro_runs_scripts_in_order() {
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), StateMirror::new());

    let reply = t.handle_line("M701 T0 Z10 L25").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(rpc.scripts(), vec!["G91", "G92 E0", "G1 Z10 E25 F180", "G92 E0"]);
}

/// `M24` while paused resumes the print instead of starting a new one.
#[tokio::test]
async fn m24_resumes_when_paused() {
    let mirror = StateMirror::new();
    mirror.populate_initial(&json!({"print_stats": {"state": "paused"}})).await;
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), mirror);

    let reply = t.handle_line("M24").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(rpc.calls()[0].0, "printer.print.resume");
}

/// `M500` refuses to save while a print is active.
#[tokio::test]
async fn m500_refuses_to_save_while_printing() {
    let mirror = StateMirror::new();
    mirror.populate_initial(&json!({"print_stats": {"state": "printing"}})).await;
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), mirror);

    let reply = t.handle_line("M500").await;

    assert_eq!(reply.as_deref(), Some("Error:Not saved - Printing"));
    assert!(rpc.calls().is_empty());
}

/// `M280` against a BLTouch-equipped printer deploys the pin via the BLTouch
/// debug commands rather than the generic `SET_PIN` path.
#[tokio::test]
async fn m280_uses_bltouch_debug_when_bltouch_present() {
    let mirror = StateMirror::new();
    mirror
        .populate_initial(&json!({"configfile": {"settings": {"bltouch": {"x_offset": -44.0}}}}))
        .await;
    let rpc = FakeRpc::new();
    let t = translator(rpc.clone(), mirror);

    let reply = t.handle_line("M280 S10").await;

    assert_eq!(reply.as_deref(), Some("ok"));
    assert_eq!(rpc.scripts(), vec!["BLTOUCH_DEBUG COMMAND=pin_down"]);
}

/// `M20` queries the file list once and caches it for the next call.
#[tokio::test]
async fn m20_lists_files_and_caches_the_result() {
    let rpc =
        FakeRpc::new().with_response("server.files.list", json!([{"path": "cube.gcode", "size": 1024}]));
    let t = translator(rpc.clone(), StateMirror::new());

    let first = t.handle_line("M20").await.unwrap();
    assert!(first.contains("cube.gcode 1024"));

    let calls_after_first = rpc.calls().len();
    let second = t.handle_line("M20").await.unwrap();
    assert!(second.contains("cube.gcode 1024"));
    assert_eq!(rpc.calls().len(), calls_after_first, "second M20 should hit the cache, not re-query");
}

/// Unknown commands are silently dropped, producing no reply at all.
#[tokio::test]
async fn unknown_command_produces_no_reply() {
    let t = translator(FakeRpc::new(), StateMirror::new());

    let reply = t.handle_line("M9999").await;

    assert_eq!(reply, None);
}
