//! Bridge: wires the five components together and drives the process
//! until shutdown. Startup order mirrors §5's suspension points: connect,
//! run the initial synchronous query, subscribe, then spawn the serial
//! reader, notification demultiplexer, auto-report scheduler, and
//! reconnect supervisor as independent cooperating tasks. The supervisor
//! repeats the connect → query → subscribe sequence every time the RPC
//! client reports a dropped connection, so an outage is recovered from
//! rather than left permanently disconnected.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::autoreport::{self, AutoReportIntervals};
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::mirror::StateMirror;
use crate::rpc_client::{CallError, Notification, RpcClient};
use crate::serial::SerialLink;
use crate::translator::Translator;

const SUBSCRIBED_OBJECTS: &[&str] = &[
    "extruder",
    "heater_bed",
    "gcode_move",
    "toolhead",
    "mcu",
    "configfile",
    "fan",
    "virtual_sdcard",
    "print_stats",
    "probe",
    "filament_switch_sensor filament_sensor",
];

const INITIAL_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

fn subscription_objects() -> serde_json::Value {
    let mut objects = serde_json::Map::new();
    for name in SUBSCRIBED_OBJECTS {
        objects.insert((*name).to_owned(), serde_json::Value::Null);
    }
    serde_json::json!({ "objects": objects })
}

/// Owns every component and runs the bridge until the process is asked to
/// shut down.
pub struct Bridge {
    config: BridgeConfig,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Bridge { config }
    }

    pub async fn run(self) -> Result<(), BridgeError> {
        let serial = Arc::new(SerialLink::open(&self.config.serial_port, self.config.baud_rate)?);
        let mirror = StateMirror::new();
        let (notif_tx, mut notif_rx) = mpsc::unbounded_channel();
        let rpc = Arc::new(RpcClient::new(self.config.websocket_url.clone(), notif_tx));

        info!(url = %self.config.websocket_url, "connecting to backend");
        rpc.connect_with_backoff().await;

        let initial = tokio::time::timeout(
            INITIAL_QUERY_TIMEOUT,
            rpc.call("printer.objects.query", Some(subscription_objects())),
        )
        .await
        .map_err(|_| BridgeError::Rpc(CallError::Timeout))?
        .map_err(BridgeError::Rpc)?;
        mirror.populate_initial(&initial).await;

        rpc.call("printer.objects.subscribe", Some(subscription_objects()))
            .await
            .map_err(BridgeError::Rpc)?;

        let intervals = AutoReportIntervals::default();
        let translator = Arc::new(Translator::new(
            mirror.clone(),
            rpc.clone(),
            intervals.clone(),
            self.config.require_checksum,
        ));

        let reconnect_task = {
            let rpc = rpc.clone();
            let mirror = mirror.clone();
            tokio::spawn(async move {
                loop {
                    rpc.disconnected().await;
                    warn!("backend connection lost, reconnecting");
                    rpc.connect_with_backoff().await;
                    match tokio::time::timeout(
                        INITIAL_QUERY_TIMEOUT,
                        rpc.call("printer.objects.query", Some(subscription_objects())),
                    )
                    .await
                    {
                        Ok(Ok(status)) => {
                            mirror.populate_initial(&status).await;
                            if let Err(e) = rpc
                                .call("printer.objects.subscribe", Some(subscription_objects()))
                                .await
                            {
                                error!(error = %e, "failed to re-subscribe after reconnect");
                                continue;
                            }
                            info!("reconnected and re-subscribed to backend");
                        }
                        Ok(Err(e)) => error!(error = %e, "failed to re-query objects after reconnect"),
                        Err(_) => error!("timed out re-querying objects after reconnect"),
                    }
                }
            })
        };

        let notification_task = {
            let mirror = mirror.clone();
            let serial = serial.clone();
            tokio::spawn(async move {
                while let Some(notification) = notif_rx.recv().await {
                    match notification {
                        Notification::StatusUpdate(delta) => mirror.merge(&delta).await,
                        Notification::GcodeResponse(line) => {
                            let line = match line.strip_prefix("!!") {
                                Some(rest) => format!("Error:{rest}"),
                                None => line,
                            };
                            if let Err(e) = serial.write_reply(&line).await {
                                warn!(error = %e, "failed to forward backend gcode response");
                            }
                        }
                        Notification::FilelistChanged(payload) => {
                            if let Some(action) = payload.get("action").and_then(|v| v.as_str()) {
                                let item = payload.get("item");
                                let path = item
                                    .and_then(|i| i.get("path"))
                                    .and_then(|v| v.as_str())
                                    .unwrap_or_default();
                                let size = item.and_then(|i| i.get("size")).and_then(|v| v.as_u64());
                                mirror.apply_file_change(action, path, size).await;
                            }
                        }
                    }
                }
            })
        };

        let autoreport_task = tokio::spawn(autoreport::run(intervals, mirror.clone(), serial.clone()));

        let serial_loop = {
            let serial = serial.clone();
            let translator = translator.clone();
            tokio::spawn(async move {
                loop {
                    match serial.read_line().await {
                        Ok(line) => {
                            if let Some(reply) = translator.handle_line(&line).await {
                                if let Err(e) = serial.write_reply(&reply).await {
                                    warn!(error = %e, "failed to write reply to serial link");
                                }
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "serial link closed, shutting down");
                            break;
                        }
                    }
                }
            })
        };

        tokio::select! {
            _ = serial_loop => {}
            _ = autoreport_task => {}
            _ = notification_task => {}
            _ = reconnect_task => {}
            _ = tokio::signal::ctrl_c() => {
                info!("received shutdown signal");
            }
        }

        Ok(())
    }
}
