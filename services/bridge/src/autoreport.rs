//! Auto-Report Scheduler: three independent timers (temperature, position,
//! print-status) driven by a single ~1s wake-up loop. Writes share the
//! Serial Link's writer mutex with the Translator, so an auto-report is
//! never interleaved mid-reply.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::mirror::StateMirror;
use crate::serial::SerialLink;
use crate::templates;

const TICK: Duration = Duration::from_secs(1);

/// Shared, cloneable intervals. The Translator's State-setter commands
/// (M154/M155/M27) write these; the scheduler reads them each tick. Zero
/// disables the channel without interrupting an in-progress render.
#[derive(Clone, Default)]
pub struct AutoReportIntervals {
    temperature: Arc<AtomicU32>,
    position: Arc<AtomicU32>,
    print_status: Arc<AtomicU32>,
}

impl AutoReportIntervals {
    pub fn set_temperature(&self, seconds: u32) {
        self.temperature.store(seconds, Ordering::Relaxed);
    }

    pub fn set_position(&self, seconds: u32) {
        self.position.store(seconds, Ordering::Relaxed);
    }

    pub fn set_print_status(&self, seconds: u32) {
        self.print_status.store(seconds, Ordering::Relaxed);
    }
}

struct Channel {
    interval: Arc<AtomicU32>,
    last_emit: Instant,
}

impl Channel {
    fn new(interval: Arc<AtomicU32>) -> Self {
        Channel {
            interval,
            last_emit: Instant::now(),
        }
    }

    fn due(&self, now: Instant) -> bool {
        let secs = self.interval.load(Ordering::Relaxed);
        secs != 0 && now.duration_since(self.last_emit) >= Duration::from_secs(u64::from(secs))
    }
}

/// Runs the scheduler loop until the task is cancelled. Intended to be
/// spawned as its own task alongside the serial reader and RPC driver.
pub async fn run(intervals: AutoReportIntervals, mirror: StateMirror, serial: Arc<SerialLink>) {
    let mut temperature = Channel::new(intervals.temperature.clone());
    let mut position = Channel::new(intervals.position.clone());
    let mut print_status = Channel::new(intervals.print_status.clone());

    let mut ticker = tokio::time::interval(TICK);
    loop {
        ticker.tick().await;
        let now = Instant::now();

        if temperature.due(now) {
            let reply = templates::temperature_autoreport(&mirror).await;
            if serial.write_reply(&reply).await.is_ok() {
                temperature.last_emit = now;
            }
        }
        if position.due(now) {
            let reply = templates::position_autoreport(&mirror).await;
            if serial.write_reply(&reply).await.is_ok() {
                position.last_emit = now;
            }
        }
        if print_status.due(now) {
            let reply = templates::print_status_autoreport(&mirror).await;
            if serial.write_reply(&reply).await.is_ok() {
                print_status.last_emit = now;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_interval_never_fires() {
        let channel = Channel::new(Arc::new(AtomicU32::new(0)));
        assert!(!channel.due(Instant::now() + Duration::from_secs(1000)));
    }

    #[test]
    fn fires_once_interval_elapses() {
        let channel = Channel::new(Arc::new(AtomicU32::new(2)));
        assert!(!channel.due(Instant::now()));
        assert!(channel.due(Instant::now() + Duration::from_secs(2)));
    }

    #[test]
    fn interval_change_is_observed_live() {
        let interval = Arc::new(AtomicU32::new(0));
        let channel = Channel::new(interval.clone());
        let later = Instant::now() + Duration::from_secs(5);
        assert!(!channel.due(later));
        interval.store(3, Ordering::Relaxed);
        assert!(channel.due(later));
    }
}
