//! Carrier-sense gate consulted immediately before every transmission.
//!
//! A crude collision-avoidance guard: keep sampling ambient RSSI and hold the
//! transmission while the channel reads above the configured threshold.

use embassy_time::{Duration, Instant, Timer};
use log::{log, Level};

use crate::diagnostics::{ControllerEvent, DiagnosticsEmitter};
use crate::RadioDevice;

/// Block until the channel is sensed clear.
///
/// Samples the radio's instantaneous RSSI and returns as soon as a sample is
/// at or below `threshold_dbm`, sleeping `poll_interval` between samples. A
/// sampling failure counts as a busy sample.
///
/// With `max_wait` of `None` there is no timeout and no retry limit: under
/// sustained channel occupancy this suspends the polling flow indefinitely,
/// which is the protocol's intended behavior. `Some(limit)` arms the optional
/// give-up bound; the return value says whether the channel was actually
/// sensed clear.
pub(crate) async fn await_clear_channel(
    radio: &mut RadioDevice,
    emitter: &DiagnosticsEmitter,
    threshold_dbm: i16,
    poll_interval: Duration,
    max_wait: Option<Duration>,
) -> bool {
    let started = Instant::now();
    loop {
        match radio.sample_rssi().await {
            Ok(rssi_dbm) if rssi_dbm <= threshold_dbm => return true,
            Ok(rssi_dbm) => {
                log!(Level::Debug, "channel busy: RSSI {} dBm over threshold {} dBm", rssi_dbm, threshold_dbm);
                emitter.emit(ControllerEvent::ChannelBusy { rssi_dbm });
            }
            Err(_error) => {
                log!(Level::Warn, "RSSI sampling failed, treating channel as busy");
            }
        }

        if let Some(limit) = max_wait {
            if started.elapsed() >= limit {
                log!(Level::Warn, "channel not sensed clear within {} ms, giving up", limit.as_millis());
                return false;
            }
        }

        if poll_interval > Duration::from_millis(0) {
            Timer::after(poll_interval).await;
        }
    }
}
