use std::sync::Arc;

use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::coordinator::{CaptureTicket, SessionCoordinator};

use super::gpio::SensorInput;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_info, log_warn};

/// Consecutive read failures before the loop stops warning on every tick.
const READ_ERROR_QUIET_AFTER: u32 = 3;

/// Polls the sensor and fires a capture on each rising edge. An object
/// resting in front of the sensor therefore triggers once, not once per tick.
pub async fn sensing_loop(
    coordinator: SessionCoordinator,
    sensor: Arc<dyn SensorInput>,
    poll_interval: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut was_triggered = false;
    let mut read_errors: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let reader = Arc::clone(&sensor);
                let level = match tokio::task::spawn_blocking(move || reader.is_triggered()).await {
                    Ok(level) => level,
                    Err(join_err) => Err(anyhow::anyhow!("sensor read worker failed: {join_err}")),
                };

                let triggered = match level {
                    Ok(triggered) => {
                        read_errors = 0;
                        triggered
                    }
                    Err(err) => {
                        read_errors = read_errors.saturating_add(1);
                        if read_errors <= READ_ERROR_QUIET_AFTER {
                            log_warn!("sensor read failed: {err:#}");
                        }
                        continue;
                    }
                };

                if triggered && !was_triggered {
                    match coordinator.trigger_capture().await {
                        CaptureTicket::Launched { id, .. } => log_info!("sensor edge: capture {id} launched"),
                        ticket => log_info!("sensor edge: capture skipped ({:?})", ticket.skip_reason()),
                    }
                }
                was_triggered = triggered;
            }
            _ = cancel_token.cancelled() => {
                log_info!("sensing loop shutting down");
                break;
            }
        }
    }
}
