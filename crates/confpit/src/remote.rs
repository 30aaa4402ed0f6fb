use std::sync::Weak;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::options::RemoteSchedule;
use crate::pit::Pit;

/// Background waiter for one remote source.
///
/// Sleeps one interval, polls, and for [`RemoteSchedule::Periodic`] repeats.
/// Cancellation is honored mid-sleep and re-checked under the pit lock
/// before any merge, so a cancelled waiter never publishes. A failed poll
/// is reported and the schedule carries on.
pub(crate) async fn poll_remote(
    pit: Weak<Pit>,
    index: usize,
    cancel: CancellationToken,
    interval: Duration,
    schedule: RemoteSchedule,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(index, "remote watch cancelled");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(pit) = pit.upgrade() else {
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || pit.poll_remote(index)).await {
            warn!(index, error = %e, "remote poll task failed");
        }

        if schedule == RemoteSchedule::Once {
            return;
        }
    }
}
