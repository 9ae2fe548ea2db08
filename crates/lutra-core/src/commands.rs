// ── Hub command dispatch ──
//
// Commands resolved by the router are issued against whatever hub
// session is currently live. Each command waits for the bridge's
// acknowledgement under a bounded timeout; a timeout is logged and the
// command dropped. Deliberately no retry: re-actuating a shade or lock
// on a guess is worse than a missed command.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lutra_leap::LeapClient;

use crate::model::DeviceId;

/// A fully resolved zone command, ready for the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneCommand {
    pub zone: u32,
    pub level: u8,
    /// Originating device and channel, for diagnostics.
    pub device: DeviceId,
    pub channel: u8,
}

pub(crate) async fn command_dispatcher(
    hub_handle: Arc<ArcSwapOption<LeapClient>>,
    mut command_rx: mpsc::Receiver<ZoneCommand>,
    command_timeout: Duration,
    cancel: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            command = command_rx.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        let Some(client) = hub_handle.load_full() else {
            warn!(
                device = %command.device,
                channel = command.channel,
                "hub session not connected; dropping command"
            );
            continue;
        };

        match tokio::time::timeout(
            command_timeout,
            client.go_to_level(command.zone, command.level),
        )
        .await
        {
            Ok(Ok(())) => debug!(
                device = %command.device,
                channel = command.channel,
                level = command.level,
                "command acknowledged"
            ),
            Ok(Err(e)) => warn!(
                device = %command.device,
                channel = command.channel,
                error = %e,
                "hub rejected command"
            ),
            Err(_) => warn!(
                device = %command.device,
                channel = command.channel,
                timeout_ms = command_timeout.as_millis() as u64,
                "command timed out; not retrying"
            ),
        }
    }
    debug!("command dispatcher stopped");
}
