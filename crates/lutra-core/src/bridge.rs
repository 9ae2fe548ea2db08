// ── Bridge assembly ──
//
// Wires the router, the hub supervisor, the broker session, and the
// command dispatcher together and runs them until shutdown or a fatal
// error. Each session is supervised independently: a hub reconnect
// never tears down the broker session, and vice versa.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use lutra_leap::LeapClient;

use crate::broker::{self, BrokerContext};
use crate::commands;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::registry::DeviceRegistry;
use crate::router::EventRouter;
use crate::supervisor::{self, HubContext, SessionState};

const HUB_SIGNAL_CAPACITY: usize = 256;
const COMMAND_CAPACITY: usize = 64;
const PUBLICATION_CAPACITY: usize = 256;

/// The long-running bridge between one hub and one broker.
pub struct Bridge {
    config: Arc<BridgeConfig>,
    registry: Arc<DeviceRegistry>,
    hub_state: Arc<watch::Sender<SessionState>>,
    broker_state: Arc<watch::Sender<SessionState>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        let (hub_state, _) = watch::channel(SessionState::Disconnected);
        let (broker_state, _) = watch::channel(SessionState::Disconnected);
        Self {
            config: Arc::new(config),
            registry: Arc::new(DeviceRegistry::new()),
            hub_state: Arc::new(hub_state),
            broker_state: Arc::new(broker_state),
        }
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Observe the hub session state.
    pub fn hub_state(&self) -> watch::Receiver<SessionState> {
        self.hub_state.subscribe()
    }

    /// Observe the broker session state.
    pub fn broker_state(&self) -> watch::Receiver<SessionState> {
        self.broker_state.subscribe()
    }

    /// Run until `cancel` fires (graceful, `Ok`) or a fatal error
    /// surfaces (hub auth failure, `Err`).
    ///
    /// On either exit path every task is cancelled and awaited, so the
    /// router finishes its in-flight event and the broker session gets
    /// to publish its offline marker.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), BridgeError> {
        // Broker options are built up front: unreadable TLS material is
        // a startup failure, not something to retry against.
        let options = broker::build_mqtt_options(&self.config)?;

        let (signal_tx, signal_rx) = mpsc::channel(HUB_SIGNAL_CAPACITY);
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (publish_tx, publish_rx) = mpsc::channel(PUBLICATION_CAPACITY);
        let (zone_command_tx, zone_command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (fatal_tx, mut fatal_rx) = mpsc::channel(1);
        let hub_handle: Arc<ArcSwapOption<LeapClient>> = Arc::new(ArcSwapOption::empty());

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let router = EventRouter::new(
            Arc::clone(&self.registry),
            self.config.topic_prefix.clone(),
            publish_tx,
            zone_command_tx,
        );
        tasks.push(tokio::spawn(router.run(
            signal_rx,
            command_rx,
            cancel.child_token(),
        )));

        tasks.push(tokio::spawn(commands::command_dispatcher(
            Arc::clone(&hub_handle),
            zone_command_rx,
            self.config.command_timeout,
            cancel.child_token(),
        )));

        tasks.push(tokio::spawn(broker::broker_session(
            BrokerContext {
                config: Arc::clone(&self.config),
                command_tx,
                publish_rx,
                state: Arc::clone(&self.broker_state),
                cancel: cancel.child_token(),
            },
            options,
        )));

        tasks.push(tokio::spawn(supervisor::hub_supervisor(HubContext {
            config: Arc::clone(&self.config),
            registry: Arc::clone(&self.registry),
            hub_handle,
            signal_tx,
            state: Arc::clone(&self.hub_state),
            fatal_tx,
            cancel: cancel.child_token(),
        })));

        let result = tokio::select! {
            () = cancel.cancelled() => {
                info!("shutdown requested");
                Ok(())
            }
            fatal = fatal_rx.recv() => match fatal {
                Some(error) => Err(error),
                None => Ok(()),
            },
        };

        cancel.cancel();
        for task in tasks {
            let _ = task.await;
        }
        result
    }
}
