// lutra-core: the event bridge between one Caséta hub and one MQTT
// broker -- registry, state cache, router, and reconnection supervision.

pub mod bridge;
pub mod broker;
mod buttons;
pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod registry;
pub mod router;
pub mod supervisor;
pub mod topics;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bridge::Bridge;
pub use broker::Publication;
pub use cache::{Applied, StateCache};
pub use commands::ZoneCommand;
pub use config::{BridgeConfig, BrokerConfig, BrokerTls};
pub use error::BridgeError;
pub use registry::{DeviceRegistry, RegistrySnapshot};
pub use router::EventRouter;
pub use supervisor::{ReconnectPolicy, SessionState};

// Re-export model types at the crate root for ergonomics.
pub use model::{
    ButtonBinding, ChannelValue, Device, DeviceCommand, DeviceId, DeviceKind, HubSignal,
};
