// lutra-leap: async client for the LEAP protocol spoken by Lutron Caséta
// bridges -- newline-delimited JSON over a mutually authenticated TLS
// session, request/response correlated by client tag, plus unsolicited
// push notifications for zone and button state.

pub mod error;
pub mod protocol;
pub mod session;
pub mod transport;

pub use error::LeapError;
pub use protocol::{ButtonAction, LeapNotification};
pub use session::LeapClient;
pub use transport::{HubConfig, TlsVerification};
