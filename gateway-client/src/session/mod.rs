//! One supervised connection to a gateway.

pub mod coordinator;
pub mod handler;
pub mod protocol;
pub mod state;
pub mod transport;

pub use coordinator::{CoordinatorSettings, ManualTarget, SessionCoordinator};
pub use handler::{CapabilitySource, EventSender, SessionHandler};
pub use protocol::{CapabilitySnapshot, InvokeRequest, InvokeResponse};
pub use state::SessionState;
pub use transport::{GatewayTarget, GatewayTransport, TcpTransport};
