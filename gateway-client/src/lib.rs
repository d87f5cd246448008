pub mod config;
pub mod discovery;
pub mod error;
pub mod session;
pub mod trust;

pub use config::Config;
pub use discovery::{CombinedDiscovery, GatewayDiscovery};
pub use error::{DiscoveryError, SessionError, TrustError};
pub use session::{SessionCoordinator, SessionHandler, SessionState};
pub use trust::TrustStore;
