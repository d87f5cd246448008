pub mod discovery;
pub mod session;
pub mod trust;

pub use discovery::DiscoveryError;
pub use session::SessionError;
pub use trust::TrustError;
