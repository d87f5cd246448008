pub mod identity;
pub mod protocol;
pub mod tailnet;
pub mod txt;
pub mod types;
