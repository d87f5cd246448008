//! Wide-area DNS-SD zone authority.

pub mod hash;
pub mod render;
pub mod writer;

pub use render::ZoneOptions;
pub use writer::{write_zone, ZoneWriteOutcome};
