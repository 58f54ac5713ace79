//! Turns uploaded CSV bytes into typed [`Record`]s.

pub mod decoder;
pub mod error;
pub mod record;

pub use decoder::{Decoder, Encoding, Records, REQUIRED_COLUMNS};
pub use error::DecodeError;
pub use record::Record;
