// Sparkdrop: ephemeral, location-pinned short messages.
//
// This is the library root. The binary in main.rs is a thin CLI over
// `service::SparkService`.

pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod geo;
pub mod local;
pub mod output;
pub mod photos;
pub mod service;
pub mod spark;
pub mod status;

pub use error::{Result, SparkError};
