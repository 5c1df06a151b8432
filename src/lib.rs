pub mod audio;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use audio::AudioSystem;
pub use error::*;
pub use models::*;

#[cfg(test)]
mod integration_tests;
