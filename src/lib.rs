//! Image gallery core: a budgeted decoded-media cache and the navigator that drives it.

pub mod config;
pub mod error;
pub mod gallery;
pub mod info;
pub mod links;
pub mod media;
pub mod models;
pub mod preview;
pub mod scanner;

pub use config::Config;
pub use error::DecodeError;
pub use gallery::{CurrentMedia, Gallery};
pub use media::{DecodeHandle, DecodeState, MediaCache};
pub use preview::PreviewStrip;
