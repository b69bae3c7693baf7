//! pva-dma library
//!
//! Validation and loading of untrusted accelerator DMA programs.

pub mod config;
pub mod dma;
pub mod error;
pub mod hw;
pub mod math;
pub mod resource;

pub use config::Config;
pub use error::{DmaError, ErrorKind};
