pub mod chunk;
pub mod codec;
pub mod color;
pub mod config;
mod error;
pub mod grid;
pub mod hierarchy;
pub mod metadata;
pub mod storage;
pub mod time;
pub mod viewer;

pub use zarrs;

pub use error::{Error, Result};
