pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod model;
pub mod storage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use error::RelayError;
