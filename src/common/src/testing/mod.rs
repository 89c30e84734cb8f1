//! Test utilities shared by the workspace crates.
//!
//! Available with the `testing` feature or during tests:
//!
//! ```toml
//! [dev-dependencies]
//! common = { path = "../common", features = ["testing"] }
//! ```

mod catalog;
mod store;

pub use catalog::{FailingCatalogProvider, InMemoryCatalog, StaticCatalogProvider};
pub use store::InstrumentedStore;

use chrono::{DateTime, TimeZone, Utc};

/// Build a UTC timestamp, panicking on invalid input.
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, second)
        .single()
        .expect("valid timestamp")
}
