#![recursion_limit = "256"]
#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

pub mod audit;
pub mod config;
pub mod doctor;
pub mod errors;
pub mod fsutil;
pub mod keystore;
pub mod paths;
pub mod records;
pub mod store;
pub mod wallet;
