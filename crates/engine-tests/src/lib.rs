//! End-to-end scenarios for the batch engine over in-memory sheets and a
//! sled state store.

pub mod scenarios;
pub mod utils;
