pub mod backoff;
pub mod error;
pub mod retry;
pub mod step;
pub mod validation;
