pub mod budget;
pub mod context;
pub mod controller;
pub mod error;
pub mod factory;
pub mod range;
pub mod scheduler;
