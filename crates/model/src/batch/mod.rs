pub mod cursor;
pub mod mode;
pub mod range;
pub mod state;
pub mod summary;
