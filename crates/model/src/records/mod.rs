pub mod result;
pub mod row;
