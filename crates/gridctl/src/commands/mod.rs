pub mod contracts;
pub mod nodes;
pub mod tools;
