pub mod parser;
mod structs;

pub use structs::*;
