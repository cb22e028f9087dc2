pub mod sqlite;

pub use sqlite::{SearchOptions, Store};
