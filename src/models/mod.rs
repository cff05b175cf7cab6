pub mod file_entry;

pub use file_entry::*;
