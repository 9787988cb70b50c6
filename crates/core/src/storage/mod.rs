pub mod format;
pub mod manager;
