pub mod core;
pub mod library;
pub mod plans;
pub mod progress;
pub mod records;
pub mod roster;
pub mod settlement;
