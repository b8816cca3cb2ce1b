pub mod error;
pub mod interval;
pub mod models;
pub mod stopwatch;
