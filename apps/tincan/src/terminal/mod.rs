//! Line-oriented terminal front end.

pub mod app;
pub mod cli;
pub mod error;
pub mod input;
