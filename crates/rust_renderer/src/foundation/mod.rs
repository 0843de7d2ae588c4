//! Foundation module - logging setup and the engine context

pub mod context;
pub mod logging;
