//! HTTP handlers of the log viewer API

pub mod health;
pub mod logs_api;
