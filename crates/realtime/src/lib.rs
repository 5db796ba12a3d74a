#![forbid(unsafe_code)]

pub mod broker;
pub mod limiter;
pub mod ws;
