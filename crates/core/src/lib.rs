#![forbid(unsafe_code)]

pub mod groups;
pub mod protocol;
pub mod validation;
