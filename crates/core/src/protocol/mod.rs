mod actions;
mod events;
mod types;

pub use actions::*;
pub use events::*;
pub use types::*;
