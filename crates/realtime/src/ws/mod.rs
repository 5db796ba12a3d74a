mod protocol;

pub use protocol::{parse_client_frame, FrameError};
