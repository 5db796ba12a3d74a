use tandem_core::protocol::ClientAction;

/// A frame the dispatcher could not turn into an action. Always maps
/// to error code 400; never closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("malformed json")]
    MalformedJson,
    #[error("unknown or missing action")]
    UnknownAction,
}

/// Parses one inbound text frame into a `ClientAction`. The payload
/// must be a single JSON object with an `action` tag.
pub fn parse_client_frame(payload: &str) -> Result<ClientAction, FrameError> {
    if payload.trim().is_empty() {
        return Err(FrameError::Empty);
    }

    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|_| FrameError::MalformedJson)?;
    if !value.is_object() {
        return Err(FrameError::MalformedJson);
    }

    serde_json::from_value(value).map_err(|_| FrameError::UnknownAction)
}
