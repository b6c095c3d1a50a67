use super::transport::ChannelKind;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("Connection error: {0}")]
    Connection(String),
    #[error("Not connected")]
    NotConnected,
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Remote error: {0}")]
    Remote(String),
    #[error("Reconnect gave up after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },
    #[error("The {0} channel does not accept commands")]
    Unsupported(ChannelKind),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Parse(err.to_string())
    }
}

impl StreamError {
    /// Short message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            StreamError::Connection(_) => "Could not connect to the generation service.".to_string(),
            StreamError::NotConnected => "Not connected to the generation service.".to_string(),
            StreamError::Parse(_) => "Received an unreadable update.".to_string(),
            StreamError::Remote(message) => message.clone(),
            StreamError::ReconnectExhausted { .. } => {
                "Lost connection to the generation service. Start the run again.".to_string()
            }
            StreamError::Unsupported(_) => "This connection cannot send commands.".to_string(),
            StreamError::Http(_) | StreamError::WebSocket(_) => "Connection interrupted.".to_string(),
        }
    }
}
