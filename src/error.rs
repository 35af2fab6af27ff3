use serde::Serialize;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("IO Error: {0}")]
    Io(#[from] io::Error),

    #[error("Encoder Error: {0}")]
    Encoder(String),

    #[error("Capture Error: {0}")]
    Capture(String),

    #[error("Audio Error: {0}")]
    Audio(String),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("State Error: {0}")]
    State(String),

    #[error("Snapshot Error: {0}")]
    Snapshot(String),
}

// Allow serializing errors to hand to an event consumer
impl Serialize for RecorderError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl From<String> for RecorderError {
    fn from(s: String) -> Self {
        RecorderError::Encoder(s)
    }
}
