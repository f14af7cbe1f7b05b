use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Malformed packet: expected {expected} payload bytes, got {actual}")]
    Malformed { expected: usize, actual: usize },

    #[error("Truncated frame: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("Invalid field mask: {0:#06x}")]
    InvalidMask(u16),

    #[error("Invalid base sequence: {0}")]
    InvalidBase(i64),

    #[error("Delta base sequence {0} not present in snapshot store")]
    MissingBase(u64),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodeError {
    #[error("Value {value} for {field} exceeds the encodable delta range")]
    Overflow { field: &'static str, value: f32 },
}

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(u32),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),

    #[error("Connection closed")]
    ConnectionClosed,
}

pub type Result<T> = std::result::Result<T, LinkError>;
