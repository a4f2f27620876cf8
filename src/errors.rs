use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Malformed search specification: {0}")]
    MalformedSpecification(String),

    #[error("Invalid pagination: {0}")]
    InvalidPagination(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Query rejected: {0}")]
    QueryRejected(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("BSON decode: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("BSON encode: {0}")]
    Encode(#[from] bson::ser::Error),
}

impl GatewayError {
    /// Stable machine-readable name, used in batch error payloads.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSpecification(_) => "MalformedSpecification",
            Self::InvalidPagination(_) => "InvalidPagination",
            Self::StoreUnavailable(_) => "StoreUnavailable",
            Self::QueryRejected(_) => "QueryRejected",
            Self::NotFound(_) => "NotFound",
            Self::Config(_) => "Config",
            Self::Io(_) => "Io",
            Self::Json(_) => "Json",
            Self::Decode(_) | Self::Encode(_) => "Decode",
        }
    }
}

impl From<std::io::Error> for GatewayError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<toml::de::Error> for GatewayError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
