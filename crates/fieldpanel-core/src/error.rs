use thiserror::Error;

#[derive(Error, Debug)]
pub enum FieldPanelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("{0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Container runtime error: {0}")]
    Container(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("{0}")]
    Timeout(String),

    #[error("{0}")]
    Unavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl FieldPanelError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, FieldPanelError>;
