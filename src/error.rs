use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to parse workflow document {filename}: {message}")]
    Parse { filename: String, message: String },

    #[error("I/O failure on {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No workflow documents found under {0}")]
    EmptyCorpus(String),

    #[error("Search query required")]
    EmptyQuery,

    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Failed to serialize index snapshot: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl IndexError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub fn parse(filename: impl Into<String>, message: impl ToString) -> Self {
        Self::Parse {
            filename: filename.into(),
            message: message.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
