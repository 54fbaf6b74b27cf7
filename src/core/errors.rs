use thiserror::Error;

#[derive(Error, Debug)]
pub enum TangoError {
    #[error("I/O error: {0}")]
    Io(Box<std::io::Error>),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Sqlite(Box<rusqlite::Error>),

    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    #[error("No collection database found in archive")]
    CollectionNotFound,

    #[error("No importable cards found ({skipped} skipped)")]
    NoImportableContent { skipped: usize, warnings: Vec<String> },

    #[error("Review update lost a concurrent write race")]
    SchedulerRace,

    #[error("TangoError: {0}")]
    Custom(String),
}

impl TangoError {
    /// Stable machine-checkable kind, independent of the display message.
    pub fn kind(&self) -> &'static str {
        match self {
            TangoError::Io(_) => "io",
            TangoError::Json(_) => "json",
            TangoError::Sqlite(_) => "persistence",
            TangoError::CorruptArchive(_) => "corrupt_archive",
            TangoError::CollectionNotFound => "collection_not_found",
            TangoError::NoImportableContent { .. } => "no_importable_content",
            TangoError::SchedulerRace => "scheduler_race",
            TangoError::Custom(_) => "other",
        }
    }
}

impl From<std::io::Error> for TangoError {
    fn from(error: std::io::Error) -> Self {
        TangoError::Io(Box::new(error))
    }
}

impl From<rusqlite::Error> for TangoError {
    fn from(error: rusqlite::Error) -> Self {
        TangoError::Sqlite(Box::new(error))
    }
}

impl From<zip::result::ZipError> for TangoError {
    fn from(error: zip::result::ZipError) -> Self {
        TangoError::CorruptArchive(error.to_string())
    }
}
