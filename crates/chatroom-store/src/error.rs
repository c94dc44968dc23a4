#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage init failed: {0}")]
    Init(String),

    #[error("persist failed: {0}")]
    Persist(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("corrupt row in {table}.{column}: {detail}")]
    CorruptRow {
        table: &'static str,
        column: &'static str,
        detail: String,
    },

    #[error("IO error: {0}")]
    Io(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Query(e.to_string())
    }
}
