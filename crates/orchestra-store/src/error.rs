#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row had an unrecognized value for {field}: {value}")]
    BadEnumValue { field: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
