use thiserror::Error;

use routeslip_core::gateway::GatewayError;

pub mod chain;
pub mod document;

pub use chain::SqlChainSource;
pub use document::SqlDocumentGateway;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("value out of range for column `{column}`: {value}")]
    OutOfRange { column: &'static str, value: String },
}

impl From<RepositoryError> for GatewayError {
    fn from(error: RepositoryError) -> Self {
        GatewayError::Failure(error.to_string())
    }
}

pub(crate) fn to_sql_int<T>(column: &'static str, value: T) -> Result<i64, RepositoryError>
where
    T: TryInto<i64> + Copy + ToString,
{
    value.try_into().map_err(|_| RepositoryError::OutOfRange { column, value: value.to_string() })
}

pub(crate) fn from_sql_int<T>(column: &'static str, value: i64) -> Result<T, RepositoryError>
where
    T: TryFrom<i64>,
{
    T::try_from(value)
        .map_err(|_| RepositoryError::OutOfRange { column, value: value.to_string() })
}
