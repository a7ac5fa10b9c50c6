//! Error types for acled-sync.

use thiserror::Error;

/// Result type alias using the library's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for acled-sync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Source error if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// PostgreSQL connection error
    #[error("PostgreSQL connection error: {message}")]
    PostgresConnection {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// PostgreSQL query error
    #[error("PostgreSQL query error on table '{table}': {message}")]
    PostgresQuery {
        /// Table name
        table: String,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    /// Event API transport error (connection, HTTP status or undecodable body)
    #[error("Event API transport error on page {page}: {message}")]
    Transport {
        /// Page being fetched
        page: u32,
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<reqwest::Error>,
    },

    /// Event API answered but reported failure
    #[error("Event API rejected page {page}: {message}")]
    Api {
        /// Page being fetched
        page: u32,
        /// Error message
        message: String,
    },

    /// Target table does not exist
    #[error("Table {schema}.{table} does not exist")]
    SchemaAbsent {
        /// Schema name
        schema: String,
        /// Table name
        table: String,
    },

    /// Schema descriptor error
    #[error("Schema error: {message}")]
    Schema {
        /// Error message
        message: String,
    },

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message
        message: String,
        /// Source error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with source.
    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a PostgreSQL connection error.
    pub fn postgres_connection(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::PostgresConnection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a PostgreSQL query error.
    pub fn postgres_query(
        table: impl Into<String>,
        message: impl Into<String>,
        source: tokio_postgres::Error,
    ) -> Self {
        Self::PostgresQuery {
            table: table.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a transport error.
    pub fn transport(page: u32, message: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Transport {
            page,
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an API failure error.
    pub fn api(page: u32, message: impl Into<String>) -> Self {
        Self::Api {
            page,
            message: message.into(),
        }
    }

    /// Create a missing-table error.
    pub fn schema_absent(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self::SchemaAbsent {
            schema: schema.into(),
            table: table.into(),
        }
    }

    /// Create a schema error.
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a serialization error.
    pub fn serialization(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Check if this error is transient.
    ///
    /// Nothing in this crate retries; callers deciding whether to re-run a
    /// session can use this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PostgresConnection { .. } | Error::Transport { .. } | Error::Io(_)
        )
    }

    /// Get the error code for metrics/logging.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::PostgresConnection { .. } => "PG_CONNECTION_ERROR",
            Error::PostgresQuery { .. } => "PG_QUERY_ERROR",
            Error::Transport { .. } => "TRANSPORT_ERROR",
            Error::Api { .. } => "API_ERROR",
            Error::SchemaAbsent { .. } => "SCHEMA_ABSENT",
            Error::Schema { .. } => "SCHEMA_ERROR",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Serialization { .. } => "SERIALIZATION_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }
}
