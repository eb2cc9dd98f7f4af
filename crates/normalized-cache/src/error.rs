use std::sync::Arc;

/// Severity of a message handed to the configured [`Logger`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Debug,
    Warn,
    Error,
}

/// Logging hook. The default forwards to `tracing` at the matching level.
pub type Logger = Arc<dyn Fn(Severity, &str) + Send + Sync>;

pub(crate) fn default_logger() -> Logger {
    Arc::new(|severity, message| match severity {
        Severity::Debug => tracing::debug!(target: "normalized_cache", "{message}"),
        Severity::Warn => tracing::warn!(target: "normalized_cache", "{message}"),
        Severity::Error => tracing::error!(target: "normalized_cache", "{message}"),
    })
}

/// Returned by user updaters to abort their own queued writes.
///
/// The failure is isolated: it is reported through the logger and the rest of
/// the enclosing write transaction proceeds.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UpdaterError(pub String);

impl From<String> for UpdaterError {
    fn from(message: String) -> Self {
        UpdaterError(message)
    }
}

impl From<&str> for UpdaterError {
    fn from(message: &str) -> Self {
        UpdaterError(message.to_owned())
    }
}

/// Internal consistency problems. These are never raised to the caller; they
/// are logged at error severity and the offending location reads as a miss.
#[derive(Debug, thiserror::Error)]
pub(crate) enum InvariantViolation {
    #[error("expected a link at {entity}.{field} but found a record")]
    RecordWhereLinkExpected { entity: String, field: String },
    #[error("expected a record at {entity}.{field} but found a link")]
    LinkWhereRecordExpected { entity: String, field: String },
    #[error("object written at {entity}.{field} carries no __typename")]
    MissingTypename { entity: String, field: String },
}
