//! Error types for the entitlement engine.
//!
//! [`EntitlementError`] is returned by every store, assembler and
//! coordinator operation. Publish failures have their own [`BusError`],
//! which the change notifier logs and never propagates. Wake-up failures
//! are a [`QueueError`] carried inside [`EntitlementError::Scheduling`].

use thiserror::Error;

/// Errors raised by entitlement operations.
#[derive(Debug, Error)]
pub enum EntitlementError {
    /// `SQLite` database error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection pool error.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// JSON serialization/deserialization error.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Schema migration failed.
    #[error("migration error: {message}")]
    Migration {
        /// Which migration failed and why.
        message: String,
    },

    /// Malformed or unresolvable subscription/bundle reference.
    #[error("validation error: {0}")]
    Validation(String),

    /// An event with this id is already stored.
    #[error("duplicate event id: {0}")]
    DuplicateId(String),

    /// A committed state would break a timeline invariant.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// More than one active future cancel exists for a subscription.
    #[error("subscription {subscription_id} has {count} pending cancel events")]
    DuplicateCancel {
        /// Offending subscription.
        subscription_id: String,
        /// Number of active future cancels found.
        count: usize,
    },

    /// An add-on lives in a bundle without a resolvable base.
    #[error("bundle {0} has add-ons but no base subscription")]
    InconsistentBundle(String),

    /// A future activation could not be recorded; the transaction aborts.
    #[error("failed to schedule notification for event {event_id}: {source}")]
    Scheduling {
        /// Event whose wake-up was lost.
        event_id: String,
        /// Queue failure.
        #[source]
        source: QueueError,
    },
}

impl EntitlementError {
    /// Whether retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Scheduling { source, .. } => match source {
                QueueError::Storage(inner) => inner.is_retryable(),
                QueueError::Unavailable(_) => true,
            },
            Self::Sqlite(e) => matches!(
                e.sqlite_error_code(),
                Some(rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked)
            ),
            Self::Serde(_)
            | Self::Migration { .. }
            | Self::Validation(_)
            | Self::DuplicateId(_)
            | Self::InvariantViolation(_)
            | Self::DuplicateCancel { .. }
            | Self::InconsistentBundle(_) => false,
        }
    }

    /// Short machine-readable category, used as a log field.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Sqlite(_) | Self::Pool(_) | Self::Migration { .. } => "storage",
            Self::Serde(_) => "serialization",
            Self::Validation(_) => "validation",
            Self::DuplicateId(_) => "duplicate_id",
            Self::InvariantViolation(_) => "invariant",
            Self::DuplicateCancel { .. } => "duplicate_cancel",
            Self::InconsistentBundle(_) => "inconsistent_bundle",
            Self::Scheduling { .. } => "scheduling",
        }
    }
}

/// Convenience alias for entitlement results.
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// Failure to post a message on the change-notification channel.
#[derive(Debug, Error)]
pub enum BusError {
    /// The outbox row could not be written.
    #[error("outbox write failed: {0}")]
    Storage(#[from] rusqlite::Error),

    /// The message could not be serialized.
    #[error("message encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The channel refused the message.
    #[error("channel unavailable: {0}")]
    Unavailable(String),
}

/// Failure to record a future wake-up.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The wake-up row could not be written.
    #[error("queue write failed: {0}")]
    Storage(#[source] Box<EntitlementError>),

    /// The queue refused the wake-up.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

impl From<EntitlementError> for QueueError {
    fn from(err: EntitlementError) -> Self {
        Self::Storage(Box::new(err))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
