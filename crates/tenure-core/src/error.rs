use std::fmt;

use chrono::NaiveDate;

use crate::config::ConfigError;
use crate::model::AttributeType;
use crate::snapshot::SourceError;
use crate::store::StoreError;

/// Machine-readable error codes for scripts and schedulers wrapping `tn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    InvalidConfig,
    EntityNotFound,
    InvalidDateRange,
    SourceUnavailable,
    ConsistencyFault,
    CorruptHistory,
    OutOfOrderSnapshot,
    StoreUnavailable,
    LockContention,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::InvalidConfig => "E1003",
            Self::EntityNotFound => "E2001",
            Self::InvalidDateRange => "E2002",
            Self::SourceUnavailable => "E3001",
            Self::ConsistencyFault => "E3002",
            Self::CorruptHistory => "E3003",
            Self::OutOfOrderSnapshot => "E3004",
            Self::StoreUnavailable => "E5001",
            Self::LockContention => "E5002",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::InvalidConfig => "Invalid tracking configuration",
            Self::EntityNotFound => "No history for entity",
            Self::InvalidDateRange => "Invalid date range",
            Self::SourceUnavailable => "Snapshot unavailable",
            Self::ConsistencyFault => "Cache and history store diverged",
            Self::CorruptHistory => "History intervals violate invariants",
            Self::OutOfOrderSnapshot => "Snapshot predates stored history",
            Self::StoreUnavailable => "History store unavailable",
            Self::LockContention => "Lock contention",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `tn init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .tenure/config.toml and retry."),
            Self::InvalidConfig => {
                Some("Track each attribute once and give every tracked attribute a source field.")
            }
            Self::EntityNotFound => None,
            Self::InvalidDateRange => Some("Pass --from on or before --to."),
            Self::SourceUnavailable => {
                Some("The date is skipped; fetch the missing partition files and rerun it.")
            }
            Self::ConsistencyFault => Some(
                "Run `tn verify`, repair the open records, then resume from the last committed date.",
            ),
            Self::CorruptHistory => Some("Inspect the reported keys with `tn show`."),
            Self::OutOfOrderSnapshot => {
                Some("Snapshots apply in date order. Replay from the last committed date onward.")
            }
            Self::StoreUnavailable => {
                Some("Check the database path and disk, then resume from the last committed date.")
            }
            Self::LockContention => Some("Retry after the other `tn` writer releases its lock."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failures surfaced by the reconciliation engine and batch driver.
///
/// [`SyncError::is_recoverable`] separates conditions the driver skips past
/// from conditions that abort the run.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// The snapshot for a date could not be obtained. The date is skipped.
    #[error("snapshot for {date} unavailable")]
    SourceUnavailable {
        date: NaiveDate,
        #[source]
        source: SourceError,
    },

    /// A close was required but the store holds no open record for the key.
    #[error("no open {attribute} record for entity {entity_id}; cache and store have diverged")]
    ConsistencyFault {
        entity_id: String,
        attribute: AttributeType,
    },

    /// The store failed to apply or commit a unit of work.
    #[error("history store unavailable")]
    StoreUnavailable(#[source] anyhow::Error),

    /// A close dated before the open record it ends. Snapshots older than
    /// the stored history cannot be applied.
    #[error("{entity_id} {attribute} opened on {start_date}; a snapshot for {date} cannot close it")]
    OutOfOrder {
        entity_id: String,
        attribute: AttributeType,
        date: NaiveDate,
        start_date: NaiveDate,
    },

    /// Tracking configuration rejected at startup.
    #[error("invalid configuration")]
    Config(#[from] ConfigError),

    /// A replay range whose start is after its end.
    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },
}

impl SyncError {
    /// `true` when the driver may log, skip the date, and continue.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::SourceUnavailable { .. })
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::SourceUnavailable { .. } => ErrorCode::SourceUnavailable,
            Self::ConsistencyFault { .. } => ErrorCode::ConsistencyFault,
            Self::OutOfOrder { .. } => ErrorCode::OutOfOrderSnapshot,
            Self::StoreUnavailable(_) => ErrorCode::StoreUnavailable,
            Self::Config(_) => ErrorCode::InvalidConfig,
            Self::InvalidRange { .. } => ErrorCode::InvalidDateRange,
        }
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NoOpenRecord {
                entity_id,
                attribute,
            } => Self::ConsistencyFault {
                entity_id,
                attribute,
            },
            StoreError::OutOfOrder {
                entity_id,
                attribute,
                end_date,
                start_date,
            } => Self::OutOfOrder {
                entity_id,
                attribute,
                date: end_date,
                start_date,
            },
            StoreError::Backend(inner) => Self::StoreUnavailable(inner),
        }
    }
}

/// `err` and each of its sources, joined with `": "`.
///
/// Display strings carry only their own layer, so this is the one place the
/// full cause is assembled outside `anyhow`'s `{:#}`.
#[must_use]
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
