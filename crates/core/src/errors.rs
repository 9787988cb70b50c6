use chrono::NaiveDate;
use thiserror::Error;
use uuid::Uuid;

/// Unified error type for the entire lot-ledger-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Not Found ───────────────────────────────────────────────────
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Buy lot not found: {0}")]
    LotNotFound(Uuid),

    #[error("Sell allocation {allocation_id} not found in lot {lot_id}")]
    AllocationNotFound { lot_id: Uuid, allocation_id: Uuid },

    #[error("Dividend batch not found: {0}")]
    BatchNotFound(Uuid),

    // ── Invariant Violations ────────────────────────────────────────
    #[error("Sell amount exceeds available amount: requested {requested}, remaining {remaining}")]
    ExceedsAvailable { remaining: f64, requested: f64 },

    #[error("Buy amount {requested} cannot be less than the already sold amount {pre_sold}")]
    BelowSoldAmount { pre_sold: f64, requested: f64 },

    #[error("Buy date {requested} cannot be later than the earliest sell date {earliest}")]
    DateAfterEarliestSale {
        earliest: NaiveDate,
        requested: NaiveDate,
    },

    // ── Access ──────────────────────────────────────────────────────
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // ── Input ───────────────────────────────────────────────────────
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ── Backing store ───────────────────────────────────────────────
    #[error("Store unavailable: {0}")]
    Store(String),

    // ── Snapshot / File ─────────────────────────────────────────────
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    #[error("Unsupported file version: {0}")]
    UnsupportedVersion(u16),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),
}

/// Coarse classification of a [`CoreError`], for callers mapping errors
/// onto a transport (status codes, retry decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvariantViolation,
    Unauthorized,
    Validation,
    Transient,
    Storage,
}

impl CoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::AccountNotFound(_)
            | CoreError::LotNotFound(_)
            | CoreError::AllocationNotFound { .. }
            | CoreError::BatchNotFound(_) => ErrorKind::NotFound,
            CoreError::ExceedsAvailable { .. }
            | CoreError::BelowSoldAmount { .. }
            | CoreError::DateAfterEarliestSale { .. } => ErrorKind::InvariantViolation,
            CoreError::Unauthorized(_) => ErrorKind::Unauthorized,
            CoreError::ValidationError(_) => ErrorKind::Validation,
            CoreError::Store(_) => ErrorKind::Transient,
            CoreError::InvalidFileFormat(_)
            | CoreError::UnsupportedVersion(_)
            | CoreError::Serialization(_)
            | CoreError::Deserialization(_)
            | CoreError::FileIO(_) => ErrorKind::Storage,
        }
    }

    /// Only backing-store failures are worth retrying; the engine itself never retries.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}
