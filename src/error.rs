use thiserror::Error;

/// Errors raised by job sources (boards, alert channels).
///
/// Unavailable and Timeout are transient: the retry executor backs off and
/// tries again, then the source circuit-breaks for the rest of the run.
/// Auth failures are not retried.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source unavailable: {0}")]
    Unavailable(String),

    #[error("source timed out: {0}")]
    Timeout(String),

    #[error("source authentication failed: {0}")]
    Auth(String),
}

/// Errors from the tailoring collaborator. Job-scoped: the record stays in
/// its last good state and is retried on a later run.
#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("enrichment rate limited: {0}")]
    RateLimited(String),

    #[error("enrichment rejected by content policy: {0}")]
    ContentPolicy(String),

    #[error("enrichment failed: {0}")]
    Other(String),
}

/// Errors from the outreach (email send) collaborator. Job-scoped.
#[derive(Debug, Error)]
pub enum OutreachError {
    #[error("outreach authentication failed: {0}")]
    Auth(String),

    #[error("outreach rate limited: {0}")]
    RateLimited(String),

    #[error("outreach rejected: {0}")]
    Rejected(String),
}

/// Errors from the durable store. Run-fatal: without the ledger the dedup
/// invariant cannot be guaranteed, so the run aborts instead of proceeding
/// with unverified state.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store not initialized, run 'scout init' first")]
    NotInitialized,

    #[error("another run appears to be in progress (lock file {0} exists)")]
    RunLocked(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration problems. Fatal at startup, before any external call.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file not found: {0}")]
    NotFound(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing credential {0} (set it in the environment)")]
    MissingCredential(String),
}

/// The only errors that abort a whole run. Source, enrichment and
/// outreach failures are absorbed at their boundaries and reported in the
/// run summary instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Classifies whether a failed call is worth retrying.
pub trait Retryable {
    fn is_transient(&self) -> bool;
}

impl Retryable for SourceError {
    fn is_transient(&self) -> bool {
        matches!(self, SourceError::Unavailable(_) | SourceError::Timeout(_))
    }
}

impl Retryable for EnrichmentError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            EnrichmentError::RateLimited(_) | EnrichmentError::Other(_)
        )
    }
}

impl Retryable for OutreachError {
    fn is_transient(&self) -> bool {
        matches!(self, OutreachError::RateLimited(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_transience() {
        assert!(SourceError::Unavailable("503".into()).is_transient());
        assert!(SourceError::Timeout("30s".into()).is_transient());
        assert!(!SourceError::Auth("bad login".into()).is_transient());
    }

    #[test]
    fn enrichment_transience() {
        assert!(EnrichmentError::RateLimited("429".into()).is_transient());
        assert!(!EnrichmentError::ContentPolicy("refused".into()).is_transient());
    }

    #[test]
    fn outreach_transience() {
        assert!(OutreachError::RateLimited("429".into()).is_transient());
        assert!(!OutreachError::Auth("expired token".into()).is_transient());
        assert!(!OutreachError::Rejected("bounced".into()).is_transient());
    }
}
