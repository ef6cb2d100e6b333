use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::state::LifecycleState;

/// A raw posting as produced by a source adapter. Immutable once created;
/// missing fields stay None rather than failing the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub salary_text: Option<String>,
    pub url: Option<String>,
    pub source: String, // "linkedin", "indeed", "email", etc.
    pub discovered_at: DateTime<Utc>,
    pub description: Option<String>,
}

impl JobPosting {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            company: None,
            location: None,
            salary_text: None,
            url: None,
            source: source.into(),
            discovered_at: Utc::now(),
            description: None,
        }
    }
}

/// The tracked entity for one unique job. Exactly one record exists per
/// fingerprint for the lifetime of the system; created on first sighting,
/// mutated in place on every transition, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Store row id, assigned on first upsert. This is the external
    /// identifier operators pass to mark-applied.
    pub id: Option<i64>,
    pub fingerprint: String,
    pub posting: JobPosting,
    /// Every source this job was sighted on, first sighting first.
    pub sources: Vec<String>,
    pub state: LifecycleState,
    /// Monthly salary normalized to AED, None when unknown.
    pub salary_aed: Option<i64>,
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
    pub recruiter_email: Option<String>,
    pub outreach_sent: bool,
    pub applied: bool,
    pub updated_at: DateTime<Utc>,
    pub notes: Option<String>,
}

impl JobRecord {
    pub fn new(fingerprint: String, posting: JobPosting, salary_aed: Option<i64>) -> Self {
        let source = posting.source.clone();
        Self {
            id: None,
            fingerprint,
            posting,
            sources: vec![source],
            state: LifecycleState::Unique,
            salary_aed,
            resume_path: None,
            cover_letter_path: None,
            recruiter_email: None,
            outreach_sent: false,
            applied: false,
            updated_at: Utc::now(),
            notes: None,
        }
    }

    /// Merge a duplicate sighting. Only non-identity fields change: the
    /// sources list and the timestamp. A sighting from an already-known
    /// source is a no-op, so re-running discovery never dirties records.
    /// Returns true when the source was new.
    pub fn note_sighting(&mut self, source: &str) -> bool {
        if self.sources.iter().any(|s| s == source) {
            return false;
        }
        self.sources.push(source.to_string());
        self.updated_at = Utc::now();
        true
    }

    /// Advance the lifecycle state, enforcing monotonic transitions.
    /// Illegal advances are ignored and reported as false.
    pub fn advance(&mut self, to: LifecycleState) -> bool {
        if self.state == to {
            return true;
        }
        if !self.state.can_advance(to) {
            return false;
        }
        self.state = to;
        if to == LifecycleState::OutreachSent {
            self.outreach_sent = true;
        }
        if to == LifecycleState::Applied {
            self.applied = true;
        }
        self.updated_at = Utc::now();
        true
    }
}

/// What to ask sources for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
}

/// Per-invocation counters, written once at the end of a run.
#[derive(Debug, Default, Clone, Serialize)]
pub struct RunMetrics {
    pub discovered: usize,
    pub duplicates: usize,
    pub tailored: usize,
    pub tailoring_failed: usize,
    pub outreach_sent: usize,
    pub outreach_failed: usize,
    pub applied: usize,
    /// Sources short-circuited mid-run after consecutive failures.
    pub circuit_broken: Vec<String>,
    /// Per-job and per-source error messages. Nothing fails silently.
    pub errors: Vec<String>,
}

impl RunMetrics {
    pub fn record_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn had_failures(&self) -> bool {
        !self.errors.is_empty() || !self.circuit_broken.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting() -> JobPosting {
        let mut p = JobPosting::new("Senior AI Engineer", "linkedin");
        p.company = Some("Acme".to_string());
        p.location = Some("Dubai".to_string());
        p
    }

    #[test]
    fn new_record_starts_unique_with_one_source() {
        let rec = JobRecord::new("fp1".into(), posting(), Some(20_000));
        assert_eq!(rec.state, LifecycleState::Unique);
        assert_eq!(rec.sources, vec!["linkedin"]);
        assert!(!rec.applied);
        assert!(rec.id.is_none());
    }

    #[test]
    fn note_sighting_appends_new_sources_only() {
        let mut rec = JobRecord::new("fp1".into(), posting(), None);
        assert!(rec.note_sighting("indeed"));
        assert!(!rec.note_sighting("linkedin"));
        assert_eq!(rec.sources, vec!["linkedin", "indeed"]);
    }

    #[test]
    fn advance_sets_flags() {
        let mut rec = JobRecord::new("fp1".into(), posting(), None);
        assert!(rec.advance(LifecycleState::Tailored));
        assert!(rec.advance(LifecycleState::OutreachPending));
        assert!(rec.advance(LifecycleState::OutreachSent));
        assert!(rec.outreach_sent);
        assert!(rec.advance(LifecycleState::Applied));
        assert!(rec.applied);
    }

    #[test]
    fn advance_rejects_regression() {
        let mut rec = JobRecord::new("fp1".into(), posting(), None);
        rec.advance(LifecycleState::Tailored);
        assert!(!rec.advance(LifecycleState::TailoringFailed));
        assert_eq!(rec.state, LifecycleState::Tailored);
    }
}
