use std::collections::HashMap;

use tracing::debug;

use crate::fingerprint::{canonical_url, is_job_specific_url, NormalizePolicy};
use crate::models::{JobPosting, JobRecord};

/// In-memory fingerprint index, rebuilt from the durable store once per run
/// so dedup checks never cost a remote round-trip. The orchestrator is the
/// single writer; no two records ever share a fingerprint.
pub struct DedupIndex {
    records: HashMap<String, JobRecord>,
    /// Canonical posting URL to fingerprint. Catches same-source rescrapes
    /// whose title text drifted, since a per-posting URL is more stable
    /// than wording.
    by_url: HashMap<String, String>,
    policy: NormalizePolicy,
    /// Jaro-Winkler floor for treating two titles at the same company as
    /// the same job. None disables fuzzy matching.
    fuzzy_threshold: Option<f64>,
}

impl DedupIndex {
    pub fn new(policy: NormalizePolicy, fuzzy_threshold: Option<f64>) -> Self {
        Self {
            records: HashMap::new(),
            by_url: HashMap::new(),
            policy,
            fuzzy_threshold,
        }
    }

    pub fn from_records(
        records: Vec<JobRecord>,
        policy: NormalizePolicy,
        fuzzy_threshold: Option<f64>,
    ) -> Self {
        let mut index = Self::new(policy, fuzzy_threshold);
        for record in records {
            index.insert(record);
        }
        index
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn contains(&self, fingerprint: &str) -> bool {
        self.records.contains_key(fingerprint)
    }

    pub fn get(&self, fingerprint: &str) -> Option<&JobRecord> {
        self.records.get(fingerprint)
    }

    pub fn get_mut(&mut self, fingerprint: &str) -> Option<&mut JobRecord> {
        self.records.get_mut(fingerprint)
    }

    pub fn records(&self) -> impl Iterator<Item = &JobRecord> {
        self.records.values()
    }

    /// Find the fingerprint of an existing record matching this posting, if
    /// any: exact fingerprint, then canonical URL, then the fuzzy
    /// near-duplicate guard.
    pub fn resolve(&self, posting: &JobPosting, fingerprint: &str) -> Option<String> {
        if self.records.contains_key(fingerprint) {
            return Some(fingerprint.to_string());
        }

        if let Some(url) = posting.url.as_deref() {
            if is_job_specific_url(url) {
                if let Some(canon) = canonical_url(url) {
                    if let Some(fp) = self.by_url.get(&canon) {
                        return Some(fp.clone());
                    }
                }
            }
        }

        self.resolve_fuzzy(posting)
    }

    fn resolve_fuzzy(&self, posting: &JobPosting) -> Option<String> {
        let threshold = self.fuzzy_threshold?;
        let company = self
            .policy
            .normalize(posting.company.as_deref().unwrap_or(""));
        if company.is_empty() {
            return None;
        }
        let title = self.policy.normalize(&posting.title);

        for record in self.records.values() {
            let other_company = self
                .policy
                .normalize(record.posting.company.as_deref().unwrap_or(""));
            if other_company != company {
                continue;
            }
            let other_title = self.policy.normalize(&record.posting.title);
            let similarity = strsim::jaro_winkler(&title, &other_title);
            if similarity >= threshold {
                debug!(
                    title,
                    other_title, similarity, "fuzzy match treated as duplicate"
                );
                return Some(record.fingerprint.clone());
            }
        }
        None
    }

    /// Insert a record for a fingerprint not yet present. First writer
    /// wins: an existing record is left untouched and reported back.
    pub fn insert(&mut self, record: JobRecord) -> bool {
        if self.records.contains_key(&record.fingerprint) {
            return false;
        }
        self.register_url(&record);
        self.records.insert(record.fingerprint.clone(), record);
        true
    }

    /// Replace the record for its fingerprint. Applying the same record
    /// twice leaves the index in the same state.
    pub fn upsert(&mut self, record: JobRecord) {
        self.register_url(&record);
        self.records.insert(record.fingerprint.clone(), record);
    }

    fn register_url(&mut self, record: &JobRecord) {
        if let Some(url) = record.posting.url.as_deref() {
            if is_job_specific_url(url) {
                if let Some(canon) = canonical_url(url) {
                    self.by_url
                        .entry(canon)
                        .or_insert_with(|| record.fingerprint.clone());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    fn posting(title: &str, company: &str, url: Option<&str>) -> JobPosting {
        let mut p = JobPosting::new(title, "test");
        p.company = Some(company.to_string());
        p.location = Some("Dubai".to_string());
        p.url = url.map(String::from);
        p
    }

    fn record(title: &str, company: &str, url: Option<&str>) -> JobRecord {
        let p = posting(title, company, url);
        let fp = fingerprint(&p, &NormalizePolicy::default());
        JobRecord::new(fp, p, None)
    }

    #[test]
    fn first_writer_wins() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), None);
        let a = record("Engineer", "Acme", None);
        let fp = a.fingerprint.clone();
        assert!(index.insert(a));
        let mut b = record("Engineer", "Acme", None);
        b.notes = Some("second sighting".to_string());
        assert!(!index.insert(b));
        assert!(index.get(&fp).unwrap().notes.is_none());
    }

    #[test]
    fn resolves_by_canonical_url() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), None);
        index.insert(record(
            "Platform Engineer",
            "Acme",
            Some("https://linkedin.com/jobs/view/99?trk=a"),
        ));

        // Same posting rescraped with drifted title and new tracking params
        let p = posting(
            "Platform Engineer (Infra)",
            "Acme",
            Some("https://linkedin.com/jobs/view/99?trk=b"),
        );
        let fp = fingerprint(&p, &NormalizePolicy::default());
        assert!(index.resolve(&p, &fp).is_some());
    }

    #[test]
    fn search_urls_never_alias() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), None);
        index.insert(record(
            "Engineer",
            "Acme",
            Some("https://linkedin.com/comm/jobs/search?keywords=x"),
        ));
        let p = posting(
            "Manager",
            "Initech",
            Some("https://linkedin.com/comm/jobs/search?keywords=y"),
        );
        let fp = fingerprint(&p, &NormalizePolicy::default());
        assert!(index.resolve(&p, &fp).is_none());
    }

    #[test]
    fn fuzzy_guard_matches_close_titles_at_same_company() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), Some(0.95));
        index.insert(record("Senior Platform Engineer", "Acme", None));

        let p = posting("Senior Platform Engineeer", "Acme", None); // typo variant
        let fp = fingerprint(&p, &NormalizePolicy::default());
        assert!(index.resolve(&p, &fp).is_some());

        // Same title at another company is a different job
        let q = posting("Senior Platform Engineer", "Initech", None);
        let fq = fingerprint(&q, &NormalizePolicy::default());
        assert!(index.resolve(&q, &fq).is_none());
    }

    #[test]
    fn fuzzy_guard_disabled_when_unset() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), None);
        index.insert(record("Senior Platform Engineer", "Acme", None));
        let p = posting("Senior Platform Engineeer", "Acme", None);
        let fp = fingerprint(&p, &NormalizePolicy::default());
        assert!(index.resolve(&p, &fp).is_none());
    }

    #[test]
    fn upsert_is_idempotent() {
        let mut index = DedupIndex::new(NormalizePolicy::default(), None);
        let mut rec = record("Engineer", "Acme", None);
        rec.salary_aed = Some(20_000);
        index.upsert(rec.clone());
        index.upsert(rec.clone());
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&rec.fingerprint).unwrap().salary_aed, Some(20_000));
    }
}
