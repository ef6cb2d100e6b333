use sha2::{Digest, Sha256};

use crate::models::JobPosting;

/// Controls how posting text is normalized before hashing. Near-duplicate
/// collapsing is a policy, not a fixed algorithm: the alias table decides
/// which title variants count as the same job.
#[derive(Debug, Clone)]
pub struct NormalizePolicy {
    /// Token-level replacements applied after lowercasing. Keys are matched
    /// with trailing punctuation stripped, so "sr." and "sr" both expand.
    aliases: Vec<(String, String)>,
}

impl Default for NormalizePolicy {
    fn default() -> Self {
        let aliases = [
            ("sr", "senior"),
            ("jr", "junior"),
            ("eng", "engineer"),
            ("engr", "engineer"),
            ("mgr", "manager"),
            ("dev", "developer"),
            ("swe", "software engineer"),
            ("ml", "machine learning"),
        ];
        Self {
            aliases: aliases
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl NormalizePolicy {
    pub fn with_aliases(extra: &[(String, String)]) -> Self {
        let mut policy = Self::default();
        policy.aliases.extend(extra.iter().cloned());
        policy
    }

    /// Lowercase, collapse whitespace, expand known abbreviations.
    pub fn normalize(&self, text: &str) -> String {
        let lower = text.to_lowercase();
        let mut out: Vec<&str> = Vec::new();
        for token in lower.split_whitespace() {
            let bare = token.trim_matches(|c: char| c == '.' || c == ',');
            match self.aliases.iter().find(|(k, _)| k == bare) {
                Some((_, v)) => out.push(v.as_str()),
                None => out.push(token),
            }
        }
        out.join(" ")
    }
}

/// Derive the stable identity key for a posting. Pure and total: missing
/// fields hash as empty strings, so even a company-less posting is
/// fingerprintable (with an accepted higher collision risk).
///
/// The key is text-based (normalized title, company, location) so the same
/// job seen on two boards collapses to one record. A per-posting URL is
/// used only when the text fields are too sparse to identify anything;
/// same-source rescrapes with reworded titles are instead caught by the
/// dedup index's canonical-URL alias table.
pub fn fingerprint(posting: &JobPosting, policy: &NormalizePolicy) -> String {
    let title = policy.normalize(&posting.title);
    let company = policy.normalize(posting.company.as_deref().unwrap_or(""));
    let location = policy.normalize(posting.location.as_deref().unwrap_or(""));

    if title.is_empty() && company.is_empty() {
        if let Some(url) = posting.url.as_deref().and_then(canonical_url) {
            return digest(&format!("url|{url}"));
        }
    }

    digest(&format!("{title}|{company}|{location}"))
}

fn digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let full = hex::encode(hasher.finalize());
    full[..16].to_string()
}

/// Strip tracking query parameters and fragments, which change per email
/// while pointing at the same posting.
pub fn canonical_url(url: &str) -> Option<String> {
    let url = url.trim();
    if url.is_empty() {
        return None;
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    Some(url[..end].trim_end_matches('/').to_string())
}

/// Whether a URL points at one specific posting rather than a search page
/// or alert-management link. Known per-posting shapes per source.
pub fn is_job_specific_url(url: &str) -> bool {
    if url.contains("/jobs/search") || url.contains("/search?") || url.contains("/jobs/alerts") {
        return false;
    }
    url.contains("/jobs/view/")
        || url.contains("/viewjob")
        || url.contains("jk=")
        || url.contains("/job/")
        || url.contains("/rc/clk")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn posting(title: &str, company: &str, location: &str) -> JobPosting {
        let mut p = JobPosting::new(title, "test");
        p.company = Some(company.to_string());
        p.location = Some(location.to_string());
        p
    }

    #[test]
    fn equivalent_postings_share_a_fingerprint() {
        let policy = NormalizePolicy::default();
        let a = posting("Senior AI Engineer", "Acme", "Dubai");
        let b = posting("Sr. AI Engineer", "ACME", "dubai");
        assert_eq!(fingerprint(&a, &policy), fingerprint(&b, &policy));
    }

    #[test]
    fn whitespace_and_case_do_not_matter() {
        let policy = NormalizePolicy::default();
        let a = posting("Platform  Engineer", "Grow  Therapy", "New York");
        let b = posting("platform engineer", "grow therapy", "new york");
        assert_eq!(fingerprint(&a, &policy), fingerprint(&b, &policy));
    }

    #[test]
    fn distinct_jobs_do_not_collide() {
        let policy = NormalizePolicy::default();
        let a = posting("Senior AI Engineer", "Acme", "Dubai");
        let b = posting("Senior AI Engineer", "Initech", "Dubai");
        let c = posting("Staff AI Engineer", "Acme", "Dubai");
        assert_ne!(fingerprint(&a, &policy), fingerprint(&b, &policy));
        assert_ne!(fingerprint(&a, &policy), fingerprint(&c, &policy));
    }

    #[test]
    fn missing_fields_do_not_panic() {
        let policy = NormalizePolicy::default();
        let p = JobPosting::new("Engineer", "test");
        let fp = fingerprint(&p, &policy);
        assert_eq!(fp.len(), 16);
    }

    #[test]
    fn sparse_posting_falls_back_to_url() {
        let policy = NormalizePolicy::default();
        let mut a = JobPosting::new("", "test");
        a.url = Some("https://www.linkedin.com/jobs/view/123?refId=x".to_string());
        let mut b = JobPosting::new("", "test");
        b.url = Some("https://www.linkedin.com/jobs/view/123?refId=y".to_string());
        assert_eq!(fingerprint(&a, &policy), fingerprint(&b, &policy));

        let mut c = JobPosting::new("", "test");
        c.url = Some("https://www.linkedin.com/jobs/view/456".to_string());
        assert_ne!(fingerprint(&a, &policy), fingerprint(&c, &policy));
    }

    #[test]
    fn canonical_url_strips_tracking() {
        assert_eq!(
            canonical_url("https://x.com/jobs/view/9?trk=email#top"),
            Some("https://x.com/jobs/view/9".to_string())
        );
        assert_eq!(canonical_url("  "), None);
    }

    #[test]
    fn job_specific_url_detection() {
        assert!(is_job_specific_url("https://www.linkedin.com/jobs/view/123"));
        assert!(is_job_specific_url("https://www.indeed.com/viewjob?jk=abc"));
        assert!(is_job_specific_url("https://www.bayt.com/en/uae/job/sre-123/"));
        assert!(!is_job_specific_url("https://www.linkedin.com/comm/jobs/search?keywords=x"));
        assert!(!is_job_specific_url("https://www.linkedin.com/comm/jobs/alerts"));
    }

    #[test]
    fn alias_expansion_is_token_scoped() {
        let policy = NormalizePolicy::default();
        // "senior" must not be touched, "sr." must expand
        assert_eq!(policy.normalize("Sr. Engineer"), "senior engineer");
        assert_eq!(policy.normalize("Señor Developer"), "señor developer");
    }
}
