use mailparse::{parse_mail, MailHeaderMap};
use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::config::EmailAlertConfig;
use crate::error::SourceError;
use crate::fingerprint::canonical_url;
use crate::models::JobPosting;

/// A channel carrying inbound job-alert messages. Messages are marked
/// consumed only after the orchestrator confirms the batch was ingested,
/// so a crash between fetch and commit redelivers rather than loses.
pub trait AlertChannelAdapter {
    fn name(&self) -> &str;
    fn fetch_new(&self) -> Result<AlertBatch, SourceError>;
    fn mark_consumed(&self, message_uids: &[u32]) -> Result<(), SourceError>;
}

pub struct AlertBatch {
    pub postings: Vec<JobPosting>,
    pub message_uids: Vec<u32>,
}

/// IMAP-backed alert channel for LinkedIn/Indeed job-alert emails.
pub struct EmailAlertChannel {
    config: EmailAlertConfig,
    password: String,
}

impl EmailAlertChannel {
    pub fn new(config: EmailAlertConfig, password: String) -> Self {
        Self { config, password }
    }

    fn session(
        &self,
    ) -> Result<imap::Session<native_tls::TlsStream<std::net::TcpStream>>, SourceError> {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let addr = (self.config.server.as_str(), self.config.port);
        let tcp = std::net::TcpStream::connect(addr)
            .map_err(|e| SourceError::Unavailable(format!("imap connect: {e}")))?;
        tcp.set_read_timeout(Some(std::time::Duration::from_secs(30)))
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        tcp.set_write_timeout(Some(std::time::Duration::from_secs(30)))
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let tls_stream = tls
            .connect(&self.config.server, tcp)
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;

        let client = imap::Client::new(tls_stream);
        let mut session = client
            .login(&self.config.username, &self.password)
            .map_err(|e| SourceError::Auth(format!("imap login: {}", e.0)))?;
        session
            .select("INBOX")
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(session)
    }
}

impl AlertChannelAdapter for EmailAlertChannel {
    fn name(&self) -> &str {
        "email"
    }

    fn fetch_new(&self) -> Result<AlertBatch, SourceError> {
        let mut session = self.session()?;

        let since = chrono::Utc::now() - chrono::Duration::days(self.config.lookback_days as i64);
        let date_str = since.format("%d-%b-%Y").to_string();
        let queries = [
            format!("UNSEEN FROM \"jobs-noreply@linkedin.com\" SINCE {date_str}"),
            format!("UNSEEN FROM \"linkedin.com\" SUBJECT \"job\" SINCE {date_str}"),
            format!("UNSEEN FROM \"indeed.com\" SINCE {date_str}"),
        ];

        let mut uids: Vec<u32> = Vec::new();
        for query in &queries {
            match session.uid_search(query) {
                Ok(found) => {
                    for uid in found {
                        if !uids.contains(&uid) {
                            uids.push(uid);
                        }
                    }
                }
                Err(e) => warn!(query, error = %e, "alert search failed"),
            }
        }
        debug!(count = uids.len(), "alert messages to scan");

        let mut postings = Vec::new();
        for uid in &uids {
            let messages = session
                .uid_fetch(uid.to_string(), "RFC822")
                .map_err(|e| SourceError::Unavailable(e.to_string()))?;
            for message in messages.iter() {
                if let Some(body) = message.body() {
                    match parse_alert_message(body) {
                        Ok(found) => postings.extend(found),
                        Err(e) => warn!(uid, error = %e, "failed to parse alert message"),
                    }
                }
            }
        }

        let _ = session.logout();
        Ok(AlertBatch {
            postings,
            message_uids: uids,
        })
    }

    fn mark_consumed(&self, message_uids: &[u32]) -> Result<(), SourceError> {
        if message_uids.is_empty() {
            return Ok(());
        }
        let mut session = self.session()?;
        let set = message_uids
            .iter()
            .map(|u| u.to_string())
            .collect::<Vec<_>>()
            .join(",");
        session
            .uid_store(&set, "+FLAGS (\\Seen)")
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        let _ = session.logout();
        Ok(())
    }
}

/// Parse one raw alert message into postings. Routing is by sender domain;
/// unknown senders fall back to the generic text extractor.
pub fn parse_alert_message(raw: &[u8]) -> anyhow::Result<Vec<JobPosting>> {
    let parsed = parse_mail(raw)?;
    let from = parsed
        .headers
        .get_first_value("From")
        .unwrap_or_default()
        .to_lowercase();

    let body = message_body(&parsed)?;

    let postings = if from.contains("linkedin.com") {
        parse_linkedin_alert(&body)
    } else if from.contains("indeed.com") {
        parse_indeed_alert(&body)
    } else {
        parse_generic_alert(&body)
    };
    Ok(postings)
}

fn message_body(parsed: &mailparse::ParsedMail) -> anyhow::Result<String> {
    if parsed.subparts.is_empty() {
        return Ok(parsed.get_body()?);
    }
    // Prefer the HTML part, fall back to plain text, then first part
    for want in ["text/html", "text/plain"] {
        for part in &parsed.subparts {
            let content_type = part
                .headers
                .get_first_value("Content-Type")
                .unwrap_or_default();
            if content_type.contains(want) {
                return Ok(part.get_body()?);
            }
        }
    }
    match parsed.subparts.first() {
        Some(part) => Ok(part.get_body()?),
        None => anyhow::bail!("no message body found"),
    }
}

fn parse_linkedin_alert(body: &str) -> Vec<JobPosting> {
    let document = Html::parse_document(body);
    let mut postings = Vec::new();

    let Ok(selector) = Selector::parse("a[href*='linkedin.com/comm/jobs']") else {
        return postings;
    };

    for element in document.select(&selector) {
        let href = element.value().attr("href").unwrap_or("");
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.trim();

        if text.is_empty() || is_navigation_artifact(text) || is_search_link(href) {
            continue;
        }

        let (title, company, location) = match split_title_company_location(text) {
            Some(parts) => parts,
            None => {
                let (title, company) = split_title_at_company(text);
                (title, company, None)
            }
        };
        if title.is_empty() {
            continue;
        }

        let mut posting = JobPosting::new(title, "linkedin");
        posting.company = company;
        posting.location = location;
        posting.salary_text = salary_fragment(text);
        posting.url = canonical_url(href);
        posting.description = Some(text.to_string());
        postings.push(posting);
    }

    if postings.is_empty() {
        let text = document.root_element().text().collect::<Vec<_>>().join(" ");
        postings = extract_postings_from_text(&text, "linkedin");
    }

    dedup_by_title(postings)
}

fn parse_indeed_alert(body: &str) -> Vec<JobPosting> {
    let document = Html::parse_document(body);
    let mut postings = Vec::new();

    let Ok(selector) = Selector::parse("a[href*='indeed.com']") else {
        return postings;
    };

    for element in document.select(&selector) {
        let href = element.value().attr("href").unwrap_or("");
        let text = element.text().collect::<Vec<_>>().join(" ");
        let text = text.trim();

        if text.is_empty() || is_navigation_artifact(text) || is_search_link(href) {
            continue;
        }
        // Only per-posting links count; everything else in the email is chrome
        if !(href.contains("/viewjob") || href.contains("/rc/clk") || href.contains("jk=")) {
            continue;
        }

        let (title, company) = split_title_at_company(text);
        if title.is_empty() {
            continue;
        }

        let mut posting = JobPosting::new(title, "indeed");
        posting.company = company;
        posting.salary_text = salary_fragment(text);
        posting.url = canonical_url(href);
        posting.description = Some(text.to_string());
        postings.push(posting);
    }

    dedup_by_title(postings)
}

fn parse_generic_alert(body: &str) -> Vec<JobPosting> {
    let document = Html::parse_document(body);
    let text = document.root_element().text().collect::<Vec<_>>().join(" ");
    extract_postings_from_text(&text, "email")
}

fn extract_postings_from_text(text: &str, source: &str) -> Vec<JobPosting> {
    let pattern = r"(?i)(senior|staff|principal|lead|junior|sr\.?|jr\.?)?\s*(software|devops|platform|infrastructure|site reliability|sre|cloud|backend|frontend|full[- ]?stack|data|ml|machine learning|ai)\s*(engineer|developer|architect|manager|lead|specialist)";
    let Ok(re) = regex::Regex::new(pattern) else {
        return Vec::new();
    };

    let mut postings = Vec::new();
    for cap in re.captures_iter(text) {
        if let Some(m) = cap.get(0) {
            let title = m.as_str().trim().to_string();
            if title.len() > 5 {
                let mut posting = JobPosting::new(title, source);
                posting.salary_text = salary_fragment(text);
                postings.push(posting);
            }
        }
    }
    dedup_by_title(postings)
}

/// Pull the salary-looking fragment out of alert text, if any, so the
/// salary normalizer can work on it later.
fn salary_fragment(text: &str) -> Option<String> {
    let re = regex::Regex::new(
        r"(?i)(aed|usd|cad|eur|gbp|\$)\s?[\d,.]+\s*k?(\s*(a|per)\s+(month|year|annum))?",
    )
    .ok()?;
    re.find(text).map(|m| m.as_str().trim().to_string())
}

fn dedup_by_title(mut postings: Vec<JobPosting>) -> Vec<JobPosting> {
    let mut seen = std::collections::HashSet::new();
    postings.retain(|p| seen.insert(p.title.to_lowercase()));
    postings
}

fn is_navigation_artifact(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.len() < 10 {
        return true;
    }
    let lower = trimmed.to_lowercase();

    let exact = [
        "search for jobs",
        "see all jobs",
        "view all",
        "search other jobs",
        "jobs",
    ];
    if exact.contains(&lower.as_str()) {
        return true;
    }

    if lower.starts_with("jobs similar to")
        || lower.starts_with("jobs in ")
        || lower.starts_with("manage job")
        || lower.contains("unsubscribe")
        || lower.contains("privacy")
    {
        return true;
    }

    // Titles ending in " jobs" are search-result links, not postings
    trimmed.to_lowercase().ends_with(" jobs")
}

fn is_search_link(url: &str) -> bool {
    url.contains("/jobs/search") || url.contains("/search?") || url.contains("/jobs/alerts")
}

/// LinkedIn alert rows look like "Title        Company · Location": runs of
/// two or more spaces split title from company, a middot splits company
/// from location.
fn split_title_company_location(text: &str) -> Option<(String, Option<String>, Option<String>)> {
    let text = text.trim();
    let middot_idx = text.find('·')?;
    let before = text[..middot_idx].trim();
    let location = text[middot_idx + '·'.len_utf8()..].trim().to_string();

    let re = regex::Regex::new(r"\s{2,}").ok()?;
    let split = re.find_iter(before).last()?;
    let title = before[..split.start()].trim().to_string();
    let company = before[split.end()..].trim().to_string();
    if title.is_empty() || company.is_empty() {
        return None;
    }
    Some((title, Some(company), Some(location)))
}

/// Fallback patterns: "Title at Company", "Title - Company", "Title, Company".
fn split_title_at_company(text: &str) -> (String, Option<String>) {
    let text = text.trim();

    if let Some((title, company, _)) = split_title_company_location(text) {
        return (title, company);
    }

    if let Some(idx) = text.to_lowercase().find(" at ") {
        let title = text[..idx].trim().to_string();
        let company = text[idx + 4..].trim().to_string();
        if !company.is_empty() {
            return (title, Some(company));
        }
    }

    if let Some(idx) = text.rfind(" - ") {
        let title = text[..idx].trim().to_string();
        let company = text[idx + 3..].trim().to_string();
        let lower = company.to_lowercase();
        if !company.is_empty() && !lower.contains("engineer") && !lower.contains("developer") {
            return (title, Some(company));
        }
    }

    if let Some(idx) = text.rfind(", ") {
        let company = text[idx + 2..].trim();
        if !company.is_empty()
            && company.len() < 50
            && !company.contains("Remote")
            && !company.contains("Hybrid")
        {
            return (text[..idx].trim().to_string(), Some(company.to_string()));
        }
    }

    (text.to_string(), None)
}
