use std::time::Duration;

use scraper::{Html, Selector};
use tracing::{debug, warn};

use crate::error::SourceError;
use crate::models::{JobPosting, SearchQuery};

/// A job board or other discovery channel. Adapters stay thin: they fetch
/// and extract raw postings, nothing more. Failures are classified so the
/// retry executor can tell transient trouble from a dead login.
pub trait SourceAdapter {
    fn name(&self) -> &str;
    fn fetch(&self, query: &SearchQuery) -> Result<Vec<JobPosting>, SourceError>;
}

/// Indeed-style board scraped over plain HTTP. One request per
/// keyword/location pair, job cards extracted by CSS selector.
pub struct HttpBoardSource {
    name: String,
    base_url: String,
    client: reqwest::blocking::Client,
}

impl HttpBoardSource {
    pub fn new(name: &str, base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| SourceError::Unavailable(e.to_string()))?;
        Ok(Self {
            name: name.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn search_page(&self, keywords: &str, location: &str) -> Result<String, SourceError> {
        let url = format!(
            "{}/jobs?q={}&l={}",
            self.base_url,
            urlencode(keywords),
            urlencode(location)
        );
        debug!(source = %self.name, %url, "fetching board page");

        let response = self.client.get(&url).send().map_err(classify_reqwest)?;
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(format!("{status} from {url}")));
        }
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!("{status} from {url}")));
        }
        response.text().map_err(classify_reqwest)
    }

    fn extract_cards(&self, html: &str) -> Vec<JobPosting> {
        let document = Html::parse_document(html);
        let card_selector = match Selector::parse("div.job_seen_beacon") {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let title_sel = Selector::parse("h2.jobTitle").ok();
        let company_sel = Selector::parse("span.companyName").ok();
        let location_sel = Selector::parse("div.companyLocation").ok();
        let link_sel = Selector::parse("a.jcs-JobTitle").ok();
        let salary_sel = Selector::parse("div.salary-snippet").ok();
        let snippet_sel = Selector::parse("div.job-snippet").ok();

        let mut postings = Vec::new();
        for card in document.select(&card_selector) {
            let text_of = |sel: &Option<Selector>| {
                sel.as_ref().and_then(|s| {
                    card.select(s)
                        .next()
                        .map(|el| el.text().collect::<Vec<_>>().join(" ").trim().to_string())
                        .filter(|t| !t.is_empty())
                })
            };

            let Some(title) = text_of(&title_sel) else {
                continue;
            };

            let mut posting = JobPosting::new(title, self.name.clone());
            posting.company = text_of(&company_sel);
            posting.location = text_of(&location_sel);
            posting.salary_text = text_of(&salary_sel);
            posting.description = text_of(&snippet_sel);
            posting.url = link_sel.as_ref().and_then(|s| {
                card.select(s)
                    .next()
                    .and_then(|el| el.value().attr("href"))
                    .map(|href| absolutize(&self.base_url, href))
            });
            postings.push(posting);
        }
        postings
    }
}

impl SourceAdapter for HttpBoardSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, query: &SearchQuery) -> Result<Vec<JobPosting>, SourceError> {
        let mut postings = Vec::new();
        for keywords in &query.keywords {
            for location in &query.locations {
                let html = self.search_page(keywords, location)?;
                let cards = self.extract_cards(&html);
                if cards.is_empty() {
                    warn!(source = %self.name, keywords, location, "no job cards extracted");
                }
                postings.extend(cards);
            }
        }
        Ok(postings)
    }
}

fn classify_reqwest(err: reqwest::Error) -> SourceError {
    if err.is_timeout() {
        SourceError::Timeout(err.to_string())
    } else {
        SourceError::Unavailable(err.to_string())
    }
}

fn absolutize(base: &str, href: &str) -> String {
    if href.starts_with("http://") || href.starts_with("https://") {
        href.to_string()
    } else {
        format!("{base}{href}")
    }
}

fn urlencode(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '~' => out.push(ch),
            ' ' => out.push('+'),
            _ => {
                let mut buf = [0u8; 4];
                for byte in ch.encode_utf8(&mut buf).bytes() {
                    out.push_str(&format!("%{byte:02X}"));
                }
            }
        }
    }
    out
}
