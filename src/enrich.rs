use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::{keys, CredentialProvider};
use crate::error::{ConfigError, EnrichmentError};
use crate::models::JobRecord;

// --- Provider trait ---

pub trait AIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, EnrichmentError>;
    fn model_name(&self) -> &str;
}

/// Pick a provider from the configured model name. "claude-*" goes to the
/// Anthropic API, "gpt-*"/"o*" to OpenAI.
pub fn resolve_provider(
    model: &str,
    credentials: &dyn CredentialProvider,
    timeout: Duration,
) -> Result<Box<dyn AIProvider>, ConfigError> {
    if model.starts_with("claude") {
        let model_id = match model {
            "claude-sonnet" => "claude-sonnet-4-5-20250929",
            "claude-haiku" => "claude-haiku-4-5-20251001",
            other => other,
        };
        let api_key = credentials.get(keys::ANTHROPIC_API_KEY)?;
        Ok(Box::new(AnthropicProvider::new(
            model_id.to_string(),
            api_key,
            timeout,
        )))
    } else if model.starts_with("gpt") || model.starts_with('o') {
        let api_key = credentials.get(keys::OPENAI_API_KEY)?;
        Ok(Box::new(OpenAIProvider::new(
            model.to_string(),
            api_key,
            timeout,
        )))
    } else {
        Err(ConfigError::Invalid(format!(
            "unknown model '{model}', expected a claude-* or gpt-* name"
        )))
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> EnrichmentError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return EnrichmentError::RateLimited(format!("{status}: {body}"));
    }
    if status.is_client_error() && body.contains("policy") {
        return EnrichmentError::ContentPolicy(format!("{status}: {body}"));
    }
    EnrichmentError::Other(format!("{status}: {body}"))
}

fn classify_reqwest(err: reqwest::Error) -> EnrichmentError {
    EnrichmentError::Other(err.to_string())
}

// --- Anthropic provider ---

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicContentBlock {
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    content: Vec<AnthropicContentBlock>,
}

pub struct AnthropicProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl AnthropicProvider {
    pub fn new(model_id: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            api_key,
            model_id,
            client,
        }
    }
}

impl AIProvider for AnthropicProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, EnrichmentError> {
        let request = AnthropicRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let api_response: AnthropicResponse = response.json().map_err(classify_reqwest)?;
        api_response
            .content
            .first()
            .map(|block| block.text.clone())
            .ok_or_else(|| EnrichmentError::Other("empty response from Anthropic API".into()))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- OpenAI provider ---

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<OpenAIMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIResponseMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

pub struct OpenAIProvider {
    api_key: String,
    model_id: String,
    client: reqwest::blocking::Client,
}

impl OpenAIProvider {
    pub fn new(model_id: String, api_key: String, timeout: Duration) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            api_key,
            model_id,
            client,
        }
    }
}

impl AIProvider for OpenAIProvider {
    fn complete(&self, prompt: &str, max_tokens: u32) -> Result<String, EnrichmentError> {
        let request = OpenAIRequest {
            model: self.model_id.clone(),
            max_tokens,
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
        };

        let response = self
            .client
            .post(OPENAI_API_URL)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let api_response: OpenAIResponse = response.json().map_err(classify_reqwest)?;
        api_response
            .choices
            .first()
            .map(|choice| choice.message.content.clone())
            .ok_or_else(|| EnrichmentError::Other("no choices in OpenAI response".into()))
    }

    fn model_name(&self) -> &str {
        &self.model_id
    }
}

// --- Tailoring service ---

/// The operator's base resume / profile text.
#[derive(Debug, Clone)]
pub struct Profile {
    pub content: String,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::NotFound(path.display().to_string()))?;
        Ok(Self { content })
    }
}

/// What tailoring produced for one job.
#[derive(Debug, Clone)]
pub struct TailorOutput {
    pub resume_path: String,
    pub cover_letter_path: String,
    pub recruiter_email: Option<String>,
}

pub trait TailoringService {
    fn tailor(&self, record: &JobRecord, profile: &Profile)
        -> Result<TailorOutput, EnrichmentError>;
}

/// AI-backed tailoring: one structured completion per job, artifacts
/// written to disk only after the provider call succeeds.
pub struct AiTailor {
    provider: Box<dyn AIProvider>,
    artifact_dir: PathBuf,
}

impl AiTailor {
    pub fn new(provider: Box<dyn AIProvider>, artifact_dir: PathBuf) -> Self {
        Self {
            provider,
            artifact_dir,
        }
    }

    fn prompt(record: &JobRecord, profile: &Profile) -> String {
        let posting = &record.posting;
        format!(
            "You are an expert resume writer. Tailor the candidate's resume and write \
             a cover letter for the job below. Stay 100% truthful, only use facts from \
             the provided profile.\n\n\
             Return EXACTLY in this format:\n\
             RECRUITER_EMAIL: <email found in the posting, or NONE>\n\
             RESUME_DELTA:\n\
             <targeted changes and emphasis for this role>\n\
             COVER_LETTER:\n\
             <complete cover letter>\n\n\
             Job Title: {}\n\
             Company: {}\n\
             Location: {}\n\
             Salary: {}\n\n\
             Job Description:\n{}\n\n\
             Candidate Profile:\n{}",
            posting.title,
            posting.company.as_deref().unwrap_or("Unknown"),
            posting.location.as_deref().unwrap_or("Unknown"),
            posting.salary_text.as_deref().unwrap_or("Not listed"),
            posting.description.as_deref().unwrap_or("Not available"),
            profile.content,
        )
    }
}

impl TailoringService for AiTailor {
    fn tailor(
        &self,
        record: &JobRecord,
        profile: &Profile,
    ) -> Result<TailorOutput, EnrichmentError> {
        let prompt = Self::prompt(record, profile);
        let response = self.provider.complete(&prompt, 4096)?;
        let parsed = parse_tailor_response(&response);

        if parsed.resume_delta.trim().is_empty() && parsed.cover_letter.trim().is_empty() {
            return Err(EnrichmentError::Other(
                "model response had no usable sections".into(),
            ));
        }

        std::fs::create_dir_all(&self.artifact_dir)
            .map_err(|e| EnrichmentError::Other(format!("artifact dir: {e}")))?;

        let stem = artifact_stem(record);
        let resume_path = self.artifact_dir.join(format!("{stem}_resume.md"));
        let cover_letter_path = self.artifact_dir.join(format!("{stem}_cover_letter.md"));

        std::fs::write(&resume_path, parsed.resume_delta.trim())
            .map_err(|e| EnrichmentError::Other(format!("write resume: {e}")))?;
        std::fs::write(&cover_letter_path, parsed.cover_letter.trim())
            .map_err(|e| EnrichmentError::Other(format!("write cover letter: {e}")))?;

        info!(
            job = %record.posting.title,
            model = self.provider.model_name(),
            "artifacts generated"
        );

        let recruiter_email = parsed
            .recruiter_email
            .filter(|e| validate_email(e))
            .or_else(|| find_recruiter_email(record));

        Ok(TailorOutput {
            resume_path: resume_path.display().to_string(),
            cover_letter_path: cover_letter_path.display().to_string(),
            recruiter_email,
        })
    }
}

struct ParsedTailoring {
    recruiter_email: Option<String>,
    resume_delta: String,
    cover_letter: String,
}

fn parse_tailor_response(response: &str) -> ParsedTailoring {
    #[derive(PartialEq)]
    enum Section {
        None,
        Resume,
        CoverLetter,
    }

    let mut recruiter_email = None;
    let mut resume_delta = String::new();
    let mut cover_letter = String::new();
    let mut section = Section::None;

    for line in response.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("RECRUITER_EMAIL:") {
            let value = rest.trim();
            if !value.is_empty() && !value.eq_ignore_ascii_case("none") {
                recruiter_email = Some(value.to_string());
            }
            continue;
        }
        if trimmed.starts_with("RESUME_DELTA:") {
            section = Section::Resume;
            continue;
        }
        if trimmed.starts_with("COVER_LETTER:") {
            section = Section::CoverLetter;
            continue;
        }
        match section {
            Section::Resume => {
                resume_delta.push_str(line);
                resume_delta.push('\n');
            }
            Section::CoverLetter => {
                cover_letter.push_str(line);
                cover_letter.push('\n');
            }
            Section::None => {}
        }
    }

    ParsedTailoring {
        recruiter_email,
        resume_delta,
        cover_letter,
    }
}

fn artifact_stem(record: &JobRecord) -> String {
    let company = record.posting.company.as_deref().unwrap_or("unknown");
    let base = format!("{}_{}", company, record.posting.title);
    let mut stem = sanitize_filename(&base);
    stem.truncate(60);
    // Fingerprint prefix keeps retitled variants from clobbering each other
    format!("{}_{}", &record.fingerprint[..8.min(record.fingerprint.len())], stem)
}

/// Make a string safe as a filename on any OS.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            ' ' => '_',
            other => other,
        })
        .collect()
}

// --- Recruiter contact discovery ---

/// Look for a contact address in the posting itself, then fall back to
/// conventional hiring addresses at the company's likely domains.
pub fn find_recruiter_email(record: &JobRecord) -> Option<String> {
    if let Some(description) = record.posting.description.as_deref() {
        let re = regex::Regex::new(r"[\w.%+\-]+@[\w.\-]+\.\w{2,}").ok()?;
        if let Some(m) = re.find(description) {
            let candidate = m.as_str().to_string();
            if validate_email(&candidate) {
                return Some(candidate);
            }
        }
    }

    let company = record.posting.company.as_deref()?;
    let domain_base: String = company
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect();
    if domain_base.is_empty() {
        return None;
    }

    for tld in ["com", "co", "org"] {
        for prefix in ["careers", "jobs", "recruiting", "hr", "talent"] {
            let candidate = format!("{prefix}@{domain_base}.{tld}");
            if validate_email(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

pub fn validate_email(email: &str) -> bool {
    regex::Regex::new(r"^[a-zA-Z0-9._%+\-]+@[a-zA-Z0-9.\-]+\.[a-zA-Z]{2,}$")
        .map(|re| re.is_match(email))
        .unwrap_or(false)
}
