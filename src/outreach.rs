use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use tracing::info;

use crate::error::OutreachError;
use crate::models::JobRecord;

const GMAIL_SEND_URL: &str = "https://gmail.googleapis.com/gmail/v1/users/me/messages/send";

/// Artifact paths handed to the send collaborator.
#[derive(Debug, Clone)]
pub struct Artifacts {
    pub resume_path: Option<String>,
    pub cover_letter_path: Option<String>,
}

impl Artifacts {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            resume_path: record.resume_path.clone(),
            cover_letter_path: record.cover_letter_path.clone(),
        }
    }
}

/// Sends one cold outreach email per job. Success means the collaborator
/// confirmed delivery was accepted; anything else leaves the record in
/// OutreachPending for a later run.
pub trait OutreachService {
    fn send(&self, record: &JobRecord, artifacts: &Artifacts) -> Result<(), OutreachError>;
}

/// Gmail REST sender: the RFC822 message goes up base64url-encoded with a
/// bearer token. The cover letter is inlined into the body; the resume is
/// referenced by path for the operator's records.
pub struct GmailOutreach {
    client: reqwest::blocking::Client,
    token: String,
    sender: String,
    applicant_name: String,
}

impl GmailOutreach {
    pub fn new(
        token: String,
        sender: String,
        applicant_name: String,
        timeout: std::time::Duration,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self {
            client,
            token,
            sender,
            applicant_name,
        }
    }
}

impl OutreachService for GmailOutreach {
    fn send(&self, record: &JobRecord, artifacts: &Artifacts) -> Result<(), OutreachError> {
        let to = record
            .recruiter_email
            .as_deref()
            .ok_or_else(|| OutreachError::Rejected("no recruiter contact on record".into()))?;

        let title = &record.posting.title;
        let company = record.posting.company.as_deref().unwrap_or("your company");
        let subject = subject_line(title, company);
        let body = cold_email_body(title, company, artifacts, &self.applicant_name);
        let raw = rfc822_message(&self.sender, to, &subject, &body);

        let response = self
            .client
            .post(GMAIL_SEND_URL)
            .bearer_auth(&self.token)
            .json(&serde_json::json!({ "raw": URL_SAFE_NO_PAD.encode(raw) }))
            .send()
            .map_err(|e| OutreachError::Rejected(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            info!(to, subject, "outreach email accepted");
            return Ok(());
        }
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            return Err(OutreachError::Auth(format!("{status} from Gmail API")));
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OutreachError::RateLimited(format!(
                "{status} from Gmail API"
            )));
        }
        let body = response.text().unwrap_or_default();
        Err(OutreachError::Rejected(format!("{status}: {body}")))
    }
}

pub fn subject_line(job_title: &str, company: &str) -> String {
    format!("Application for {job_title} Position at {company}")
}

pub fn cold_email_body(
    job_title: &str,
    company: &str,
    artifacts: &Artifacts,
    applicant_name: &str,
) -> String {
    let cover_letter = artifacts
        .cover_letter_path
        .as_deref()
        .and_then(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_default();

    let mut body = format!(
        "Dear Hiring Manager,\n\n\
         I hope this email finds you well. I am writing to express my strong interest \
         in the {job_title} position at {company}.\n\n"
    );
    if !cover_letter.trim().is_empty() {
        body.push_str(cover_letter.trim());
        body.push_str("\n\n");
    }
    if let Some(resume) = artifacts.resume_path.as_deref() {
        body.push_str(&format!("My tailored resume is available at: {resume}\n\n"));
    }
    body.push_str(&format!(
        "Thank you for your time and consideration. I look forward to hearing from you.\n\n\
         Best regards,\n{applicant_name}\n"
    ));
    body
}

fn rfc822_message(from: &str, to: &str, subject: &str, body: &str) -> String {
    format!(
        "From: {from}\r\nTo: {to}\r\nSubject: {subject}\r\n\
         MIME-Version: 1.0\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobPosting;

    #[test]
    fn subject_names_role_and_company() {
        assert_eq!(
            subject_line("Platform Engineer", "Acme"),
            "Application for Platform Engineer Position at Acme"
        );
    }

    #[test]
    fn body_inlines_cover_letter_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let letter = dir.path().join("letter.md");
        std::fs::write(&letter, "I built the exact platform you run.").unwrap();

        let artifacts = Artifacts {
            resume_path: Some("artifacts/resume.md".to_string()),
            cover_letter_path: Some(letter.display().to_string()),
        };
        let body = cold_email_body("Platform Engineer", "Acme", &artifacts, "Zakariya");
        assert!(body.contains("Platform Engineer position at Acme"));
        assert!(body.contains("I built the exact platform you run."));
        assert!(body.contains("artifacts/resume.md"));
        assert!(body.ends_with("Zakariya\n"));
    }

    #[test]
    fn body_survives_missing_artifacts() {
        let artifacts = Artifacts {
            resume_path: None,
            cover_letter_path: Some("/nonexistent/letter.md".to_string()),
        };
        let body = cold_email_body("Engineer", "Acme", &artifacts, "Zakariya");
        assert!(body.contains("Dear Hiring Manager"));
        assert!(!body.contains("resume is available"));
    }

    #[test]
    fn rfc822_message_has_headers_and_body() {
        let msg = rfc822_message("me@x.com", "you@y.com", "Hello", "Body text");
        assert!(msg.starts_with("From: me@x.com\r\nTo: you@y.com\r\nSubject: Hello\r\n"));
        assert!(msg.ends_with("\r\n\r\nBody text"));
    }

    #[test]
    fn send_requires_recruiter_contact() {
        let outreach = GmailOutreach::new(
            "token".into(),
            "me@x.com".into(),
            "Zakariya".into(),
            std::time::Duration::from_secs(5),
        );
        let posting = JobPosting::new("Engineer", "indeed");
        let record = JobRecord::new("fp".into(), posting, None);
        let artifacts = Artifacts::from_record(&record);
        assert!(matches!(
            outreach.send(&record, &artifacts),
            Err(OutreachError::Rejected(_))
        ));
    }
}
