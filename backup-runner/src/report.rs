//! Run report: the ordered list of outcomes an operator reads after a run.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportEntry {
    pub severity: Severity,
    /// Unit of work the entry is about, e.g. `dir site` or `storage nas`
    pub subject: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Report {
    entries: Vec<ReportEntry>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn success(&mut self, subject: impl Into<String>, message: impl Into<String>) {
        let entry = ReportEntry {
            severity: Severity::Success,
            subject: subject.into(),
            message: message.into(),
            detail: None,
        };
        tracing::info!(subject = %entry.subject, "{}", entry.message);
        self.entries.push(entry);
    }

    pub fn error(
        &mut self,
        subject: impl Into<String>,
        message: impl Into<String>,
        detail: impl fmt::Display,
    ) {
        let entry = ReportEntry {
            severity: Severity::Error,
            subject: subject.into(),
            message: message.into(),
            detail: Some(detail.to_string()),
        };
        tracing::error!(subject = %entry.subject, detail = ?entry.detail, "{}", entry.message);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn error_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.severity == Severity::Error)
            .count()
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }

    /// Inline-styled HTML, one block per entry, errors highlighted.
    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for entry in &self.entries {
            let style = match entry.severity {
                Severity::Success => {
                    "padding: 6px 10px 3px; margin: 4px 0; border-top: 1px solid #ccc;"
                }
                Severity::Error => {
                    "padding: 6px 10px 3px; margin: 4px 0; background: #F55641; color: #fff;"
                }
            };
            html.push_str(&format!(
                "<div style=\"{}\"><b>{}</b>: {}",
                style,
                escape_html(&entry.subject),
                escape_html(&entry.message)
            ));
            if let Some(detail) = &entry.detail {
                html.push_str(&format!("<br><hr><pre>{}</pre>", escape_html(detail)));
            }
            html.push_str("</div>\n");
        }
        html
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            let tag = match entry.severity {
                Severity::Success => "OK   ",
                Severity::Error => "ERROR",
            };
            write!(f, "[{}] {}: {}", tag, entry.subject, entry.message)?;
            if let Some(detail) = &entry.detail {
                write!(f, " ({})", detail)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
