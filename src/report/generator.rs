//! Markdown and JSON rendering of analysis results.
//!
//! Each producer response knows how to render its own section; a full
//! report is the aggregate's three sections under a common header.

use crate::models::{
    AggregateResult, AnalysisRequest, ConventionResponse, PriorityResponse, ProducerResult,
    ReviewerResponse, SummaryResponse, TitleResponse,
};
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

/// A producer response that can render itself as a report section.
pub trait MarkdownSection {
    /// Section heading.
    const HEADING: &'static str;

    /// Section body, without the heading.
    fn body(&self) -> String;
}

impl MarkdownSection for TitleResponse {
    const HEADING: &'static str = "Suggested Title";

    fn body(&self) -> String {
        format!("> {}\n", self.result)
    }
}

impl MarkdownSection for SummaryResponse {
    const HEADING: &'static str = "Summary";

    fn body(&self) -> String {
        format!("{}\n", self.result)
    }
}

impl MarkdownSection for ReviewerResponse {
    const HEADING: &'static str = "Recommended Reviewers";

    fn body(&self) -> String {
        if self.result.is_empty() {
            return "_No reviewers recommended._\n".to_string();
        }

        let mut body = String::from("| Reviewer | Reason |\n|:---|:---|\n");
        for reviewer in &self.result {
            body.push_str(&format!(
                "| @{} | {} |\n",
                reviewer.username,
                escape_cell(&reviewer.reason)
            ));
        }
        body
    }
}

impl MarkdownSection for PriorityResponse {
    const HEADING: &'static str = "Review Priorities";

    fn body(&self) -> String {
        let mut body = String::new();
        for (rank, item) in self.result.priority.iter().enumerate() {
            body.push_str(&format!("{}. **{}**: {}\n", rank + 1, item.title, item.reason));
        }
        if body.is_empty() {
            body.push_str("_No priorities suggested._\n");
        }
        body
    }
}

impl MarkdownSection for ConventionResponse {
    const HEADING: &'static str = "Convention Check";

    fn body(&self) -> String {
        if self.result.is_empty() {
            return "No convention violations found.\n".to_string();
        }

        let mut body = String::from("| File | Rule | Message |\n|:---|:---|:---|\n");
        for violation in &self.result {
            body.push_str(&format!(
                "| `{}` | {} | {} |\n",
                violation.file,
                violation.rule,
                escape_cell(&violation.message)
            ));
        }
        body
    }
}

fn escape_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

/// Render one producer result as a section, marking fallbacks.
fn generate_section<T: MarkdownSection>(result: &ProducerResult<T>) -> String {
    let mut section = format!("## {}\n\n", T::HEADING);
    if let Some(reason) = result.reason() {
        section.push_str(&format!(
            "> ⚠️ Default value shown, the analysis was unavailable: {}\n\n",
            reason
        ));
    }
    section.push_str(&result.value().body());
    section.push('\n');
    section
}

fn generate_header(request: &AnalysisRequest) -> String {
    let mut header = String::from("# Otterlens Pull Request Analysis\n\n");
    header.push_str(&format!("- **Repository:** {}\n", request.repo_id));
    header.push_str(&format!(
        "- **Branches:** `{}` → `{}`\n",
        request.source, request.target
    ));
    header
}

/// Generate the Markdown report for a full analysis.
pub fn generate_markdown_report(request: &AnalysisRequest, aggregate: &AggregateResult) -> String {
    let mut output = generate_header(request);
    output.push_str(&format!(
        "- **Analysis Date:** {}\n\n",
        aggregate.analysis_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    if aggregate.has_errors {
        output.push_str(&format!(
            "**The analysis did not complete.** {}\n\n",
            aggregate
                .error_message
                .as_deref()
                .unwrap_or("All values below are defaults.")
        ));
    }

    output.push_str(&generate_section(&aggregate.title));
    output.push_str(&generate_section(&aggregate.reviewers));
    output.push_str(&generate_section(&aggregate.priority));
    output.push_str(&generate_footer());
    output
}

/// Generate the Markdown report for a single producer.
pub fn generate_producer_report<T: MarkdownSection>(
    request: &AnalysisRequest,
    result: &ProducerResult<T>,
) -> String {
    let mut output = generate_header(request);
    output.push('\n');
    output.push_str(&generate_section(result));
    output.push_str(&generate_footer());
    output
}

fn generate_footer() -> String {
    format!(
        "---\n\n_Generated by otterlens v{}_\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Generate a pretty-printed JSON document.
pub fn generate_json_report<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("Failed to serialize report to JSON")
}

/// Write rendered output to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
