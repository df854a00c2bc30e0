//! Terminal and JSON rendering for jobs, reports and store status.
//!
//! Everything here returns a `String`; callers decide where it goes.

use std::fmt::Write as _;

use serde::Serialize;
use serde_json::json;

use crate::{
    collection::Collection,
    config::SectionSettings,
    error::Result,
    job::{Job, JobOutcome},
    jobs::ApplicationSummary,
    rules::ValidationReport,
    text_util::{DEFAULT_PREVIEW_MAX_CHARS, truncate_chars},
};

/// A collection with its stored chunk count.
#[derive(Debug, Clone, Serialize)]
pub struct CollectionStatus {
    #[serde(flatten)]
    pub collection: Collection,
    pub chunks: u64,
}

pub fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

pub fn format_report(report: &ValidationReport) -> String {
    let mut out = format!("Score: {:.0}/100  {}\n", report.score, report.grade.label());
    if report.violations.is_empty() {
        out.push_str("No issues found.\n");
        return out;
    }
    let _ = writeln!(out, "\n{} issue(s):", report.violations.len());
    for v in &report.violations {
        let _ = writeln!(out, "  -{:<3} {}", v.penalty, v.detail);
        if !v.remediation.is_empty() {
            let _ = writeln!(out, "       {}", v.remediation);
        }
    }
    out
}

/// Summary of a job; `full` prints the whole draft instead of a preview.
pub fn format_job(job: &Job, full: bool) -> String {
    let mut out = format!("Job {}  [{}]  {}\n", job.id, job.state, job.section);
    if job.is_degraded() {
        let names: Vec<&str> = job.degraded.iter().map(|d| d.collection.as_str()).collect();
        let _ = writeln!(out, "Degraded: {}", names.join(", "));
    }
    for attempt in &job.attempts {
        let _ = writeln!(
            out,
            "  attempt {}: {:.0}/100 ({} issue(s))",
            attempt.index + 1,
            attempt.report.score,
            attempt.report.violations.len()
        );
    }

    match &job.outcome {
        None => {}
        Some(JobOutcome::Failed { cause, detail }) => {
            let _ = writeln!(out, "Failed ({cause}): {detail}");
        }
        Some(JobOutcome::Cancelled) => out.push_str("Cancelled.\n"),
        Some(JobOutcome::Accepted {
            draft,
            score,
            attempt,
        }) => draft_block(&mut out, "Accepted draft", job, draft, *score, *attempt, full),
        Some(JobOutcome::Exhausted {
            draft,
            score,
            attempt,
            ..
        }) => draft_block(
            &mut out,
            "Best draft (below threshold)",
            job,
            draft,
            *score,
            *attempt,
            full,
        ),
    }
    out
}

fn draft_block(
    out: &mut String,
    label: &str,
    job: &Job,
    draft: &str,
    score: f64,
    attempt: usize,
    full: bool,
) {
    let _ = writeln!(
        out,
        "{label}: attempt {}, {score:.0}/100 (threshold {:.0})",
        attempt + 1,
        job.config.acceptance_threshold
    );
    let body = if full {
        draft.to_string()
    } else {
        truncate_chars(draft, DEFAULT_PREVIEW_MAX_CHARS)
    };
    let _ = write!(out, "\n{body}\n");
}

pub fn format_application(summary: &ApplicationSummary, full: bool) -> String {
    let mut out = String::new();
    for job in &summary.jobs {
        let _ = writeln!(out, "=== {} ===", job.section.to_uppercase());
        out.push_str(&format_job(job, full));
        out.push('\n');
    }
    match summary.mean_score {
        Some(mean) => {
            let _ = writeln!(out, "Mean score: {mean:.1}/100 over {} section(s)", summary.jobs.len());
        }
        None => out.push_str("No section produced a draft.\n"),
    }
    out
}

pub fn format_collections(collections: &[CollectionStatus]) -> String {
    if collections.is_empty() {
        return "No collections configured.\n".to_string();
    }
    let mut out = String::new();
    for c in collections {
        let _ = writeln!(
            out,
            "{}\t{}\tweight {:.2}\ttop-k {}\t{} chunk(s)",
            c.collection.id, c.collection.role, c.collection.weight, c.collection.top_k, c.chunks
        );
    }
    out
}

pub fn format_sections(sections: &[SectionSettings]) -> String {
    if sections.is_empty() {
        return "No sections configured.\n".to_string();
    }
    let mut out = String::new();
    for s in sections {
        let excluded: Vec<&str> = s
            .weights
            .iter()
            .filter(|(_, w)| **w <= 0.0)
            .map(|(id, _)| id.as_str())
            .collect();
        let _ = write!(out, "{}", s.name);
        if !excluded.is_empty() {
            let _ = write!(out, "\t(excludes {})", excluded.join(", "));
        }
        out.push('\n');
    }
    out
}

pub fn status_json(
    data_dir: &std::path::Path,
    collections: &[CollectionStatus],
    sections: usize,
    rules: usize,
) -> serde_json::Value {
    let chunks: u64 = collections.iter().map(|c| c.chunks).sum();
    json!({
        "data_dir": data_dir.display().to_string(),
        "collections": collections.len(),
        "chunks": chunks,
        "sections": sections,
        "rules": rules,
    })
}

pub fn format_status(
    data_dir: &std::path::Path,
    collections: &[CollectionStatus],
    sections: usize,
    rules: usize,
) -> String {
    let mut out = format!("Data directory: {}\n", data_dir.display());
    let _ = writeln!(out, "Collections: {}", collections.len());
    for c in collections {
        let _ = writeln!(out, "  {}: {} chunk(s)", c.collection.id, c.chunks);
    }
    let _ = writeln!(out, "Sections: {sections}");
    let _ = writeln!(out, "Rules: {rules}");
    out
}
