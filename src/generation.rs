//! Generation gateway: prompt composition and completion extraction.
//!
//! The gateway owns no control flow. It turns a section, a context package,
//! the rule set and optional feedback into a (system, user) prompt, calls the
//! completion provider once, and returns the trimmed draft.

use std::{fmt::Write as _, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;

use crate::{
    assembler::ContextPackage,
    config::{Organization, Settings},
    error::{Error, Result},
    provider::{OpenAiClient, ProviderError},
    rules::{RuleCheck, RuleSet, ValidationReport},
};

/// Temperature never rises above this through revisions, unless the base
/// temperature already does.
pub const MAX_REVISION_TEMPERATURE: f32 = 0.9;

/// Temperature added per revision.
pub const REVISION_TEMPERATURE_STEP: f32 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Fails with [`Error::GenerationUnavailable`] once transport retries
    /// are exhausted or the provider returns nothing usable.
    async fn complete(&self, prompt: &Prompt, timeout: Duration) -> Result<String>;
}

/// Chat completions through an OpenAI-compatible `/chat/completions`
/// endpoint.
pub struct OpenAiCompletions {
    client: Arc<OpenAiClient>,
    model: String,
}

impl OpenAiCompletions {
    pub fn new(client: Arc<OpenAiClient>, model: &str) -> Self {
        Self {
            client,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompletions {
    async fn complete(&self, prompt: &Prompt, timeout: Duration) -> Result<String> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": prompt.system },
                { "role": "user", "content": prompt.user },
            ],
            "temperature": prompt.temperature,
            "max_tokens": prompt.max_tokens,
        });
        let response = self
            .client
            .post_json("chat/completions", &body, timeout)
            .await
            .map_err(|e| Error::GenerationUnavailable(e.to_string()))?;

        parse_completion(&response).map_err(|e| Error::GenerationUnavailable(e.to_string()))
    }
}

fn parse_completion(response: &Value) -> std::result::Result<String, ProviderError> {
    let content = response
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(Value::as_str)
        .ok_or_else(|| ProviderError::ResponseParse {
            message: "missing choices[0].message.content".to_string(),
        })?;

    let content = content.trim();
    if content.is_empty() {
        return Err(ProviderError::ResponseParse {
            message: "completion is empty".to_string(),
        });
    }
    Ok(content.to_string())
}

/// What to write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SectionSpec {
    pub name: String,
    pub instructions: String,
    pub requirement: String,
}

/// Material for a revision prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// Number of drafts already produced for this job.
    pub revision: usize,
    pub previous_draft: String,
    /// Validation of `previous_draft`; absent for a reviewer-seeded draft.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ValidationReport>,
    /// Free-text reviewer notes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

pub struct GenerationGateway {
    provider: Arc<dyn CompletionProvider>,
    organization: Organization,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl GenerationGateway {
    pub fn new(provider: Arc<dyn CompletionProvider>, settings: &Settings) -> Self {
        Self {
            provider,
            organization: settings.organization.clone(),
            temperature: settings.provider.temperature,
            max_tokens: settings.provider.max_tokens,
            timeout: settings.timeouts.generation(),
        }
    }

    pub async fn generate(
        &self,
        spec: &SectionSpec,
        context: &ContextPackage,
        rules: &RuleSet,
        feedback: Option<&Feedback>,
    ) -> Result<String> {
        let prompt = self.compose(spec, context, rules, feedback);
        debug!(
            section = %spec.name,
            revision = feedback.map(|f| f.revision).unwrap_or(0),
            temperature = prompt.temperature,
            prompt_chars = prompt.system.len() + prompt.user.len(),
            "requesting draft"
        );
        self.provider.complete(&prompt, self.timeout).await
    }

    pub fn compose(
        &self,
        spec: &SectionSpec,
        context: &ContextPackage,
        rules: &RuleSet,
        feedback: Option<&Feedback>,
    ) -> Prompt {
        let revision = feedback.map(|f| f.revision).unwrap_or(0);
        Prompt {
            system: self.system_message(),
            user: user_message(spec, context, rules, feedback),
            temperature: revision_temperature(self.temperature, revision),
            max_tokens: self.max_tokens,
        }
    }

    fn system_message(&self) -> String {
        let org = &self.organization;
        let mut out = format!(
            "You are an experienced grant writer for {name}. You write in \
             {name}'s own voice: confident, specific and grounded in data and \
             community experience.\n\nMISSION: {mission}\n",
            name = org.name,
            mission = org.mission,
        );
        if !org.programs.is_empty() {
            out.push_str("\nPROGRAMS:\n");
            for program in &org.programs {
                let _ = writeln!(out, "- {program}");
            }
        }
        if !org.beneficiaries.is_empty() {
            let _ = write!(out, "\nWHO WE SERVE: {}\n", org.beneficiaries);
        }
        out.push_str(
            "\nVOICE:\n\
             - Write in the first person plural (we, our), never \"the organization\".\n\
             - Use exact numbers from the examples; never invent statistics.\n\
             - Treat retrieved material as examples of voice and detail, not text to copy.\n\
             - Output only the section text, with no preamble or commentary.\n",
        );
        out
    }
}

/// Sampling temperature for the given revision.
pub fn revision_temperature(base: f32, revision: usize) -> f32 {
    if revision == 0 {
        return base;
    }
    let cap = MAX_REVISION_TEMPERATURE.max(base);
    (base + REVISION_TEMPERATURE_STEP * revision as f32).min(cap)
}

fn user_message(
    spec: &SectionSpec,
    context: &ContextPackage,
    rules: &RuleSet,
    feedback: Option<&Feedback>,
) -> String {
    let mut out = String::new();

    block(&mut out, "REQUIREMENT");
    let _ = writeln!(out, "{}", spec.requirement.trim());

    block(&mut out, "RETRIEVED EXAMPLES");
    if context.is_empty() {
        out.push_str(
            "No examples were retrieved. Write from the organization profile and \
             do not invent specific numbers.\n",
        );
    } else {
        for (role, hits) in context.by_role() {
            let _ = writeln!(out, "\n{}:", role.prompt_heading());
            for hit in hits {
                let _ = writeln!(out, "- {}", hit.chunk.text.trim());
            }
        }
    }

    block(&mut out, "SECTION INSTRUCTIONS");
    let _ = writeln!(out, "{}", spec.instructions.trim());

    block(&mut out, "GUIDELINES");
    guidelines(&mut out, rules, &spec.name);

    if let Some(feedback) = feedback {
        block(&mut out, "REVISION");
        out.push_str("Revise the previous draft below.\n");
        if let Some(report) = &feedback.report {
            let _ = writeln!(
                out,
                "It scored {:.0}/100 ({}). Fix every issue listed:",
                report.score,
                report.grade.label()
            );
            for violation in &report.violations {
                let _ = write!(out, "- {}", violation.detail);
                if !violation.remediation.is_empty() {
                    let _ = write!(out, ". {}", violation.remediation);
                }
                out.push('\n');
            }
        }
        if let Some(notes) = feedback.notes.as_deref().filter(|n| !n.trim().is_empty()) {
            let _ = writeln!(out, "\nReviewer notes:\n{}", notes.trim());
        }
        let _ = writeln!(out, "\nPrevious draft:\n{}", feedback.previous_draft.trim());
    }

    block(&mut out, &format!("NOW WRITE THE {}", spec.name.to_uppercase()));
    out
}

fn block(out: &mut String, title: &str) {
    if !out.is_empty() {
        out.push('\n');
    }
    let _ = writeln!(out, "== {title} ==");
}

fn guidelines(out: &mut String, rules: &RuleSet, section: &str) {
    let mut forbidden = Vec::new();
    for rule in rules.applicable(section) {
        match &rule.check {
            RuleCheck::ForbiddenPhrase { phrase, .. } => forbidden.push(phrase.as_str()),
            RuleCheck::RequiredPhrase { any_of } => {
                let _ = writeln!(out, "- Use at least one of: {}.", any_of.join(", "));
            }
            RuleCheck::RequiredDataAnchor { .. } => {
                out.push_str("- Include specific numbers, percentages or dollar amounts.\n");
            }
            RuleCheck::RequiredQuote { min_chars } => {
                let _ = writeln!(
                    out,
                    "- Include a direct participant quote of at least {min_chars} characters."
                );
            }
        }
        if !matches!(rule.check, RuleCheck::ForbiddenPhrase { .. })
            && !rule.remediation.is_empty()
        {
            let _ = writeln!(out, "  {}", rule.remediation);
        }
    }
    if !forbidden.is_empty() {
        let _ = writeln!(out, "- Never use: {}.", forbidden.join(", "));
    }
}
