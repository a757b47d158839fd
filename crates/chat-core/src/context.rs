//! Context Assembler
//!
//! Builds the outbound text for one query. Section order is fixed:
//! document attachments (in attachment order, each truncated to its
//! budget), then the attached resource, then the user question.

use serde::{Deserialize, Serialize};

/// Default per-attachment budget, in characters
pub const DEFAULT_ATTACHMENT_BUDGET: usize = 5000;

const DOCUMENT_HEADER: &str = "=== DOCUMENT CONTEXT ===";
const RESOURCE_HEADER: &str = "=== ATTACHED RESOURCE ===";
const QUESTION_HEADER: &str = "=== USER QUESTION ===";
const SECTION_END: &str = "---";
const ELLIPSIS: &str = "...";

/// A labelled body of text attached to a single query
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachedContext {
    pub label: String,
    pub body: String,

    /// Overrides the assembler's budget for this entry
    #[serde(default)]
    pub budget: Option<usize>,
}

impl AttachedContext {
    pub fn new(label: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            body: body.into(),
            budget: None,
        }
    }

    pub fn with_budget(mut self, budget: usize) -> Self {
        self.budget = Some(budget);
        self
    }
}

/// Merges attachments, an optional resource and the user input
#[derive(Clone, Debug)]
pub struct ContextAssembler {
    attachment_budget: usize,
    resource_budget: Option<usize>,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(DEFAULT_ATTACHMENT_BUDGET)
    }
}

impl ContextAssembler {
    pub fn new(attachment_budget: usize) -> Self {
        Self {
            attachment_budget,
            resource_budget: None,
        }
    }

    /// Bound the resource body too; unbounded by default
    pub fn with_resource_budget(mut self, budget: usize) -> Self {
        self.resource_budget = Some(budget);
        self
    }

    /// Build the outbound payload.
    ///
    /// With neither attachments nor a resource the input is returned as is.
    pub fn assemble(
        &self,
        input: &str,
        attachments: &[AttachedContext],
        resource: Option<&AttachedContext>,
    ) -> String {
        if attachments.is_empty() && resource.is_none() {
            return input.to_string();
        }

        let mut parts: Vec<String> = Vec::new();

        if !attachments.is_empty() {
            parts.push(DOCUMENT_HEADER.into());
            for doc in attachments {
                let budget = doc.budget.unwrap_or(self.attachment_budget);
                parts.push(format!("Document: {}", doc.label));
                parts.push(format!("Content:\n{}", truncate(&doc.body, budget)));
                parts.push(SECTION_END.into());
            }
        }

        if let Some(res) = resource {
            let body = match res.budget.or(self.resource_budget) {
                Some(budget) => truncate(&res.body, budget),
                None => res.body.clone(),
            };
            parts.push(RESOURCE_HEADER.into());
            parts.push(format!("Resource: {}", res.label));
            parts.push(format!("Content:\n{body}"));
            parts.push(SECTION_END.into());
        }

        format!("{}\n\n{QUESTION_HEADER}\n{input}", parts.join("\n"))
    }
}

/// First `budget` chars, with an ellipsis marker when anything was cut
fn truncate(text: &str, budget: usize) -> String {
    match text.char_indices().nth(budget) {
        Some((cut, _)) => format!("{}{ELLIPSIS}", &text[..cut]),
        None => text.to_string(),
    }
}
