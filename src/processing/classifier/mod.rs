
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::llm::LlmService;

/// Content category assigned to every chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum LensType {
    /// How the product works: architecture, implementation, algorithms.
    Logic,
    /// Step-by-step instructions, tutorials, operational procedures.
    Sop,
    /// Marketing, positioning, competitive analysis, go-to-market.
    Gtm,
    /// Changelogs, release notes, retrospectives, feedback.
    Cl,
}

impl LensType {
    pub const ALL: [LensType; 4] = [LensType::Logic, LensType::Sop, LensType::Gtm, LensType::Cl];

    pub fn as_str(&self) -> &'static str {
        match *self {
            LensType::Logic => "LOGIC",
            LensType::Sop => "SOP",
            LensType::Gtm => "GTM",
            LensType::Cl => "CL",
        }
    }

    pub fn description(&self) -> &'static str {
        match *self {
            LensType::Logic => {
                "Technical documentation explaining how the product works, architecture, \
                 implementation details, algorithms, and system design"
            }
            LensType::Sop => {
                "User guides, step-by-step instructions, tutorials, how-to documentation, \
                 and operational procedures"
            }
            LensType::Gtm => {
                "Marketing materials, sales decks, product positioning, competitive analysis, \
                 and go-to-market strategies"
            }
            LensType::Cl => {
                "Changelogs, release notes, retrospectives, user feedback, bug reports, \
                 and feature requests"
            }
        }
    }
}

impl fmt::Display for LensType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LensType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "LOGIC" => Ok(LensType::Logic),
            "SOP" => Ok(LensType::Sop),
            "GTM" => Ok(LensType::Gtm),
            "CL" => Ok(LensType::Cl),
            _ => Err(()),
        }
    }
}

/// Classifies chunks into lens types, preferring an LLM backend and
/// degrading to keyword matching on any failure. Classification is total:
/// it never returns an error.
#[derive(Clone)]
pub struct LensClassifier {
    llm: Option<Arc<LlmService>>,
}

impl LensClassifier {
    pub fn new(llm: Option<Arc<LlmService>>) -> Self {
        Self { llm }
    }

    /// Classify a text chunk. Confidence is in [0.0, 0.9] for the
    /// rule-based path and whatever the model reports otherwise.
    pub fn classify(&self, text: &str, project_context: &str) -> (LensType, f32) {
        if let Some(llm) = &self.llm {
            let prompt = build_classification_prompt(text, project_context);
            match llm.classify(&prompt) {
                Ok(response) => {
                    if let Some(parsed) = parse_classification_response(&response) {
                        return parsed;
                    }
                    debug!("Unparseable classification response, using rule-based fallback");
                }
                Err(e) => {
                    debug!("LLM classification failed ({}), using rule-based fallback", e);
                }
            }
        }

        rule_based_classification(text)
    }

    pub fn batch_classify(&self, texts: &[String], project_context: &str) -> Vec<(LensType, f32)> {
        texts
            .iter()
            .map(|t| self.classify(t, project_context))
            .collect()
    }
}

fn build_classification_prompt(text: &str, project_context: &str) -> String {
    let lens_descriptions = LensType::ALL
        .iter()
        .map(|lens| format!("- {}: {}", lens, lens.description()))
        .collect::<Vec<_>>()
        .join("\n");

    let context = if project_context.is_empty() {
        "General software documentation"
    } else {
        project_context
    };

    // Cap the excerpt so oversized chunks do not blow out the prompt.
    let excerpt: String = text.chars().take(1000).collect();

    format!(
        "Classify the following text chunk into one of these documentation lens types:\n\n\
         {lens_descriptions}\n\n\
         Project Context: {context}\n\n\
         Text to classify:\n{excerpt}\n\n\
         Respond with:\n\
         1. The lens type (LOGIC, SOP, GTM, or CL)\n\
         2. Confidence score (0.0 to 1.0)\n\n\
         Format: LENS_TYPE|CONFIDENCE\n\
         Example: LOGIC|0.85\n"
    )
}

fn parse_classification_response(response: &str) -> Option<(LensType, f32)> {
    let mut parts = response.trim().split('|');
    let lens = LensType::from_str(parts.next()?).ok()?;
    let confidence: f32 = parts.next()?.trim().parse().ok()?;

    if (0.0..=1.0).contains(&confidence) {
        Some((lens, confidence))
    } else {
        None
    }
}

/// Deterministic keyword-based fallback. Confidence is
/// `min(0.9, matches * 0.15)`, or 0.3 when nothing matched (the default
/// lens is LOGIC, never a failure).
pub fn rule_based_classification(text: &str) -> (LensType, f32) {
    const LOGIC_KEYWORDS: &[&str] = &[
        "architecture", "implementation", "algorithm", "system", "design", "component", "module",
        "function", "class", "api", "database", "schema",
    ];
    const SOP_KEYWORDS: &[&str] = &[
        "step", "guide", "tutorial", "how to", "instruction", "procedure", "click", "navigate",
        "user", "setup", "configure",
    ];
    const GTM_KEYWORDS: &[&str] = &[
        "market", "sales", "customer", "competitor", "pricing", "strategy", "positioning",
        "value proposition", "target audience",
    ];
    const CL_KEYWORDS: &[&str] = &[
        "changelog", "release", "version", "bug", "fix", "feature", "improvement", "feedback",
        "issue", "update",
    ];

    let text_lower = text.to_lowercase();
    let count = |keywords: &[&str]| keywords.iter().filter(|kw| text_lower.contains(*kw)).count();

    let scores = [
        (LensType::Logic, count(LOGIC_KEYWORDS)),
        (LensType::Sop, count(SOP_KEYWORDS)),
        (LensType::Gtm, count(GTM_KEYWORDS)),
        (LensType::Cl, count(CL_KEYWORDS)),
    ];

    // max_by_key takes the last maximum; iterate in reverse so ties
    // resolve to the earlier lens, LOGIC first.
    let (lens, matches) = scores
        .iter()
        .rev()
        .max_by_key(|(_, score)| *score)
        .copied()
        .unwrap_or((LensType::Logic, 0));

    let confidence = if matches > 0 {
        (matches as f32 * 0.15).min(0.9)
    } else {
        0.3
    };

    (lens, confidence)
}
