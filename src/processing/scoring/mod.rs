
use chrono::{DateTime, Utc};

use crate::processing::classifier::LensType;

/// Weights for the three importance components. They always sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub recency: f64,
    pub source: f64,
    pub lens: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            recency: 0.3,
            source: 0.3,
            lens: 0.4,
        }
    }
}

/// Per-chunk importance components, persisted alongside the composite so
/// scores can be audited without re-deriving them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImportanceScore {
    pub recency_score: f64,
    pub source_weight: f64,
    pub lens_weight: f64,
    pub importance: f64,
}

/// Deterministic importance scorer. Given identical inputs and the same
/// `now`, the output never varies.
#[derive(Debug, Clone)]
pub struct ImportanceScorer {
    weights: ScoreWeights,
}

impl Default for ImportanceScorer {
    fn default() -> Self {
        Self::new(ScoreWeights::default())
    }
}

impl ImportanceScorer {
    pub fn new(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    pub fn score(
        &self,
        last_modified: Option<DateTime<Utc>>,
        source_type: &str,
        lens_type: LensType,
        now: DateTime<Utc>,
    ) -> ImportanceScore {
        let recency_score = recency_score(last_modified, now);
        let source_weight = source_weight(source_type);
        let lens_weight = lens_weight(lens_type);

        let importance = self.weights.recency * recency_score
            + self.weights.source * source_weight
            + self.weights.lens * lens_weight;

        ImportanceScore {
            recency_score,
            source_weight,
            lens_weight,
            importance,
        }
    }
}

/// Banded decay on document age. Unknown modification time scores a
/// neutral 0.5 rather than penalizing the document.
pub fn recency_score(last_modified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(modified) = last_modified else {
        return 0.5;
    };

    let age_days = (now - modified).num_days();
    if age_days < 7 {
        1.0
    } else if age_days < 30 {
        0.8
    } else if age_days < 90 {
        0.6
    } else if age_days < 365 {
        0.4
    } else {
        0.2
    }
}

/// Trust weight by origin. Unrecognized source types get a neutral 0.5.
pub fn source_weight(source_type: &str) -> f64 {
    match source_type {
        "git" => 1.0,
        "confluence" => 0.9,
        "sharepoint" => 0.8,
        "local_folder" => 0.7,
        "jira" => 0.6,
        "auto_generated" => 0.5,
        _ => 0.5,
    }
}

pub fn lens_weight(lens_type: LensType) -> f64 {
    match lens_type {
        LensType::Logic | LensType::Sop => 1.0,
        LensType::Gtm => 0.8,
        LensType::Cl => 0.7,
    }
}
