
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{debug, warn};

use crate::database::models::{CoverageBucket, CoverageRequirement};
use crate::database::queries::{ChunkQueries, CoverageQueries, LensStatistics};
use crate::processing::classifier::LensType;

/// Per-lens requirement defaults applied when a project has none and the
/// requirements file is absent.
pub fn default_requirement(lens_type: LensType) -> (bool, i64) {
    match lens_type {
        LensType::Logic => (true, 10),
        LensType::Sop => (true, 5),
        LensType::Gtm => (true, 3),
        LensType::Cl => (false, 1),
    }
}

/// Topics a lens is expected to cover. When coverage falls short these
/// name what is missing, most important first.
pub fn expected_topics(lens_type: LensType) -> &'static [&'static str] {
    match lens_type {
        LensType::Logic => &[
            "Business process workflows",
            "Decision trees and logic flows",
            "System integration points",
            "Data transformation rules",
            "Error handling procedures",
        ],
        LensType::Sop => &[
            "Standard operating procedures",
            "Quality control checklists",
            "Emergency response protocols",
            "Training and onboarding guides",
            "Compliance documentation",
        ],
        LensType::Gtm => &[
            "Market analysis and positioning",
            "Product launch strategies",
            "Sales enablement materials",
            "Competitive analysis",
            "Customer success playbooks",
        ],
        LensType::Cl => &[
            "Equipment maintenance procedures",
            "Route optimization guidelines",
            "Facility operations manual",
            "Safety and compliance protocols",
            "Inventory management processes",
        ],
    }
}

#[derive(Debug, Deserialize)]
struct RequirementsFile {
    #[serde(default)]
    lenses: HashMap<String, LensRequirementEntry>,
}

#[derive(Debug, Deserialize)]
struct LensRequirementEntry {
    #[serde(default = "default_true")]
    required: bool,
    #[serde(default = "default_min_documents")]
    min_documents: i64,
}

fn default_true() -> bool {
    true
}

fn default_min_documents() -> i64 {
    1
}

/// Coverage of one lens at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LensCoverage {
    pub lens_type: LensType,
    pub status: CoverageBucket,
    pub is_required: bool,
    pub min_documents: i64,
    pub document_count: i64,
    pub chunk_count: i64,
    pub chunks_with_entities: i64,
    pub coverage_percentage: f64,
    pub missing_topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    pub project_id: i64,
    pub lenses: Vec<LensCoverage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub lens_type: LensType,
    pub topics: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapAnalysis {
    pub project_id: i64,
    pub overall_coverage: f64,
    pub gaps: Vec<LensGap>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LensGap {
    pub lens_type: LensType,
    pub coverage_percentage: f64,
    /// Expected topics the corpus already covers.
    pub existing_topics: Vec<String>,
    /// Expected topics with no documentation yet.
    pub missing_topics: Vec<String>,
    pub suggestion: String,
}

/// Measures how well a project's corpus covers each lens against its
/// requirements, persists snapshots, and derives recommendations.
pub struct CoverageEngine {
    pool: SqlitePool,
}

impl CoverageEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Ensure every lens has a requirement row, seeding missing ones from
    /// the requirements file (or compiled defaults when the file is
    /// absent or unreadable).
    pub async fn ensure_requirements(
        &self,
        project_id: i64,
        requirements_path: &Path,
    ) -> Result<Vec<CoverageRequirement>> {
        let existing = CoverageQueries::get_requirements(&self.pool, project_id).await?;
        let have: Vec<LensType> = existing.iter().map(|r| r.lens_type).collect();

        let file_defaults = load_requirements_file(requirements_path);

        for lens in LensType::ALL {
            if have.contains(&lens) {
                continue;
            }

            let (required, min_documents) = file_defaults
                .get(&lens)
                .copied()
                .unwrap_or_else(|| default_requirement(lens));

            CoverageQueries::upsert_requirement(
                &self.pool,
                project_id,
                lens,
                required,
                min_documents,
            )
            .await?;
        }

        CoverageQueries::get_requirements(&self.pool, project_id).await
    }

    /// Recompute coverage for every lens and persist the snapshot.
    pub async fn check_coverage(
        &self,
        project_id: i64,
        requirements_path: &Path,
    ) -> Result<CoverageReport> {
        let requirements = self.ensure_requirements(project_id, requirements_path).await?;

        let mut lenses = Vec::with_capacity(requirements.len());
        for requirement in &requirements {
            let stats =
                ChunkQueries::lens_statistics(&self.pool, project_id, requirement.lens_type)
                    .await?;

            let coverage = score_lens(requirement, &stats);

            CoverageQueries::upsert_status(
                &self.pool,
                project_id,
                coverage.lens_type,
                coverage.status,
                coverage.document_count,
                coverage.chunk_count,
                coverage.coverage_percentage,
                &coverage.missing_topics,
            )
            .await?;

            lenses.push(coverage);
        }

        debug!("Coverage checked for project {}", project_id);
        Ok(CoverageReport { project_id, lenses })
    }

    /// Actionable next steps ordered by priority, highest first. The
    /// relative order of equal-priority items follows the lens order of
    /// the report.
    pub async fn recommendations(
        &self,
        project_id: i64,
        requirements_path: &Path,
    ) -> Result<Vec<Recommendation>> {
        let report = self.check_coverage(project_id, requirements_path).await?;

        let mut recommendations = Vec::new();
        for lens in &report.lenses {
            if lens.is_required {
                if lens.coverage_percentage < 50.0 {
                    recommendations.push(Recommendation {
                        priority: Priority::High,
                        action: "create_documentation".to_string(),
                        lens_type: lens.lens_type,
                        topics: lens.missing_topics.iter().take(3).cloned().collect(),
                    });
                } else if lens.coverage_percentage < 80.0 {
                    recommendations.push(Recommendation {
                        priority: Priority::Medium,
                        action: "enhance_documentation".to_string(),
                        lens_type: lens.lens_type,
                        topics: lens.missing_topics.iter().take(2).cloned().collect(),
                    });
                } else if lens.document_count == 0 {
                    recommendations.push(Recommendation {
                        priority: Priority::High,
                        action: "trigger_ingestion".to_string(),
                        lens_type: lens.lens_type,
                        topics: Vec::new(),
                    });
                }
            }

            if lens.chunk_count > 0 && lens.chunks_with_entities == 0 {
                recommendations.push(Recommendation {
                    priority: Priority::Low,
                    action: "enable_knowledge_graph".to_string(),
                    lens_type: lens.lens_type,
                    topics: Vec::new(),
                });
            }
        }

        sort_by_priority(&mut recommendations);
        Ok(recommendations)
    }

    /// Summarize where documentation falls short. Requires a prior
    /// coverage snapshot; callers must run `check_coverage` first.
    pub async fn gap_analysis(&self, project_id: i64) -> Result<GapAnalysis> {
        let rows = CoverageQueries::get_status(&self.pool, project_id).await?;
        if rows.is_empty() {
            anyhow::bail!(
                "No coverage snapshot for project {}; run a coverage check first",
                project_id
            );
        }

        let requirements = CoverageQueries::get_requirements(&self.pool, project_id).await?;
        let required: Vec<LensType> = requirements
            .iter()
            .filter(|r| r.is_required)
            .map(|r| r.lens_type)
            .collect();

        let required_rows: Vec<_> = rows
            .iter()
            .filter(|row| required.contains(&row.lens_type))
            .collect();

        let overall_coverage = if required_rows.is_empty() {
            100.0
        } else {
            required_rows
                .iter()
                .map(|row| row.coverage_percentage)
                .sum::<f64>()
                / required_rows.len() as f64
        };

        let gaps = rows
            .iter()
            .map(|row| {
                let missing = row.missing_topics.0.clone();
                let existing = expected_topics(row.lens_type)
                    .iter()
                    .filter(|t| !missing.iter().any(|m| m == *t))
                    .map(|t| (*t).to_string())
                    .collect();

                LensGap {
                    lens_type: row.lens_type,
                    coverage_percentage: row.coverage_percentage,
                    existing_topics: existing,
                    missing_topics: missing,
                    suggestion: gap_suggestion(row.lens_type, row.coverage_percentage),
                }
            })
            .collect();

        Ok(GapAnalysis {
            project_id,
            overall_coverage,
            gaps,
        })
    }
}

/// Coverage formula: document count against the minimum gives the base
/// percentage; the share of chunks carrying entities adds up to 20 bonus
/// points; the total is capped at 100.
pub fn score_lens(requirement: &CoverageRequirement, stats: &LensStatistics) -> LensCoverage {
    let base = if requirement.min_documents == 0 {
        100.0
    } else {
        ((stats.document_count as f64 / requirement.min_documents as f64) * 100.0).min(100.0)
    };

    let entity_bonus = if stats.chunk_count > 0 {
        ((stats.chunks_with_entities as f64 / stats.chunk_count as f64) * 20.0).min(20.0)
    } else {
        0.0
    };

    let coverage_percentage = (base + entity_bonus).min(100.0);

    let status = bucket_for(coverage_percentage);

    let shortfall = (requirement.min_documents - stats.document_count).max(0) as usize;
    let missing_topics: Vec<String> = expected_topics(requirement.lens_type)
        .iter()
        .take(shortfall)
        .map(|t| (*t).to_string())
        .collect();

    LensCoverage {
        lens_type: requirement.lens_type,
        status,
        is_required: requirement.is_required,
        min_documents: requirement.min_documents,
        document_count: stats.document_count,
        chunk_count: stats.chunk_count,
        chunks_with_entities: stats.chunks_with_entities,
        coverage_percentage,
        missing_topics,
    }
}

/// Order recommendations highest priority first. The sort is stable, so
/// equal-priority entries keep their input order.
pub fn sort_by_priority(recommendations: &mut [Recommendation]) {
    recommendations.sort_by(|a, b| b.priority.cmp(&a.priority));
}

pub fn bucket_for(percentage: f64) -> CoverageBucket {
    if percentage >= 100.0 {
        CoverageBucket::Complete
    } else if percentage >= 80.0 {
        CoverageBucket::Good
    } else if percentage >= 50.0 {
        CoverageBucket::Partial
    } else {
        CoverageBucket::Poor
    }
}

fn gap_suggestion(lens_type: LensType, percentage: f64) -> String {
    if percentage < 20.0 {
        format!("Create foundational {lens_type} documentation immediately")
    } else if percentage < 50.0 {
        format!("Expand {lens_type} documentation to cover core topics")
    } else if percentage < 80.0 {
        format!("Fill gaps in {lens_type} documentation for completeness")
    } else {
        format!("Review and enhance existing {lens_type} documentation")
    }
}

/// Read per-lens defaults from the requirements YAML. Unknown lens names
/// are skipped with a warning; a missing or malformed file yields no
/// overrides.
fn load_requirements_file(path: &Path) -> HashMap<LensType, (bool, i64)> {
    let mut defaults = HashMap::new();

    if !path.exists() {
        return defaults;
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            warn!("Failed to read requirements file {}: {}", path.display(), e);
            return defaults;
        }
    };

    let parsed: RequirementsFile = match serde_yaml::from_str(&content) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!("Failed to parse requirements file {}: {}", path.display(), e);
            return defaults;
        }
    };

    for (name, entry) in parsed.lenses {
        match name.parse::<LensType>() {
            Ok(lens) => {
                defaults.insert(lens, (entry.required, entry.min_documents.max(0)));
            }
            Err(()) => warn!("Unknown lens {:?} in requirements file, skipping", name),
        }
    }

    defaults
}
