#[cfg(test)]
mod tests;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use crate::connectors::SearchResult;
use crate::coverage::{CoverageEngine, expected_topics};
use crate::database::models::{
    GenerationStatus, NewWikiPage, Project, TaskType, WikiPage,
};
use crate::database::queries::{ChunkQueries, ProjectQueries, WikiQueries};
use crate::ingest::DocumentProcessor;
use crate::processing::classifier::LensType;
use crate::tasks::ProgressTracker;

/// An in-memory wiki page before persistence. Children reference their
/// parent by arena index; database ids are assigned on write.
#[derive(Debug, Clone)]
struct PageDraft {
    slug: String,
    title: String,
    content: String,
    lens_type: Option<LensType>,
    parent: Option<usize>,
    sort_order: i64,
}

/// Builds a navigable wiki from a project's classified corpus, and
/// backfills draft documents where coverage falls short.
pub struct WikiGenerator {
    processor: Arc<DocumentProcessor>,
    tracker: Arc<ProgressTracker>,
}

impl WikiGenerator {
    pub fn new(processor: Arc<DocumentProcessor>, tracker: Arc<ProgressTracker>) -> Self {
        Self { processor, tracker }
    }

    /// Regenerate the project wiki. Page slugs are stable, so repeated
    /// generation updates pages in place.
    pub async fn generate_wiki(&self, project_id: i64) -> Result<Vec<WikiPage>> {
        let pool = self.processor.pool();
        let project = ProjectQueries::get_by_id(pool, project_id)
            .await?
            .with_context(|| format!("Project {project_id} not found"))?;

        let task = self
            .tracker
            .create(TaskType::WikiGeneration, project_id)
            .await?;

        let result = self.run_generation(&project, task.id).await;
        match &result {
            Ok(pages) => {
                self.tracker
                    .complete(
                        task.id,
                        Some(serde_json::json!({ "pages_created": pages.len() })),
                    )
                    .await?;
            }
            Err(e) => {
                self.tracker.fail(task.id, &e.to_string()).await?;
            }
        }

        result
    }

    async fn run_generation(&self, project: &Project, task_id: i64) -> Result<Vec<WikiPage>> {
        let pool = self.processor.pool();

        self.tracker
            .update_progress(task_id, 11.0, "analyzing_project")
            .await?;

        let mut lens_chunks = Vec::new();
        for lens in LensType::ALL {
            let chunks = ChunkQueries::list_by_project_and_lens(pool, project.id, lens).await?;
            lens_chunks.push((lens, chunks));
        }

        self.tracker
            .update_progress(task_id, 50.0, "generating_structure")
            .await?;

        let mut drafts = Vec::new();
        drafts.push(PageDraft {
            slug: "overview".to_string(),
            title: format!("{} Overview", project.name),
            content: overview_content(project, &lens_chunks),
            lens_type: None,
            parent: None,
            sort_order: 0,
        });

        for (order, (lens, chunks)) in lens_chunks.iter().enumerate() {
            if chunks.is_empty() {
                continue;
            }

            drafts.push(PageDraft {
                slug: slugify(&format!("{lens}")),
                title: section_title(*lens),
                content: String::new(),
                lens_type: Some(*lens),
                parent: Some(0),
                sort_order: (order + 1) as i64,
            });
        }

        self.tracker
            .update_progress(task_id, 93.0, "creating_pages")
            .await?;

        for draft in &mut drafts {
            if let Some(lens) = draft.lens_type {
                let chunks = lens_chunks
                    .iter()
                    .find(|(l, _)| *l == lens)
                    .map(|(_, c)| c.as_slice())
                    .unwrap_or_default();
                draft.content = self.section_content(project, lens, chunks);
            }
        }

        self.tracker
            .update_progress(task_id, 99.0, "finalizing")
            .await?;

        let mut pages: Vec<WikiPage> = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let parent_id = draft.parent.map(|index| pages[index].id);
            let page = WikiQueries::upsert_page(
                pool,
                &NewWikiPage {
                    project_id: project.id,
                    slug: draft.slug.clone(),
                    title: draft.title.clone(),
                    content: draft.content.clone(),
                    lens_type: draft.lens_type,
                    parent_id,
                    sort_order: draft.sort_order,
                },
            )
            .await?;
            pages.push(page);
        }

        info!(
            "Generated {} wiki pages for project {}",
            pages.len(),
            project.id
        );
        Ok(pages)
    }

    /// Section body: an LLM summary when a provider is configured,
    /// otherwise an assembled digest of the most important chunks.
    fn section_content(
        &self,
        project: &Project,
        lens: LensType,
        chunks: &[crate::database::models::DocumentChunk],
    ) -> String {
        let top: Vec<&str> = chunks.iter().take(5).map(|c| c.text.as_str()).collect();

        if let Some(llm) = self.processor.llm() {
            let prompt = format!(
                "Write a concise wiki section titled \"{}\" for the project \"{}\". \
                 Base it only on these excerpts:\n\n{}\n\n\
                 Respond with markdown content, no preamble.",
                section_title(lens),
                project.name,
                top.join("\n---\n")
            );
            match llm.generate(&prompt) {
                Ok(content) => return content,
                Err(e) => {
                    debug!("LLM wiki generation failed ({}), assembling digest", e);
                }
            }
        }

        let mut content = format!("# {}\n\n", section_title(lens));
        for text in top {
            let excerpt: String = text.chars().take(300).collect();
            content.push_str(&format!("- {excerpt}\n"));
        }
        content
    }

    /// Create draft documents for required lenses that fall short of
    /// their minimums, then run them through the normal ingestion path so
    /// they are chunked, classified, and scored like any other document.
    pub async fn generate_missing_docs(
        &self,
        project_id: i64,
        requirements_path: &std::path::Path,
    ) -> Result<usize> {
        let pool = self.processor.pool();
        let project = ProjectQueries::get_by_id(pool, project_id)
            .await?
            .with_context(|| format!("Project {project_id} not found"))?;

        let engine = CoverageEngine::new(pool.clone());
        let report = engine.check_coverage(project_id, requirements_path).await?;

        let mut created = 0;
        for lens in &report.lenses {
            if !lens.is_required || lens.document_count >= lens.min_documents {
                continue;
            }

            for topic in &lens.missing_topics {
                let content = self.draft_content(&project, lens.lens_type, topic);
                let doc = synthetic_document(project_id, lens.lens_type, topic, content);

                match self
                    .processor
                    .process_document(&project, &doc, GenerationStatus::Draft)
                    .await
                {
                    Ok(_) => created += 1,
                    Err(e) => {
                        warn!("Failed to store generated draft {:?}: {}", topic, e);
                    }
                }
            }
        }

        info!(
            "Generated {} draft documents for project {}",
            created, project_id
        );
        Ok(created)
    }

    fn draft_content(&self, project: &Project, lens: LensType, topic: &str) -> String {
        if let Some(llm) = self.processor.llm() {
            let prompt = format!(
                "Write a first-draft documentation page about \"{topic}\" for the project \
                 \"{}\" ({}). Respond with markdown, no preamble.",
                project.name,
                project.description.as_deref().unwrap_or("no description"),
            );
            if let Ok(content) = llm.generate(&prompt) {
                return content;
            }
        }

        // Skeleton draft for a human to fill in.
        format!(
            "# {topic}\n\n> Draft generated to fill a {lens} coverage gap. Replace this \
             outline with real content.\n\n## Summary\n\nTODO\n\n## Details\n\nTODO\n"
        )
    }
}

fn synthetic_document(
    project_id: i64,
    lens: LensType,
    topic: &str,
    content: String,
) -> SearchResult {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(format!("auto_generated:{project_id}:{lens}:{topic}").as_bytes());
    let doc_id = format!("{:x}", hasher.finalize());

    SearchResult {
        doc_id,
        title: topic.to_string(),
        snippet: content.chars().take(200).collect(),
        raw_text: content,
        source_type: "auto_generated".to_string(),
        source_url: None,
        source_meta: serde_json::json!({ "lens": lens.as_str(), "topic": topic }),
        file_type: Some("md".to_string()),
        last_modified: Some(chrono::Utc::now()),
    }
}

fn section_title(lens: LensType) -> String {
    match lens {
        LensType::Logic => "How It Works".to_string(),
        LensType::Sop => "Guides & Procedures".to_string(),
        LensType::Gtm => "Go-to-Market".to_string(),
        LensType::Cl => "Changelog & Feedback".to_string(),
    }
}

fn overview_content(
    project: &Project,
    lens_chunks: &[(LensType, Vec<crate::database::models::DocumentChunk>)],
) -> String {
    let mut content = format!("# {}\n\n", project.name);
    if let Some(description) = &project.description {
        content.push_str(description);
        content.push_str("\n\n");
    }

    content.push_str("## Sections\n\n");
    for (lens, chunks) in lens_chunks {
        if !chunks.is_empty() {
            content.push_str(&format!(
                "- [{}]({}) ({} chunks)\n",
                section_title(*lens),
                slugify(&lens.to_string()),
                chunks.len()
            ));
        }
    }

    content
}

/// Lowercase, alphanumeric-and-dash page identifier.
pub fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut previous_dash = false;

    for ch in input.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            previous_dash = false;
        } else if !previous_dash && !slug.is_empty() {
            slug.push('-');
            previous_dash = true;
        }
    }

    slug.trim_end_matches('-').to_string()
}

/// Children of a page within a flat listing, in sort order.
pub fn children_of(pages: &[WikiPage], parent_id: i64) -> Vec<&WikiPage> {
    let mut children: Vec<&WikiPage> = pages
        .iter()
        .filter(|p| p.parent_id == Some(parent_id))
        .collect();
    children.sort_by_key(|p| p.sort_order);
    children
}
