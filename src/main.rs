use std::path::PathBuf;

use clap::{Parser, Subcommand};
use docharvester::Result;
use docharvester::commands::{
    add_project, cancel_task, check_coverage, delete_project, generate_missing_docs,
    generate_wiki, ingest_project, list_projects, list_tasks, show_config, show_gaps,
    show_llm_status, show_recommendations,
};
use docharvester::config::default_base_dir;

#[derive(Parser)]
#[command(name = "docharvester")]
#[command(about = "Document ingestion, lens classification, and coverage tracking")]
#[command(version)]
struct Cli {
    /// Data directory (defaults to ~/.docharvester)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Ingest all configured sources for a project
    Ingest {
        /// Project ID or name
        project: String,
    },
    /// Check lens coverage against requirements
    Coverage {
        /// Project ID or name
        project: String,
    },
    /// Show the stored coverage gap analysis
    Gaps {
        /// Project ID or name
        project: String,
    },
    /// Show prioritized coverage recommendations
    Recommendations {
        /// Project ID or name
        project: String,
    },
    /// Regenerate the project wiki
    Generate {
        /// Project ID or name
        project: String,
    },
    /// Create draft documents for under-covered required lenses
    GenerateMissing {
        /// Project ID or name
        project: String,
    },
    /// Inspect processing tasks
    Tasks {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Show the effective configuration
    Config,
    /// Show LLM provider connectivity
    Status,
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    Add {
        /// Project name
        name: String,
        /// Optional description
        #[arg(long)]
        description: Option<String>,
        /// Tags, repeatable
        #[arg(long)]
        tag: Vec<String>,
        /// Owners, repeatable
        #[arg(long)]
        owner: Vec<String>,
        /// Local folder to ingest in addition to the uploads directory
        #[arg(long)]
        folder: Option<String>,
    },
    /// List all projects
    List,
    /// Delete a project and all of its documents
    Delete {
        /// Project ID or name
        project: String,
    },
}

#[derive(Subcommand)]
enum TaskCommands {
    /// List tasks for a project
    List {
        /// Project ID or name
        project: String,
        /// Include finished tasks
        #[arg(long)]
        all: bool,
    },
    /// Cancel a running task
    Cancel {
        /// Task ID
        task_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let base_dir = match cli.data_dir {
        Some(dir) => dir,
        None => default_base_dir()?,
    };

    match cli.command {
        Commands::Project { command } => match command {
            ProjectCommands::Add {
                name,
                description,
                tag,
                owner,
                folder,
            } => {
                add_project(&base_dir, name, description, tag, owner, folder).await?;
            }
            ProjectCommands::List => {
                list_projects(&base_dir).await?;
            }
            ProjectCommands::Delete { project } => {
                delete_project(&base_dir, project).await?;
            }
        },
        Commands::Ingest { project } => {
            ingest_project(&base_dir, project).await?;
        }
        Commands::Coverage { project } => {
            check_coverage(&base_dir, project).await?;
        }
        Commands::Gaps { project } => {
            show_gaps(&base_dir, project).await?;
        }
        Commands::Recommendations { project } => {
            show_recommendations(&base_dir, project).await?;
        }
        Commands::Generate { project } => {
            generate_wiki(&base_dir, project).await?;
        }
        Commands::GenerateMissing { project } => {
            generate_missing_docs(&base_dir, project).await?;
        }
        Commands::Tasks { command } => match command {
            TaskCommands::List { project, all } => {
                list_tasks(&base_dir, project, all).await?;
            }
            TaskCommands::Cancel { task_id } => {
                cancel_task(&base_dir, task_id).await?;
            }
        },
        Commands::Config => {
            show_config(&base_dir)?;
        }
        Commands::Status => {
            show_llm_status(&base_dir).await?;
        }
    }

    Ok(())
}
