use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lms_core::store::{ItemStore, Neo4jItemStore};
use lms_core::{
    with_transaction, AppConfig, Neo4jClient, OrderPin, OrderingEngine, OrderingOutcome,
    SiblingScope, UnitOfWork,
};

#[derive(Parser)]
#[command(name = "lms-admin")]
#[command(about = "Catalogue ordering maintenance", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Probe the database
    Health {
        /// Retry failed probes
        #[arg(long)]
        retry: bool,
    },

    /// Create constraints and indexes
    InitSchema,

    /// List the chapters of a course, or the content of a chapter
    List {
        #[arg(long, conflicts_with = "chapter", required_unless_present = "chapter")]
        course: Option<String>,

        #[arg(long)]
        chapter: Option<String>,
    },

    /// Pin chapters of a course to positions
    ReorderChapters {
        #[arg(long)]
        course: String,

        /// `chapter-id=order`, repeatable
        #[arg(long = "pin", value_parser = parse_pin)]
        pins: Vec<OrderPin>,
    },

    /// Pin lectures and quizzes of a chapter to positions
    ReorderContent {
        #[arg(long)]
        chapter: String,

        /// `id=order` or `lecture:id=order`, repeatable
        #[arg(long = "pin", value_parser = parse_pin)]
        pins: Vec<OrderPin>,
    },

    /// Renumber a course's chapters and all chapter content to 1..N
    Normalize {
        #[arg(long)]
        course: String,
    },
}

fn parse_pin(raw: &str) -> std::result::Result<OrderPin, String> {
    OrderPin::parse(raw).ok_or_else(|| format!("expected id=order or kind:id=order, got {:?}", raw))
}

struct Reorder<'a> {
    engine: &'a OrderingEngine,
    scope: SiblingScope,
    pins: Vec<OrderPin>,
}

#[async_trait::async_trait]
impl<'a> UnitOfWork<Neo4jItemStore> for Reorder<'a> {
    type Output = OrderingOutcome;

    async fn run(
        &self,
        store: &Neo4jItemStore,
        session: &mut <Neo4jItemStore as ItemStore>::Session,
    ) -> lms_core::Result<OrderingOutcome> {
        self.engine.reorder(store, session, &self.scope, &self.pins).await
    }
}

async fn reorder(
    store: &Neo4jItemStore,
    config: &AppConfig,
    scope: SiblingScope,
    pins: Vec<OrderPin>,
) -> Result<OrderingOutcome> {
    let engine = OrderingEngine::new(config.ordering.clone());
    let work = Reorder {
        engine: &engine,
        scope,
        pins,
    };
    Ok(with_transaction(store, &config.transaction, &work).await?)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "lms_core=info,lms_admin=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;
    let client = Neo4jClient::connect(&config.neo4j).await?;
    let store = client.item_store();

    match cli.command {
        Commands::Health { retry } => {
            let result = if retry {
                client.health_check_with_retry().await
            } else {
                client.health_check_detailed().await
            };
            print_json(&result)?;
            if !result.status.is_operational() {
                return Err(anyhow!("database is {:?}", result.status));
            }
        }
        Commands::InitSchema => {
            client.ensure_schema().await?;
            println!("Schema ready");
        }
        Commands::List { course, chapter } => {
            let scope = match (course, chapter) {
                (Some(course), _) => SiblingScope::CourseChapters(course),
                (None, Some(chapter)) => SiblingScope::ChapterContent(chapter),
                (None, None) => return Err(anyhow!("--course or --chapter is required")),
            };
            print_json(&store.read_siblings(&scope).await?)?;
        }
        Commands::ReorderChapters { course, pins } => {
            let outcome =
                reorder(&store, &config, SiblingScope::CourseChapters(course), pins).await?;
            print_json(&outcome)?;
        }
        Commands::ReorderContent { chapter, pins } => {
            let outcome =
                reorder(&store, &config, SiblingScope::ChapterContent(chapter), pins).await?;
            print_json(&outcome)?;
        }
        Commands::Normalize { course } => {
            let scope = SiblingScope::CourseChapters(course.clone());
            let chapters = reorder(&store, &config, scope, Vec::new()).await?;
            let mut written = chapters.written;

            for position in &chapters.positions {
                let scope = SiblingScope::ChapterContent(position.id.clone());
                let content = reorder(&store, &config, scope, Vec::new()).await?;
                written += content.written;
            }

            info!(
                course = %course,
                chapters = chapters.positions.len(),
                written,
                "Normalized course ordering"
            );
            println!("Normalized {}: {} positions rewritten", course, written);
        }
    }

    Ok(())
}
