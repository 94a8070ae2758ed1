use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use postscreen::config::{Config, ScreenBackend};
use postscreen::extract::{HtmlExtractor, TextExtractor};
use postscreen::moderation::Reviewer;
use postscreen::output::terminal;
use postscreen::publish::{Publisher, RecordingPublisher, ResultPublisher};
use postscreen::related::{Candidate, SentenceEmbedder, DEFAULT_RELATED_LIMIT};
use postscreen::router::Router;
use postscreen::screen::{ContentScreen, ThresholdScreen, WordlistScreen};
use postscreen::transport::{spawn_consumer, AmqpConsumer, AmqpPublisher, MessageSource};

/// postscreen: review submitted blog posts before they go live.
///
/// Consumes post.created / post.updated events, screens the title and the
/// rendered body text, and publishes a pass/fail verdict for each post.
#[derive(Parser)]
#[command(name = "postscreen", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume review events from the broker until Ctrl-C
    Run,

    /// Review one event envelope offline and print the verdict
    Review {
        /// JSON envelope file (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Run the configured screen on a piece of text
    Screen {
        /// The text to screen
        text: String,
    },

    /// Print the plain text extracted from HTML content
    Extract {
        /// HTML file (reads stdin when omitted)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Rank posts by title similarity to one post
    Related {
        /// JSON array of {"id", "title"} objects
        #[arg(long)]
        posts: PathBuf,

        /// Id of the post to find related posts for
        #[arg(long)]
        id: String,

        /// Number of related posts to return (default: 5)
        #[arg(long, default_value_t = DEFAULT_RELATED_LIMIT)]
        limit: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Download the ONNX screening and embedding models
    DownloadModel,

    /// Show configuration, model files and broker reachability
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if missing)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("postscreen=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = Config::load()?;
            config.require_broker()?;
            config.require_screen()?;

            let sink: Arc<dyn Publisher> = Arc::new(AmqpPublisher::new(config.broker()));
            let router = Arc::new(build_router(&config, sink)?);
            let source: Arc<dyn MessageSource> = Arc::new(AmqpConsumer::new(
                config.broker(),
                config.review_queue.clone(),
                config.ack_mode,
            ));

            let shutdown = CancellationToken::new();
            let handle = spawn_consumer(
                source,
                router,
                config.restart_policy(),
                shutdown.clone(),
            );
            info!(queue = %config.review_queue, "postscreen running, press Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            info!("Shutdown requested, finishing in-flight message");
            shutdown.cancel();

            let restarts = handle.await.context("Consumer task panicked")?;
            println!("Stopped ({restarts} consumer restarts).");
        }

        Commands::Review { file } => {
            let config = Config::load()?;
            config.require_screen()?;
            let body = read_input(file.as_deref())?;

            let sink = Arc::new(RecordingPublisher::new());
            let router = build_router(&config, sink.clone())?;
            let outcome = router.route(body.as_bytes()).await;
            terminal::display_route_outcome(&outcome, &sink);
        }

        Commands::Screen { text } => {
            let config = Config::load()?;
            config.require_screen()?;
            let screen = create_screen(&config)?;

            let budget = config
                .screen_timeout
                .saturating_mul(screen.requests_for(&text));
            let flagged = tokio::time::timeout(budget, screen.is_flagged(&text))
                .await
                .with_context(|| format!("Screen timed out after {budget:?}"))??;
            terminal::display_screen_result(screen.name(), &text, flagged);
        }

        Commands::Extract { file } => {
            let config = Config::load()?;
            let raw = read_input(file.as_deref())?;
            let extraction = HtmlExtractor::new(config.max_content_bytes).extract(&raw);
            terminal::display_extraction(&extraction);
            if !extraction.ok {
                std::process::exit(1);
            }
        }

        Commands::Related {
            posts,
            id,
            limit,
            json,
        } => {
            let config = Config::load()?;
            let raw = std::fs::read_to_string(&posts)
                .with_context(|| format!("Failed to read {}", posts.display()))?;
            let candidates: Vec<Candidate> = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not a JSON array of posts", posts.display()))?;
            let target = candidates
                .iter()
                .find(|c| c.id == id)
                .with_context(|| format!("No post with id {id} in {}", posts.display()))?
                .clone();

            let embed_dir = postscreen::screen::download::embedding_model_dir(&config.model_dir);
            let embedder = SentenceEmbedder::load(&embed_dir)?;
            let related =
                postscreen::related::related_posts(&embedder, &target, &candidates, limit).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&related)?);
            } else {
                terminal::display_related(&target.id, &related);
            }
        }

        Commands::DownloadModel => {
            let config = Config::load()?;
            let model_dir = &config.model_dir;

            println!("Downloading ONNX models...");
            println!("  Destination: {}", model_dir.display());

            postscreen::screen::download::download_models(model_dir).await?;

            println!("\n{}", "Models downloaded successfully.".bold());
            println!("You can now run `postscreen run` or `postscreen screen \"some text\"`.");
        }

        Commands::Status => {
            let config = Config::load()?;
            postscreen::status::show(&config).await?;
        }
    }

    Ok(())
}

/// Create the screen selected by POSTSCREEN_SCREEN.
fn create_screen(config: &Config) -> Result<Arc<dyn ContentScreen>> {
    match config.screen_backend {
        ScreenBackend::Onnx => {
            info!("Using local ONNX screen");
            let scorer = postscreen::screen::onnx::OnnxScorer::load(&config.model_dir)?;
            Ok(Arc::new(ThresholdScreen::new(
                Box::new(scorer),
                config.threshold,
                "onnx",
            )))
        }
        ScreenBackend::Perspective => {
            info!("Using Perspective API screen");
            let scorer = postscreen::screen::perspective::PerspectiveScorer::new(
                config.perspective_api_key.clone(),
                config.screen_timeout,
            )?;
            Ok(Arc::new(ThresholdScreen::new(
                Box::new(scorer),
                config.threshold,
                "perspective",
            )))
        }
        ScreenBackend::Wordlist => {
            let path = config
                .wordlist_path
                .as_deref()
                .context("POSTSCREEN_WORDLIST not set")?;
            let screen = WordlistScreen::load(path)?;
            info!(terms = screen.term_count(), "Using word list screen");
            Ok(Arc::new(screen))
        }
    }
}

/// Wire screen, extractor and publisher into a router.
fn build_router(config: &Config, sink: Arc<dyn Publisher>) -> Result<Router> {
    let screen = create_screen(config)?;
    let extractor: Arc<dyn TextExtractor> = Arc::new(HtmlExtractor::new(config.max_content_bytes));
    let reviewer = Reviewer::new(screen, extractor, config.screen_timeout);
    let publisher = ResultPublisher::new(sink, config.posts_queue.clone())
        .with_dead_letter(config.dead_letter_queue.clone());
    Ok(Router::new(reviewer, publisher))
}

fn read_input(file: Option<&Path>) -> Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("Failed to read stdin")?;
            Ok(buf)
        }
    }
}
