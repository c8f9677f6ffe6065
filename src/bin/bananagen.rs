// bananagen - CLI for the NanoBanana generation engine

use anyhow::{bail, Context};
use bananagen::batch::{shape_jobs, BatchOptions, BatchOrchestrator, JobState, ProgressEvent};
use bananagen::history::{GenerationFilter, GenerationKind, GenerationStore, JsonlStore, NewGeneration};
use bananagen::images::{HttpImageFetcher, ImageFetcher};
use bananagen::{
    CombineRequest, Config, EditRequest, GenerationRequest, HttpProvider, Model, PollPolicy,
    Resolution, TaskClient, TaskOutcome, UploadResolver,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Generate, edit and combine images via the NanoBanana API", long_about = None)]
struct Args {
    /// Path to the config file (default: <config_dir>/bananagen/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an image from a text prompt
    Generate {
        #[arg(short, long)]
        prompt: String,

        #[arg(short, long, value_enum, default_value = "flash")]
        model: ModelArg,

        /// Output resolution in pixels (1024, 2048 or 4096)
        #[arg(short, long, default_value = "2048")]
        resolution: String,

        /// Aspect ratio, e.g. "16:9"
        #[arg(short, long)]
        aspect_ratio: Option<String>,

        /// Number of images (1-4)
        #[arg(short, long, default_value = "1")]
        num_images: u32,

        #[arg(long)]
        negative_prompt: Option<String>,

        /// Local reference images, uploaded before submission (pro only, up to 8)
        #[arg(long = "reference")]
        references: Vec<PathBuf>,
    },

    /// Edit an existing image
    Edit {
        /// Source image to edit
        #[arg(short, long)]
        image: PathBuf,

        #[arg(short, long)]
        prompt: String,

        #[arg(short, long, value_enum, default_value = "flash")]
        model: ModelArg,

        /// Output resolution; omitted keeps the source size
        #[arg(short, long)]
        resolution: Option<String>,

        #[arg(short, long)]
        aspect_ratio: Option<String>,
    },

    /// Combine several images into one (pro model)
    Combine {
        /// Source images, in order (2-8)
        #[arg(short, long, required = true)]
        image: Vec<PathBuf>,

        #[arg(short, long)]
        prompt: String,

        #[arg(short, long, default_value = "2048")]
        resolution: String,

        #[arg(short, long)]
        aspect_ratio: Option<String>,
    },

    /// Run a batch of generate or edit jobs
    Batch {
        /// Source images; none means text-to-image for every prompt
        #[arg(short, long)]
        image: Vec<PathBuf>,

        /// File with one prompt per line
        #[arg(long)]
        prompts_file: Option<PathBuf>,

        /// Prompts given directly (may repeat)
        #[arg(short, long)]
        prompt: Vec<String>,

        #[arg(short, long, value_enum, default_value = "flash")]
        model: ModelArg,

        #[arg(short, long)]
        resolution: Option<String>,

        #[arg(short, long)]
        aspect_ratio: Option<String>,

        /// Jobs in flight at once (default from config)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Skip the large-batch confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show the remaining credit balance
    Credits,

    /// Inspect the generation history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List past generations
    List {
        /// Filter by kind
        #[arg(short, long, value_enum)]
        kind: Option<KindArg>,

        /// Substring search in prompts
        #[arg(short, long)]
        search: Option<String>,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
    /// Delete a record by id
    Delete { id: i64 },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModelArg {
    Flash,
    Pro,
}

impl From<ModelArg> for Model {
    fn from(value: ModelArg) -> Self {
        match value {
            ModelArg::Flash => Model::Flash,
            ModelArg::Pro => Model::Pro,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Generate,
    Edit,
    Combine,
}

impl From<KindArg> for GenerationKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Generate => GenerationKind::Generate,
            KindArg::Edit => GenerationKind::Edit,
            KindArg::Combine => GenerationKind::Combine,
        }
    }
}

struct Engine {
    client: TaskClient,
    resolver: Arc<UploadResolver>,
    fetcher: Arc<HttpImageFetcher>,
    store: Arc<JsonlStore>,
    config: Config,
}

impl Engine {
    fn from_config(config: Config) -> anyhow::Result<Self> {
        let api_key = config.api_key().context(
            "no API key configured; set NANOBANANA_API_KEY or api.api_key in the config file",
        )?;

        let provider = HttpProvider::new(api_key, config.api.base_url.clone())?;
        let policy = PollPolicy {
            interval: Duration::from_secs(config.api.poll_interval_secs),
            max_wait: Duration::from_secs(config.api.max_wait_secs),
        };

        let mut resolver = UploadResolver::with_default_backends();
        if let Some(client_id) = config.imgur_client_id() {
            resolver = resolver.with_imgur(client_id);
        }

        Ok(Self {
            client: TaskClient::new(Arc::new(provider), policy),
            resolver: Arc::new(resolver),
            fetcher: Arc::new(HttpImageFetcher::new()),
            store: Arc::new(JsonlStore::new(config.history_file())),
            config,
        })
    }

    /// Save a finished image and record it; record failures only warn
    async fn save_result(
        &self,
        image_url: &str,
        kind: GenerationKind,
        prompt: &str,
        model: Model,
        resolution: Option<&str>,
        negative_prompt: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let file_name = format!("{}_{}.png", kind.as_str(), timestamp);
        let dest = self.config.images_dir().join(file_name);

        self.fetcher.fetch_to(image_url, &dest).await?;

        let record = NewGeneration {
            kind,
            prompt: prompt.to_string(),
            model: model.to_string(),
            image_path: dest.clone(),
            resolution: resolution.map(str::to_string),
            negative_prompt: negative_prompt.map(str::to_string),
        };
        if let Err(e) = self.store.add_generation(record).await {
            tracing::warn!("failed to record generation: {}", e);
        }

        Ok(dest)
    }
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("cancelling, in-flight jobs stop at their next poll...");
            token.cancel();
        }
    });
    cancel
}

fn report_outcome(outcome: &TaskOutcome) -> anyhow::Result<&str> {
    match outcome {
        TaskOutcome::Succeeded { image_url } => Ok(image_url),
        TaskOutcome::Failed { reason, .. } => bail!("generation failed: {}", reason),
        TaskOutcome::TimedOut => bail!("generation timed out; the remote task may still finish"),
    }
}

fn confirm_large_batch(total: usize, threshold: usize) -> anyhow::Result<bool> {
    if total <= threshold {
        return Ok(true);
    }
    print!(
        "About to run {} jobs, which may take a while. Continue? [y/N] ",
        total
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn load_prompts(prompts_file: Option<&PathBuf>, inline: &[String]) -> anyhow::Result<Vec<String>> {
    let mut prompts: Vec<String> = inline.to_vec();
    if let Some(path) = prompts_file {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        prompts.extend(
            contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        );
    }
    Ok(prompts)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("bananagen={}", log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => Config::load_default(),
    };

    match args.command {
        Command::Generate {
            prompt,
            model,
            resolution,
            aspect_ratio,
            num_images,
            negative_prompt,
            references,
        } => {
            let engine = Engine::from_config(config)?;
            let cancel = cancel_on_ctrl_c();
            let model = Model::from(model);

            // Local reference images must live on a public URL first
            let mut reference_urls = Vec::new();
            for (i, path) in references.iter().enumerate() {
                println!("uploading reference {}/{}...", i + 1, references.len());
                reference_urls.push(engine.resolver.resolve(path).await?);
            }

            let mut request = GenerationRequest::new(prompt.clone(), model);
            request.resolution = Resolution::from_pixels(&resolution);
            request.aspect_ratio = aspect_ratio;
            request.num_images = num_images;
            request.negative_prompt = negative_prompt.clone();
            request.reference_image_urls = reference_urls;

            println!("generating...");
            let outcome = engine.client.generate(&request, &cancel).await?;
            let image_url = report_outcome(&outcome)?;
            let dest = engine
                .save_result(
                    image_url,
                    GenerationKind::Generate,
                    &prompt,
                    model,
                    Some(request.resolution.as_str()),
                    negative_prompt.as_deref(),
                )
                .await?;
            println!("saved: {}", dest.display());
        }

        Command::Edit {
            image,
            prompt,
            model,
            resolution,
            aspect_ratio,
        } => {
            let engine = Engine::from_config(config)?;
            let cancel = cancel_on_ctrl_c();
            let model = Model::from(model);

            println!("uploading source image...");
            let image_url = engine.resolver.resolve(&image).await?;

            let mut request = EditRequest::new(image, prompt.clone(), model);
            request.resolution = resolution.as_deref().map(Resolution::from_pixels);
            request.aspect_ratio = aspect_ratio;

            println!("editing...");
            let outcome = engine.client.edit(&request, &image_url, &cancel).await?;
            let image_url = report_outcome(&outcome)?;
            let resolution_str = request.resolution.map(|r| r.as_str());
            let dest = engine
                .save_result(
                    image_url,
                    GenerationKind::Edit,
                    &prompt,
                    model,
                    resolution_str,
                    None,
                )
                .await?;
            println!("saved: {}", dest.display());
        }

        Command::Combine {
            image,
            prompt,
            resolution,
            aspect_ratio,
        } => {
            let engine = Engine::from_config(config)?;
            let cancel = cancel_on_ctrl_c();

            let mut image_urls = Vec::new();
            for (i, path) in image.iter().enumerate() {
                println!("uploading image {}/{}...", i + 1, image.len());
                image_urls.push(engine.resolver.resolve(path).await?);
            }

            let mut request = CombineRequest::new(image, prompt.clone());
            request.resolution = Resolution::from_pixels(&resolution);
            request.aspect_ratio = aspect_ratio;

            println!("combining...");
            let outcome = engine.client.combine(&request, &image_urls, &cancel).await?;
            let image_url = report_outcome(&outcome)?;
            let dest = engine
                .save_result(
                    image_url,
                    GenerationKind::Combine,
                    &prompt,
                    Model::Pro,
                    Some(request.resolution.as_str()),
                    None,
                )
                .await?;
            println!("saved: {}", dest.display());
        }

        Command::Batch {
            image,
            prompts_file,
            prompt,
            model,
            resolution,
            aspect_ratio,
            concurrency,
            yes,
        } => {
            let prompts = load_prompts(prompts_file.as_ref(), &prompt)?;
            if prompts.is_empty() {
                bail!("no prompts given; use --prompt or --prompts-file");
            }

            let jobs = shape_jobs(&image, &prompts);
            if !yes && !confirm_large_batch(jobs.len(), config.batch.confirm_threshold)? {
                println!("aborted");
                return Ok(());
            }

            let options = BatchOptions {
                model: Model::from(model),
                resolution: resolution.as_deref().map(Resolution::from_pixels),
                aspect_ratio,
                negative_prompt: None,
                concurrency: concurrency.unwrap_or(config.batch.concurrency),
            };

            let engine = Engine::from_config(config)?;
            let cancel = cancel_on_ctrl_c();
            let orchestrator = BatchOrchestrator::new(
                engine.client.clone(),
                engine.resolver.clone(),
                engine.fetcher.clone(),
                engine.store.clone(),
                engine.config.images_dir(),
            );

            let total = jobs.len();
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<ProgressEvent>();
            let reporter = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    println!("[job {}] {}", event.index, event.phase);
                }
            });

            println!("running {} jobs...", total);
            let result = orchestrator.run_batch(jobs, options, tx, cancel).await;
            let _ = reporter.await;

            println!(
                "batch finished: {} succeeded, {} failed",
                result.succeeded(),
                result.failed()
            );
            for (index, state) in &result.jobs {
                match state {
                    JobState::Completed(path) => {
                        println!("  job {}: ok -> {}", index, path.display())
                    }
                    JobState::Failed(reason) => println!("  job {}: failed ({})", index, reason),
                    _ => {}
                }
            }
        }

        Command::Credits => {
            let engine = Engine::from_config(config)?;
            let credits = engine.client.credit_balance().await?;
            println!("credits available: {}", credits);
        }

        Command::History { command } => {
            let store = JsonlStore::new(config.history_file());
            match command {
                HistoryCommand::List { kind, search, limit } => {
                    let filter = GenerationFilter {
                        kind: kind.map(GenerationKind::from),
                        search,
                        limit: Some(limit),
                        offset: 0,
                    };
                    let records = store.get_generations(&filter).await?;
                    if records.is_empty() {
                        println!("no generations recorded");
                    }
                    for record in records {
                        println!(
                            "#{} [{}] {} ({}) {}",
                            record.id,
                            record.kind.as_str(),
                            record.created_at.format("%Y-%m-%d %H:%M"),
                            record.model,
                            record.prompt
                        );
                        println!("    {}", record.image_path.display());
                    }
                }
                HistoryCommand::Delete { id } => {
                    if store.delete_generation(id).await? {
                        println!("deleted record {}", id);
                    } else {
                        println!("no record with id {}", id);
                    }
                }
            }
        }
    }

    Ok(())
}
