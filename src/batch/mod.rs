//! Batch orchestrator: bounded-concurrency execution of independent jobs
//!
//! Jobs run under a semaphore-bounded pool. A job's upload, submission and
//! polling all happen inside its slot, so slow uploads reduce throughput but
//! never break the concurrency cap. Job failures are isolated: the batch
//! always waits for every job to reach a terminal state and reports a tally
//! instead of failing fast. Successful jobs are persisted as they complete,
//! so partial work survives an interrupted batch.

use crate::api::models::{EditRequest, GenerationRequest, Model, Resolution};
use crate::api::TaskClient;
use crate::history::{GenerationKind, GenerationStore, NewGeneration};
use crate::images::ImageFetcher;
use crate::upload::UploadResolver;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// What one batch job does
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobKind {
    /// Text-to-image, no source upload needed
    Generate,
    /// Edit a local source image
    Edit { source: PathBuf },
}

/// One independent unit of work; the index is stable for the batch lifetime
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub index: usize,
    pub prompt: String,
    pub kind: JobKind,
}

/// Options shared by every job in a batch
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub model: Model,
    pub resolution: Option<Resolution>,
    pub aspect_ratio: Option<String>,
    pub negative_prompt: Option<String>,
    pub concurrency: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            model: Model::Flash,
            resolution: None,
            aspect_ratio: None,
            negative_prompt: None,
            concurrency: 5,
        }
    }
}

/// Terminal (and in-flight) state of one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed(PathBuf),
    Failed(String),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed(_) | JobState::Failed(_))
    }
}

/// Per-job progress notification, correlated by index rather than arrival order
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub index: usize,
    pub phase: String,
}

/// Final state of a batch: every submitted job mapped to a terminal state
#[derive(Debug, Default)]
pub struct BatchResult {
    pub jobs: BTreeMap<usize, JobState>,
}

impl BatchResult {
    pub fn succeeded(&self) -> usize {
        self.jobs
            .values()
            .filter(|s| matches!(s, JobState::Completed(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.jobs
            .values()
            .filter(|s| matches!(s, JobState::Failed(_)))
            .count()
    }
}

/// Shape a batch out of source images and prompt lines.
///
/// One source with many prompts fans out over the prompts; many sources run
/// one job per source with the first prompt reused for all of them (no
/// cross-product). No sources at all means one generate job per prompt.
pub fn shape_jobs(sources: &[PathBuf], prompts: &[String]) -> Vec<JobSpec> {
    if prompts.is_empty() {
        return Vec::new();
    }

    if sources.is_empty() {
        return prompts
            .iter()
            .enumerate()
            .map(|(index, prompt)| JobSpec {
                index,
                prompt: prompt.clone(),
                kind: JobKind::Generate,
            })
            .collect();
    }

    if sources.len() == 1 {
        let source = &sources[0];
        return prompts
            .iter()
            .enumerate()
            .map(|(index, prompt)| JobSpec {
                index,
                prompt: prompt.clone(),
                kind: JobKind::Edit {
                    source: source.clone(),
                },
            })
            .collect();
    }

    // Several sources: first prompt wins for all of them
    let prompt = &prompts[0];
    sources
        .iter()
        .enumerate()
        .map(|(index, source)| JobSpec {
            index,
            prompt: prompt.clone(),
            kind: JobKind::Edit {
                source: source.clone(),
            },
        })
        .collect()
}

/// Runs batches of generation/edit jobs with bounded parallelism
pub struct BatchOrchestrator {
    client: TaskClient,
    resolver: Arc<UploadResolver>,
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<dyn GenerationStore>,
    images_dir: PathBuf,
}

struct JobContext {
    client: TaskClient,
    resolver: Arc<UploadResolver>,
    fetcher: Arc<dyn ImageFetcher>,
    store: Arc<dyn GenerationStore>,
    images_dir: PathBuf,
    options: BatchOptions,
    progress: mpsc::UnboundedSender<ProgressEvent>,
    cancel: CancellationToken,
}

impl BatchOrchestrator {
    pub fn new(
        client: TaskClient,
        resolver: Arc<UploadResolver>,
        fetcher: Arc<dyn ImageFetcher>,
        store: Arc<dyn GenerationStore>,
        images_dir: PathBuf,
    ) -> Self {
        Self {
            client,
            resolver,
            fetcher,
            store,
            images_dir,
        }
    }

    /// Run every job to a terminal state and report the tally.
    ///
    /// Progress events arrive on `progress` in completion order; correlate by
    /// job index. Cancellation stops dispatching queued jobs and is observed
    /// by in-flight jobs at their next poll tick; jobs that already finished
    /// keep their results.
    pub async fn run_batch(
        &self,
        jobs: Vec<JobSpec>,
        options: BatchOptions,
        progress: mpsc::UnboundedSender<ProgressEvent>,
        cancel: CancellationToken,
    ) -> BatchResult {
        let mut result = BatchResult::default();
        for job in &jobs {
            result.jobs.insert(job.index, JobState::Queued);
        }

        let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));
        let mut tasks: JoinSet<(usize, JobState)> = JoinSet::new();
        let mut dispatched = BTreeSet::new();

        for job in jobs {
            // Acquiring the slot before spawning keeps cancellation simple:
            // a cancelled batch stops handing out slots here
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let ctx = JobContext {
                client: self.client.clone(),
                resolver: self.resolver.clone(),
                fetcher: self.fetcher.clone(),
                store: self.store.clone(),
                images_dir: self.images_dir.clone(),
                options: options.clone(),
                progress: progress.clone(),
                cancel: cancel.clone(),
            };

            dispatched.insert(job.index);
            tasks.spawn(async move {
                let _permit = permit;
                let index = job.index;
                let state = run_job(&ctx, job).await;
                (index, state)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, state)) => {
                    result.jobs.insert(index, state);
                }
                Err(e) => {
                    tracing::error!("batch job panicked: {}", e);
                }
            }
        }

        // Every job still gets a terminal state: dispatched jobs whose task
        // panicked report that, the rest were never handed a slot
        for (index, state) in result.jobs.iter_mut() {
            if !state.is_terminal() {
                *state = if dispatched.contains(index) {
                    JobState::Failed("job panicked".to_string())
                } else {
                    JobState::Failed("cancelled before dispatch".to_string())
                };
            }
        }

        tracing::info!(
            succeeded = result.succeeded(),
            failed = result.failed(),
            "batch finished"
        );
        result
    }
}

async fn run_job(ctx: &JobContext, job: JobSpec) -> JobState {
    let report = |phase: &str| {
        let _ = ctx.progress.send(ProgressEvent {
            index: job.index,
            phase: phase.to_string(),
        });
    };

    report("starting");

    let (outcome, kind) = match &job.kind {
        JobKind::Generate => {
            let mut request = GenerationRequest::new(job.prompt.clone(), ctx.options.model);
            request.resolution = ctx.options.resolution.unwrap_or_default();
            request.aspect_ratio = ctx.options.aspect_ratio.clone();
            request.negative_prompt = ctx.options.negative_prompt.clone();
            request.num_images = 1;

            report("generating");
            match ctx.client.generate(&request, &ctx.cancel).await {
                Ok(outcome) => (outcome, GenerationKind::Generate),
                Err(e) => {
                    report("failed");
                    return JobState::Failed(e.to_string());
                }
            }
        }
        JobKind::Edit { source } => {
            report("uploading source image");
            let image_url = match ctx.resolver.resolve(source).await {
                Ok(url) => url,
                Err(e) => {
                    report("failed");
                    return JobState::Failed(e.to_string());
                }
            };

            let mut request =
                EditRequest::new(source.clone(), job.prompt.clone(), ctx.options.model);
            request.resolution = ctx.options.resolution;
            request.aspect_ratio = ctx.options.aspect_ratio.clone();
            request.negative_prompt = ctx.options.negative_prompt.clone();

            report("generating");
            match ctx.client.edit(&request, &image_url, &ctx.cancel).await {
                Ok(outcome) => (outcome, GenerationKind::Edit),
                Err(e) => {
                    report("failed");
                    return JobState::Failed(e.to_string());
                }
            }
        }
    };

    let image_url = match outcome {
        crate::api::TaskOutcome::Succeeded { image_url } => image_url,
        other => {
            report("failed");
            return JobState::Failed(
                other
                    .failure_reason()
                    .unwrap_or_else(|| "unknown failure".to_string()),
            );
        }
    };

    report("saving result");
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let file_name = format!("batch_{}_{}.png", job.index, timestamp);
    let dest = ctx.images_dir.join(file_name);

    if let Err(e) = ctx.fetcher.fetch_to(&image_url, &dest).await {
        report("failed");
        return JobState::Failed(format!("failed to save result image: {}", e));
    }

    // Persisted as the job completes; a record failure is logged, never
    // propagated back into an already-successful generation
    let record = NewGeneration {
        kind,
        prompt: job.prompt.clone(),
        model: ctx.options.model.to_string(),
        image_path: dest.clone(),
        resolution: ctx.options.resolution.map(|r| r.as_str().to_string()),
        negative_prompt: ctx.options.negative_prompt.clone(),
    };
    if let Err(e) = ctx.store.add_generation(record).await {
        tracing::warn!(index = job.index, "failed to record generation: {}", e);
    }

    report("done");
    JobState::Completed(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ScriptedProvider, Submit};
    use crate::api::{PollPolicy, TaskStatus};
    use crate::error::Result;
    use crate::history::MemoryStore;
    use crate::upload::UploadBackend;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    struct StubFetcher;

    #[async_trait]
    impl ImageFetcher for StubFetcher {
        async fn fetch_to(&self, _url: &str, dest: &Path) -> Result<()> {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(dest, b"png").await?;
            Ok(())
        }
    }

    struct StubUploadBackend;

    #[async_trait]
    impl UploadBackend for StubUploadBackend {
        fn name(&self) -> &'static str {
            "stub"
        }

        async fn upload(&self, path: &Path) -> Result<String> {
            Ok(format!("https://host/{}", path.display()))
        }
    }

    fn orchestrator(
        provider: Arc<ScriptedProvider>,
        store: Arc<MemoryStore>,
        images_dir: PathBuf,
    ) -> BatchOrchestrator {
        let client = TaskClient::new(provider, PollPolicy::default());
        let resolver = Arc::new(UploadResolver::new(vec![Box::new(StubUploadBackend)]));
        BatchOrchestrator::new(client, resolver, Arc::new(StubFetcher), store, images_dir)
    }

    fn prompts(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn one_source_fans_out_over_prompts() {
        let sources = vec![PathBuf::from("a.png")];
        let jobs = shape_jobs(&sources, &prompts(&["one", "two", "three"]));

        assert_eq!(jobs.len(), 3);
        for (i, job) in jobs.iter().enumerate() {
            assert_eq!(job.index, i);
            assert_eq!(
                job.kind,
                JobKind::Edit {
                    source: PathBuf::from("a.png")
                }
            );
        }
        assert_eq!(jobs[1].prompt, "two");
    }

    #[test]
    fn many_sources_reuse_the_first_prompt() {
        let sources = vec![
            PathBuf::from("a.png"),
            PathBuf::from("b.png"),
            PathBuf::from("c.png"),
        ];
        let jobs = shape_jobs(&sources, &prompts(&["first", "second"]));

        assert_eq!(jobs.len(), 3);
        for job in &jobs {
            assert_eq!(job.prompt, "first");
        }
        assert_eq!(
            jobs[2].kind,
            JobKind::Edit {
                source: PathBuf::from("c.png")
            }
        );
    }

    #[test]
    fn no_sources_means_one_generate_job_per_prompt() {
        let jobs = shape_jobs(&[], &prompts(&["one", "two", "three"]));
        assert_eq!(jobs.len(), 3);
        assert!(jobs.iter().all(|j| j.kind == JobKind::Generate));
    }

    #[test]
    fn empty_prompts_shape_no_jobs() {
        assert!(shape_jobs(&[PathBuf::from("a.png")], &[]).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn one_validation_failure_does_not_sink_the_batch() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::succeeding("https://cdn/img.png"));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(provider, store.clone(), dir.path().to_path_buf());

        // Job index 2 fails validation (empty prompt), the rest succeed
        let jobs = shape_jobs(&[], &prompts(&["one", "two", "", "four", "five"]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, BatchOptions::default(), tx, CancellationToken::new())
            .await;

        assert_eq!(result.succeeded(), 4);
        assert_eq!(result.failed(), 1);
        assert!(matches!(result.jobs[&2], JobState::Failed(_)));
        assert_eq!(store.len().await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_cap_is_never_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(
            ScriptedProvider::succeeding("https://cdn/img.png")
                .with_create_delay(Duration::from_secs(1)),
        );
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(provider.clone(), store, dir.path().to_path_buf());

        let jobs = shape_jobs(
            &[],
            &(0..10).map(|i| format!("prompt {}", i)).collect::<Vec<_>>(),
        );
        let options = BatchOptions {
            concurrency: 5,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, options, tx, CancellationToken::new())
            .await;

        assert_eq!(result.succeeded(), 10);
        assert!(
            provider.max_in_flight() <= 5,
            "observed {} concurrent jobs",
            provider.max_in_flight()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn progress_events_carry_stable_indices() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::succeeding("https://cdn/img.png"));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(provider, store, dir.path().to_path_buf());

        let sources = vec![PathBuf::from("a.png")];
        let jobs = shape_jobs(&sources, &prompts(&["one", "two"]));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, BatchOptions::default(), tx, CancellationToken::new())
            .await;
        assert_eq!(result.succeeded(), 2);

        let mut seen = std::collections::BTreeMap::new();
        while let Ok(event) = rx.try_recv() {
            seen.entry(event.index).or_insert_with(Vec::new).push(event.phase);
        }
        assert_eq!(seen.len(), 2);
        for phases in seen.values() {
            assert!(phases.contains(&"uploading source image".to_string()));
            assert_eq!(phases.last().map(String::as_str), Some("done"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_batch_dispatches_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::succeeding("https://cdn/img.png"));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(provider.clone(), store.clone(), dir.path().to_path_buf());

        let cancel = CancellationToken::new();
        cancel.cancel();

        let jobs = shape_jobs(&[], &prompts(&["one", "two", "three"]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, BatchOptions::default(), tx, cancel)
            .await;

        assert_eq!(result.succeeded(), 0);
        assert_eq!(result.failed(), 3);
        assert_eq!(provider.create_calls(), 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn panicked_jobs_get_a_distinct_failure_reason() {
        struct PanickingFetcher;

        #[async_trait]
        impl ImageFetcher for PanickingFetcher {
            async fn fetch_to(&self, _url: &str, _dest: &Path) -> Result<()> {
                panic!("fetcher blew up");
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(ScriptedProvider::succeeding("https://cdn/img.png"));
        let store = Arc::new(MemoryStore::new());
        let client = TaskClient::new(provider, PollPolicy::default());
        let resolver = Arc::new(UploadResolver::new(vec![Box::new(StubUploadBackend)]));
        let orchestrator = BatchOrchestrator::new(
            client,
            resolver,
            Arc::new(PanickingFetcher),
            store.clone(),
            dir.path().to_path_buf(),
        );

        let jobs = shape_jobs(&[], &prompts(&["one"]));
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, BatchOptions::default(), tx, CancellationToken::new())
            .await;

        assert_eq!(result.failed(), 1);
        assert_eq!(result.jobs[&0], JobState::Failed("job panicked".to_string()));
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_jobs_report_failure_without_blocking_others() {
        let dir = tempfile::tempdir().unwrap();
        // First job's task never finishes, second one succeeds immediately
        let provider = Arc::new(ScriptedProvider::new(
            Submit::Ok,
            vec![Ok(TaskStatus::Succeeded {
                image_url: "https://cdn/img.png".to_string(),
            })],
        ));
        let store = Arc::new(MemoryStore::new());
        let client = TaskClient::new(
            provider,
            PollPolicy {
                interval: Duration::from_secs(3),
                max_wait: Duration::from_secs(9),
            },
        );
        let resolver = Arc::new(UploadResolver::new(vec![Box::new(StubUploadBackend)]));
        let orchestrator = BatchOrchestrator::new(
            client,
            resolver,
            Arc::new(StubFetcher),
            store.clone(),
            dir.path().to_path_buf(),
        );

        let jobs = shape_jobs(&[], &prompts(&["one", "two"]));
        let options = BatchOptions {
            concurrency: 1,
            ..Default::default()
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = orchestrator
            .run_batch(jobs, options, tx, CancellationToken::new())
            .await;

        assert_eq!(result.succeeded(), 1);
        assert_eq!(result.failed(), 1);
        assert_eq!(store.len().await, 1);
    }
}
