// bananagen - orchestration engine for the NanoBanana image generation API
//
// Wraps an asynchronous, task-based provider: submission returns only a task
// id and completion is discovered by polling. Edits and combines need their
// source images on a public URL first, so a chain of anonymous file hosts is
// used as an upload relay. Batches of independent jobs run under a bounded
// worker pool with per-job progress and partial-failure tolerance.

pub mod api;
pub mod batch;
pub mod config;
pub mod error;
pub mod history;
pub mod images;
pub mod upload;

pub use api::{
    CombineRequest, EditRequest, FailureStage, GenerationRequest, HttpProvider, Model, PollPolicy,
    Resolution, TaskClient, TaskOutcome,
};
pub use batch::{BatchOptions, BatchOrchestrator, BatchResult, JobKind, JobSpec, JobState};
pub use config::Config;
pub use error::{Error, Result};
pub use history::{GenerationFilter, GenerationKind, GenerationRecord, GenerationStore, JsonlStore};
pub use images::{HttpImageFetcher, ImageFetcher};
pub use upload::{UploadBackend, UploadResolver};
