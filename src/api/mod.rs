//! NanoBanana task protocol: models, wire client and the submit/poll loop

pub mod client;
pub mod models;
pub mod provider;

#[cfg(test)]
pub(crate) mod testing;

pub use client::{PollPolicy, TaskClient};
pub use models::{
    CombineRequest, EditRequest, FailureStage, GenerationRequest, Model, Resolution, TaskOutcome,
};
pub use provider::{Endpoint, HttpProvider, ProviderApi, TaskStatus};
