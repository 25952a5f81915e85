//! Job orchestrator.
//!
//! Runs one job through
//! `validating -> probing_readiness -> materializing_inputs -> submitting
//! -> polling -> resolving`. The first failing stage ends the job; its
//! error becomes the job result. Retries only happen inside the readiness
//! probe and the completion poller.

use std::sync::Arc;

use bridge_comfyui::api::ComfyUIApi;
use bridge_comfyui::readiness::wait_until_ready;
use bridge_core::clock::Clock;
use bridge_core::job::{Job, JobResult};
use bridge_core::validation::validate_input;
use tracing::Instrument;

use crate::config::WorkerConfig;
use crate::error::JobError;
use crate::materialize::Materializer;
use crate::poller::CompletionPoller;
use crate::resolver::OutputResolver;
use crate::storage::ObjectStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Validating,
    ProbingReadiness,
    MaterializingInputs,
    Submitting,
    Polling,
    Resolving,
}

pub struct JobOrchestrator {
    config: Arc<WorkerConfig>,
    api: ComfyUIApi,
    clock: Arc<dyn Clock>,
    store: Option<Arc<dyn ObjectStore>>,
}

impl JobOrchestrator {
    /// Outputs are uploaded to `store` when one is given and inlined
    /// otherwise.
    pub fn new(
        config: Arc<WorkerConfig>,
        clock: Arc<dyn Clock>,
        store: Option<Arc<dyn ObjectStore>>,
    ) -> Self {
        let api = ComfyUIApi::new(config.api_url()).with_request_timeout(config.request_timeout);
        Self {
            config,
            api,
            clock,
            store,
        }
    }

    /// Run `job` to completion. Never fails: every error is rendered into
    /// the returned result.
    pub async fn handle(&self, job: &Job) -> JobResult {
        let span = tracing::info_span!("job", job_id = %job.id);

        async {
            match self.run(job).await {
                Ok(result) => {
                    tracing::info!(summary = %result.message, "Job completed");
                    result
                }
                Err((stage, err)) => {
                    tracing::error!(?stage, error = %err, "Job failed");
                    err.into_result(self.config.refresh_worker)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job: &Job) -> Result<JobResult, (JobStage, JobError)> {
        let config = self.config.as_ref();

        tracing::debug!(stage = ?JobStage::Validating);
        let input = validate_input(job.input.as_ref())
            .map_err(|e| (JobStage::Validating, JobError::from(e)))?;

        tracing::debug!(stage = ?JobStage::ProbingReadiness);
        let readiness = wait_until_ready(&self.api, &config.readiness, self.clock.as_ref()).await;
        if !readiness.is_ready() {
            return Err((
                JobStage::ProbingReadiness,
                JobError::ReadinessTimeout {
                    timeout: config.readiness.timeout,
                },
            ));
        }

        tracing::debug!(stage = ?JobStage::MaterializingInputs);
        let materializer = Materializer::new(config, &self.api);
        if let Some(images) = &input.images {
            materializer
                .stage_images(images)
                .await
                .map_err(|e| (JobStage::MaterializingInputs, JobError::from(e)))?;
        }
        let mut workflow = input.workflow;
        materializer
            .rewrite_inline_images(&mut workflow)
            .await
            .map_err(|e| (JobStage::MaterializingInputs, JobError::from(e)))?;

        tracing::debug!(stage = ?JobStage::Submitting);
        let queued = self
            .api
            .submit_workflow(&workflow)
            .await
            .map_err(|e| (JobStage::Submitting, JobError::Submission(e)))?;
        tracing::info!(
            prompt_id = %queued.prompt_id,
            queue_position = ?queued.number,
            nodes = workflow.len(),
            "Workflow queued",
        );

        tracing::debug!(stage = ?JobStage::Polling);
        let outputs = CompletionPoller::new(&self.api, &config.polling, self.clock.as_ref())
            .wait_for_outputs(&queued.prompt_id)
            .await
            .map_err(|e| (JobStage::Polling, e))?;

        tracing::debug!(stage = ?JobStage::Resolving);
        let resolved = OutputResolver::new(config, self.store.as_deref())
            .resolve(&job.id, &outputs)
            .await
            .map_err(|e| (JobStage::Resolving, e))?;

        if resolved.images.is_empty() {
            return Err((
                JobStage::Resolving,
                JobError::NoOutputs {
                    details: resolved.errors,
                },
            ));
        }

        Ok(JobResult::success(
            format!("Workflow completed with {} image(s)", resolved.images.len()),
            resolved.images,
            resolved.errors,
            config.refresh_worker,
        ))
    }
}
