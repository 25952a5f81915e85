//! Completion poller.
//!
//! Fetches `/history/{prompt_id}` until the prompt's outputs appear or the
//! retry budget runs out. Unlike the readiness probe, a failed history
//! request is fatal: the prompt is already queued, so an unreachable or
//! misbehaving history endpoint is not startup lag.

use bridge_comfyui::api::ComfyUIApi;
use bridge_comfyui::history::Outputs;
use bridge_core::clock::Clock;

use crate::config::PollingConfig;
use crate::error::JobError;

#[derive(Debug)]
pub enum PollState {
    Pending { retries: u32 },
    Done(Outputs),
    TimedOut { retries: u32 },
}

pub struct CompletionPoller<'a> {
    api: &'a ComfyUIApi,
    config: &'a PollingConfig,
    clock: &'a dyn Clock,
}

impl<'a> CompletionPoller<'a> {
    pub fn new(api: &'a ComfyUIApi, config: &'a PollingConfig, clock: &'a dyn Clock) -> Self {
        Self { api, config, clock }
    }

    /// Drive the state machine to a terminal state.
    ///
    /// At most `max_retries` history requests are made with one `interval`
    /// sleep after each unfinished one. A budget of zero still polls once.
    pub async fn wait_for_outputs(&self, prompt_id: &str) -> Result<Outputs, JobError> {
        let mut state = PollState::Pending { retries: 0 };

        loop {
            state = match state {
                PollState::Pending { retries } => self.tick(prompt_id, retries).await?,
                PollState::Done(outputs) => {
                    tracing::info!(%prompt_id, nodes = outputs.len(), "Workflow execution completed");
                    return Ok(outputs);
                }
                PollState::TimedOut { retries } => {
                    tracing::warn!(%prompt_id, retries, "Gave up waiting for workflow outputs");
                    return Err(JobError::PollingTimeout { attempts: retries });
                }
            };
        }
    }

    /// One history round trip, followed by a sleep if still pending.
    pub async fn tick(&self, prompt_id: &str, retries: u32) -> Result<PollState, JobError> {
        let history = self
            .api
            .get_history(prompt_id)
            .await
            .map_err(JobError::Polling)?;

        let picked_up = history.entry(prompt_id).is_some();
        if let Some(outputs) = history.into_completed_outputs(prompt_id) {
            return Ok(PollState::Done(outputs));
        }

        if retries >= self.config.max_retries {
            return Ok(PollState::TimedOut { retries });
        }

        tracing::debug!(%prompt_id, retries, picked_up, "Outputs not ready yet");
        self.clock.sleep(self.config.interval).await;

        let retries = retries + 1;
        if retries >= self.config.max_retries {
            Ok(PollState::TimedOut { retries })
        } else {
            Ok(PollState::Pending { retries })
        }
    }
}
