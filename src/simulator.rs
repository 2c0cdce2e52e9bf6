//! Simulated long-running operation.
//!
//! Each accepted request becomes a [`CompletionTask`]: after a randomized
//! delay it looks up the in-progress conference by friendly name and marks
//! it completed. Outcomes are logged, never returned to the HTTP caller.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::provider::{ConferenceProvider, ConferenceStatus};

/// Upper bound on a configured delay (one day).
pub const MAX_DELAY_SECS: u64 = 86_400;

/// Inclusive range of whole seconds a simulated operation may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl Default for DelayRange {
    fn default() -> Self {
        Self {
            min_secs: 5,
            max_secs: 15,
        }
    }
}

impl DelayRange {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if min_secs > max_secs {
            bail!(
                "delay min_secs ({}) must not exceed max_secs ({})",
                min_secs,
                max_secs
            );
        }
        if max_secs > MAX_DELAY_SECS {
            bail!(
                "delay max_secs ({}) must not exceed {}",
                max_secs,
                MAX_DELAY_SECS
            );
        }
        Ok(Self { min_secs, max_secs })
    }

    /// Draw a delay in milliseconds, always a whole number of seconds.
    pub fn draw_ms(&self) -> u64 {
        rand::thread_rng()
            .gen_range(self.min_secs..=self.max_secs)
            .saturating_mul(1000)
    }
}

/// What happened when a completion task fired.
#[derive(Debug)]
pub enum CompletionOutcome {
    /// The first matching conference was transitioned to `completed`.
    Completed { sid: String },
    /// No in-progress conference carried the friendly name; nothing updated.
    NoMatch,
    /// The lookup or the update failed at the provider.
    ProviderFailed(ProviderError),
}

/// A deferred, one-shot conference completion.
#[derive(Debug, Clone)]
pub struct CompletionTask {
    pub id: Uuid,
    pub conference_name: String,
    pub delay: Duration,
    pub scheduled_at: DateTime<Utc>,
    cancel: CancellationToken,
}

impl CompletionTask {
    pub fn new(conference_name: &str, delay: Duration, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            conference_name: conference_name.to_string(),
            delay,
            scheduled_at: Utc::now(),
            cancel,
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Look up the conference and complete it, without waiting for the delay.
    pub async fn fire(&self, provider: &dyn ConferenceProvider) -> CompletionOutcome {
        let conferences = match provider
            .list_conferences(&self.conference_name, ConferenceStatus::InProgress)
            .await
        {
            Ok(list) => list,
            Err(e) => return CompletionOutcome::ProviderFailed(e),
        };

        let Some(first) = conferences.into_iter().next() else {
            return CompletionOutcome::NoMatch;
        };

        match provider
            .update_status(&first.sid, ConferenceStatus::Completed)
            .await
        {
            Ok(_) => CompletionOutcome::Completed { sid: first.sid },
            Err(e) => CompletionOutcome::ProviderFailed(e),
        }
    }

    /// Wait out the delay, then fire once. Returns `None` if cancelled first.
    pub async fn run(self, provider: Arc<dyn ConferenceProvider>) -> Option<CompletionOutcome> {
        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(task_id = %self.id, conference = %self.conference_name, "completion cancelled before firing");
                return None;
            }
            _ = tokio::time::sleep(self.delay) => {}
        }

        let outcome = self.fire(provider.as_ref()).await;
        self.log_outcome(&outcome);
        Some(outcome)
    }

    fn log_outcome(&self, outcome: &CompletionOutcome) {
        match outcome {
            CompletionOutcome::Completed { sid } => {
                info!(task_id = %self.id, conference = %self.conference_name, sid = %sid, "simulated async task completed");
            }
            CompletionOutcome::NoMatch => {
                warn!(task_id = %self.id, conference = %self.conference_name, "no in-progress conference found, nothing to complete");
            }
            CompletionOutcome::ProviderFailed(e) => {
                error!(task_id = %self.id, conference = %self.conference_name, status = ?e.status(), error = %e, "failed to complete conference");
            }
        }
    }
}

/// Schedule a completion for `conference_name` after `delay`.
///
/// Returns immediately. The task is tied to a child of `shutdown`, so
/// cancelling the shutdown token drops any pending completion.
pub fn schedule_completion(
    provider: Arc<dyn ConferenceProvider>,
    conference_name: &str,
    delay: Duration,
    shutdown: &CancellationToken,
) -> JoinHandle<Option<CompletionOutcome>> {
    let task = CompletionTask::new(conference_name, delay, shutdown.child_token());
    debug!(
        task_id = %task.id,
        conference = %task.conference_name,
        delay_ms = task.delay.as_millis() as u64,
        scheduled_at = %task.scheduled_at.to_rfc3339(),
        "scheduled conference completion"
    );
    tokio::spawn(task.run(provider))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;

    use crate::provider::Conference;

    /// In-memory provider that records every call in order.
    #[derive(Default)]
    pub(crate) struct RecordingProvider {
        pub conferences: Mutex<Vec<Conference>>,
        pub calls: Mutex<Vec<String>>,
        pub fail_list: bool,
        pub fail_update: bool,
    }

    impl RecordingProvider {
        pub fn with_conferences(conferences: Vec<Conference>) -> Self {
            Self {
                conferences: Mutex::new(conferences),
                ..Self::default()
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn update_count(&self) -> usize {
            self.calls()
                .iter()
                .filter(|c| c.starts_with("update:"))
                .count()
        }
    }

    #[async_trait]
    impl ConferenceProvider for RecordingProvider {
        async fn list_conferences(
            &self,
            friendly_name: &str,
            status: ConferenceStatus,
        ) -> Result<Vec<Conference>, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("list:{}:{}", friendly_name, status.as_str()));
            if self.fail_list {
                return Err(ProviderError::Api {
                    status: 401,
                    code: Some(20003),
                    message: "Authenticate".to_string(),
                });
            }
            Ok(self
                .conferences
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.friendly_name == friendly_name && c.status == status)
                .cloned()
                .collect())
        }

        async fn update_status(
            &self,
            sid: &str,
            status: ConferenceStatus,
        ) -> Result<Conference, ProviderError> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("update:{}:{}", sid, status.as_str()));
            if self.fail_update {
                return Err(ProviderError::Decode("boom".to_string()));
            }
            let mut conferences = self.conferences.lock().unwrap();
            let conf = conferences
                .iter_mut()
                .find(|c| c.sid == sid)
                .ok_or_else(|| ProviderError::Api {
                    status: 404,
                    code: Some(20404),
                    message: "not found".to_string(),
                })?;
            conf.status = status;
            Ok(conf.clone())
        }
    }

    pub(crate) fn in_progress(sid: &str, name: &str) -> Conference {
        Conference {
            sid: sid.to_string(),
            friendly_name: name.to_string(),
            status: ConferenceStatus::InProgress,
        }
    }

    #[test]
    fn test_default_delay_range() {
        assert_eq!(DelayRange::default(), DelayRange::new(5, 15).unwrap());
    }

    #[test]
    fn test_delay_range_rejects_inverted_bounds() {
        let err = DelayRange::new(10, 5).unwrap_err();
        assert!(err.to_string().contains("min_secs"));
    }

    #[test]
    fn test_delay_range_rejects_oversized_max() {
        let err = DelayRange::new(5, u64::MAX).unwrap_err();
        assert!(err.to_string().contains("max_secs"));
        assert!(DelayRange::new(5, MAX_DELAY_SECS + 1).is_err());
        assert!(DelayRange::new(MAX_DELAY_SECS, MAX_DELAY_SECS).is_ok());
    }

    #[test]
    fn test_draw_saturates_instead_of_overflowing() {
        let range = DelayRange {
            min_secs: u64::MAX,
            max_secs: u64::MAX,
        };
        assert_eq!(range.draw_ms(), u64::MAX);
    }

    #[test]
    fn test_draw_is_whole_seconds_within_bounds() {
        let range = DelayRange::default();
        for _ in 0..1000 {
            let ms = range.draw_ms();
            assert_eq!(ms % 1000, 0, "{ms} is not a whole second");
            assert!((5000..=15000).contains(&ms), "{ms} out of range");
        }
    }

    #[test]
    fn test_draw_covers_both_endpoints() {
        let range = DelayRange::default();
        let draws: Vec<u64> = (0..5000).map(|_| range.draw_ms()).collect();
        assert!(draws.contains(&5000));
        assert!(draws.contains(&15000));
    }

    #[test]
    fn test_draw_single_value_range() {
        let range = DelayRange::new(7, 7).unwrap();
        assert_eq!(range.draw_ms(), 7000);
    }

    #[tokio::test]
    async fn test_fire_completes_first_match_once() {
        let provider = RecordingProvider::with_conferences(vec![
            in_progress("CF1", "CA123"),
            in_progress("CF2", "CA123"),
        ]);
        let task = CompletionTask::new("CA123", Duration::ZERO, CancellationToken::new());

        let outcome = task.fire(&provider).await;

        assert!(matches!(outcome, CompletionOutcome::Completed { ref sid } if sid == "CF1"));
        assert_eq!(
            provider.calls(),
            vec![
                "list:CA123:in-progress".to_string(),
                "update:CF1:completed".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_fire_no_match_makes_no_update() {
        let provider = RecordingProvider::default();
        let task = CompletionTask::new("CA404", Duration::ZERO, CancellationToken::new());

        let outcome = task.fire(&provider).await;

        assert!(matches!(outcome, CompletionOutcome::NoMatch));
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_empty_name_is_no_match() {
        let provider = RecordingProvider::with_conferences(vec![in_progress("CF1", "CA123")]);
        let task = CompletionTask::new("", Duration::ZERO, CancellationToken::new());

        assert!(matches!(task.fire(&provider).await, CompletionOutcome::NoMatch));
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_lookup_failure_skips_update() {
        let provider = RecordingProvider {
            fail_list: true,
            ..RecordingProvider::with_conferences(vec![in_progress("CF1", "CA123")])
        };
        let task = CompletionTask::new("CA123", Duration::ZERO, CancellationToken::new());

        let outcome = task.fire(&provider).await;

        match outcome {
            CompletionOutcome::ProviderFailed(e) => assert_eq!(e.status(), Some(401)),
            other => panic!("expected provider failure, got {other:?}"),
        }
        assert_eq!(provider.update_count(), 0);
    }

    #[tokio::test]
    async fn test_fire_update_failure_is_reported() {
        let provider = RecordingProvider {
            fail_update: true,
            ..RecordingProvider::with_conferences(vec![in_progress("CF1", "CA123")])
        };
        let task = CompletionTask::new("CA123", Duration::ZERO, CancellationToken::new());

        let outcome = task.fire(&provider).await;

        assert!(matches!(outcome, CompletionOutcome::ProviderFailed(_)));
        assert_eq!(provider.update_count(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_completion_waits_for_delay() {
        let provider = Arc::new(RecordingProvider::with_conferences(vec![in_progress(
            "CF1", "CA123",
        )]));
        let shutdown = CancellationToken::new();
        let delay = Duration::from_millis(50);

        let started = Instant::now();
        let handle = schedule_completion(provider.clone(), "CA123", delay, &shutdown);
        assert!(provider.calls().is_empty(), "nothing fires before the delay");

        let outcome = handle.await.unwrap();
        assert!(started.elapsed() >= delay);
        assert!(matches!(outcome, Some(CompletionOutcome::Completed { .. })));
        assert_eq!(provider.update_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_drops_pending_completion() {
        let provider = Arc::new(RecordingProvider::with_conferences(vec![in_progress(
            "CF1", "CA123",
        )]));
        let shutdown = CancellationToken::new();

        let handle =
            schedule_completion(provider.clone(), "CA123", Duration::from_secs(60), &shutdown);
        shutdown.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("cancelled task should finish promptly")
            .unwrap();
        assert!(outcome.is_none());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_task_never_contacts_provider() {
        let provider = Arc::new(RecordingProvider::with_conferences(vec![in_progress(
            "CF1", "CA123",
        )]));
        let task = CompletionTask::new("CA123", Duration::from_millis(10), CancellationToken::new());
        task.cancel_token().cancel();

        assert!(task.run(provider.clone()).await.is_none());
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn test_independent_tasks_complete_in_delay_order() {
        let provider = Arc::new(RecordingProvider::with_conferences(vec![
            in_progress("CF1", "slow"),
            in_progress("CF2", "fast"),
        ]));
        let shutdown = CancellationToken::new();

        let slow =
            schedule_completion(provider.clone(), "slow", Duration::from_millis(120), &shutdown);
        let fast =
            schedule_completion(provider.clone(), "fast", Duration::from_millis(10), &shutdown);
        fast.await.unwrap();
        slow.await.unwrap();

        let updates: Vec<String> = provider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("update:"))
            .collect();
        assert_eq!(updates, vec!["update:CF2:completed", "update:CF1:completed"]);
    }
}
