//! Trigger ingress: turns queue messages into scheduler signals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::scheduler::DebounceScheduler;
use crate::models::Domain;

#[derive(Error, Debug, PartialEq)]
pub enum IngressError {
    #[error("Malformed trigger message: {0}")]
    MalformedMessage(String),

    #[error("Unknown job type: {0}")]
    UnknownJobType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    ProcessPendingVitals,
    ProcessPendingNutrition,
    ProcessPendingLabs,
}

impl JobType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "process_pending_vitals" => Some(JobType::ProcessPendingVitals),
            "process_pending_nutrition" => Some(JobType::ProcessPendingNutrition),
            "process_pending_labs" => Some(JobType::ProcessPendingLabs),
            _ => None,
        }
    }

    pub fn domain(self) -> Domain {
        match self {
            JobType::ProcessPendingVitals => Domain::Vitals,
            JobType::ProcessPendingNutrition => Domain::Nutrition,
            JobType::ProcessPendingLabs => Domain::Labs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggerMessage {
    pub job_type: JobType,
    pub user_id: i64,
    pub priority: Priority,
    pub submitted_at: Option<DateTime<Utc>>,
}

/// Wire shape, before the job type is checked.
#[derive(Deserialize)]
struct RawTrigger {
    job_type: String,
    user_id: i64,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl TriggerMessage {
    pub fn parse(json: &str) -> Result<Self, IngressError> {
        let raw: RawTrigger =
            serde_json::from_str(json).map_err(|e| IngressError::MalformedMessage(e.to_string()))?;
        let job_type = JobType::parse(&raw.job_type).ok_or(IngressError::UnknownJobType(raw.job_type))?;
        Ok(Self {
            job_type,
            user_id: raw.user_id,
            priority: raw.priority,
            submitted_at: raw.submitted_at,
        })
    }

    /// Debounce key for per-source scheduling.
    pub fn source_key(&self) -> String {
        format!("user:{}", self.user_id)
    }
}

pub struct TriggerIngress {
    scheduler: DebounceScheduler,
}

impl TriggerIngress {
    pub fn new(scheduler: DebounceScheduler) -> Self {
        Self { scheduler }
    }

    /// Parse one queue message and signal the scheduler. Rejected messages
    /// never reach the scheduler.
    pub async fn handle_message(&self, json: &str) -> Result<TriggerMessage, IngressError> {
        let message = TriggerMessage::parse(json)?;
        self.dispatch(&message).await;
        Ok(message)
    }

    /// In-process equivalent of a queue message.
    pub async fn submit(&self, user_id: i64, job_type: JobType) {
        let message = TriggerMessage {
            job_type,
            user_id,
            priority: Priority::Normal,
            submitted_at: Some(Utc::now()),
        };
        self.dispatch(&message).await;
    }

    async fn dispatch(&self, message: &TriggerMessage) {
        let domain = message.job_type.domain();
        tracing::debug!(
            %domain,
            user_id = message.user_id,
            priority = ?message.priority,
            "Trigger received"
        );
        self.scheduler.signal(&message.source_key()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::config::{DebounceConfig, DebounceMode};
    use crate::pipeline::batch::{BatchError, PassResult, PassRunner};

    #[derive(Default)]
    struct MockRunner {
        passes: AtomicUsize,
    }

    impl PassRunner for MockRunner {
        fn run_pass(&self) -> Result<PassResult, BatchError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            Ok(PassResult::empty())
        }

        fn pending_count(&self) -> Result<i64, BatchError> {
            Ok(1)
        }
    }

    fn ingress(mode: DebounceMode) -> (TriggerIngress, DebounceScheduler, Arc<MockRunner>) {
        let runner = Arc::new(MockRunner::default());
        let scheduler = DebounceScheduler::new(
            runner.clone(),
            DebounceConfig {
                bulk_delay: Duration::from_millis(500),
                incremental_delay: Duration::from_millis(30),
                bulk_threshold: 500,
                mode,
            },
        );
        (TriggerIngress::new(scheduler.clone()), scheduler, runner)
    }

    #[test]
    fn parses_full_message() {
        let msg = TriggerMessage::parse(
            r#"{"job_type": "process_pending_labs", "user_id": 42, "priority": "high",
                "submitted_at": "2024-03-04T08:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(msg.job_type, JobType::ProcessPendingLabs);
        assert_eq!(msg.job_type.domain(), Domain::Labs);
        assert_eq!(msg.user_id, 42);
        assert_eq!(msg.priority, Priority::High);
        assert!(msg.submitted_at.is_some());
        assert_eq!(msg.source_key(), "user:42");
    }

    #[test]
    fn priority_defaults_to_normal() {
        let msg = TriggerMessage::parse(r#"{"job_type": "process_pending_vitals", "user_id": 1}"#).unwrap();
        assert_eq!(msg.priority, Priority::Normal);
        assert!(msg.submitted_at.is_none());
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        let err = TriggerMessage::parse(r#"{"job_type": "rebuild_index", "user_id": 1}"#).unwrap_err();
        assert_eq!(err, IngressError::UnknownJobType("rebuild_index".into()));
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(matches!(
            TriggerMessage::parse("not json"),
            Err(IngressError::MalformedMessage(_))
        ));
        assert!(matches!(
            TriggerMessage::parse(r#"{"job_type": "process_pending_vitals"}"#),
            Err(IngressError::MalformedMessage(_))
        ));
    }

    #[tokio::test]
    async fn messages_coalesce_into_one_pass() {
        let (ingress, scheduler, runner) = ingress(DebounceMode::Global);
        for user in 1..=3 {
            let json = format!(r#"{{"job_type": "process_pending_nutrition", "user_id": {user}}}"#);
            ingress.handle_message(&json).await.unwrap();
        }
        ingress.submit(4, JobType::ProcessPendingVitals).await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(runner.passes.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.passes_started(), 1);
    }

    #[tokio::test]
    async fn rejected_message_does_not_signal() {
        let (ingress, scheduler, runner) = ingress(DebounceMode::PerSource);
        assert!(ingress
            .handle_message(r#"{"job_type": "delete_everything", "user_id": 9}"#)
            .await
            .is_err());
        assert_eq!(scheduler.armed(), 0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(runner.passes.load(Ordering::SeqCst), 0);
    }
}
