//! Job handler contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use doku_core::{Error, Job, JobType, Result};

/// Context provided to job handlers.
pub struct JobContext {
    /// The claimed job.
    pub job: Job,
}

impl JobContext {
    pub fn new(job: Job) -> Self {
        Self { job }
    }

    /// The entity this job is about, if any.
    pub fn subject_id(&self) -> Option<Uuid> {
        self.job.subject_id
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.job.payload.as_ref()
    }

    /// Deserialize the payload, treating a missing payload as JSON `null`.
    pub fn parse_payload<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self.job.payload.clone().unwrap_or(JsonValue::Null);
        serde_json::from_value(value).map_err(|e| {
            Error::Job(format!(
                "invalid {} payload for job {}: {}",
                self.job.job_type, self.job.id, e
            ))
        })
    }
}

/// Result of job execution.
#[derive(Debug)]
pub enum JobResult {
    /// Job completed successfully with optional result data.
    Success(Option<JsonValue>),
    /// Job failed with an error message.
    Failed(String),
    /// Job hit a transient problem and should run again.
    Retry(String),
}

impl JobResult {
    /// Transient errors are retried, everything else is a plain failure.
    pub fn from_error(err: &Error) -> Self {
        if err.is_transient() {
            JobResult::Retry(err.to_string())
        } else {
            JobResult::Failed(err.to_string())
        }
    }
}

/// Trait for job handlers.
///
/// Handlers must be idempotent: the queue delivers at least once, so a job
/// may run again after a crash between the handler's writes and `complete`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The job type this handler processes.
    fn job_type(&self) -> JobType;

    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;

    fn can_handle(&self, job_type: JobType) -> bool {
        self.job_type() == job_type
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::job;
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Payload {
        object_key: String,
    }

    #[test]
    fn test_context_exposes_subject_and_payload() {
        let subject = Uuid::new_v4();
        let ctx = JobContext::new(job(
            JobType::FinalizePhoto,
            Some(subject),
            Some(json!({"object_key": "a.jpg"})),
        ));
        assert_eq!(ctx.subject_id(), Some(subject));
        assert_eq!(ctx.payload().unwrap()["object_key"], "a.jpg");
        assert_eq!(
            ctx.parse_payload::<Payload>().unwrap(),
            Payload {
                object_key: "a.jpg".to_string()
            }
        );
    }

    #[test]
    fn test_bad_payload_is_job_error() {
        let ctx = JobContext::new(job(JobType::FinalizePhoto, None, Some(json!({"nope": 1}))));
        let err = ctx.parse_payload::<Payload>().unwrap_err();
        assert!(matches!(err, Error::Job(_)));
        assert!(err.to_string().contains("finalize_photo"));
    }

    #[test]
    fn test_from_error_splits_transient() {
        assert!(matches!(
            JobResult::from_error(&Error::Storage("down".into())),
            JobResult::Retry(_)
        ));
        assert!(matches!(
            JobResult::from_error(&Error::Image("corrupt".into())),
            JobResult::Failed(_)
        ));
    }

    #[test]
    fn test_missing_payload_parses_as_null() {
        let ctx = JobContext::new(job(JobType::ExternalSync, None, None));
        assert_eq!(ctx.parse_payload::<Option<Payload>>().unwrap(), None);
    }
}
