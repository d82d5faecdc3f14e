//! Asynchronous job polling.
//!
//! A 202 response wraps a long-running server-side operation in an
//! [`AsyncJob`]: a pollable handle over the job's callback URL. The
//! state machine is `Pending → Running → {Completed, Failed}`; terminal
//! states are monotonic, and a failure is recorded in an error slot
//! rather than thrown mid-poll.

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::dispatch::Dispatcher;
use crate::error::{classify_job_detail, Error, Result};
use crate::transport::{RawResponse, RequestDescriptor, Transport};

const RUNNING_STATUS: &str = "RUNNING";
const ERROR_STATUS: &str = "ERROR";
const COMPLETED_STATUS: &str = "COMPLETED";

/// Job lifecycle state. Pending and Running are both "not yet done";
/// they differ only in whether the callback has started answering 200
/// with a status field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobState {
    /// Once terminal, a job's state never changes again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Pollable handle for a 202-style asynchronous operation.
#[derive(Debug)]
pub struct AsyncJob {
    job_id: String,
    callback_url: Url,
    state: JobState,
    last_response: Option<Value>,
    failure: Option<Error>,
}

impl AsyncJob {
    /// Build a job from a 202 response carrying `jobId`/`callbackUrl`.
    pub fn from_response(raw: &RawResponse) -> Result<Self> {
        let body = raw.json()?;
        let job_id = body
            .get("jobId")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("202 response is missing jobId".into()))?
            .to_string();
        let callback = body
            .get("callbackUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("202 response is missing callbackUrl".into()))?;
        let callback_url = Url::parse(callback)
            .map_err(|e| Error::Protocol(format!("invalid callbackUrl '{callback}': {e}")))?;
        Ok(Self {
            job_id,
            callback_url,
            state: JobState::Pending,
            last_response: None,
            failure: None,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn callback_url(&self) -> &Url {
        &self.callback_url
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    /// The details body stored when the job completed, or the raw
    /// callback payload for endpoints that answer with a final status
    /// directly.
    pub fn last_response(&self) -> Option<&Value> {
        self.last_response.as_ref()
    }

    /// The recorded failure once the job has reached Failed.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Issue one GET against the callback URL and advance the state
    /// machine. Calling `poll` on a terminal job is a no-op returning
    /// the settled state.
    pub async fn poll<T: Transport>(&mut self, dispatcher: &Dispatcher<T>) -> Result<JobState> {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let descriptor = RequestDescriptor::from_url(Method::GET, &self.callback_url)?;
        let raw = dispatcher.execute(&descriptor).await?;
        trace!(job_id = %self.job_id, status = raw.status, "polled job callback");

        match raw.status {
            202 => {
                self.state = JobState::Pending;
            }
            200 => {
                let body = raw.json()?;
                let status = body.get("status").and_then(Value::as_str).unwrap_or_default();
                match status {
                    RUNNING_STATUS => {
                        self.state = JobState::Running;
                    }
                    ERROR_STATUS => {
                        let details = self.fetch_details(dispatcher, &body).await?;
                        let sub = classify_job_detail(details.status, &details.body);
                        debug!(job_id = %self.job_id, error = %sub, "job failed");
                        self.failure = Some(Error::JobFailure {
                            source: Box::new(sub),
                            details: details.text(),
                        });
                        self.state = JobState::Failed;
                    }
                    COMPLETED_STATUS => {
                        let details = self.fetch_details(dispatcher, &body).await?;
                        self.last_response = Some(details.json()?);
                        self.state = JobState::Completed;
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected job status '{other}' in callback payload {body}"
                        )));
                    }
                }
            }
            _ => {
                // Some callback endpoints answer with the final payload
                // and a bare 2xx-family status instead of the
                // documented envelope.
                self.last_response =
                    Some(raw.json().unwrap_or_else(|_| Value::String(raw.text())));
                self.state = JobState::Completed;
            }
        }
        Ok(self.state)
    }

    /// Block (asynchronously) until the job settles, sleeping
    /// `poll_interval` between polls. Returns the final details body on
    /// Completed, the recorded [`Error::JobFailure`] on Failed.
    ///
    /// There is no overall timeout; callers wanting a budget or
    /// cancellation should drive [`AsyncJob::poll`] themselves.
    pub async fn wait_for_result<T: Transport>(
        &mut self,
        dispatcher: &Dispatcher<T>,
        poll_interval: Duration,
    ) -> Result<Value> {
        loop {
            match self.poll(dispatcher).await? {
                JobState::Completed => {
                    return self.last_response.clone().ok_or_else(|| {
                        Error::Protocol("completed job has no final response".into())
                    });
                }
                JobState::Failed => {
                    // The slot stays populated so repeated calls keep
                    // reporting the same failure.
                    return Err(self.failure.clone().unwrap_or_else(|| {
                        Error::Protocol("failed job has no recorded failure".into())
                    }));
                }
                JobState::Pending | JobState::Running => {
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }
    }

    /// Detail fetch for a settled callback payload: the payload's own
    /// `callbackUrl` with `showDetails=true` appended.
    async fn fetch_details<T: Transport>(
        &self,
        dispatcher: &Dispatcher<T>,
        body: &Value,
    ) -> Result<RawResponse> {
        let callback = body
            .get("callbackUrl")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                Error::Protocol("settled job payload is missing callbackUrl".into())
            })?;
        let mut url = Url::parse(callback)
            .map_err(|e| Error::Protocol(format!("invalid callbackUrl '{callback}': {e}")))?;
        url.query_pairs_mut().append_pair("showDetails", "true");
        dispatcher
            .execute(&RequestDescriptor::from_url(Method::GET, &url)?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{dispatcher, response, ScriptedTransport};
    use serde_json::json;

    fn job() -> AsyncJob {
        AsyncJob::from_response(&response(
            202,
            &json!({
                "jobId": "j1",
                "callbackUrl": "https://dns.example.com/status/j1"
            })
            .to_string(),
        ))
        .unwrap()
    }

    #[test]
    fn job_from_202_starts_pending() {
        let job = job();
        assert_eq!(job.job_id(), "j1");
        assert_eq!(job.state(), JobState::Pending);
        assert!(!job.state().is_terminal());
        assert!(job.last_response().is_none());
    }

    #[tokio::test]
    async fn poll_keeps_pending_on_202_and_running_on_running() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(202, "{}")),
            Ok(response(200, r#"{"status": "RUNNING"}"#)),
        ]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Pending);
        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Running);
        assert!(job.last_response().is_none());
    }

    #[tokio::test]
    async fn completed_job_fetches_details_and_settles() {
        let details = json!({"response": {"domains": [{"id": 1, "name": "x.com"}]}});
        let transport = ScriptedTransport::new(vec![
            Ok(response(200, r#"{"status": "RUNNING"}"#)),
            Ok(response(
                200,
                r#"{"status": "COMPLETED", "callbackUrl": "https://dns.example.com/status/j1"}"#,
            )),
            Ok(response(200, &details.to_string())),
        ]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Running);
        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Completed);
        assert_eq!(job.last_response(), Some(&details));

        // Details fetch appended showDetails=true to the payload's URL.
        let requests = transport.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[2].path, "/status/j1?showDetails=true");
    }

    #[tokio::test]
    async fn terminal_state_is_monotonic() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(
                200,
                r#"{"status": "COMPLETED", "callbackUrl": "https://dns.example.com/status/j1"}"#,
            )),
            Ok(response(200, r#"{"done": true}"#)),
        ]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Completed);
        let after = transport.request_count();

        // Further polls neither change state nor touch the network.
        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Completed);
        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Completed);
        assert_eq!(transport.request_count(), after);
    }

    #[tokio::test]
    async fn error_status_records_classified_job_failure() {
        let transport = ScriptedTransport::new(vec![
            Ok(response(
                200,
                r#"{"status": "ERROR", "callbackUrl": "https://dns.example.com/status/j1"}"#,
            )),
            Ok(response(
                200,
                r#"{"error": {"code": 422, "message": "domain not ready"}}"#,
            )),
        ]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Failed);
        match job.failure().unwrap() {
            Error::JobFailure { source, details } => {
                assert!(matches!(**source, Error::NotReady { .. }));
                assert!(details.contains("domain not ready"));
            }
            other => panic!("expected JobFailure, got {other:?}"),
        }

        let err = job
            .wait_for_result(&dispatcher, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::JobFailure { .. }));

        // The failure slot survives being reported; asking again gives
        // the same answer, not a protocol error.
        let again = job
            .wait_for_result(&dispatcher, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(again, Error::JobFailure { .. }));
        assert!(job.failure().is_some());
    }

    #[tokio::test]
    async fn wait_for_result_loops_until_completed() {
        let details = json!({"status": "COMPLETED", "domain": "x.com"});
        let transport = ScriptedTransport::new(vec![
            Ok(response(202, "{}")),
            Ok(response(200, r#"{"status": "RUNNING"}"#)),
            Ok(response(
                200,
                r#"{"status": "COMPLETED", "callbackUrl": "https://dns.example.com/status/j1"}"#,
            )),
            Ok(response(200, &details.to_string())),
        ]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        let result = job
            .wait_for_result(&dispatcher, Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(result, details);
        assert_eq!(job.state(), JobState::Completed);
    }

    #[tokio::test]
    async fn unexpected_status_value_is_a_contract_violation() {
        let transport =
            ScriptedTransport::new(vec![Ok(response(200, r#"{"status": "SIDEWAYS"}"#))]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        let err = job.poll(&dispatcher).await.unwrap_err();
        match err {
            Error::Protocol(message) => assert!(message.contains("SIDEWAYS"), "{message}"),
            other => panic!("expected Protocol, got {other:?}"),
        }
        // Not a terminal transition; the job can still be polled.
        assert!(!job.state().is_terminal());
    }

    #[tokio::test]
    async fn other_callback_status_settles_with_raw_response() {
        let transport =
            ScriptedTransport::new(vec![Ok(response(203, r#"{"domain": "x.com"}"#))]);
        let dispatcher = dispatcher(&transport);
        let mut job = job();

        assert_eq!(job.poll(&dispatcher).await.unwrap(), JobState::Completed);
        assert_eq!(job.last_response().unwrap()["domain"], "x.com");
    }
}
