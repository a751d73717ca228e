//! Request/response exchanges tracked by the transport

use crate::constants::{FunctionId, MessageType};
use crate::frame::Frame;
use crate::types::ProtocolError;
use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Transmissions allowed per job before it is cancelled
pub const MAX_SEND_ATTEMPTS: u8 = 3;

/// Transport-assigned job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(pub(crate) u64);

impl JobId {
    #[must_use]
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting to be (re)transmitted
    Queued,
    /// Transmitted, link-level ACK outstanding
    AwaitingAck,
    /// Acknowledged, waiting for a response the policy accepts
    AwaitingResponse,
    Done,
    Cancelled,
}

/// Decision taken on a received frame while a job is active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// The frame completes the job
    Done,
    /// Transmit the request again
    Resend,
    /// Not ours, keep waiting
    Pending,
    /// Keep waiting, resend if nothing acceptable arrives in time
    RetryAfter(Duration),
}

/// Why a job was sent again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResendReason {
    /// A frame arrived before the ACK of our request
    ExpectingAck,
    LinkNak,
    LinkCan,
    Timeout,
    /// The response policy asked for a resend
    Rejected,
}

impl fmt::Display for ResendReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ResendReason::ExpectingAck => "frame received while expecting ACK",
            ResendReason::LinkNak => "NAK",
            ResendReason::LinkCan => "CAN",
            ResendReason::Timeout => "response timeout",
            ResendReason::Rejected => "response rejected",
        };
        f.write_str(text)
    }
}

/// Decides what a received frame means for the request in flight
pub trait ResponsePolicy: Send {
    fn evaluate(&mut self, request: &Frame, response: &Frame) -> Verdict;
}

impl<F> ResponsePolicy for F
where
    F: FnMut(&Frame, &Frame) -> Verdict + Send,
{
    fn evaluate(&mut self, request: &Frame, response: &Frame) -> Verdict {
        self(request, response)
    }
}

/// Default policy: a response carrying the request's function completes the job
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchFunction;

impl ResponsePolicy for MatchFunction {
    fn evaluate(&mut self, request: &Frame, response: &Frame) -> Verdict {
        if response.message_type == MessageType::Response && response.function == request.function
        {
            Verdict::Done
        } else {
            Verdict::Pending
        }
    }
}

/// Final result delivered to the job's owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed(Frame),
    /// `reason` is the last resend cause, `None` when the owner cancelled
    Cancelled {
        attempts: u8,
        reason: Option<ResendReason>,
    },
}

/// One outstanding request and everything needed to drive it to completion
pub struct Job {
    id: JobId,
    request: Frame,
    state: JobState,
    send_count: u8,
    started: bool,
    responses: VecDeque<Frame>,
    deadline: Option<Instant>,
    last_failure: Option<ResendReason>,
    policy: Box<dyn ResponsePolicy>,
    completion: Option<oneshot::Sender<JobOutcome>>,
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("function", &self.request.function)
            .field("state", &self.state)
            .field("send_count", &self.send_count)
            .field("responses", &self.responses.len())
            .finish_non_exhaustive()
    }
}

impl Job {
    /// Job completed by the first response with the same function
    #[must_use]
    pub fn new(request: Frame) -> Self {
        Self::with_policy(request, MatchFunction)
    }

    /// Job with a custom response policy
    #[must_use]
    pub fn with_policy(request: Frame, policy: impl ResponsePolicy + 'static) -> Self {
        Self {
            id: JobId(0),
            request,
            state: JobState::Queued,
            send_count: 0,
            started: false,
            responses: VecDeque::new(),
            deadline: None,
            last_failure: None,
            policy: Box::new(policy),
            completion: None,
        }
    }

    pub(crate) fn attach(&mut self, id: JobId, completion: oneshot::Sender<JobOutcome>) {
        self.id = id;
        self.completion = Some(completion);
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    #[must_use]
    pub fn request(&self) -> &Frame {
        &self.request
    }

    #[must_use]
    pub fn function(&self) -> FunctionId {
        self.request.function
    }

    #[must_use]
    pub fn state(&self) -> JobState {
        self.state
    }

    #[must_use]
    pub fn send_count(&self) -> u8 {
        self.send_count
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self.state, JobState::Done | JobState::Cancelled)
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.send_count >= MAX_SEND_ATTEMPTS
    }

    /// Record a transmission of the request
    pub fn start(&mut self) {
        self.started = true;
        self.send_count = self.send_count.saturating_add(1).min(MAX_SEND_ATTEMPTS);
        self.deadline = None;
        self.state = JobState::AwaitingAck;
    }

    /// Link-level ACK received; returns false if none was outstanding
    pub fn acknowledge(&mut self) -> bool {
        if self.state == JobState::AwaitingAck {
            self.state = JobState::AwaitingResponse;
            true
        } else {
            false
        }
    }

    /// Finish with a response. Only the first call has any effect.
    pub fn complete(&mut self, response: Frame) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = JobState::Done;
        self.deadline = None;
        self.notify(JobOutcome::Completed(response));
        true
    }

    /// Cancel regardless of the send count
    pub fn cancel(&mut self) -> bool {
        self.finish_cancelled(None)
    }

    /// Cancel because the send budget ran out
    pub(crate) fn exhaust(&mut self) -> bool {
        let reason = self.last_failure.unwrap_or(ResendReason::Timeout);
        self.finish_cancelled(Some(reason))
    }

    fn finish_cancelled(&mut self, reason: Option<ResendReason>) -> bool {
        if self.is_finished() {
            return false;
        }
        self.state = JobState::Cancelled;
        self.deadline = None;
        self.responses.clear();
        self.notify(JobOutcome::Cancelled {
            attempts: self.send_count,
            reason,
        });
        true
    }

    fn notify(&mut self, outcome: JobOutcome) {
        if let Some(tx) = self.completion.take() {
            // Owner may have dropped its handle
            let _ = tx.send(outcome);
        }
    }

    /// Put the job back in line for another transmission
    ///
    /// The send count is left alone. NAK and CAN also clear the started flag.
    pub fn request_resend(&mut self, reason: ResendReason) {
        if self.is_finished() {
            return;
        }
        if matches!(reason, ResendReason::LinkNak | ResendReason::LinkCan) {
            self.started = false;
        }
        self.state = JobState::Queued;
        self.deadline = None;
        self.responses.clear();
        self.last_failure = Some(reason);
    }

    pub fn push_response(&mut self, frame: Frame) {
        self.responses.push_back(frame);
    }

    pub fn next_response(&mut self) -> Option<Frame> {
        self.responses.pop_front()
    }

    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.responses.len()
    }

    /// Arm the response deadline
    pub fn arm_timeout(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    pub fn clear_timeout(&mut self) {
        self.deadline = None;
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Run the response policy against a received frame
    pub fn evaluate(&mut self, response: &Frame) -> Verdict {
        self.policy.evaluate(&self.request, response)
    }
}

/// Owner side of a submitted job
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    outcome: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub(crate) fn new(id: JobId, outcome: oneshot::Receiver<JobOutcome>) -> Self {
        Self { id, outcome }
    }

    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the job to finish
    #[allow(clippy::missing_errors_doc)]
    pub async fn outcome(self) -> Result<JobOutcome, ProtocolError> {
        self.outcome.await.map_err(|_| ProtocolError::NotConnected)
    }

    /// Wait for the completing response
    #[allow(clippy::missing_errors_doc)]
    pub async fn wait(self) -> Result<Frame, ProtocolError> {
        let id = self.id;
        match self.outcome().await? {
            JobOutcome::Completed(frame) => Ok(frame),
            JobOutcome::Cancelled {
                attempts,
                reason: Some(reason),
            } => Err(ProtocolError::JobExhausted {
                job: id,
                attempts,
                reason,
            }),
            JobOutcome::Cancelled { reason: None, .. } => Err(ProtocolError::JobCancelled(id)),
        }
    }
}
