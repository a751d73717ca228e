//! Async serial transport for the Z-Wave serial API
//!
//! A single actor task owns the job queue and the stream reader. It is fed
//! by a blocking reader thread and writes through a dedicated writer task,
//! so every job transition happens in one place.

use crate::constants::{FunctionId, ACK, NAK};
use crate::frame::Frame;
use crate::framing::{FrameReader, Inbound};
use crate::job::{Job, JobHandle, JobId, JobState, ResendReason, Verdict};
use crate::types::ProtocolError;

use serial2::SerialPort;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::Instant;

/// Serial API baud rate
pub const BAUD_RATE: u32 = 115200;

/// Blocking read timeout of the reader thread
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// How long an owner-cancelled request may still be acknowledged
pub const CANCEL_SETTLE_TIMEOUT: Duration = READ_TIMEOUT;

/// Events from the link
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A valid frame was received (responses included)
    FrameReceived(Frame),
    /// A job ran out of send attempts
    JobCancelled { job: JobId, function: FunctionId },
}

/// Byte channels between the actor and whatever sits on the wire
pub struct Link {
    inbound: mpsc::Receiver<Vec<u8>>,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Link {
    #[must_use]
    pub fn new(inbound: mpsc::Receiver<Vec<u8>>, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self { inbound, outbound }
    }

    /// In-memory link with the controller end handed back to the caller
    #[must_use]
    pub fn pair() -> (Link, LinkPeer) {
        let (to_host, inbound) = mpsc::channel(64);
        let (outbound, from_host) = mpsc::channel(64);
        (Link::new(inbound, outbound), LinkPeer { to_host, from_host })
    }
}

/// Controller end of an in-memory link
pub struct LinkPeer {
    to_host: mpsc::Sender<Vec<u8>>,
    from_host: mpsc::Receiver<Vec<u8>>,
}

impl LinkPeer {
    /// Deliver bytes to the host as one read
    #[allow(clippy::missing_errors_doc)]
    pub async fn send(&self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.to_host
            .send(bytes.to_vec())
            .await
            .map_err(|_| ProtocolError::NotConnected)
    }

    /// Next write made by the host
    pub async fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_host.recv().await
    }

    /// Next write made by the host, if one is already waiting
    pub fn try_recv(&mut self) -> Option<Vec<u8>> {
        self.from_host.try_recv().ok()
    }
}

/// Requests to the link actor
enum Command {
    Enqueue(Job),
    Cancel(JobId),
    Shutdown,
}

/// Async transport for communicating with a Z-Wave controller
pub struct LinkTransport {
    /// Channel to the link actor
    commands: mpsc::UnboundedSender<Command>,
    /// Job id counter
    next_id: AtomicU64,
    /// Event sender for received frames
    event_tx: broadcast::Sender<LinkEvent>,
    /// Serial port in use, if any
    port_name: Option<String>,
}

impl LinkTransport {
    /// Open the first serial port in `ports` that accepts the connection
    #[allow(clippy::missing_errors_doc)]
    pub async fn open(ports: &[String]) -> Result<Self, ProtocolError> {
        for path in ports {
            tracing::info!("Connecting to Z-Wave controller at {}", path);
            match Self::open_port(path) {
                Ok(link) => {
                    tracing::info!("Connected to Z-Wave controller");
                    return Ok(Self::start(link, Some(path.clone())));
                }
                Err(e) => tracing::warn!(port = %path, "Could not open serial port: {}", e),
            }
        }
        Err(ProtocolError::PortUnavailable(ports.to_vec()))
    }

    fn open_port(path: &str) -> Result<Link, ProtocolError> {
        // 8N1 without flow control is what serial2 configures for a plain baud rate
        let mut port = SerialPort::open(path, BAUD_RATE)?;
        port.set_read_timeout(READ_TIMEOUT)?;
        port.set_dtr(true)?;
        port.set_rts(true)?;

        // Clone port for reader (serial2 supports clone)
        let reader_port = port.try_clone()?;

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(32);

        tokio::spawn(Self::writer_task(port, outbound_rx));
        std::thread::spawn(move || {
            Self::reader_thread(reader_port, inbound_tx);
        });

        Ok(Link::new(inbound_rx, outbound_tx))
    }

    /// Run the transport over an existing link
    #[must_use]
    pub fn spawn(link: Link) -> Self {
        Self::start(link, None)
    }

    fn start(link: Link, port_name: Option<String>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        let (commands, command_rx) = mpsc::unbounded_channel();

        let actor = LinkActor {
            reader: FrameReader::new(),
            jobs: VecDeque::new(),
            settle_until: None,
            outbound: link.outbound,
            event_tx: event_tx.clone(),
        };
        tokio::spawn(actor.run(link.inbound, command_rx));

        Self {
            commands,
            next_id: AtomicU64::new(1),
            event_tx,
            port_name,
        }
    }

    /// Writer task - sole owner of the outbound side of the port
    async fn writer_task(port: SerialPort, mut rx: mpsc::Receiver<Vec<u8>>) {
        while let Some(data) = rx.recv().await {
            tracing::trace!("Writing {} bytes: {:02X?}", data.len(), data);
            if let Err(e) = port.write_all(&data) {
                tracing::error!("Write error: {}", e);
            }
            if let Err(e) = port.flush() {
                tracing::error!("Flush error: {}", e);
            }
        }
        tracing::debug!("Writer task shutting down");
    }

    /// Reader thread - blocking reads, chunks handed to the actor
    fn reader_thread(port: SerialPort, inbound_tx: mpsc::Sender<Vec<u8>>) {
        tracing::debug!("Reader thread started");
        let mut buffer = [0u8; 256];

        loop {
            match port.read(&mut buffer) {
                Ok(0) => {
                    tracing::warn!("Serial port closed");
                    break;
                }
                Ok(n) => {
                    tracing::trace!("Read {} bytes: {:02X?}", n, &buffer[..n]);
                    if inbound_tx.blocking_send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == std::io::ErrorKind::TimedOut => {}
                Err(ref e) if e.raw_os_error() == Some(libc::EAGAIN) => {}
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => {
                    tracing::error!("Serial read error: {}", e);
                    break;
                }
            }
            if inbound_tx.is_closed() {
                break;
            }
        }
        tracing::debug!("Reader thread shutting down");
    }

    /// Queue a job; it is transmitted once every job ahead of it finished
    #[allow(clippy::missing_errors_doc)]
    pub fn send(&self, mut job: Job) -> Result<JobHandle, ProtocolError> {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = oneshot::channel();
        job.attach(id, tx);

        tracing::debug!(job = %id, "Queueing {}", job.request());
        self.commands
            .send(Command::Enqueue(job))
            .map_err(|_| ProtocolError::NotConnected)?;

        Ok(JobHandle::new(id, rx))
    }

    /// Send a request and wait for the response with the same function
    #[allow(clippy::missing_errors_doc)]
    pub async fn request(&self, frame: Frame) -> Result<Frame, ProtocolError> {
        self.send(Job::new(frame))?.wait().await
    }

    /// Cancel a queued or active job
    pub fn cancel(&self, job: JobId) {
        let _ = self.commands.send(Command::Cancel(job));
    }

    /// Subscribe to link events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LinkEvent> {
        self.event_tx.subscribe()
    }

    #[must_use]
    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }

    /// Stop the actor; outstanding jobs resolve to `NotConnected`
    pub fn close(&self) {
        tracing::info!("Closing Z-Wave link");
        let _ = self.commands.send(Command::Shutdown);
    }
}

impl Drop for LinkTransport {
    fn drop(&mut self) {
        // Signal shutdown (best effort)
        let _ = self.commands.send(Command::Shutdown);
    }
}

/// Owns the job queue; the head of the queue is the active job
struct LinkActor {
    reader: FrameReader,
    jobs: VecDeque<Job>,
    /// Set while a cancelled request may still draw an ACK, NAK or CAN
    settle_until: Option<Instant>,
    outbound: mpsc::Sender<Vec<u8>>,
    event_tx: broadcast::Sender<LinkEvent>,
}

impl LinkActor {
    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<Vec<u8>>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        tracing::debug!("Link actor started");
        loop {
            let deadline = self
                .settle_until
                .or_else(|| self.jobs.front().and_then(Job::deadline));
            tokio::select! {
                chunk = inbound.recv() => match chunk {
                    Some(bytes) => self.handle_chunk(&bytes).await,
                    None => {
                        tracing::warn!("Inbound link closed");
                        break;
                    }
                },
                command = commands.recv() => match command {
                    Some(Command::Enqueue(job)) => self.enqueue(job).await,
                    Some(Command::Cancel(id)) => self.cancel(id).await,
                    Some(Command::Shutdown) | None => break,
                },
                () = sleep_until(deadline) => self.handle_timeout().await,
            }
        }
        // Dropping the queue drops every completion sender
        self.jobs.clear();
        tracing::debug!("Link actor shutting down");
    }

    async fn handle_chunk(&mut self, bytes: &[u8]) {
        for unit in self.reader.feed(bytes) {
            match unit {
                Inbound::Ack => {
                    if !self.settle().await {
                        self.handle_ack();
                    }
                }
                Inbound::Nak => {
                    if !self.settle().await {
                        self.resend_active(ResendReason::LinkNak).await;
                    }
                }
                Inbound::Can => {
                    if !self.settle().await {
                        self.resend_active(ResendReason::LinkCan).await;
                    }
                }
                Inbound::Frame(data) => self.handle_frame(&data).await,
                Inbound::Desync(byte) => {
                    tracing::warn!("Out of frame byte {:#04X}, dropping", byte);
                }
            }
        }
    }

    async fn handle_frame(&mut self, data: &[u8]) {
        let frame = match Frame::deserialize(data) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Rejecting frame {:02X?}: {}", data, e);
                self.write(vec![NAK]).await;
                return;
            }
        };
        self.write(vec![ACK]).await;
        tracing::debug!("Received {}", frame);

        // Nothing is in flight while a cancelled request settles
        if self.settle_until.is_none() {
            if self.jobs.front().map(Job::state) == Some(JobState::AwaitingAck) {
                self.resend_active(ResendReason::ExpectingAck).await;
                return;
            }

            if let Some(job) = self.jobs.front_mut() {
                job.push_response(frame.clone());
                self.service_responses().await;
            }
        }

        let _ = self.event_tx.send(LinkEvent::FrameReceived(frame));
    }

    /// Run the active job's policy over its queued responses
    async fn service_responses(&mut self) {
        loop {
            let Some(job) = self.jobs.front_mut() else {
                return;
            };
            let Some(response) = job.next_response() else {
                return;
            };

            match job.evaluate(&response) {
                Verdict::Done => {
                    tracing::debug!(job = %job.id(), attempts = job.send_count(), "Job complete");
                    job.complete(response);
                    self.advance().await;
                    return;
                }
                Verdict::Resend => {
                    self.resend_active(ResendReason::Rejected).await;
                    return;
                }
                Verdict::Pending => {}
                Verdict::RetryAfter(after) => job.arm_timeout(after),
            }
        }
    }

    fn handle_ack(&mut self) {
        let acknowledged = self.jobs.front_mut().is_some_and(Job::acknowledge);
        if !acknowledged {
            tracing::trace!("ACK with nothing outstanding");
        }
    }

    async fn resend_active(&mut self, reason: ResendReason) {
        let Some(job) = self.jobs.front_mut() else {
            tracing::debug!("{} with no active job", reason);
            return;
        };
        tracing::debug!(job = %job.id(), attempts = job.send_count(), "Resending: {}", reason);
        job.request_resend(reason);
        self.send_active().await;
    }

    /// Transmit the head of the queue, cancelling jobs out of attempts
    async fn send_active(&mut self) {
        while let Some(job) = self.jobs.front_mut() {
            if job.is_finished() {
                self.jobs.pop_front();
                continue;
            }
            if job.is_exhausted() {
                tracing::warn!(
                    job = %job.id(),
                    "Cancelling {} after {} attempts",
                    job.function(),
                    job.send_count()
                );
                job.exhaust();
                let event = LinkEvent::JobCancelled {
                    job: job.id(),
                    function: job.function(),
                };
                self.jobs.pop_front();
                let _ = self.event_tx.send(event);
                continue;
            }

            job.start();
            tracing::debug!(job = %job.id(), attempt = job.send_count(), "Sending {}", job.request());
            let bytes = job.request().serialize();
            self.write(bytes).await;
            return;
        }
    }

    async fn enqueue(&mut self, job: Job) {
        self.jobs.push_back(job);
        if self.jobs.len() == 1 && self.settle_until.is_none() {
            self.send_active().await;
        }
    }

    async fn advance(&mut self) {
        self.jobs.pop_front();
        self.send_active().await;
    }

    async fn cancel(&mut self, id: JobId) {
        let Some(position) = self.jobs.iter().position(|job| job.id() == id) else {
            tracing::debug!(job = %id, "Cancel for unknown job");
            return;
        };
        let Some(mut job) = self.jobs.remove(position) else {
            return;
        };
        let awaiting_ack = job.state() == JobState::AwaitingAck;
        tracing::debug!(job = %id, "Cancelled by owner");
        job.cancel();

        if position != 0 {
            return;
        }
        if awaiting_ack {
            // The controller may still answer the cancelled frame
            self.settle_until = Some(Instant::now() + CANCEL_SETTLE_TIMEOUT);
        } else {
            self.send_active().await;
        }
    }

    /// Consume a link-level reply to a cancelled request; returns true if settling
    async fn settle(&mut self) -> bool {
        if self.settle_until.take().is_none() {
            return false;
        }
        tracing::trace!("Cancelled request settled");
        self.send_active().await;
        true
    }

    async fn handle_timeout(&mut self) {
        if self.settle_until.take().is_some() {
            tracing::trace!("Cancelled request was never acknowledged");
            self.send_active().await;
            return;
        }
        if let Some(job) = self.jobs.front_mut() {
            job.clear_timeout();
        }
        self.resend_active(ResendReason::Timeout).await;
    }

    async fn write(&mut self, bytes: Vec<u8>) {
        if self.outbound.send(bytes).await.is_err() {
            tracing::warn!("Outbound link closed, dropping write");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{command, command_class, MessageType, CAN};
    use tokio::time::timeout;

    fn version_response() -> Frame {
        Frame::from_payload(MessageType::Response, FunctionId::GetVersion, b"Z-Wave 4.05\0\x01")
            .unwrap()
    }

    fn report(node_id: u8) -> Frame {
        Frame::from_payload(
            MessageType::Request,
            FunctionId::ApplicationCommandHandler,
            &[
                0x00,
                node_id,
                0x03,
                command_class::SWITCH_BINARY,
                command::SWITCH_BINARY_REPORT,
                0xFF,
            ],
        )
        .unwrap()
    }

    /// Nothing more is written once the actor has gone idle
    async fn assert_silent(peer: &mut LinkPeer) {
        let result = timeout(Duration::from_millis(500), peer.recv()).await;
        assert!(result.is_err(), "unexpected write: {result:?}");
    }

    #[tokio::test]
    async fn test_request_completes_on_matching_response() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let request = Frame::request(FunctionId::GetVersion);
        let handle = transport.send(Job::new(request.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));

        peer.send(&[ACK]).await.unwrap();
        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));

        assert_eq!(handle.wait().await.unwrap(), version_response());
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_naks_exhaust_the_job() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);
        let mut events = transport.subscribe();

        let request = Frame::request(FunctionId::EnableSuc);
        let handle = transport.send(Job::new(request.clone())).unwrap();

        for _ in 0..3 {
            assert_eq!(peer.recv().await, Some(request.serialize()));
            peer.send(&[NAK]).await.unwrap();
        }

        match handle.wait().await {
            Err(ProtocolError::JobExhausted {
                attempts, reason, ..
            }) => {
                assert_eq!(attempts, 3);
                assert_eq!(reason, ResendReason::LinkNak);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            LinkEvent::JobCancelled {
                function: FunctionId::EnableSuc,
                ..
            }
        ));
        assert_silent(&mut peer).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_only_one_job_in_flight() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let first = Frame::request(FunctionId::GetVersion);
        let second = Frame::request(FunctionId::GetSucNodeId);
        let a = transport.send(Job::new(first.clone())).unwrap();
        let b = transport.send(Job::new(second.clone())).unwrap();

        assert_eq!(peer.recv().await, Some(first.serialize()));
        assert_silent(&mut peer).await;

        peer.send(&[ACK]).await.unwrap();
        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert_eq!(peer.recv().await, Some(second.serialize()));
        assert!(a.wait().await.is_ok());

        transport.cancel(b.id());
        assert!(matches!(b.wait().await, Err(ProtocolError::JobCancelled(_))));
    }

    #[tokio::test]
    async fn test_bad_checksum_is_nakked_and_job_survives() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let handle = transport
            .send(Job::new(Frame::request(FunctionId::GetVersion)))
            .unwrap();
        peer.recv().await.unwrap();
        peer.send(&[ACK]).await.unwrap();

        let mut corrupted = version_response().serialize();
        let last = corrupted.len() - 1;
        corrupted[last] ^= 0xFF;
        peer.send(&corrupted).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![NAK]));

        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_frame_before_ack_triggers_resend() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);
        let mut events = transport.subscribe();

        let request = Frame::request(FunctionId::GetVersion);
        let handle = transport.send(Job::new(request.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));

        // Not delivered anywhere: the job was still waiting for its ACK
        peer.send(&report(4).serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert_eq!(peer.recv().await, Some(request.serialize()));
        assert!(events.try_recv().is_err());

        peer.send(&[ACK]).await.unwrap();
        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_coalesced_ack_and_response() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let handle = transport
            .send(Job::new(Frame::request(FunctionId::GetVersion)))
            .unwrap();
        peer.recv().await.unwrap();

        let mut chunk = vec![ACK];
        chunk.extend_from_slice(&version_response().serialize());
        peer.send(&chunk).await.unwrap();

        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert_eq!(handle.wait().await.unwrap(), version_response());
    }

    #[tokio::test]
    async fn test_unsolicited_frames_are_broadcast() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);
        let mut events = transport.subscribe();

        peer.send(&report(6).serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));

        match events.recv().await.unwrap() {
            LinkEvent::FrameReceived(frame) => {
                assert_eq!(frame.function, FunctionId::ApplicationCommandHandler);
                assert_eq!(frame.node_id, Some(6));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_resends_on_timeout() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let request = Frame::request(FunctionId::GetVersion);
        let job = Job::with_policy(request.clone(), |request: &Frame, response: &Frame| {
            if response.function == request.function {
                Verdict::Done
            } else {
                Verdict::RetryAfter(Duration::from_millis(3000))
            }
        });
        let handle = transport.send(job).unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));
        peer.send(&[ACK]).await.unwrap();

        let started = Instant::now();
        peer.send(&report(3).serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));

        // Paused clock jumps to the deadline once everything is idle
        assert_eq!(peer.recv().await, Some(request.serialize()));
        assert!(started.elapsed() >= Duration::from_millis(3000));

        peer.send(&[ACK]).await.unwrap();
        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert!(handle.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_can_resends_request() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let request = Frame::request(FunctionId::GetSucNodeId);
        let _handle = transport.send(Job::new(request.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));

        peer.send(&[CAN]).await.unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));
    }

    #[tokio::test]
    async fn test_close_resolves_outstanding_jobs() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let handle = transport
            .send(Job::new(Frame::request(FunctionId::GetVersion)))
            .unwrap();
        peer.recv().await.unwrap();

        transport.close();
        assert!(matches!(handle.wait().await, Err(ProtocolError::NotConnected)));
    }

    #[tokio::test]
    async fn test_policy_state_need_not_be_sync() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        // Cell is Send but not Sync
        let seen = std::cell::Cell::new(0u8);
        let request = Frame::request(FunctionId::GetVersion);
        let job = Job::with_policy(request.clone(), move |_: &Frame, _: &Frame| {
            seen.set(seen.get() + 1);
            if seen.get() == 2 {
                Verdict::Done
            } else {
                Verdict::Pending
            }
        });
        let handle = transport.send(job).unwrap();
        assert_eq!(peer.recv().await, Some(request.serialize()));
        peer.send(&[ACK]).await.unwrap();

        for _ in 0..2 {
            peer.send(&version_response().serialize()).await.unwrap();
            assert_eq!(peer.recv().await, Some(vec![ACK]));
        }
        assert_eq!(handle.wait().await.unwrap(), version_response());
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_ack_for_cancelled_request_is_not_credited() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let first = Frame::request(FunctionId::GetVersion);
        let second = Frame::request(FunctionId::GetSucNodeId);
        let a = transport.send(Job::new(first.clone())).unwrap();
        let _b = transport.send(Job::new(second.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(first.serialize()));

        transport.cancel(a.id());
        assert!(matches!(a.wait().await, Err(ProtocolError::JobCancelled(_))));

        // The ACK answers the cancelled frame and releases the next job
        peer.send(&[ACK]).await.unwrap();
        assert_eq!(peer.recv().await, Some(second.serialize()));

        // The next job still waits for its own ACK
        peer.send(&version_response().serialize()).await.unwrap();
        assert_eq!(peer.recv().await, Some(vec![ACK]));
        assert_eq!(peer.recv().await, Some(second.serialize()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_request_settles_without_reply() {
        let (link, mut peer) = Link::pair();
        let transport = LinkTransport::spawn(link);

        let first = Frame::request(FunctionId::GetVersion);
        let second = Frame::request(FunctionId::GetSucNodeId);
        let a = transport.send(Job::new(first.clone())).unwrap();
        let _b = transport.send(Job::new(second.clone())).unwrap();
        assert_eq!(peer.recv().await, Some(first.serialize()));

        transport.cancel(a.id());
        assert!(a.wait().await.is_err());

        let started = Instant::now();
        assert_eq!(peer.recv().await, Some(second.serialize()));
        assert!(started.elapsed() >= CANCEL_SETTLE_TIMEOUT);
    }
}
