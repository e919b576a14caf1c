//! ICMP probe sessions
//!
//! One session owns one connected ICMP datagram socket and probes one
//! destination while its bound device is up. The session runs as a single
//! task multiplexing its control channel, the periodic send timer, socket
//! readability and the ledger deadline; every probe resolves to exactly one
//! outcome event.

use crate::echo::{self, EchoFamily};
use crate::error::{LinkpingError, Result};
use crate::ledger::PendingLedger;
use crate::types::{ProbeOutcome, ProbeResult, SessionCommand};
use socket2::{Domain, Protocol, Socket, Type};
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::{Duration, Instant};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

/// Engine floor for the probe cadence
pub const MIN_INTERVAL: Duration = Duration::from_millis(10);
/// Engine floor for the per-probe deadline
pub const MIN_TIMEOUT: Duration = Duration::from_millis(1);

/// Bounded receive size; anything larger than an echo frame is garbage
const RECV_BUFFER_LEN: usize = 256;

/// Probe session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Timers disarmed, socket allocated
    Stopped,
    /// Periodic send timer armed, timeout timer armed while probes are
    /// outstanding
    Running,
}

/// One (device, address) probe session
#[derive(Debug)]
pub struct ProbeSession {
    target: String,
    device: String,
    address: IpAddr,
    family: EchoFamily,
    interval: Duration,
    timeout: Duration,
    socket: AsyncFd<Socket>,
    sequence: u16,
    ledger: PendingLedger,
    state: SessionState,
}

/// Resolve a configured destination to an address
pub fn resolve_address(host: &str) -> Result<IpAddr> {
    let mut addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| LinkpingError::Socket(format!("cannot resolve {}: {}", host, e)))?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| LinkpingError::Socket(format!("no address found for {}", host)))
}

/// Open a non-blocking ICMP datagram socket connected to the destination
fn create_socket(address: IpAddr) -> Result<AsyncFd<Socket>> {
    let (domain, protocol) = match address {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(protocol))
        .map_err(|e| LinkpingError::Socket(format!("cannot create socket: {}", e)))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| LinkpingError::Socket(format!("cannot set socket option: {}", e)))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| LinkpingError::Socket(format!("cannot set non-blocking: {}", e)))?;

    let peer = SocketAddr::new(address, 0);
    socket
        .connect(&peer.into())
        .map_err(|e| LinkpingError::Socket(format!("cannot connect to {}: {}", address, e)))?;

    AsyncFd::new(socket)
        .map_err(|e| LinkpingError::Socket(format!("cannot register socket: {}", e)))
}

impl ProbeSession {
    /// Create a session in the `Stopped` state
    ///
    /// Resolves the destination and opens the socket; failures here are
    /// fatal at startup, unlike anything that happens once running.
    pub fn new(
        target: impl Into<String>,
        device: impl Into<String>,
        address: &str,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self> {
        if interval < MIN_INTERVAL {
            return Err(LinkpingError::Config(format!(
                "interval {:?} below minimum {:?}",
                interval, MIN_INTERVAL
            )));
        }
        if timeout < MIN_TIMEOUT {
            return Err(LinkpingError::Config(format!(
                "timeout {:?} below minimum {:?}",
                timeout, MIN_TIMEOUT
            )));
        }

        let address = resolve_address(address)?;
        let socket = create_socket(address)?;

        Ok(Self {
            target: target.into(),
            device: device.into(),
            address,
            family: EchoFamily::of(&address),
            interval,
            timeout,
            socket,
            sequence: 0,
            ledger: PendingLedger::new(timeout),
            state: SessionState::Stopped,
        })
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Device name whose up/down state gates this session
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Begin a probing epoch
    ///
    /// The socket is recreated against the same destination so no stale
    /// kernel state from a previous down period leaks in, and the ledger
    /// is emptied so no pre-stop probe can resolve in the new epoch.
    fn start(&mut self) {
        match create_socket(self.address) {
            Ok(socket) => self.socket = socket,
            Err(e) => {
                // non-fatal: keep the old socket, the next send will report
                warn!(probe = %self.target, error = %e, "cannot recreate probe socket");
            }
        }
        self.ledger.clear();
        self.state = SessionState::Running;
    }

    /// Suspend probing; outstanding requests are abandoned silently
    fn stop(&mut self) {
        self.state = SessionState::Stopped;
    }

    fn outcome(&self, sequence: u16, result: ProbeResult) -> ProbeOutcome {
        ProbeOutcome {
            target: self.target.clone(),
            device: self.device.clone(),
            address: self.address,
            sequence,
            result,
        }
    }

    /// Periodic timer fired: send the next echo request
    fn on_tick(&mut self, now: Instant) -> Option<ProbeOutcome> {
        self.sequence = self.sequence.wrapping_add(1);
        let frame = echo::encode_echo_request(self.family, self.sequence);

        match self.socket.get_ref().send(&frame) {
            Ok(n) if n == frame.len() => {
                self.ledger.record(self.sequence, now);
                trace!(probe = %self.target, sequence = self.sequence, "echo request sent");
                None
            }
            Ok(n) => {
                warn!(probe = %self.target, sent = n, "short send on probe socket");
                Some(self.outcome(0, ProbeResult::SendFailed))
            }
            Err(e) => {
                warn!(probe = %self.target, error = %e, "send failed on probe socket");
                Some(self.outcome(0, ProbeResult::SendFailed))
            }
        }
    }

    /// A frame arrived: decode, correlate, compute the round trip
    fn on_frame(&mut self, frame: &[u8], now: Instant) -> Option<ProbeOutcome> {
        match echo::decode_echo_reply(self.family, frame) {
            Ok(sequence) => match self.ledger.correlate(sequence) {
                Some(sent_at) => {
                    let rtt = now.saturating_duration_since(sent_at);
                    Some(self.outcome(sequence, ProbeResult::Reply(rtt)))
                }
                None => {
                    // duplicate, late, or never ours - drop without a sound
                    trace!(probe = %self.target, sequence, "unmatched reply dropped");
                    None
                }
            },
            Err(e) => {
                debug!(probe = %self.target, error = %e, "discarded frame");
                None
            }
        }
    }

    /// Timeout deadline passed: sweep every expired probe
    fn on_deadline(&mut self, now: Instant) -> Vec<ProbeOutcome> {
        let mut outcomes = Vec::new();
        while let Some(sequence) = self.ledger.expire_one(now) {
            outcomes.push(self.outcome(sequence, ProbeResult::TimedOut));
        }
        outcomes
    }

    /// Drive the session until the reactor drops the control channel
    pub async fn run(
        mut self,
        mut control: mpsc::UnboundedReceiver<SessionCommand>,
        outcomes: mpsc::UnboundedSender<ProbeOutcome>,
    ) {
        let mut ticker: Option<tokio::time::Interval> = None;

        enum Wake {
            Control(Option<SessionCommand>),
            Tick,
            Frame(std::io::Result<Vec<u8>>),
            Deadline,
        }

        loop {
            let running = self.state == SessionState::Running;
            let deadline = if running {
                self.ledger
                    .next_deadline()
                    .map(tokio::time::Instant::from_std)
            } else {
                None
            };

            let wake = tokio::select! {
                cmd = control.recv() => Wake::Control(cmd),
                _ = tick(&mut ticker), if running && ticker.is_some() => Wake::Tick,
                frame = recv_frame(&self.socket), if running => Wake::Frame(frame),
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                    if deadline.is_some() => Wake::Deadline,
            };

            match wake {
                Wake::Control(None) => break,
                Wake::Control(Some(SessionCommand::Start)) => {
                    if self.state == SessionState::Stopped {
                        self.start();
                        let mut t = tokio::time::interval(self.interval);
                        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        // first tick completes immediately
                        ticker = Some(t);
                        info!(
                            probe = %self.target,
                            device = %self.device,
                            address = %self.address,
                            interval = ?self.interval,
                            timeout = ?self.timeout,
                            "probe session started"
                        );
                    }
                }
                Wake::Control(Some(SessionCommand::Stop)) => {
                    if self.state == SessionState::Running {
                        self.stop();
                        ticker = None;
                        info!(probe = %self.target, device = %self.device, "probe session stopped");
                    }
                }
                Wake::Tick => {
                    if let Some(outcome) = self.on_tick(Instant::now()) {
                        let _ = outcomes.send(outcome);
                    }
                }
                Wake::Frame(Ok(frame)) => {
                    if let Some(outcome) = self.on_frame(&frame, Instant::now()) {
                        let _ = outcomes.send(outcome);
                    }
                }
                Wake::Frame(Err(e)) => {
                    // a transient receive error is one failed probe, not a
                    // dead session
                    warn!(probe = %self.target, error = %e, "receive failed on probe socket");
                    let _ = outcomes.send(self.outcome(0, ProbeResult::RecvFailed));
                }
                Wake::Deadline => {
                    for outcome in self.on_deadline(Instant::now()) {
                        let _ = outcomes.send(outcome);
                    }
                }
            }
        }
    }
}

async fn tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        // disabled by the select guard; never polled without a ticker
        None => std::future::pending::<()>().await,
    }
}

/// Wait for readability and receive one datagram
async fn recv_frame(socket: &AsyncFd<Socket>) -> std::io::Result<Vec<u8>> {
    loop {
        let mut guard = socket.readable().await?;
        let mut buf = [MaybeUninit::<u8>::uninit(); RECV_BUFFER_LEN];
        match guard.try_io(|fd| fd.get_ref().recv(&mut buf)) {
            Ok(Ok(n)) => {
                let filled = unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, n) };
                return Ok(filled.to_vec());
            }
            Ok(Err(e)) => return Err(e),
            Err(_would_block) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::{encode_echo_request, EchoFamily, ECHO_FRAME_LEN};

    /// ICMP datagram sockets need net.ipv4.ping_group_range to cover the
    /// test user; skip socket-backed tests where the environment says no.
    fn try_session() -> Option<ProbeSession> {
        ProbeSession::new(
            "test",
            "lo",
            "127.0.0.1",
            Duration::from_secs(1),
            Duration::from_secs(2),
        )
        .ok()
    }

    fn reply_frame(sequence: u16) -> Vec<u8> {
        let mut frame = encode_echo_request(EchoFamily::V4, sequence).to_vec();
        frame[0] = 0; // echo reply
        frame[2] = 0;
        frame[3] = 0;
        frame
    }

    #[test]
    fn test_resolve_literal_addresses() {
        assert_eq!(
            resolve_address("127.0.0.1").unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolve_address("::1").unwrap(),
            "::1".parse::<IpAddr>().unwrap()
        );
    }

    #[test]
    fn test_resolve_garbage_fails() {
        assert!(resolve_address("definitely-not-a-host.invalid").is_err());
    }

    #[test]
    fn test_interval_floor_enforced() {
        let err = ProbeSession::new(
            "t",
            "eth0",
            "127.0.0.1",
            Duration::from_millis(1),
            Duration::from_secs(1),
        )
        .unwrap_err();
        assert!(matches!(err, LinkpingError::Config(_)));
    }

    #[test]
    fn test_timeout_floor_enforced() {
        let err = ProbeSession::new(
            "t",
            "eth0",
            "127.0.0.1",
            Duration::from_secs(1),
            Duration::from_micros(10),
        )
        .unwrap_err();
        assert!(matches!(err, LinkpingError::Config(_)));
    }

    #[test]
    fn test_new_session_is_stopped() {
        let Some(session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        assert_eq!(session.state(), SessionState::Stopped);
        assert_eq!(session.device(), "lo");
        assert!(session.ledger.is_empty());
    }

    #[test]
    fn test_restart_clears_previous_epoch() {
        let Some(mut session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        session.start();
        session.ledger.record(1, Instant::now());
        session.stop();
        assert_eq!(session.state(), SessionState::Stopped);

        // stale entries must not survive into the next epoch
        session.start();
        assert_eq!(session.state(), SessionState::Running);
        assert!(session.ledger.is_empty());
        assert!(session
            .on_deadline(Instant::now() + Duration::from_secs(60))
            .is_empty());
    }

    #[test]
    fn test_unknown_reply_sequence_dropped() {
        let Some(mut session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        session.start();
        // a reply for a sequence this session never sent
        let outcome = session.on_frame(&reply_frame(42), Instant::now());
        assert!(outcome.is_none());
    }

    #[test]
    fn test_correlated_reply_produces_rtt() {
        let Some(mut session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        session.start();
        let sent_at = Instant::now();
        session.ledger.record(5, sent_at);
        let outcome = session
            .on_frame(&reply_frame(5), sent_at + Duration::from_millis(30))
            .expect("matched reply yields an outcome");
        assert_eq!(outcome.sequence, 5);
        assert_eq!(
            outcome.result,
            ProbeResult::Reply(Duration::from_millis(30))
        );
        // at most once: the same reply again is dropped
        assert!(session
            .on_frame(&reply_frame(5), sent_at + Duration::from_millis(40))
            .is_none());
    }

    #[test]
    fn test_malformed_frame_ignored() {
        let Some(mut session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        session.start();
        session.ledger.record(5, Instant::now());
        assert!(session
            .on_frame(&[0u8; ECHO_FRAME_LEN - 1], Instant::now())
            .is_none());
        // the pending probe is untouched
        assert_eq!(session.ledger.len(), 1);
    }

    #[test]
    fn test_deadline_sweep_emits_each_once() {
        let Some(mut session) = try_session() else {
            eprintln!("skipping: unprivileged ICMP sockets unavailable");
            return;
        };
        session.start();
        let t0 = Instant::now();
        session.ledger.record(1, t0);
        session.ledger.record(2, t0 + Duration::from_millis(5));

        let outcomes = session.on_deadline(t0 + Duration::from_secs(3));
        let sequences: Vec<u16> = outcomes.iter().map(|o| o.sequence).collect();
        assert_eq!(sequences, vec![1, 2]);
        assert!(outcomes.iter().all(|o| o.result == ProbeResult::TimedOut));
        assert!(session.ledger.is_empty());
        // nothing left for a second sweep
        assert!(session.on_deadline(t0 + Duration::from_secs(4)).is_empty());
    }
}
