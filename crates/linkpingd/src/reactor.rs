//! Reactor binding
//!
//! The one place device identity and probing identity meet. The reactor owns
//! the link socket, the link monitor, the statistics registry and a handle
//! per probe session; a single dispatch loop multiplexes link batches,
//! probe outcomes and process signals on the current thread.

use crate::error::Result;
use crate::link::LinkEvent;
use crate::monitor::LinkMonitor;
use crate::netlink::LinkSocket;
use crate::probe::ProbeSession;
use crate::stats::StatsRegistry;
use crate::types::{LinkTransition, ProbeOutcome, SessionCommand};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Reactor-side view of a spawned probe session
struct SessionHandle {
    target: String,
    device: String,
    control: mpsc::UnboundedSender<SessionCommand>,
    task: JoinHandle<()>,
}

/// Event dispatcher joining link transitions to probe sessions
pub struct Reactor {
    link: LinkSocket,
    monitor: LinkMonitor,
    sessions: Vec<SessionHandle>,
    stats: StatsRegistry,
    outcomes_tx: mpsc::UnboundedSender<ProbeOutcome>,
    outcomes_rx: mpsc::UnboundedReceiver<ProbeOutcome>,
}

impl Reactor {
    /// Open the link socket and prepare an empty binding table
    pub fn new() -> Result<Self> {
        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        Ok(Self {
            link: LinkSocket::new()?,
            monitor: LinkMonitor::new(),
            sessions: Vec::new(),
            stats: StatsRegistry::new(),
            outcomes_tx,
            outcomes_rx,
        })
    }

    /// Bind a session to its device name and spawn its task
    ///
    /// The session starts in the `Stopped` state; only a link transition
    /// (or the startup sync) sets it probing.
    pub fn add_session(&mut self, session: ProbeSession) {
        let (control, control_rx) = mpsc::unbounded_channel();
        self.stats
            .register(session.target(), session.device(), session.address());
        let handle = SessionHandle {
            target: session.target().to_string(),
            device: session.device().to_string(),
            control,
            task: tokio::spawn(session.run(control_rx, self.outcomes_tx.clone())),
        };
        debug!(probe = %handle.target, device = %handle.device, "session bound");
        self.sessions.push(handle);
    }

    /// Number of bound sessions
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Forward a transition to every session bound to the device name
    ///
    /// Names with no bound session are ignored.
    fn dispatch(&self, transition: &LinkTransition) {
        let command = if transition.up {
            SessionCommand::Start
        } else {
            SessionCommand::Stop
        };
        for session in self.sessions.iter().filter(|s| s.device == transition.name) {
            info!(
                device = %transition.name,
                probe = %session.target,
                up = transition.up,
                "link transition"
            );
            if session.control.send(command).is_err() {
                warn!(probe = %session.target, "session task is gone");
            }
        }
    }

    /// Startup query: align every session with the registry after the
    /// initial dump
    fn initial_sync(&self) {
        for session in &self.sessions {
            if self.monitor.is_up(&session.device) {
                let _ = session.control.send(SessionCommand::Start);
            }
        }
    }

    /// Run the dispatch loop until a shutdown signal arrives
    pub async fn run(mut self) -> Result<()> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigusr1 = signal(SignalKind::user_defined1())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        self.link.request_dump()?;
        let mut initial_sync_done = false;

        info!(sessions = self.sessions.len(), "watching link state");

        enum Tick {
            Link(Result<Vec<LinkEvent>>),
            Outcome(Option<ProbeOutcome>),
            Stats,
            Reload,
            Shutdown,
        }

        loop {
            let tick = tokio::select! {
                events = self.link.recv_events() => Tick::Link(events),
                outcome = self.outcomes_rx.recv() => Tick::Outcome(outcome),
                _ = sigusr1.recv() => Tick::Stats,
                _ = sighup.recv() => Tick::Reload,
                _ = sigint.recv() => Tick::Shutdown,
                _ = sigterm.recv() => Tick::Shutdown,
            };

            match tick {
                Tick::Link(Ok(events)) => {
                    for event in &events {
                        for transition in self.monitor.apply(event) {
                            self.dispatch(&transition);
                        }
                    }
                    if !initial_sync_done {
                        self.initial_sync();
                        initial_sync_done = true;
                    }
                }
                Tick::Link(Err(e)) => {
                    // keep monitoring; the next notification may decode fine
                    warn!(error = %e, "link channel receive failed");
                }
                Tick::Outcome(Some(outcome)) => {
                    debug!(
                        probe = %outcome.target,
                        sequence = outcome.sequence,
                        result = ?outcome.result,
                        "probe outcome"
                    );
                    self.stats.record(&outcome, Instant::now());
                }
                Tick::Outcome(None) => {
                    // cannot happen while we hold a sender clone
                }
                Tick::Stats => {
                    use std::io::Write;
                    print!("{}", self.stats.render(Instant::now()));
                    let _ = std::io::stdout().flush();
                }
                Tick::Reload => {
                    info!("reload requested, shutting down for supervisor restart");
                    break;
                }
                Tick::Shutdown => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stop every session and join its task
    async fn shutdown(self) {
        for session in self.sessions {
            let _ = session.control.send(SessionCommand::Stop);
            drop(session.control);
            if session.task.await.is_err() {
                warn!(probe = %session.target, "session task panicked");
            }
        }
        info!("all probe sessions stopped");
    }
}
