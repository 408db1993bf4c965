//! Dispatcher implementation
//!
//! A single Tokio task owns every queue mutation and every send. It selects
//! over a periodic tick, the command channel and queue file notifications;
//! one event is handled to completion before the next is looked at.

use super::metrics;
use crate::mail::{render, MailSender};
use crate::watcher::{WatchEvent, WatchReceiver};
use crate::{BulkMailError, Result};
use chrono::{DateTime, Utc};
use queuefile::{Claim, Clock, Queue, Stats, Status};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

/// How often the queue is polled while running
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Age after which a `SENDING` claim is considered abandoned
pub const DEFAULT_STALE_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Consecutive empty polls before the dispatcher stops itself
pub const DEFAULT_EMPTY_POLL_LIMIT: u32 = 3;

/// Event broadcast channel capacity
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Minimum seconds between the last completion and the next send
    pub delay_seconds: u64,

    pub tick_interval: Duration,

    pub stale_timeout: Duration,

    pub empty_poll_limit: u32,

    pub event_channel_capacity: usize,

    /// Begin in RUNNING instead of STOPPED
    pub start_running: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            delay_seconds: 30,
            tick_interval: DEFAULT_TICK_INTERVAL,
            stale_timeout: DEFAULT_STALE_TIMEOUT,
            empty_poll_limit: DEFAULT_EMPTY_POLL_LIMIT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            start_running: false,
        }
    }
}

impl DispatcherConfig {
    pub fn new(delay_seconds: u64) -> Self {
        Self {
            delay_seconds,
            ..Default::default()
        }
    }

    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = timeout;
        self
    }

    pub fn with_empty_poll_limit(mut self, limit: u32) -> Self {
        self.empty_poll_limit = limit.max(1);
        self
    }

    pub fn with_start_running(mut self, running: bool) -> Self {
        self.start_running = running;
        self
    }
}

/// Subject and HTML template shared by every message
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub subject: String,
    pub html: String,
}

impl MessageTemplate {
    pub fn new(subject: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            html: html.into(),
        }
    }
}

/// Events emitted by the dispatcher
#[derive(Debug, Clone, PartialEq)]
pub enum DispatcherEvent {
    /// Loop started
    Started,

    /// Loop exited
    Stopped,

    /// Switched to RUNNING
    Running,

    /// Switched to STOPPED on request
    Paused,

    /// A pending recipient was claimed
    Claimed { email: String },

    /// Holding the claim until the send delay has passed
    Waiting { email: String, wait: Duration },

    Sent { email: String },

    Failed { email: String, error: String },

    /// A claim was handed back unsent
    Released { email: String },

    /// A tick found nothing to send
    EmptyPoll { streak: u32, limit: u32 },

    /// Switched to STOPPED after repeated empty polls
    AutoStopped,

    StaleClaimsReset { count: usize },

    /// Bare addresses turned into pending records
    Reconciled { addresses: Vec<String> },

    StatsUpdated(Stats),

    Error { message: String },
}

/// Commands accepted by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatcherCommand {
    /// Switch to RUNNING
    Start,

    /// Switch to STOPPED (the loop keeps running)
    Stop,

    /// Exit the loop
    Shutdown,

    /// Change the send delay
    SetDelay(u64),
}

/// State shared between the loop and its handles
#[derive(Debug, Clone, Default)]
pub struct ControlState {
    pub booted: bool,
    pub empty_poll_streak: u32,
    pub delay_seconds: u64,
    pub stats: Stats,
}

#[derive(Debug, PartialEq, Eq)]
enum LoopControl {
    Continue,
    Exit,
}

enum WaitOutcome {
    Elapsed,
    Stopped,
    Shutdown,
}

fn lock(state: &Mutex<ControlState>) -> MutexGuard<'_, ControlState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Control surface for a running dispatcher
#[derive(Debug, Clone)]
pub struct DispatcherHandle {
    command_tx: mpsc::Sender<DispatcherCommand>,
    state: Arc<Mutex<ControlState>>,
}

impl DispatcherHandle {
    pub async fn start(&self) -> Result<()> {
        self.send(DispatcherCommand::Start).await
    }

    pub async fn stop(&self) -> Result<()> {
        self.send(DispatcherCommand::Stop).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(DispatcherCommand::Shutdown).await
    }

    pub async fn set_delay(&self, seconds: u64) -> Result<()> {
        self.send(DispatcherCommand::SetDelay(seconds)).await
    }

    async fn send(&self, command: DispatcherCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| BulkMailError::Dispatcher("Dispatcher has exited".to_string()))
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).booted
    }

    /// Stats as of the last refresh
    pub fn stats(&self) -> Stats {
        lock(&self.state).stats
    }

    pub fn snapshot(&self) -> ControlState {
        lock(&self.state).clone()
    }
}

/// Time to hold a claim so that at least `delay` separates it from the last
/// completion. `None` means send now.
pub fn send_wait(
    last_completion: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    delay: Duration,
) -> Option<Duration> {
    let last = last_completion?;
    // A completion stamped in the future counts as just now
    let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
    delay.checked_sub(elapsed).filter(|wait| !wait.is_zero())
}

async fn next_watch_event(rx: &mut Option<WatchReceiver>) -> Option<WatchEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Queue dispatcher
///
/// Drains the queue one recipient at a time, pacing sends by the configured
/// delay, and stops itself once the queue stays empty.
pub struct Dispatcher {
    config: DispatcherConfig,
    queue: Queue,
    clock: Arc<dyn Clock>,
    sender: Arc<dyn MailSender>,
    message: MessageTemplate,
    watch_rx: Option<WatchReceiver>,
    state: Arc<Mutex<ControlState>>,
    event_tx: broadcast::Sender<DispatcherEvent>,
    command_rx: Option<mpsc::Receiver<DispatcherCommand>>,
    command_tx: mpsc::Sender<DispatcherCommand>,
}

impl Dispatcher {
    /// Create a dispatcher; the queue's clock is used for pacing too
    pub fn new(
        config: DispatcherConfig,
        queue: Queue,
        sender: Arc<dyn MailSender>,
        message: MessageTemplate,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(config.event_channel_capacity);
        let (command_tx, command_rx) = mpsc::channel(16);
        let state = ControlState {
            delay_seconds: config.delay_seconds,
            ..Default::default()
        };

        Self {
            clock: queue.clock(),
            config,
            queue,
            sender,
            message,
            watch_rx: None,
            state: Arc::new(Mutex::new(state)),
            event_tx,
            command_rx: Some(command_rx),
            command_tx,
        }
    }

    /// Feed queue file notifications into the loop
    pub fn with_watcher(mut self, events: WatchReceiver) -> Self {
        self.watch_rx = Some(events);
        self
    }

    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            command_tx: self.command_tx.clone(),
            state: Arc::clone(&self.state),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatcherEvent> {
        self.event_tx.subscribe()
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).booted
    }

    fn lock_state(&self) -> MutexGuard<'_, ControlState> {
        lock(&self.state)
    }

    fn send_event(&self, event: DispatcherEvent) {
        match self.event_tx.send(event) {
            Ok(_) => {
                let capacity = self.config.event_channel_capacity;
                let len = self.event_tx.len();
                if len > capacity * 80 / 100 {
                    tracing::warn!(
                        current = len,
                        capacity = capacity,
                        "Event channel nearing capacity"
                    );
                }
            }
            Err(_) => {
                tracing::trace!("Event sent but no receivers subscribed");
            }
        }
    }

    fn set_booted(&self, booted: bool) {
        {
            let mut state = self.lock_state();
            state.booted = booted;
            state.empty_poll_streak = 0;
        }
        metrics::set_running(booted);
    }

    /// Run the loop until shutdown
    ///
    /// Fails up front if the queue file cannot be read.
    pub async fn run(&mut self) -> Result<()> {
        let mut command_rx = self
            .command_rx
            .take()
            .ok_or_else(|| BulkMailError::Dispatcher("Dispatcher already running".to_string()))?;
        let mut watch_rx = self.watch_rx.take();

        self.recover()?;

        self.set_booted(self.config.start_running);
        tracing::info!(
            queue = %self.queue.path().display(),
            running = self.config.start_running,
            "Dispatcher started"
        );
        self.send_event(DispatcherEvent::Started);

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.handle_tick(&mut command_rx).await == LoopControl::Exit {
                        break;
                    }
                }
                command = command_rx.recv() => {
                    match command {
                        Some(command) => {
                            if self.handle_command(command) == LoopControl::Exit {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = next_watch_event(&mut watch_rx) => {
                    match event {
                        Some(event) => self.handle_watch_event(event),
                        None => {
                            tracing::warn!("Queue file watcher closed");
                            watch_rx = None;
                        }
                    }
                }
            }
        }

        self.set_booted(false);
        tracing::info!("Dispatcher stopped");
        self.send_event(DispatcherEvent::Stopped);
        Ok(())
    }

    /// Startup recovery: return abandoned claims to the queue
    fn recover(&mut self) -> Result<()> {
        self.queue.verify()?;

        let count = self.queue.reset_stale_claims(self.config.stale_timeout)?;
        if count > 0 {
            tracing::info!(count, "Reset stuck SENDING records to PENDING");
            metrics::record_stale_reset(count);
            self.send_event(DispatcherEvent::StaleClaimsReset { count });
        }

        self.refresh_stats();
        Ok(())
    }

    fn handle_command(&mut self, command: DispatcherCommand) -> LoopControl {
        match command {
            DispatcherCommand::Start => {
                self.set_booted(true);
                tracing::info!("Dispatcher switched to RUNNING");
                self.send_event(DispatcherEvent::Running);
            }
            DispatcherCommand::Stop => {
                self.set_booted(false);
                tracing::info!("Dispatcher switched to STOPPED");
                self.send_event(DispatcherEvent::Paused);
            }
            DispatcherCommand::Shutdown => {
                tracing::info!("Received shutdown command");
                return LoopControl::Exit;
            }
            DispatcherCommand::SetDelay(seconds) => {
                self.lock_state().delay_seconds = seconds;
                tracing::info!(seconds, "Send delay updated");
            }
        }
        LoopControl::Continue
    }

    async fn handle_tick(
        &mut self,
        commands: &mut mpsc::Receiver<DispatcherCommand>,
    ) -> LoopControl {
        if !self.is_running() {
            return LoopControl::Continue;
        }

        tracing::debug!("Checking for pending emails");
        match self.queue.claim_next_pending() {
            Ok(claim) => {
                self.lock_state().empty_poll_streak = 0;
                self.dispatch(claim, commands).await
            }
            Err(e) if e.is_queue_empty() => {
                self.record_empty_poll();
                LoopControl::Continue
            }
            Err(e) => {
                self.lock_state().empty_poll_streak = 0;
                tracing::error!(error = %e, "Failed to claim next pending email");
                self.send_event(DispatcherEvent::Error {
                    message: format!("Claim failed: {}", e),
                });
                LoopControl::Continue
            }
        }
    }

    fn record_empty_poll(&mut self) {
        let limit = self.config.empty_poll_limit;
        let (streak, exhausted) = {
            let mut state = self.lock_state();
            state.empty_poll_streak += 1;
            let streak = state.empty_poll_streak;
            if streak >= limit {
                state.booted = false;
                state.empty_poll_streak = 0;
            }
            (streak, streak >= limit)
        };

        metrics::record_empty_poll();
        tracing::info!(streak, limit, "No pending emails found");
        self.send_event(DispatcherEvent::EmptyPoll { streak, limit });

        if exhausted {
            metrics::set_running(false);
            tracing::info!(checks = limit, "No pending emails, switching to STOPPED");
            self.send_event(DispatcherEvent::AutoStopped);
            self.refresh_stats();
        }
    }

    async fn dispatch(
        &mut self,
        claim: Claim,
        commands: &mut mpsc::Receiver<DispatcherCommand>,
    ) -> LoopControl {
        let email = claim.email().to_string();
        tracing::info!(email = %email, "Found pending email");
        self.send_event(DispatcherEvent::Claimed {
            email: email.clone(),
        });

        if let Some(wait) = self.rate_limit_wait() {
            tracing::info!(
                email = %email,
                wait_secs = wait.as_secs(),
                "Waiting before next send"
            );
            self.send_event(DispatcherEvent::Waiting {
                email: email.clone(),
                wait,
            });

            match self.wait_for_slot(wait, commands).await {
                WaitOutcome::Elapsed => {}
                WaitOutcome::Stopped => {
                    self.release(&claim);
                    return LoopControl::Continue;
                }
                WaitOutcome::Shutdown => {
                    self.release(&claim);
                    return LoopControl::Exit;
                }
            }
        }

        let body = render(&self.message.html, &email);
        tracing::info!(email = %email, "Sending email");

        match self.sender.send(&email, &self.message.subject, &body).await {
            Ok(()) => {
                metrics::record_sent();
                tracing::info!(email = %email, "Sent");
                self.complete(&claim, Status::Done, "");
                self.send_event(DispatcherEvent::Sent { email });
            }
            Err(e) => {
                let error = e.to_string();
                metrics::record_failed();
                tracing::warn!(email = %email, error = %error, "Send failed");
                self.complete(&claim, Status::Failed, &error);
                self.send_event(DispatcherEvent::Failed { email, error });
            }
        }

        self.refresh_stats();
        LoopControl::Continue
    }

    fn rate_limit_wait(&self) -> Option<Duration> {
        let delay = Duration::from_secs(self.lock_state().delay_seconds);
        match self.queue.last_completion_time() {
            Ok(last) => send_wait(last, self.clock.now(), delay),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read last completion time");
                None
            }
        }
    }

    /// Sleep for `wait` unless a stop or shutdown arrives first
    async fn wait_for_slot(
        &mut self,
        wait: Duration,
        commands: &mut mpsc::Receiver<DispatcherCommand>,
    ) -> WaitOutcome {
        let sleep = tokio::time::sleep(wait);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => return WaitOutcome::Elapsed,
                command = commands.recv() => match command {
                    Some(DispatcherCommand::Stop) => {
                        self.handle_command(DispatcherCommand::Stop);
                        return WaitOutcome::Stopped;
                    }
                    Some(DispatcherCommand::Shutdown) | None => {
                        tracing::info!("Shutdown requested while waiting to send");
                        return WaitOutcome::Shutdown;
                    }
                    Some(DispatcherCommand::SetDelay(seconds)) => {
                        self.handle_command(DispatcherCommand::SetDelay(seconds));
                        // The new delay applies to the claim already held
                        match self.rate_limit_wait() {
                            Some(wait) => sleep.as_mut().reset(tokio::time::Instant::now() + wait),
                            None => return WaitOutcome::Elapsed,
                        }
                    }
                    Some(other) => {
                        self.handle_command(other);
                    }
                },
            }
        }
    }

    fn complete(&self, claim: &Claim, status: Status, error: &str) {
        if let Err(e) = self.queue.complete_claim(claim, status, error) {
            tracing::error!(email = claim.email(), error = %e, "Failed to record send result");
            self.send_event(DispatcherEvent::Error {
                message: format!("Status update failed for {}: {}", claim.email(), e),
            });
        }
    }

    fn release(&self, claim: &Claim) {
        match self.queue.release_claim(claim) {
            Ok(_) => {
                tracing::info!(email = claim.email(), "Released unsent claim");
                self.send_event(DispatcherEvent::Released {
                    email: claim.email().to_string(),
                });
            }
            Err(e) => {
                tracing::error!(email = claim.email(), error = %e, "Failed to release claim");
            }
        }
        self.refresh_stats();
    }

    fn handle_watch_event(&mut self, event: WatchEvent) {
        match event {
            WatchEvent::Changed(path) | WatchEvent::Created(path) => {
                tracing::debug!(path = %path.display(), "Queue file changed");
                match self.queue.reconcile() {
                    Ok(addresses) if addresses.is_empty() => {}
                    Ok(addresses) => {
                        tracing::info!(count = addresses.len(), "Queue file updated with new pending entries");
                        metrics::record_reconciled(addresses.len());
                        self.send_event(DispatcherEvent::Reconciled { addresses });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Reconciliation failed");
                        self.send_event(DispatcherEvent::Error {
                            message: format!("Reconciliation failed: {}", e),
                        });
                    }
                }
                self.refresh_stats();
            }
            WatchEvent::Error(message) => {
                tracing::warn!(error = %message, "Watcher error");
                self.send_event(DispatcherEvent::Error {
                    message: format!("Watcher error: {}", message),
                });
            }
        }
    }

    fn refresh_stats(&self) {
        match self.queue.stats() {
            Ok(stats) => {
                self.lock_state().stats = stats;
                metrics::set_queue_depth(stats.pending);
                self.send_event(DispatcherEvent::StatsUpdated(stats));
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to refresh stats");
            }
        }
    }
}
