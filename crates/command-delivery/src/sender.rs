//! The command sender: bounded-concurrency dispatch with retry and
//! durable fallback.

use crate::communicator::RemoteCommunicator;
use crate::config::CommandSenderConfig;
use crate::error::{DeliveryError, DeliveryResult};
use crate::queue::CommandQueue;
use crate::throttle::SendThrottle;
use command_protocol_types::{
    Command, CommandResponse, CommandSentCallback, FailureKind, SendFailure,
};
use command_spool::PersistentFifo;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Lifecycle state of a [`CommandSender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    /// Constructed, never started.
    Created,
    /// Workers are dispatching.
    Started,
    /// Workers halted; may be started again.
    Stopped,
}

/// A command paired with its completion callback and effective timeout;
/// the unit that occupies the command queue.
pub struct DispatchUnit {
    /// Correlation id for logs.
    pub id: Uuid,
    /// The command to deliver.
    pub command: Command,
    /// Completion listener, invoked with the terminal response.
    pub callback: Option<Arc<dyn CommandSentCallback>>,
    /// Whether the callback cannot follow the command through the spool.
    /// The command is still delivered; the listener is known-unreachable
    /// after any spool trip.
    pub callback_dropped: bool,
    /// Effective timeout for each transmission attempt.
    pub timeout: Duration,
}

impl DispatchUnit {
    fn new(
        command: Command,
        callback: Option<Arc<dyn CommandSentCallback>>,
        default_timeout: Duration,
    ) -> Self {
        let timeout = command.timeout_override().unwrap_or(default_timeout);
        Self {
            id: Uuid::new_v4(),
            command,
            callback,
            callback_dropped: false,
            timeout,
        }
    }
}

impl fmt::Debug for DispatchUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchUnit")
            .field("id", &self.id)
            .field("command_type", &self.command.command_type)
            .field("guaranteed", &self.command.guaranteed)
            .field("has_callback", &self.callback.is_some())
            .field("callback_dropped", &self.callback_dropped)
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// State shared between the sender handle and its background tasks.
struct SenderShared {
    config: CommandSenderConfig,
    communicator: Arc<dyn RemoteCommunicator>,
    queue: CommandQueue<DispatchUnit>,
    send_throttle: SendThrottle,
    spool: Option<PersistentFifo>,
    sent: AtomicU64,
    sent_successful: AtomicU64,
    sent_failed: AtomicU64,
    in_flight: AtomicUsize,
}

/// Reliable asynchronous command sender.
///
/// Owns a bounded worker pool that pulls dispatch units from the command
/// queue (subject to the queue's admission throttle and the send
/// throttle), invokes the remote communicator, classifies failures, and
/// retries or fails. Guaranteed commands fall back to the durable spool
/// when the sender is stopped or the queue cannot take them, and are
/// replayed on the next start.
pub struct CommandSender {
    shared: Arc<SenderShared>,
    state: Mutex<SenderState>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CommandSender {
    /// Create a sender bound to one communicator and one configuration.
    pub fn new(
        communicator: Arc<dyn RemoteCommunicator>,
        config: CommandSenderConfig,
    ) -> DeliveryResult<Self> {
        config.validate()?;

        let queue = if config.enable_queue_throttling {
            CommandQueue::with_throttle(
                config.queue_size,
                config.queue_throttle_max_commands,
                config.queue_throttle_burst_period(),
            )
        } else {
            CommandQueue::new(config.queue_size)
        };

        let send_throttle = if config.enable_send_throttling {
            SendThrottle::new(
                config.send_throttle_max_commands,
                config.send_throttle_quiet_period(),
            )
        } else {
            SendThrottle::disabled()
        };

        let spool = config.spool_config().map(PersistentFifo::open);

        Ok(Self {
            shared: Arc::new(SenderShared {
                config,
                communicator,
                queue,
                send_throttle,
                spool,
                sent: AtomicU64::new(0),
                sent_successful: AtomicU64::new(0),
                sent_failed: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
            }),
            state: Mutex::new(SenderState::Created),
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Create a sender and re-enqueue dispatch units drained from a
    /// previous instance. Guaranteed commands need no such hand-off; they
    /// recover from the spool by configuration path.
    pub fn with_preloaded(
        communicator: Arc<dyn RemoteCommunicator>,
        config: CommandSenderConfig,
        units: Vec<DispatchUnit>,
    ) -> DeliveryResult<Self> {
        let sender = Self::new(communicator, config)?;
        for unit in units {
            if let Err(unit) = sender.shared.queue.try_put(unit) {
                warn!(
                    command_id = %unit.id,
                    "Queue full while reconstituting drained commands, dropping volatile command"
                );
            }
        }
        Ok(sender)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SenderState {
        *self.state.lock().unwrap()
    }

    /// Whether the sender is currently started.
    pub fn is_started(&self) -> bool {
        self.state() == SenderState::Started
    }

    /// Terminal outcomes produced so far (successful or not).
    pub fn sent_count(&self) -> u64 {
        self.shared.sent.load(Ordering::Acquire)
    }

    /// Successful terminal outcomes produced so far.
    pub fn sent_successful_count(&self) -> u64 {
        self.shared.sent_successful.load(Ordering::Acquire)
    }

    /// Unsuccessful terminal outcomes produced so far.
    pub fn sent_failed_count(&self) -> u64 {
        self.shared.sent_failed.load(Ordering::Acquire)
    }

    /// Dispatch units currently being transmitted.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// Dispatch units waiting in the command queue.
    pub fn queue_depth(&self) -> usize {
        self.shared.queue.size()
    }

    /// Guaranteed commands currently held by the durable spool.
    pub fn spooled_count(&self) -> usize {
        self.shared.spool.as_ref().map_or(0, PersistentFifo::count)
    }

    /// Enqueue a volatile command. Blocks while the queue is at capacity;
    /// the command is lost if the process restarts before it is sent.
    pub async fn send_asynch(
        &self,
        command: Command,
        callback: Option<Arc<dyn CommandSentCallback>>,
    ) {
        let unit = DispatchUnit::new(command, callback, self.shared.config.default_timeout());
        debug!(
            command_id = %unit.id,
            command_type = %unit.command.command_type,
            "Queueing volatile command"
        );
        self.shared.queue.put(unit).await;
    }

    /// Enqueue a guaranteed command, falling back to the durable spool
    /// when the sender is stopped or the queue cannot accept it
    /// immediately.
    pub async fn send_asynch_guaranteed(
        &self,
        mut command: Command,
        callback: Option<Arc<dyn CommandSentCallback>>,
    ) -> DeliveryResult<()> {
        command.guaranteed = true;
        let mut unit = DispatchUnit::new(command, callback, self.shared.config.default_timeout());

        // One-time capability check: a callback that cannot be persisted
        // still fires for in-memory completion, but is dropped if the
        // command ever has to cross the spool boundary.
        if let Some(callback) = &unit.callback {
            if !callback.is_persistable() {
                unit.callback_dropped = true;
            }
        }

        if self.is_started() {
            match self.shared.queue.try_put(unit) {
                Ok(()) => return Ok(()),
                Err(rejected) => unit = rejected,
            }
        }

        match &self.shared.spool {
            Some(spool) => {
                if unit.callback.is_some() {
                    debug!(
                        command_id = %unit.id,
                        "Completion callback cannot follow the command into the spool, dropping it"
                    );
                }
                let outcome = spool.put_object(&unit.command)?;
                if outcome.purged_records() > 0 {
                    warn!(
                        command_id = %unit.id,
                        purged = outcome.purged_records(),
                        "Spool purged old records to accept new guaranteed command"
                    );
                }
                debug!(
                    command_id = %unit.id,
                    spooled = spool.count(),
                    "Spooled guaranteed command"
                );
                Ok(())
            }
            None => {
                warn!(
                    command_id = %unit.id,
                    "No spool configured; guaranteed command is held in memory only"
                );
                self.shared
                    .queue
                    .try_put(unit)
                    .map_err(|_| DeliveryError::QueueFull(self.shared.config.queue_size))
            }
        }
    }

    /// Send one command synchronously on the caller's task.
    ///
    /// Fails immediately (does not wait) when the sender is not started.
    /// The returned response's `successful` flag reflects the true outcome
    /// of the single attempt.
    pub async fn send_synch(&self, command: Command) -> DeliveryResult<CommandResponse> {
        if !self.is_started() {
            return Err(DeliveryError::NotStarted);
        }
        let unit = DispatchUnit::new(command, None, self.shared.config.default_timeout());

        self.shared.send_throttle.wait_until_ok_to_send().await;
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        let attempt = attempt_send(&self.shared, &unit).await;
        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);

        let response = match attempt {
            Ok(response) => response,
            Err(failure) => {
                if failure.kind() == FailureKind::Connection {
                    notify_failure_callback(&self.shared, &unit, &failure);
                }
                CommandResponse::failure(unit.command.clone(), failure.to_string())
            }
        };
        record_outcome(&self.shared, &unit, &response);
        Ok(response)
    }

    /// Begin worker pool execution: dispatch workers, a spool replay pass
    /// for commands left over from previous runs, and (if configured) a
    /// server polling task that replays the spool when the endpoint
    /// becomes reachable again.
    ///
    /// Must be called from within a tokio runtime. Calling on an already
    /// started sender is a no-op.
    pub fn start_sending(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == SenderState::Started {
                debug!("Command sender already started");
                return;
            }
            *state = SenderState::Started;
        }

        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(tx);

        let mut tasks = self.tasks.lock().unwrap();
        for worker_id in 0..self.shared.config.max_concurrent {
            tasks.push(tokio::spawn(worker_loop(
                self.shared.clone(),
                rx.clone(),
                worker_id,
            )));
        }
        if self.shared.spool.is_some() {
            tasks.push(tokio::spawn(spool_replay_task(
                self.shared.clone(),
                rx.clone(),
            )));
            if let Some(interval) = self.shared.config.server_polling_interval() {
                tasks.push(tokio::spawn(server_polling_task(
                    self.shared.clone(),
                    rx.clone(),
                    interval,
                )));
            }
        }

        info!(
            workers = self.shared.config.max_concurrent,
            spooled = self.spooled_count(),
            "Command sender started"
        );
    }

    /// Halt the worker pool.
    ///
    /// With `wait_for_queue_to_empty`, first waits until the queue and all
    /// in-flight work drain. Workers blocked in queue, throttle, or retry
    /// waits are interrupted; an in-flight remote call is allowed to
    /// complete or fail naturally. A guaranteed command parked mid-retry
    /// is moved to the durable spool.
    pub async fn stop_sending(&self, wait_for_queue_to_empty: bool) {
        if self.state() != SenderState::Started {
            debug!("Command sender is not started, nothing to stop");
            return;
        }

        if wait_for_queue_to_empty {
            while self.shared.queue.size() > 0
                || self.shared.in_flight.load(Ordering::Acquire) > 0
            {
                sleep(Duration::from_millis(25)).await;
            }
        }

        *self.state.lock().unwrap() = SenderState::Stopped;
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            // Receivers may already be gone if every task finished.
            let _ = tx.send(true);
        }

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    error!(error = %e, "Dispatch task ended abnormally");
                }
            }
        }

        info!(
            queued = self.queue_depth(),
            spooled = self.spooled_count(),
            "Command sender stopped"
        );
    }

    /// Drain not-yet-dispatched units out of the queue.
    ///
    /// Volatile units are returned so the caller can reconstitute them
    /// into a new sender via [`CommandSender::with_preloaded`]. Guaranteed
    /// units are written to the durable spool instead and recover
    /// automatically on the next start.
    pub fn drain_queued_commands(&self) -> Vec<DispatchUnit> {
        let mut volatile = Vec::new();
        for unit in self.shared.queue.drain() {
            if unit.command.guaranteed && park_guaranteed(&self.shared, &unit) {
                continue;
            }
            volatile.push(unit);
        }
        info!(
            volatile = volatile.len(),
            spooled = self.spooled_count(),
            "Drained queued commands"
        );
        volatile
    }
}

/// One dispatch worker: pull, gate, transmit, classify, repeat.
async fn worker_loop(
    shared: Arc<SenderShared>,
    mut shutdown: watch::Receiver<bool>,
    worker_id: usize,
) {
    debug!(worker_id, "Dispatch worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        let unit = tokio::select! {
            _ = shutdown.changed() => break,
            unit = shared.queue.take() => unit,
        };
        shared.in_flight.fetch_add(1, Ordering::AcqRel);
        dispatch(&shared, unit, &mut shutdown).await;
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(worker_id, "Dispatch worker stopped");
}

/// Drive one dispatch unit to a terminal outcome, or park it on shutdown.
async fn dispatch(
    shared: &Arc<SenderShared>,
    mut unit: DispatchUnit,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                park_unit(shared, unit);
                return;
            }
            _ = shared.send_throttle.wait_until_ok_to_send() => {}
        }

        let failure = match attempt_send(shared, &unit).await {
            Ok(response) => {
                complete(shared, &unit, response);
                return;
            }
            Err(failure) => failure,
        };

        match failure.kind() {
            FailureKind::Connection => {
                notify_failure_callback(shared, &unit, &failure);
                warn!(
                    command_id = %unit.id,
                    error = %failure,
                    retry_interval_ms = shared.config.retry_interval_millis,
                    "Remote endpoint unreachable, will keep retrying"
                );
            }
            FailureKind::Command(_) => {
                let retries = unit.command.retry_count();
                if retries >= shared.config.max_retries {
                    warn!(
                        command_id = %unit.id,
                        retries,
                        error = %failure,
                        "Retries exhausted, failing command"
                    );
                    let response =
                        CommandResponse::failure(unit.command.clone(), failure.to_string());
                    complete(shared, &unit, response);
                    return;
                }
                unit.command.set_retry_count(retries + 1);
                debug!(
                    command_id = %unit.id,
                    retry = retries + 1,
                    max_retries = shared.config.max_retries,
                    error = %failure,
                    "Command failed, will retry"
                );
            }
            FailureKind::NotSerializable => {
                error!(
                    command_id = %unit.id,
                    error = %failure,
                    "Command cannot be serialized, failing without retry"
                );
                let response = CommandResponse::failure(unit.command.clone(), failure.to_string());
                complete(shared, &unit, response);
                return;
            }
        }

        tokio::select! {
            _ = shutdown.changed() => {
                park_unit(shared, unit);
                return;
            }
            _ = sleep(shared.config.retry_interval()) => {}
        }
    }
}

/// One transmission attempt under the unit's effective timeout.
async fn attempt_send(
    shared: &SenderShared,
    unit: &DispatchUnit,
) -> Result<CommandResponse, SendFailure> {
    match timeout(unit.timeout, shared.communicator.send(&unit.command)).await {
        Ok(result) => result,
        Err(_) => Err(SendFailure::Timeout(unit.timeout)),
    }
}

/// Record a terminal outcome and invoke the unit's callback.
fn complete(shared: &SenderShared, unit: &DispatchUnit, response: CommandResponse) {
    record_outcome(shared, unit, &response);
    if let Some(callback) = &unit.callback {
        callback.command_sent(&response);
    }
}

fn record_outcome(shared: &SenderShared, unit: &DispatchUnit, response: &CommandResponse) {
    shared.sent.fetch_add(1, Ordering::AcqRel);
    if response.is_successful() {
        shared.sent_successful.fetch_add(1, Ordering::AcqRel);
    } else {
        shared.sent_failed.fetch_add(1, Ordering::AcqRel);
    }
    debug!(
        command_id = %unit.id,
        successful = response.is_successful(),
        "Command completed"
    );
}

fn notify_failure_callback(shared: &SenderShared, unit: &DispatchUnit, failure: &SendFailure) {
    if let Some(callback) = shared.communicator.failure_callback() {
        callback.connection_failed(&unit.command, failure);
    }
}

/// Write a guaranteed command to the spool. Returns whether it was spooled.
fn park_guaranteed(shared: &SenderShared, unit: &DispatchUnit) -> bool {
    let Some(spool) = &shared.spool else {
        return false;
    };
    match spool.put_object(&unit.command) {
        Ok(outcome) => {
            if outcome.purged_records() > 0 {
                warn!(
                    command_id = %unit.id,
                    purged = outcome.purged_records(),
                    "Spool purged old records while parking guaranteed command"
                );
            }
            info!(
                command_id = %unit.id,
                "Moved pending guaranteed command to the durable spool"
            );
            true
        }
        Err(e) => {
            error!(
                command_id = %unit.id,
                error = %e,
                "Failed to spool pending guaranteed command"
            );
            false
        }
    }
}

/// Park a unit interrupted by shutdown: guaranteed commands go to the
/// spool, everything else back to the queue so it can still be drained.
fn park_unit(shared: &SenderShared, unit: DispatchUnit) {
    if unit.command.guaranteed && park_guaranteed(shared, &unit) {
        return;
    }
    if let Err(unit) = shared.queue.try_put(unit) {
        warn!(
            command_id = %unit.id,
            "Queue full while parking command at shutdown, dropping volatile command"
        );
    }
}

/// Replay every spooled command into the queue, oldest first.
async fn replay_spool(shared: &Arc<SenderShared>, shutdown: &mut watch::Receiver<bool>) {
    let Some(spool) = &shared.spool else {
        return;
    };
    loop {
        if *shutdown.borrow() {
            return;
        }
        let command: Command = match spool.take_object() {
            Ok(Some(command)) => command,
            Ok(None) => return,
            Err(e) => {
                error!(error = %e, "Failed to read spooled command, leaving spool as-is");
                return;
            }
        };

        let mut unit = DispatchUnit::new(command, None, shared.config.default_timeout());
        // Whatever listener the command once had did not survive the disk.
        unit.callback_dropped = true;
        debug!(command_id = %unit.id, "Replaying spooled guaranteed command");

        // Hand the unit to the queue without ever holding it inside a
        // cancellable future; on shutdown it goes straight back to the
        // spool.
        loop {
            match shared.queue.try_put(unit) {
                Ok(()) => break,
                Err(rejected) => {
                    unit = rejected;
                    if *shutdown.borrow() {
                        park_unit(shared, unit);
                        return;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => {
                            park_unit(shared, unit);
                            return;
                        }
                        _ = sleep(Duration::from_millis(25)) => {}
                    }
                }
            }
        }
    }
}

/// Startup task: one replay pass over whatever the spool held.
async fn spool_replay_task(shared: Arc<SenderShared>, mut shutdown: watch::Receiver<bool>) {
    replay_spool(&shared, &mut shutdown).await;
}

/// Periodically check endpoint reachability and replay spooled commands
/// once the endpoint is reachable again.
async fn server_polling_task(
    shared: Arc<SenderShared>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut was_connected = shared.communicator.is_connected().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => return,
            _ = sleep(interval) => {}
        }
        if *shutdown.borrow() {
            return;
        }

        let connected = shared.communicator.is_connected().await;
        if connected && !was_connected {
            info!("Remote endpoint is reachable again");
        }
        if connected && shared.spool.as_ref().is_some_and(|s| !s.is_empty()) {
            replay_spool(&shared, &mut shutdown).await;
        }
        was_connected = connected;
    }
}
