//! Polling supervisor: one periodic sampling loop per resource kind.
//!
//! Each loop reads a fixed block of points, publishes only the points whose
//! value changed since the previous sample, then sleeps for the poll
//! interval. Loops check their task state only between iterations, so a stop
//! or hide takes effect within one interval plus the in-flight request.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use modbus_poll_client::{ModbusClient, ResourceKind, Supervisor};
//!
//! let client = Arc::new(ModbusClient::default());
//! client.open("192.168.0.1").await?;
//!
//! let supervisor = Supervisor::builder().build(client);
//! let mut events = supervisor.subscribe();
//! supervisor.start(ResourceKind::Coils);
//!
//! while let Ok(event) = events.recv().await {
//!     println!("{event:?}");
//! }
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;

use super::event::{PollEvent, ResourceKind};
use super::state::{diff, TaskState, TaskStatus};
use crate::client::ModbusClient;
use crate::error::Result;

/// Default delay between two polls of a task.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// Default number of points read per poll.
pub const DEFAULT_SAMPLE_COUNT: u16 = 4;

/// Default capacity of the event broadcast buffer.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub poll_interval: Duration,
    pub sample_count: u16,
    pub event_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            sample_count: DEFAULT_SAMPLE_COUNT,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Builder for configuring and creating a [`Supervisor`].
#[derive(Debug, Default)]
pub struct SupervisorBuilder {
    config: SupervisorConfig,
}

impl SupervisorBuilder {
    /// Create a new supervisor builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the delay between polls.
    ///
    /// Default: 1 second
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the number of points read per poll.
    ///
    /// Default: 4
    pub fn sample_count(mut self, count: u16) -> Self {
        self.config.sample_count = count;
        self
    }

    /// Set the event buffer capacity. Slow subscribers lag past this.
    ///
    /// Default: 256
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity.max(1);
        self
    }

    /// Build a supervisor polling through `client`.
    pub fn build(self, client: Arc<ModbusClient>) -> Supervisor {
        Supervisor::new(client, self.config)
    }
}

struct Inner {
    client: Arc<ModbusClient>,
    config: SupervisorConfig,
    /// One slot per [`ResourceKind`], each under its own lock.
    tasks: [Mutex<TaskState>; 2],
    events: broadcast::Sender<PollEvent>,
}

impl Inner {
    fn task(&self, kind: ResourceKind) -> MutexGuard<'_, TaskState> {
        self.tasks[kind.slot()]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: PollEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn emit_changes(&self, kind: ResourceKind, changes: Vec<(usize, bool)>) {
        for (index, value) in changes {
            self.emit(PollEvent::Changed { kind, index, value });
        }
    }

    async fn read(&self, kind: ResourceKind, start: u16) -> Result<Vec<bool>> {
        let count = self.config.sample_count;
        match kind {
            ResourceKind::Coils => self.client.read_coils(start, count).await,
            ResourceKind::DiscreteInputs => self.client.read_discrete_inputs(start, count).await,
        }
    }
}

/// Manages the polling tasks and publishes their change notifications.
///
/// Cheap to clone; clones share the same tasks. Methods that launch loops
/// must be called from within a tokio runtime.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a new supervisor builder.
    pub fn builder() -> SupervisorBuilder {
        SupervisorBuilder::new()
    }

    /// Create a supervisor with the given configuration.
    pub fn new(client: Arc<ModbusClient>, mut config: SupervisorConfig) -> Self {
        config.event_capacity = config.event_capacity.max(1);
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                tasks: Default::default(),
                events,
            }),
        }
    }

    /// The client the loops poll through.
    pub fn client(&self) -> &Arc<ModbusClient> {
        &self.inner.client
    }

    /// Supervisor configuration.
    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Subscribe to change and failure notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PollEvent> {
        self.inner.events.subscribe()
    }

    /// Start polling `kind`. No-op if already running.
    pub fn start(&self, kind: ResourceKind) {
        let launch = self.inner.task(kind).start();
        if let Some(generation) = launch {
            tracing::info!("Polling {} started", kind);
            self.spawn(kind, generation);
        }
    }

    /// Stop polling `kind` at the user's request. Idempotent.
    pub fn stop(&self, kind: ResourceKind) {
        if self.inner.task(kind).stop() {
            tracing::info!("Polling {} stopped", kind);
        }
    }

    /// Stop every task.
    pub fn stop_all(&self) {
        for kind in ResourceKind::ALL {
            self.stop(kind);
        }
    }

    /// The consumer became invisible: suspend every running task, keeping
    /// the user's intent.
    pub fn on_visibility_hide(&self) {
        for kind in ResourceKind::ALL {
            if self.inner.task(kind).hide() {
                tracing::info!("Polling {} suspended while hidden", kind);
            }
        }
    }

    /// The consumer became visible again: resume tasks suspended by the
    /// hide that the user has not stopped since.
    pub fn on_visibility_show(&self) {
        for kind in ResourceKind::ALL {
            let launch = self.inner.task(kind).show();
            if let Some(generation) = launch {
                tracing::info!("Polling {} resumed", kind);
                self.spawn(kind, generation);
            }
        }
    }

    /// Set the first address sampled for `kind`, effective from the next poll.
    pub fn set_start_address(&self, kind: ResourceKind, address: u16) {
        self.inner.task(kind).set_start_address(address);
    }

    pub fn start_address(&self, kind: ResourceKind) -> u16 {
        self.inner.task(kind).start_address()
    }

    pub fn status(&self, kind: ResourceKind) -> TaskStatus {
        self.inner.task(kind).status()
    }

    pub fn last_sample(&self, kind: ResourceKind) -> Option<Vec<bool>> {
        self.inner.task(kind).last_sample().map(<[bool]>::to_vec)
    }

    /// Invert the coils block and write it back.
    ///
    /// Uses the last polled coil values, reading them first if none exist.
    /// Publishes the changed points and stores the written values as the
    /// last coil sample. Returns the written values.
    pub async fn invert_coils(&self) -> Result<Vec<bool>> {
        let (cached, start) = {
            let task = self.inner.task(ResourceKind::Coils);
            (task.last_sample().map(<[bool]>::to_vec), task.start_address())
        };
        let current = match cached {
            Some(values) => values,
            None => {
                self.inner
                    .client
                    .read_coils(start, self.inner.config.sample_count)
                    .await?
            }
        };

        let inverted: Vec<bool> = current.iter().map(|value| !value).collect();
        self.inner.client.write_multiple_coils(start, &inverted).await?;

        let changes = diff(Some(&current), &inverted);
        self.inner
            .task(ResourceKind::Coils)
            .record_sample(inverted.clone());
        self.inner.emit_changes(ResourceKind::Coils, changes);
        Ok(inverted)
    }

    fn spawn(&self, kind: ResourceKind, generation: u64) {
        tokio::spawn(poll_loop(self.inner.clone(), kind, generation));
    }
}

async fn poll_loop(inner: Arc<Inner>, kind: ResourceKind, generation: u64) {
    loop {
        let start = {
            let task = inner.task(kind);
            if !task.is_current(generation) {
                break;
            }
            task.start_address()
        };

        match inner.read(kind, start).await {
            Ok(sample) => {
                let changes = {
                    let mut task = inner.task(kind);
                    if !task.is_current(generation) {
                        break;
                    }
                    task.record_sample(sample)
                };
                inner.emit_changes(kind, changes);
            }
            Err(e) => {
                let failed = inner.task(kind).fail(generation);
                if failed {
                    tracing::warn!("Polling {} stopped after read error: {}", kind, e);
                    inner.emit(PollEvent::Failed {
                        kind,
                        message: e.to_string(),
                    });
                }
                break;
            }
        }

        tokio::time::sleep(inner.config.poll_interval).await;
    }
    tracing::debug!("Polling loop {} #{} exited", kind, generation);
}
