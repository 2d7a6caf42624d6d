//! Per-task lifecycle record.
//!
//! A task tracks three flags:
//! - `user_active`: the user asked for polling
//! - `running`: a loop is currently allowed to poll
//! - `suspended_by_visibility`: polling was paused by a hide event
//!
//! `running` implies `user_active`. While suspended, `running` is false and
//! `user_active` remembers the intent to restore on show.
//!
//! Every launch of a loop bumps `generation`; a loop keeps polling only while
//! it holds the current generation and the task is running.

/// Snapshot of a task's lifecycle flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TaskStatus {
    pub user_active: bool,
    pub running: bool,
    pub suspended_by_visibility: bool,
}

/// Lifecycle flags, configuration and last sample of one polling task.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    user_active: bool,
    running: bool,
    suspended_by_visibility: bool,
    generation: u64,
    start_address: u16,
    last_sample: Option<Vec<bool>>,
}

impl TaskState {
    /// User start. Returns the generation of the loop to launch, or `None`
    /// if a loop is already running.
    pub fn start(&mut self) -> Option<u64> {
        if self.running {
            return None;
        }
        self.user_active = true;
        self.suspended_by_visibility = false;
        Some(self.launch())
    }

    /// User stop. Returns whether the task was active.
    pub fn stop(&mut self) -> bool {
        let was_active = self.user_active;
        self.user_active = false;
        self.running = false;
        was_active
    }

    /// Visibility lost. Returns whether a running task was suspended.
    pub fn hide(&mut self) -> bool {
        if !self.running {
            return false;
        }
        self.suspended_by_visibility = true;
        self.running = false;
        true
    }

    /// Visibility regained. Returns the generation of the loop to launch if
    /// the task was suspended and the user still wants it.
    pub fn show(&mut self) -> Option<u64> {
        if !self.suspended_by_visibility {
            return None;
        }
        self.suspended_by_visibility = false;
        if self.user_active && !self.running {
            Some(self.launch())
        } else {
            None
        }
    }

    /// The loop of `generation` hit an error. Returns whether it was still
    /// current, in which case the task is now stopped.
    pub fn fail(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        self.user_active = false;
        self.running = false;
        true
    }

    /// Whether the loop of `generation` may keep polling.
    #[inline]
    pub fn is_current(&self, generation: u64) -> bool {
        self.running && self.generation == generation
    }

    pub fn status(&self) -> TaskStatus {
        TaskStatus {
            user_active: self.user_active,
            running: self.running,
            suspended_by_visibility: self.suspended_by_visibility,
        }
    }

    #[inline]
    pub fn start_address(&self) -> u16 {
        self.start_address
    }

    /// Change the start address. A new address clears the last sample so the
    /// next poll publishes every point of the new block.
    pub fn set_start_address(&mut self, address: u16) {
        if self.start_address != address {
            self.start_address = address;
            self.last_sample = None;
        }
    }

    pub fn last_sample(&self) -> Option<&[bool]> {
        self.last_sample.as_deref()
    }

    /// Store `sample` and return the `(index, value)` pairs that changed.
    pub fn record_sample(&mut self, sample: Vec<bool>) -> Vec<(usize, bool)> {
        let changes = diff(self.last_sample.as_deref(), &sample);
        self.last_sample = Some(sample);
        changes
    }

    fn launch(&mut self) -> u64 {
        self.running = true;
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }
}

/// Indices whose value differs from `prev`, or that `prev` does not cover.
pub fn diff(prev: Option<&[bool]>, next: &[bool]) -> Vec<(usize, bool)> {
    next.iter()
        .enumerate()
        .filter(|(i, value)| prev.and_then(|p| p.get(*i)) != Some(*value))
        .map(|(i, value)| (i, *value))
        .collect()
}
