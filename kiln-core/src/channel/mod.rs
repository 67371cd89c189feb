//! Cross-context message channel
//!
//! The control context (core 1) and the service context (core 0) share no
//! state by reference. Commands flow one way and status the other, copied
//! through bounded queues that never block the control loop.

mod cache;
mod flags;

pub use cache::{StatusCache, StatusThrottle};
pub use flags::{QuietMode, ReadyFlag};

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Channel;
use kiln_protocol::{Command, StatusMessage};

/// Command queue depth; commands are rare
pub const COMMAND_CAPACITY: usize = 4;

/// Status queue depth; absorbs a slow link
pub const STATUS_CAPACITY: usize = 16;

/// Non-blocking queue failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelError {
    /// Queue full; the caller may retry
    Full,
    /// Nothing queued
    Empty,
}

impl core::fmt::Display for ChannelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ChannelError::Full => write!(f, "queue full"),
            ChannelError::Empty => write!(f, "queue empty"),
        }
    }
}

/// What happened to a published status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Publish {
    /// Queued normally
    Queued,
    /// Queue was full; stale entries dropped, then queued
    Cleared,
    /// Queue stayed full; only the cache holds it
    CachedOnly,
    /// Quiet mode; only the cache holds it
    Suppressed,
}

/// Everything the two contexts share
pub struct KilnChannels<M: RawMutex> {
    commands: Channel<M, Command, COMMAND_CAPACITY>,
    status: Channel<M, StatusMessage, STATUS_CAPACITY>,
    cache: StatusCache<M>,
    ready: ReadyFlag<M>,
    quiet: QuietMode,
}

impl<M: RawMutex> Default for KilnChannels<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex> KilnChannels<M> {
    pub const fn new() -> Self {
        Self {
            commands: Channel::new(),
            status: Channel::new(),
            cache: StatusCache::new(),
            ready: ReadyFlag::new(),
            quiet: QuietMode::new(),
        }
    }

    /// Queue a command for the control context
    pub fn send_command(&self, command: Command) -> Result<(), ChannelError> {
        self.commands
            .try_send(command)
            .map_err(|_| ChannelError::Full)
    }

    /// Take the next pending command
    pub fn try_command(&self) -> Result<Command, ChannelError> {
        self.commands
            .try_receive()
            .map_err(|_| ChannelError::Empty)
    }

    /// Publish a status snapshot from the control context
    ///
    /// The cache is always updated. Under backpressure the queue is cleared
    /// and the send retried once; if that also fails the status is only
    /// cached.
    pub fn publish_status(&self, status: StatusMessage) -> Publish {
        self.cache.store(status.clone());

        if self.quiet.is_quiet() {
            return Publish::Suppressed;
        }

        match self.status.try_send(status) {
            Ok(()) => Publish::Queued,
            Err(embassy_sync::channel::TrySendError::Full(status)) => {
                self.status.clear();
                match self.status.try_send(status) {
                    Ok(()) => Publish::Cleared,
                    Err(_) => Publish::CachedOnly,
                }
            }
        }
    }

    /// Take the next queued status without waiting
    pub fn try_status(&self) -> Result<StatusMessage, ChannelError> {
        self.status.try_receive().map_err(|_| ChannelError::Empty)
    }

    /// Wait for the next queued status
    pub async fn next_status(&self) -> StatusMessage {
        self.status.receive().await
    }

    pub fn pending_status(&self) -> usize {
        self.status.len()
    }

    pub fn cache(&self) -> &StatusCache<M> {
        &self.cache
    }

    pub fn ready(&self) -> &ReadyFlag<M> {
        &self.ready
    }

    pub fn quiet(&self) -> &QuietMode {
        &self.quiet
    }
}
