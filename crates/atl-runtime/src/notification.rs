//! Game-facing notifications
//!
//! Completion notifications leave the audio thread on an unbounded channel.
//! Objects keep a sync callback counter so they are never released while
//! the game still holds an outstanding callback for them.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crossbeam::channel::Sender;

use crate::ids::{ObjectId, StandaloneFileId, TriggerId, TriggerInstanceId};
use crate::request::{CallbackFlags, UserData};

/// Shared count of outstanding synchronous callbacks for one object
#[derive(Debug, Clone, Default)]
pub struct SyncCallbackCounter {
    count: Arc<AtomicI32>,
}

impl SyncCallbackCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrement; a decrement at zero is a caller bug and is refused
    pub fn decrement(&self) {
        let result = self
            .count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| {
                (count > 0).then(|| count - 1)
            });
        if let Err(previous) = result {
            log::error!("Sync callback counter decremented below zero");
            debug_assert!(previous > 0, "sync callback counter decremented below zero");
        }
    }

    pub fn count(&self) -> i32 {
        self.count.load(Ordering::Acquire)
    }

    /// Increment and return a token that decrements when completed or dropped
    pub fn token(&self) -> SyncCallbackToken {
        self.increment();
        SyncCallbackToken {
            counter: Some(self.clone()),
        }
    }
}

/// Outstanding synchronous callback; completing or dropping it releases the hold
#[derive(Debug, Default)]
#[must_use = "dropping the token completes the callback immediately"]
pub struct SyncCallbackToken {
    counter: Option<SyncCallbackCounter>,
}

impl SyncCallbackToken {
    /// Token that holds nothing
    pub fn none() -> Self {
        Self { counter: None }
    }

    pub fn is_held(&self) -> bool {
        self.counter.is_some()
    }

    pub fn complete(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(counter) = self.counter.take() {
            counter.decrement();
        }
    }
}

impl Drop for SyncCallbackToken {
    fn drop(&mut self) {
        self.release();
    }
}

/// Trigger instance completion details
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerFinished {
    pub object: ObjectId,
    pub instance: TriggerInstanceId,
    pub trigger: TriggerId,
    pub user_data: UserData,
    /// False when any of the instance's events failed
    pub success: bool,
}

/// Notification delivered to the game
#[derive(Debug)]
pub enum Notification {
    TriggerFinished {
        info: TriggerFinished,
        /// Held when the trigger asked for external-thread callbacks
        token: SyncCallbackToken,
    },
    FileStarted {
        object: ObjectId,
        file: StandaloneFileId,
        name: String,
        user_data: UserData,
        success: bool,
    },
    FileFinished {
        object: ObjectId,
        file: StandaloneFileId,
        name: String,
        user_data: UserData,
    },
}

/// Routes notifications to the game channel and the audio-thread queue
pub struct Dispatcher {
    sender: Sender<Notification>,
    audio_thread_queue: Vec<(TriggerFinished, SyncCallbackToken)>,
}

impl Dispatcher {
    pub fn new(sender: Sender<Notification>) -> Self {
        Self {
            sender,
            audio_thread_queue: Vec::new(),
        }
    }

    /// Publish a trigger completion, holding the object's counter as requested
    pub fn trigger_finished(
        &mut self,
        info: TriggerFinished,
        callbacks: CallbackFlags,
        counter: &SyncCallbackCounter,
    ) {
        log::trace!(
            "Trigger {} instance {} finished on {} (success: {})",
            info.trigger,
            info.instance,
            info.object,
            info.success
        );

        if callbacks.contains(CallbackFlags::AUDIO_THREAD) {
            self.audio_thread_queue.push((info, counter.token()));
        }

        let token = if callbacks.contains(CallbackFlags::EXTERNAL_THREAD) {
            counter.token()
        } else {
            SyncCallbackToken::none()
        };
        self.send(Notification::TriggerFinished { info, token });
    }

    pub fn file_started(
        &mut self,
        object: ObjectId,
        file: StandaloneFileId,
        name: &str,
        user_data: UserData,
        success: bool,
    ) {
        self.send(Notification::FileStarted {
            object,
            file,
            name: name.to_string(),
            user_data,
            success,
        });
    }

    pub fn file_finished(
        &mut self,
        object: ObjectId,
        file: StandaloneFileId,
        name: &str,
        user_data: UserData,
    ) {
        self.send(Notification::FileFinished {
            object,
            file,
            name: name.to_string(),
            user_data,
        });
    }

    /// Completions waiting for audio-thread callbacks
    pub fn take_audio_thread_queue(&mut self) -> Vec<(TriggerFinished, SyncCallbackToken)> {
        std::mem::take(&mut self.audio_thread_queue)
    }

    fn send(&self, notification: Notification) {
        // A dropped receiver drops the notification and with it any token.
        if self.sender.send(notification).is_err() {
            log::debug!("Notification receiver dropped");
        }
    }
}
