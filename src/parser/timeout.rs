// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Closing of truncated System Exclusive messages after a timeout

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    time::Duration,
};

use futures_util::future::{AbortHandle, AbortRegistration, Abortable, Aborted};
use tokio::runtime::Handle;

use super::{MessageSink, ParserConfig, StreamParser};
use crate::{PortIndex, TimeStamp};

/// Deadline for the System Exclusive message in progress.
///
/// Each arming starts a new generation. A timer that fires for an
/// outdated generation has no effect.
#[derive(Debug, Default)]
struct SysExTimeout {
    generation: u64,
    armed: Option<AbortHandle>,
}

impl SysExTimeout {
    fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(abort_handle) = self.armed.take() {
            abort_handle.abort();
        }
    }

    fn arm(&mut self) -> (u64, AbortRegistration) {
        self.disarm();
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        self.armed = Some(abort_handle);
        (self.generation, abort_registration)
    }
}

#[derive(Debug)]
struct Shared<S> {
    parser: StreamParser,
    sink: S,
    timeout: SysExTimeout,
}

impl<S> Shared<S>
where
    S: MessageSink,
{
    fn feed_block(&mut self, ts: TimeStamp, input: &[u8]) {
        let Self { parser, sink, .. } = self;
        parser.feed_block(ts, input, sink);
    }

    fn expire(&mut self, generation: u64) {
        if self.timeout.generation != generation {
            log::trace!("Ignoring outdated SysEx timeout");
            return;
        }
        self.timeout.armed = None;
        let Self { parser, sink, .. } = self;
        parser.expire_sysex(sink);
    }
}

/// A [`StreamParser`] that closes truncated System Exclusive messages.
///
/// A System Exclusive message that does not receive any more bytes
/// within the configured timeout is closed without a terminator and
/// delivered into the sink. Feeding, cancellation and expiry are
/// serialized, i.e. the sink is never invoked concurrently.
///
/// The timers are spawned onto the given runtime. Feeding is possible
/// from any thread, e.g. from the callbacks of a MIDI driver.
#[allow(missing_debug_implementations)]
pub struct TimedStreamParser<S> {
    shared: Arc<Mutex<Shared<S>>>,
    runtime: Handle,
}

impl<S> TimedStreamParser<S>
where
    S: MessageSink + Send + 'static,
{
    #[must_use]
    pub fn new(config: ParserConfig, sink: S, runtime: Handle) -> Self {
        let shared = Shared {
            parser: StreamParser::new(config),
            sink,
            timeout: SysExTimeout::default(),
        };
        Self {
            shared: Arc::new(Mutex::new(shared)),
            runtime,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared<S>> {
        // The state remains consistent even if the sink panicked
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode a block of bytes.
    ///
    /// Restarts the timeout if a System Exclusive message is still
    /// in progress afterwards.
    pub fn feed_block(&self, ts: TimeStamp, input: &[u8]) {
        let mut shared = self.lock();
        shared.feed_block(ts, input);
        self.update_timeout(&mut shared);
    }

    pub fn feed_byte(&self, ts: TimeStamp, byte: u8) {
        self.feed_block(ts, &[byte]);
    }

    /// Discard the System Exclusive message in progress.
    ///
    /// See also [`StreamParser::cancel_sysex()`].
    pub fn cancel_sysex(&self) -> bool {
        let mut shared = self.lock();
        shared.timeout.disarm();
        shared.parser.cancel_sysex()
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.lock().parser.config().sysex_timeout
    }

    /// Change the timeout.
    ///
    /// A System Exclusive message in progress is rescheduled with
    /// the new timeout, starting now.
    pub fn set_timeout(&self, timeout: Duration) {
        let mut shared = self.lock();
        shared.parser.set_sysex_timeout(timeout);
        self.update_timeout(&mut shared);
    }

    #[must_use]
    pub fn is_sysex_in_progress(&self) -> bool {
        self.lock().parser.is_sysex_in_progress()
    }

    pub fn set_source(&self, source: PortIndex) {
        self.lock().parser.set_source(source);
    }

    /// Access the sink, e.g. for draining collected messages.
    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.lock().sink)
    }

    fn update_timeout(&self, shared: &mut Shared<S>) {
        if !shared.parser.is_sysex_in_progress() {
            shared.timeout.disarm();
            return;
        }
        let timeout = shared.parser.config().sysex_timeout;
        let (generation, abort_registration) = shared.timeout.arm();
        let weak_shared = Arc::downgrade(&self.shared);
        let timer = Abortable::new(
            async move {
                tokio::time::sleep(timeout).await;
                expire(&weak_shared, generation);
            },
            abort_registration,
        );
        self.runtime.spawn(async move {
            if let Err(Aborted) = timer.await {
                log::trace!("SysEx timeout aborted");
            }
        });
    }
}

fn expire<S>(shared: &Weak<Mutex<Shared<S>>>, generation: u64)
where
    S: MessageSink,
{
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut shared = shared.lock().unwrap_or_else(PoisonError::into_inner);
    shared.expire(generation);
}

impl<S> Drop for TimedStreamParser<S> {
    fn drop(&mut self) {
        self.shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timeout
            .disarm();
    }
}
