// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Throttled transmission of System Exclusive messages
//!
//! Some devices drop data if large SysEx messages are sent at full
//! speed. The [`PacedSysExSender`] splits the encoded message into
//! chunks and delays the transmission of each subsequent chunk
//! according to the expected throughput of the device.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use crossbeam_utils::atomic::AtomicCell;
use derive_more::Display;
use futures_util::future::{AbortHandle, Abortable, Aborted};
use tokio::runtime::Handle;

use crate::{MidiOutputConnection, OutputError, SysExMessage};

/// Bytes per second if the throughput of the device is unknown.
///
/// The nominal bandwidth of a MIDI 1.0 DIN connection.
pub const DEFAULT_THROUGHPUT: u32 = 3125;

pub const DEFAULT_CHUNK_SIZE: usize = 255;

/// Round down the chunk size to a multiple of 3 bytes.
///
/// Returns at least 3.
#[must_use]
pub const fn effective_chunk_size(chunk_size: usize) -> usize {
    let chunk_size = chunk_size - chunk_size % 3;
    if chunk_size < 3 {
        3
    } else {
        chunk_size
    }
}

/// Time needed to transmit a chunk of bytes.
///
/// A throughput of 0 is replaced by [`DEFAULT_THROUGHPUT`].
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn chunk_delay(chunk_size: usize, throughput: u32) -> Duration {
    let throughput = if throughput > 0 {
        throughput
    } else {
        DEFAULT_THROUGHPUT
    };
    Duration::from_secs_f64(chunk_size as f64 / f64::from(throughput))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub struct SendId(u64);

impl SendId {
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SendState {
    Pending,
    Sending,
    Sent,
    Cancelled,
    Failed,
}

impl SendState {
    #[must_use]
    pub const fn is_finished(self) -> bool {
        match self {
            Self::Pending | Self::Sending => false,
            Self::Sent | Self::Cancelled | Self::Failed => true,
        }
    }
}

#[derive(Debug, Clone)]
pub enum SendOutcome {
    Sent,
    Cancelled,
    /// The connection rejected a chunk. Failed sends are not retried.
    Failed(OutputError),
}

impl SendOutcome {
    #[must_use]
    pub const fn state(&self) -> SendState {
        match self {
            Self::Sent => SendState::Sent,
            Self::Cancelled => SendState::Cancelled,
            Self::Failed(_) => SendState::Failed,
        }
    }
}

type OnComplete = Box<dyn FnOnce(SendId, SendOutcome) + Send + 'static>;

struct SendContext {
    id: SendId,
    state: AtomicCell<SendState>,
    on_complete: Mutex<Option<OnComplete>>,
    abort_handle: AbortHandle,
}

impl SendContext {
    /// Finish the transmission.
    ///
    /// Only the first invocation succeeds and returns `true`. It is
    /// responsible for invoking the completion callback.
    fn finish(&self, outcome: SendOutcome) -> bool {
        let next_state = outcome.state();
        debug_assert!(next_state.is_finished());
        let mut state = self.state.load();
        loop {
            if state.is_finished() {
                return false;
            }
            match self.state.compare_exchange(state, next_state) {
                Ok(_) => break,
                Err(current) => state = current,
            }
        }
        let on_complete = self
            .on_complete
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(on_complete) = on_complete {
            on_complete(self.id, outcome);
        }
        true
    }
}

/// Controls a single paced transmission.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct PacedSysExSendHandle {
    context: Arc<SendContext>,
}

impl PacedSysExSendHandle {
    #[must_use]
    pub fn id(&self) -> SendId {
        self.context.id
    }

    #[must_use]
    pub fn state(&self) -> SendState {
        self.context.state.load()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.state().is_finished()
    }

    /// Abort the transmission.
    ///
    /// Returns `false` if the transmission has already finished, either
    /// regularly or by a preceding cancellation. The remaining chunks
    /// are discarded. Chunks that have already been sent could not be
    /// recalled and the receiver might see a truncated message.
    pub fn cancel(&self) -> bool {
        if !self.context.finish(SendOutcome::Cancelled) {
            return false;
        }
        self.context.abort_handle.abort();
        log::debug!("Cancelled paced SysEx send #{id}", id = self.context.id);
        true
    }
}

/// Sends System Exclusive messages in paced chunks.
///
/// Each transmission runs in a separate task on the given runtime.
/// Multiple transmissions might run concurrently, but their chunks
/// would then interleave on the connection.
#[allow(missing_debug_implementations)]
pub struct PacedSysExSender<C> {
    connection: Arc<Mutex<C>>,
    runtime: Handle,
    next_id: AtomicU64,
}

impl<C> PacedSysExSender<C>
where
    C: MidiOutputConnection + Send + 'static,
{
    #[must_use]
    pub fn new(connection: Arc<Mutex<C>>, runtime: Handle) -> Self {
        Self {
            connection,
            runtime,
            next_id: AtomicU64::new(1),
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &Arc<Mutex<C>> {
        &self.connection
    }

    /// Start the transmission of a message.
    ///
    /// The throughput in bytes per second defaults to [`DEFAULT_THROUGHPUT`]
    /// if unknown. The chunk size is rounded with [`effective_chunk_size()`].
    ///
    /// `on_complete` is invoked exactly once, either from the sending
    /// task or from the context that cancelled the transmission.
    pub fn start(
        &self,
        message: &SysExMessage,
        throughput: Option<u32>,
        chunk_size: usize,
        on_complete: impl FnOnce(SendId, SendOutcome) + Send + 'static,
    ) -> PacedSysExSendHandle {
        let id = SendId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let chunk_size = effective_chunk_size(chunk_size);
        let delay = chunk_delay(chunk_size, throughput.unwrap_or(DEFAULT_THROUGHPUT));
        let (abort_handle, abort_registration) = AbortHandle::new_pair();
        let context = Arc::new(SendContext {
            id,
            state: AtomicCell::new(SendState::Pending),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
            abort_handle,
        });
        let task = Abortable::new(
            send_paced(
                Arc::clone(&context),
                Arc::clone(&self.connection),
                message.to_bytes(),
                chunk_size,
                delay,
            ),
            abort_registration,
        );
        self.runtime.spawn(async move {
            if let Err(Aborted) = task.await {
                log::debug!("Paced SysEx send #{id} aborted");
            }
        });
        PacedSysExSendHandle { context }
    }
}

async fn send_paced<C>(
    context: Arc<SendContext>,
    mut connection: Arc<Mutex<C>>,
    bytes: Vec<u8>,
    chunk_size: usize,
    delay: Duration,
) where
    C: MidiOutputConnection,
{
    let id = context.id;
    if context
        .state
        .compare_exchange(SendState::Pending, SendState::Sending)
        .is_err()
    {
        return;
    }
    log::info!(
        "Sending {len} SysEx byte(s) in chunks of {chunk_size} byte(s) every {delay:?} (#{id})",
        len = bytes.len()
    );
    let mut chunks = bytes.chunks(chunk_size).peekable();
    while let Some(chunk) = chunks.next() {
        if context.state.load() != SendState::Sending {
            return;
        }
        if let Err(err) = connection.send_midi_output(chunk) {
            log::warn!("Failed to send SysEx chunk (#{id}): {err}");
            context.finish(SendOutcome::Failed(err));
            return;
        }
        log::trace!("Sent SysEx chunk of {len} byte(s) (#{id})", len = chunk.len());
        if chunks.peek().is_none() {
            break;
        }
        tokio::time::sleep(delay).await;
    }
    if context.finish(SendOutcome::Sent) {
        log::info!("Sent {len} SysEx byte(s) (#{id})", len = bytes.len());
    }
}
