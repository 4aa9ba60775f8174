// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Incremental decoding of MIDI 1.0 byte streams
//!
//! The [`StreamParser`] consumes an unbounded stream of bytes in
//! blocks of arbitrary size and delivers complete messages into a
//! [`MessageSink`]. Partial messages are kept across blocks.

use std::{ops::DerefMut, time::Duration};

use crate::{
    message::{InvalidBytes, SYSEX_END, SYSEX_START},
    Channel, Message, PortIndex, SysExMessage, SystemCommonMessage, SystemCommonStatus,
    SystemRealTime, TimeStamp, VoiceMessage, VoiceStatus,
};

#[cfg(feature = "tokio")]
pub mod timeout;

pub const DEFAULT_SYSEX_TIMEOUT: Duration = Duration::from_secs(1);

pub const DEFAULT_SYSEX_PROGRESS_INTERVAL: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParserConfig {
    /// Report runs of undecodable bytes as invalid messages.
    ///
    /// Invalid bytes are silently dropped if disabled.
    pub collect_invalid: bool,

    /// Maximum idle time while receiving a System Exclusive message.
    ///
    /// Only considered by a `TimedStreamParser`.
    pub sysex_timeout: Duration,

    /// Number of accumulated SysEx bytes between progress notifications.
    ///
    /// Progress notifications are disabled if 0.
    pub sysex_progress_interval: usize,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            collect_invalid: true,
            sysex_timeout: DEFAULT_SYSEX_TIMEOUT,
            sysex_progress_interval: DEFAULT_SYSEX_PROGRESS_INTERVAL,
        }
    }
}

/// Receives decoded messages in the order of decoding.
pub trait MessageSink {
    fn sink_message(&mut self, message: Message);

    /// Invoked periodically while a System Exclusive message is received.
    ///
    /// The time stamp refers to the start of the message and `len`
    /// is the number of payload bytes received so far.
    fn sysex_progress(&mut self, _ts: TimeStamp, _len: usize) {}
}

impl MessageSink for Vec<Message> {
    fn sink_message(&mut self, message: Message) {
        self.push(message);
    }
}

impl<S> MessageSink for &mut S
where
    S: MessageSink + ?Sized,
{
    fn sink_message(&mut self, message: Message) {
        self.deref_mut().sink_message(message);
    }

    fn sysex_progress(&mut self, ts: TimeStamp, len: usize) {
        self.deref_mut().sysex_progress(ts, len);
    }
}

impl<S> MessageSink for Box<S>
where
    S: MessageSink + ?Sized,
{
    fn sink_message(&mut self, message: Message) {
        self.deref_mut().sink_message(message);
    }

    fn sysex_progress(&mut self, ts: TimeStamp, len: usize) {
        self.deref_mut().sysex_progress(ts, len);
    }
}

/// Adapts a closure as [`MessageSink`].
#[allow(missing_debug_implementations)]
pub struct SinkFn<F>(pub F);

impl<F> MessageSink for SinkFn<F>
where
    F: FnMut(Message),
{
    fn sink_message(&mut self, message: Message) {
        (self.0)(message);
    }
}

/// Result of consuming a single byte.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ByteOutcome {
    /// The byte completed a message.
    Emit(Message),
    /// The byte could not be assigned to any message.
    Invalid,
    /// The byte has been consumed by an incomplete message.
    Continue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingStatus {
    Voice(VoiceStatus, Channel),
    SystemCommon(SystemCommonStatus),
}

impl PendingStatus {
    const fn status_byte(self) -> u8 {
        match self {
            Self::Voice(status, channel) => status.status_byte(channel),
            Self::SystemCommon(status) => status.status_byte(),
        }
    }

    const fn data_len(self) -> usize {
        match self {
            Self::Voice(status, _) => status.data_len(),
            Self::SystemCommon(status) => status.data_len(),
        }
    }
}

/// Incomplete voice or system common message
#[derive(Debug, Clone)]
struct PendingMessage {
    status: PendingStatus,
    data: [u8; 2],
    data_len: usize,
}

impl PendingMessage {
    const fn new(status: PendingStatus) -> Self {
        debug_assert!(status.data_len() > 0);
        Self {
            status,
            data: [0; 2],
            data_len: 0,
        }
    }

    fn push(&mut self, data_byte: u8) {
        debug_assert!(!self.is_complete());
        self.data[self.data_len] = data_byte;
        self.data_len += 1;
    }

    const fn is_complete(&self) -> bool {
        self.data_len >= self.status.data_len()
    }

    fn received_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        std::iter::once(self.status.status_byte())
            .chain(self.data[..self.data_len].iter().copied())
    }

    fn into_message(self, ts: TimeStamp) -> Message {
        debug_assert!(self.is_complete());
        let data = &self.data[..self.data_len];
        match self.status {
            PendingStatus::Voice(status, channel) => Message::new(
                ts,
                VoiceMessage::from_data_bytes(status, channel, data[0], data.get(1).copied()),
            ),
            PendingStatus::SystemCommon(status) => {
                Message::new(ts, SystemCommonMessage::from_data_bytes(status, data))
            }
        }
    }
}

#[derive(Debug, Clone)]
struct SysExAccumulator {
    ts: TimeStamp,
    payload: Vec<u8>,
}

/// Decodes a MIDI 1.0 byte stream into [`Message`]s.
///
/// Each instance is supposed to be fed by a single input connection.
/// Decoding never fails. Bytes that could not be decoded are reported
/// as invalid messages, one message per contiguous run of bytes.
#[derive(Debug, Clone, Default)]
pub struct StreamParser {
    config: ParserConfig,
    source: PortIndex,
    pending: Option<PendingMessage>,
    sysex: Option<SysExAccumulator>,
    invalid_run: Vec<u8>,
}

impl StreamParser {
    #[must_use]
    pub fn new(config: ParserConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ParserConfig {
        &self.config
    }

    pub fn set_collect_invalid(&mut self, collect_invalid: bool) {
        self.config.collect_invalid = collect_invalid;
    }

    pub fn set_sysex_timeout(&mut self, sysex_timeout: Duration) {
        self.config.sysex_timeout = sysex_timeout;
    }

    #[must_use]
    pub const fn source(&self) -> PortIndex {
        self.source
    }

    /// Attach a source to all subsequently decoded messages.
    pub fn set_source(&mut self, source: PortIndex) {
        self.source = source;
    }

    #[must_use]
    pub const fn is_sysex_in_progress(&self) -> bool {
        self.sysex.is_some()
    }

    /// Number of payload bytes of the System Exclusive message in progress.
    #[must_use]
    pub fn sysex_len(&self) -> Option<usize> {
        self.sysex.as_ref().map(|sysex| sysex.payload.len())
    }

    /// Decode a block of bytes that has been received at the same time.
    ///
    /// All messages that are completed by this block carry the given
    /// time stamp, except System Exclusive messages that carry the
    /// time stamp of the block in which they started.
    pub fn feed_block<S>(&mut self, ts: TimeStamp, input: &[u8], sink: &mut S)
    where
        S: MessageSink + ?Sized,
    {
        for &byte in input {
            match self.step(ts, byte, sink) {
                ByteOutcome::Emit(message) => self.emit(message, sink),
                ByteOutcome::Invalid => self.push_invalid(byte),
                ByteOutcome::Continue => (),
            }
        }
        self.flush_invalid_run(ts, sink);
    }

    /// Decode a single byte.
    #[must_use]
    pub fn feed(&mut self, ts: TimeStamp, byte: u8) -> Vec<Message> {
        self.feed_all(ts, &[byte])
    }

    /// Decode a block of bytes and collect the messages.
    #[must_use]
    pub fn feed_all(&mut self, ts: TimeStamp, input: &[u8]) -> Vec<Message> {
        let mut messages = Vec::new();
        self.feed_block(ts, input, &mut messages);
        messages
    }

    /// Discard the System Exclusive message in progress.
    ///
    /// Returns `true` if a message has been discarded. Incomplete
    /// messages of other types are not affected.
    pub fn cancel_sysex(&mut self) -> bool {
        let Some(sysex) = self.sysex.take() else {
            return false;
        };
        log::debug!(
            "Cancelled SysEx with {len} byte(s) started at {ts}",
            len = sysex.payload.len(),
            ts = sysex.ts
        );
        true
    }

    /// Close the System Exclusive message in progress without a terminator.
    ///
    /// Invoked when no more data has been received in time. Returns `true`
    /// if a message has been emitted. Closing repeatedly has no effect.
    pub fn expire_sysex<S>(&mut self, sink: &mut S) -> bool
    where
        S: MessageSink + ?Sized,
    {
        let Some(message) = self.close_sysex(false) else {
            return false;
        };
        log::debug!("SysEx started at {ts} expired", ts = message.ts());
        self.emit(message, sink);
        true
    }

    /// Discard all incomplete messages and pending invalid bytes.
    pub fn reset(&mut self) {
        self.pending = None;
        self.sysex = None;
        self.invalid_run.clear();
    }

    fn step<S>(&mut self, ts: TimeStamp, byte: u8, sink: &mut S) -> ByteOutcome
    where
        S: MessageSink + ?Sized,
    {
        match byte {
            // Real-time messages may appear anywhere without affecting other messages
            0xf8..=0xff => {
                let Some(real_time) = SystemRealTime::from_repr(byte) else {
                    return ByteOutcome::Invalid;
                };
                self.flush_invalid_run(ts, sink);
                ByteOutcome::Emit(Message::new(ts, real_time))
            }
            0x00..=0x7f => self.step_data(ts, byte, sink),
            SYSEX_END => {
                if self.sysex.is_none() {
                    self.supersede_pending();
                    return ByteOutcome::Invalid;
                }
                self.flush_invalid_run(ts, sink);
                self.close_sysex(true)
                    .map_or(ByteOutcome::Continue, ByteOutcome::Emit)
            }
            _ => self.step_status(ts, byte, sink),
        }
    }

    fn step_data<S>(&mut self, ts: TimeStamp, byte: u8, sink: &mut S) -> ByteOutcome
    where
        S: MessageSink + ?Sized,
    {
        if let Some(sysex) = &mut self.sysex {
            sysex.payload.push(byte);
            let len = sysex.payload.len();
            let interval = self.config.sysex_progress_interval;
            let progress = (interval > 0 && len % interval == 0).then_some(sysex.ts);
            self.flush_invalid_run(ts, sink);
            if let Some(sysex_ts) = progress {
                log::trace!("Received {len} SysEx byte(s) since {sysex_ts}");
                sink.sysex_progress(sysex_ts, len);
            }
            return ByteOutcome::Continue;
        }
        let Some(pending) = &mut self.pending else {
            return ByteOutcome::Invalid;
        };
        pending.push(byte);
        let complete = pending.is_complete();
        self.flush_invalid_run(ts, sink);
        if !complete {
            return ByteOutcome::Continue;
        }
        self.pending
            .take()
            .map_or(ByteOutcome::Continue, |pending| {
                ByteOutcome::Emit(pending.into_message(ts))
            })
    }

    fn step_status<S>(&mut self, ts: TimeStamp, byte: u8, sink: &mut S) -> ByteOutcome
    where
        S: MessageSink + ?Sized,
    {
        debug_assert!((0x80..0xf8).contains(&byte) && byte != SYSEX_END);
        // Every status byte supersedes an incomplete message
        self.supersede_pending();
        let next_status = VoiceStatus::from_status_byte(byte)
            .map(|(status, channel)| PendingStatus::Voice(status, channel))
            .or_else(|| SystemCommonStatus::from_repr(byte).map(PendingStatus::SystemCommon));
        // Invalid bytes received during a SysEx message precede it
        if next_status.is_some() || byte == SYSEX_START || self.sysex.is_some() {
            self.flush_invalid_run(ts, sink);
        }
        if let Some(message) = self.close_sysex(false) {
            log::debug!(
                "SysEx started at {sysex_ts} closed by status byte {byte:#04x}",
                sysex_ts = message.ts()
            );
            self.emit(message, sink);
        }
        if byte == SYSEX_START {
            self.sysex = Some(SysExAccumulator {
                ts,
                payload: Vec::new(),
            });
            return ByteOutcome::Continue;
        }
        let Some(next_status) = next_status else {
            return ByteOutcome::Invalid;
        };
        if let PendingStatus::SystemCommon(status) = next_status {
            if status.data_len() == 0 {
                return ByteOutcome::Emit(Message::new(
                    ts,
                    SystemCommonMessage::from_data_bytes(status, &[]),
                ));
            }
        }
        self.pending = Some(PendingMessage::new(next_status));
        ByteOutcome::Continue
    }

    fn close_sysex(&mut self, received_with_terminator: bool) -> Option<Message> {
        let SysExAccumulator { ts, payload } = self.sysex.take()?;
        Some(Message::new(
            ts,
            SysExMessage::from_accumulated(payload, received_with_terminator),
        ))
    }

    fn supersede_pending(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        log::debug!(
            "Incomplete message with status {status:#04x} superseded",
            status = pending.status.status_byte()
        );
        if self.config.collect_invalid {
            // Each data byte of a pending message flushes the run. All invalid
            // bytes in the run have been received after the pending bytes.
            let run = std::mem::take(&mut self.invalid_run);
            self.invalid_run = pending.received_bytes().chain(run).collect();
        }
    }

    fn push_invalid(&mut self, byte: u8) {
        log::trace!("Invalid byte {byte:#04x}");
        if self.config.collect_invalid {
            self.invalid_run.push(byte);
        }
    }

    fn flush_invalid_run<S>(&mut self, ts: TimeStamp, sink: &mut S)
    where
        S: MessageSink + ?Sized,
    {
        if self.invalid_run.is_empty() {
            return;
        }
        let raw = std::mem::take(&mut self.invalid_run);
        log::debug!("Invalid input at {ts}: {raw:02x?}");
        self.emit(Message::new(ts, InvalidBytes::from_raw(raw)), sink);
    }

    fn emit<S>(&self, mut message: Message, sink: &mut S)
    where
        S: MessageSink + ?Sized,
    {
        message.set_source(self.source);
        sink.sink_message(message);
    }
}

#[cfg(test)]
mod tests;
