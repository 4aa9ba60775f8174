// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

#![allow(rustdoc::invalid_rust_codeblocks)]
#![doc = include_str!("../README.md")]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
//#![warn(missing_docs)] // FIXME
#![warn(unreachable_pub)]
#![warn(unsafe_code)]
#![warn(clippy::pedantic)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(rustdoc::broken_intra_doc_links)]
// Repetitions of module/type names occur frequently when using many
// modules for keeping the size of the source files handy. Often
// types have the same name as their parent module.
#![allow(clippy::module_name_repetitions)]
// Repeating the type name in `..Default::default()` expressions
// is not needed since the context is obvious.
#![allow(clippy::default_trait_access)]

use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        OnceLock,
    },
    time::Instant,
};

use derive_more::{Display, From, Into};

pub mod frame;
pub use self::frame::{
    pack, Frame, FrameEntry, FrameError, FrameResult, Packetizer, TimestampPolicy,
    DEFAULT_MAX_FRAME_SIZE,
};

pub mod message;
pub use self::message::{
    Channel, InvalidBytes, Message, MessageBody, MessageError, MessageResult, SysExMessage,
    SystemCommonMessage, SystemCommonStatus, SystemRealTime, VoiceMessage, VoiceStatus, U7,
};

mod output;
pub use self::output::{MidiOutputConnection, OutputError, OutputResult};

pub mod parser;
pub use self::parser::{MessageSink, ParserConfig, SinkFn, StreamParser};

#[cfg(feature = "tokio")]
pub use self::parser::timeout::TimedStreamParser;

#[cfg(feature = "tokio")]
pub mod sender;
#[cfg(feature = "tokio")]
pub use self::sender::{PacedSysExSendHandle, PacedSysExSender, SendId, SendOutcome, SendState};

/// Capture time of MIDI input with microsecond precision.
///
/// The origin is arbitrary and defined by the caller, e.g. the time
/// stamps provided by the operating system for incoming MIDI data.
/// Only the ordering is significant for the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display, From, Into)]
#[display("{_0} µs")]
pub struct TimeStamp(u64);

impl TimeStamp {
    pub const ZERO: Self = Self(0);

    #[must_use]
    pub const fn from_micros(micros: u64) -> Self {
        Self(micros)
    }

    #[must_use]
    pub const fn to_micros(self) -> u64 {
        self.0
    }

    /// Current time, relative to the first invocation within this process.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn now() -> Self {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = *ORIGIN.get_or_init(Instant::now);
        // Saturating conversion from u128 to u64
        Self(origin.elapsed().as_micros().min(u128::from(u64::MAX)) as u64)
    }
}

/// Identifies the source of MIDI input, e.g. a connected port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct PortIndex(u32);

impl PortIndex {
    /// Placeholder for messages without a known source.
    pub const INVALID: Self = Self(0);

    #[must_use]
    pub const fn value(self) -> u32 {
        self.0
    }

    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 != Self::INVALID.0
    }
}

impl Default for PortIndex {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Thread-safe generator of unique [`PortIndex`] values.
///
/// A helper for applications that receive input from multiple
/// connections. Each connection gets its own [`StreamParser`] and a
/// distinct source via [`StreamParser::set_source()`]. The source is
/// then attached to every decoded [`Message`].
#[derive(Debug)]
pub struct PortIndexGenerator {
    next_value: AtomicU32,
}

impl PortIndexGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            next_value: AtomicU32::new(PortIndex::INVALID.0 + 1),
        }
    }

    #[must_use]
    pub fn next(&self) -> PortIndex {
        let value = self.next_value.fetch_add(1, Ordering::Relaxed);
        debug_assert!(value != PortIndex::INVALID.0, "overflow");
        PortIndex(value)
    }
}

impl Default for PortIndexGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_index_generator_skips_invalid() {
        let generator = PortIndexGenerator::new();
        let first = generator.next();
        let second = generator.next();
        assert!(first.is_valid());
        assert!(second.is_valid());
        assert_ne!(first, second);
        assert!(!PortIndex::default().is_valid());
    }

    #[test]
    fn time_stamp_now_is_monotonic() {
        let before = TimeStamp::now();
        let after = TimeStamp::now();
        assert!(before <= after);
    }
}
