// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Typed MIDI 1.0 messages
//!
//! All data bytes are validated on construction. Values outside of the
//! 7-bit range are rejected and never masked silently.

use std::fmt;

use derive_more::{Display, From};
use enum_as_inner::EnumAsInner;
use strum::{EnumCount, EnumIter, FromRepr};
use thiserror::Error;

use crate::{PortIndex, TimeStamp};

pub const SYSEX_START: u8 = 0xf0;
pub const SYSEX_END: u8 = 0xf7;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    #[error("data byte out of range: {value:#04x}")]
    DataOutOfRange { value: u8 },

    #[error("channel out of range: {channel}")]
    ChannelOutOfRange { channel: u8 },

    #[error("invalid status byte: {byte:#04x}")]
    InvalidStatus { byte: u8 },

    #[error("status {status:#04x} expects {expected} data byte(s) instead of {actual}")]
    DataLength {
        status: u8,
        expected: usize,
        actual: usize,
    },

    #[error("empty")]
    Empty,
}

pub type MessageResult<T> = std::result::Result<T, MessageError>;

#[must_use]
pub const fn is_status_byte(byte: u8) -> bool {
    byte & 0x80 != 0
}

#[must_use]
pub const fn is_data_byte(byte: u8) -> bool {
    !is_status_byte(byte)
}

/// 7-bit data value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Display)]
pub struct U7(u8);

impl U7 {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(0x7f);

    pub const fn new(value: u8) -> MessageResult<Self> {
        if is_data_byte(value) {
            Ok(Self(value))
        } else {
            Err(MessageError::DataOutOfRange { value })
        }
    }

    /// Only for bytes that have already been classified as data bytes.
    pub(crate) const fn from_data_byte(byte: u8) -> Self {
        debug_assert!(is_data_byte(byte));
        Self(byte)
    }

    #[must_use]
    pub const fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for U7 {
    type Error = MessageError;

    fn try_from(from: u8) -> MessageResult<Self> {
        Self::new(from)
    }
}

impl From<U7> for u8 {
    fn from(from: U7) -> Self {
        from.value()
    }
}

fn validate_data(data: &[u8]) -> MessageResult<()> {
    if let Some(&value) = data.iter().find(|&&byte| is_status_byte(byte)) {
        return Err(MessageError::DataOutOfRange { value });
    }
    Ok(())
}

/// Split a 14-bit value into LSB and MSB.
#[allow(clippy::cast_possible_truncation)]
fn u14_to_u7_pair(value: u16) -> MessageResult<(U7, U7)> {
    if value > 0x3fff {
        // The MSB is the first byte that does not fit
        return Err(MessageError::DataOutOfRange {
            value: (value >> 7).min(0xff) as u8,
        });
    }
    let (lsb, msb) = ((value & 0x7f) as u8, (value >> 7) as u8);
    Ok((U7(lsb), U7(msb)))
}

const fn u7_pair_to_u14(lsb: U7, msb: U7) -> u16 {
    ((msb.0 as u16) << 7) | lsb.0 as u16
}

/// MIDI channel in the range 1..=16.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{number}", number = self.number())
    }
}

impl Channel {
    pub const MIN: Self = Self(0);
    pub const MAX: Self = Self(15);

    /// Create a channel from its 1-based number.
    pub const fn new(number: u8) -> MessageResult<Self> {
        if number >= 1 && number <= 16 {
            Ok(Self(number - 1))
        } else {
            Err(MessageError::ChannelOutOfRange { channel: number })
        }
    }

    /// The channel encoded in the low nibble of a voice status byte.
    #[must_use]
    pub const fn from_status_byte(status: u8) -> Self {
        Self(status & 0x0f)
    }

    /// 1-based channel number
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0 + 1
    }

    /// 0-based channel index, as encoded on the wire
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }
}

/// Channel voice message types, encoded in the high nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum VoiceStatus {
    NoteOff = 0x8,
    NoteOn = 0x9,
    Aftertouch = 0xa,
    Control = 0xb,
    Program = 0xc,
    ChannelPressure = 0xd,
    PitchWheel = 0xe,
}

impl VoiceStatus {
    #[must_use]
    pub fn from_status_byte(status: u8) -> Option<(Self, Channel)> {
        let voice_status = Self::from_repr(status >> 4)?;
        Some((voice_status, Channel::from_status_byte(status)))
    }

    #[must_use]
    pub const fn status_byte(self, channel: Channel) -> u8 {
        ((self as u8) << 4) | channel.index()
    }

    #[must_use]
    pub const fn data_len(self) -> usize {
        match self {
            Self::Program | Self::ChannelPressure => 1,
            Self::NoteOff | Self::NoteOn | Self::Aftertouch | Self::Control | Self::PitchWheel => 2,
        }
    }
}

/// System common message types, excluding System Exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum SystemCommonStatus {
    TimeCodeQuarterFrame = 0xf1,
    SongPositionPointer = 0xf2,
    SongSelect = 0xf3,
    TuneRequest = 0xf6,
}

impl SystemCommonStatus {
    #[must_use]
    pub const fn status_byte(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn data_len(self) -> usize {
        match self {
            Self::TuneRequest => 0,
            Self::TimeCodeQuarterFrame | Self::SongSelect => 1,
            Self::SongPositionPointer => 2,
        }
    }
}

/// Single-byte system real-time messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, EnumIter, EnumCount)]
#[repr(u8)]
pub enum SystemRealTime {
    Clock = 0xf8,
    Start = 0xfa,
    Continue = 0xfb,
    Stop = 0xfc,
    ActiveSense = 0xfe,
    Reset = 0xff,
}

impl SystemRealTime {
    #[must_use]
    pub const fn status_byte(self) -> u8 {
        self as u8
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceMessage {
    status: VoiceStatus,
    channel: Channel,
    data1: U7,
    data2: Option<U7>,
}

impl VoiceMessage {
    pub fn new(status: VoiceStatus, channel: Channel, data: &[u8]) -> MessageResult<Self> {
        validate_data(data)?;
        match (status.data_len(), data) {
            (1, &[data1]) => Ok(Self::from_data_bytes(status, channel, data1, None)),
            (2, &[data1, data2]) => Ok(Self::from_data_bytes(status, channel, data1, Some(data2))),
            (expected, _) => Err(MessageError::DataLength {
                status: status.status_byte(channel),
                expected,
                actual: data.len(),
            }),
        }
    }

    pub(crate) const fn from_data_bytes(
        status: VoiceStatus,
        channel: Channel,
        data1: u8,
        data2: Option<u8>,
    ) -> Self {
        debug_assert!(data2.is_some() == (status.data_len() == 2));
        let data2 = match data2 {
            Some(data2) => Some(U7::from_data_byte(data2)),
            None => None,
        };
        Self {
            status,
            channel,
            data1: U7::from_data_byte(data1),
            data2,
        }
    }

    #[must_use]
    pub const fn note_on(channel: Channel, key: U7, velocity: U7) -> Self {
        Self::from_data_bytes(VoiceStatus::NoteOn, channel, key.0, Some(velocity.0))
    }

    #[must_use]
    pub const fn note_off(channel: Channel, key: U7, velocity: U7) -> Self {
        Self::from_data_bytes(VoiceStatus::NoteOff, channel, key.0, Some(velocity.0))
    }

    #[must_use]
    pub const fn control_change(channel: Channel, controller: U7, value: U7) -> Self {
        Self::from_data_bytes(VoiceStatus::Control, channel, controller.0, Some(value.0))
    }

    #[must_use]
    pub const fn program_change(channel: Channel, program: U7) -> Self {
        Self::from_data_bytes(VoiceStatus::Program, channel, program.0, None)
    }

    /// Pitch wheel with a 14-bit value, centered at 0x2000.
    pub fn pitch_wheel(channel: Channel, value: u16) -> MessageResult<Self> {
        let (lsb, msb) = u14_to_u7_pair(value)?;
        Ok(Self::from_data_bytes(
            VoiceStatus::PitchWheel,
            channel,
            lsb.0,
            Some(msb.0),
        ))
    }

    #[must_use]
    pub const fn status(&self) -> VoiceStatus {
        self.status
    }

    #[must_use]
    pub const fn channel(&self) -> Channel {
        self.channel
    }

    #[must_use]
    pub const fn data1(&self) -> U7 {
        self.data1
    }

    #[must_use]
    pub const fn data2(&self) -> Option<U7> {
        self.data2
    }

    /// The combined 14-bit value of a pitch wheel message.
    #[must_use]
    pub const fn pitch_wheel_value(&self) -> Option<u16> {
        match (self.status, self.data2) {
            (VoiceStatus::PitchWheel, Some(msb)) => Some(u7_pair_to_u14(self.data1, msb)),
            _ => None,
        }
    }

    #[must_use]
    pub const fn status_byte(&self) -> u8 {
        self.status.status_byte(self.channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SystemCommonMessage {
    status: SystemCommonStatus,
    data1: Option<U7>,
    data2: Option<U7>,
}

impl SystemCommonMessage {
    pub fn new(status: SystemCommonStatus, data: &[u8]) -> MessageResult<Self> {
        validate_data(data)?;
        if data.len() != status.data_len() {
            return Err(MessageError::DataLength {
                status: status.status_byte(),
                expected: status.data_len(),
                actual: data.len(),
            });
        }
        Ok(Self::from_data_bytes(status, data))
    }

    /// Only for data that has already been validated.
    pub(crate) fn from_data_bytes(status: SystemCommonStatus, data: &[u8]) -> Self {
        debug_assert_eq!(status.data_len(), data.len());
        Self {
            status,
            data1: data.first().copied().map(U7::from_data_byte),
            data2: data.get(1).copied().map(U7::from_data_byte),
        }
    }

    #[must_use]
    pub const fn time_code_quarter_frame(value: U7) -> Self {
        Self {
            status: SystemCommonStatus::TimeCodeQuarterFrame,
            data1: Some(value),
            data2: None,
        }
    }

    /// Song position in MIDI beats (14-bit).
    pub fn song_position(beats: u16) -> MessageResult<Self> {
        let (lsb, msb) = u14_to_u7_pair(beats)?;
        Ok(Self {
            status: SystemCommonStatus::SongPositionPointer,
            data1: Some(lsb),
            data2: Some(msb),
        })
    }

    #[must_use]
    pub const fn song_select(song: U7) -> Self {
        Self {
            status: SystemCommonStatus::SongSelect,
            data1: Some(song),
            data2: None,
        }
    }

    #[must_use]
    pub const fn tune_request() -> Self {
        Self {
            status: SystemCommonStatus::TuneRequest,
            data1: None,
            data2: None,
        }
    }

    #[must_use]
    pub const fn status(&self) -> SystemCommonStatus {
        self.status
    }

    #[must_use]
    pub const fn data1(&self) -> Option<U7> {
        self.data1
    }

    #[must_use]
    pub const fn data2(&self) -> Option<U7> {
        self.data2
    }

    #[must_use]
    pub const fn song_position_value(&self) -> Option<u16> {
        match (self.status, self.data1, self.data2) {
            (SystemCommonStatus::SongPositionPointer, Some(lsb), Some(msb)) => {
                Some(u7_pair_to_u14(lsb, msb))
            }
            _ => None,
        }
    }
}

/// System Exclusive message
///
/// The payload excludes both the leading [`SYSEX_START`] and
/// the trailing [`SYSEX_END`] byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SysExMessage {
    payload: Vec<u8>,
    received_with_terminator: bool,
}

impl SysExMessage {
    /// A complete, terminated message.
    pub fn new(payload: Vec<u8>) -> MessageResult<Self> {
        Self::from_parts(payload, true)
    }

    pub fn from_parts(payload: Vec<u8>, received_with_terminator: bool) -> MessageResult<Self> {
        validate_data(&payload)?;
        Ok(Self {
            payload,
            received_with_terminator,
        })
    }

    /// Only for accumulated data bytes.
    pub(crate) fn from_accumulated(payload: Vec<u8>, received_with_terminator: bool) -> Self {
        debug_assert!(validate_data(&payload).is_ok());
        Self {
            payload,
            received_with_terminator,
        }
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    #[must_use]
    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Whether an explicit [`SYSEX_END`] has been received.
    ///
    /// `false` if the message has been closed implicitly by a
    /// subsequent status byte or by a timeout.
    #[must_use]
    pub const fn received_with_terminator(&self) -> bool {
        self.received_with_terminator
    }

    /// Number of bytes when transmitted, including start and end byte.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.payload.len() + 2
    }

    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        out.reserve(self.serialized_len());
        out.push(SYSEX_START);
        out.extend_from_slice(&self.payload);
        out.push(SYSEX_END);
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        self.write_bytes(&mut bytes);
        bytes
    }
}

/// A maximal run of bytes that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidBytes {
    raw: Vec<u8>,
}

impl InvalidBytes {
    pub fn new(raw: Vec<u8>) -> MessageResult<Self> {
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }
        Ok(Self { raw })
    }

    pub(crate) fn from_raw(raw: Vec<u8>) -> Self {
        debug_assert!(!raw.is_empty());
        Self { raw }
    }

    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    #[must_use]
    pub fn into_raw(self) -> Vec<u8> {
        self.raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, EnumAsInner, From)]
pub enum MessageBody {
    Voice(VoiceMessage),
    SystemCommon(SystemCommonMessage),
    SystemRealTime(SystemRealTime),
    SystemExclusive(SysExMessage),
    Invalid(InvalidBytes),
}

impl MessageBody {
    #[must_use]
    pub fn status_byte(&self) -> u8 {
        match self {
            Self::Voice(voice) => voice.status_byte(),
            Self::SystemCommon(common) => common.status().status_byte(),
            Self::SystemRealTime(real_time) => real_time.status_byte(),
            Self::SystemExclusive(_) => SYSEX_START,
            // The first raw byte, which is not necessarily a status byte
            Self::Invalid(invalid) => invalid.raw[0],
        }
    }

    #[must_use]
    pub fn serialized_len(&self) -> usize {
        match self {
            Self::Voice(voice) => 1 + voice.status().data_len(),
            Self::SystemCommon(common) => 1 + common.status().data_len(),
            Self::SystemRealTime(_) => 1,
            Self::SystemExclusive(sysex) => sysex.serialized_len(),
            Self::Invalid(invalid) => invalid.raw.len(),
        }
    }

    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Self::Voice(voice) => {
                out.push(voice.status_byte());
                out.push(voice.data1.value());
                out.extend(voice.data2.map(U7::value));
            }
            Self::SystemCommon(common) => {
                out.push(common.status().status_byte());
                out.extend(common.data1.map(U7::value));
                out.extend(common.data2.map(U7::value));
            }
            Self::SystemRealTime(real_time) => {
                out.push(real_time.status_byte());
            }
            Self::SystemExclusive(sysex) => {
                sysex.write_bytes(out);
            }
            Self::Invalid(invalid) => {
                out.extend_from_slice(&invalid.raw);
            }
        }
    }
}

/// A time-stamped MIDI message
///
/// Immutable except for the source that might be attached after
/// decoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Message {
    ts: TimeStamp,
    source: PortIndex,
    body: MessageBody,
}

impl Message {
    #[must_use]
    pub fn new(ts: TimeStamp, body: impl Into<MessageBody>) -> Self {
        Self {
            ts,
            source: PortIndex::INVALID,
            body: body.into(),
        }
    }

    /// Decode a single, complete message from its raw bytes.
    ///
    /// Intended for transports that deliver delimited messages. The
    /// trailing [`SYSEX_END`] of System Exclusive messages is optional.
    /// Byte streams need to be decoded with a [`StreamParser`](crate::StreamParser).
    pub fn from_bytes(ts: TimeStamp, bytes: &[u8]) -> MessageResult<Self> {
        let Some((&status, data)) = bytes.split_first() else {
            return Err(MessageError::Empty);
        };
        let body: MessageBody = if let Some((voice_status, channel)) =
            VoiceStatus::from_status_byte(status)
        {
            VoiceMessage::new(voice_status, channel, data)?.into()
        } else if let Some(common_status) = SystemCommonStatus::from_repr(status) {
            SystemCommonMessage::new(common_status, data)?.into()
        } else if let Some(real_time) = SystemRealTime::from_repr(status) {
            if !data.is_empty() {
                return Err(MessageError::DataLength {
                    status,
                    expected: 0,
                    actual: data.len(),
                });
            }
            real_time.into()
        } else if status == SYSEX_START {
            let (payload, terminated) = match data.split_last() {
                Some((&SYSEX_END, payload)) => (payload, true),
                _ => (data, false),
            };
            SysExMessage::from_parts(payload.to_vec(), terminated)?.into()
        } else {
            return Err(MessageError::InvalidStatus { byte: status });
        };
        Ok(Self::new(ts, body))
    }

    #[must_use]
    pub const fn ts(&self) -> TimeStamp {
        self.ts
    }

    #[must_use]
    pub const fn source(&self) -> PortIndex {
        self.source
    }

    pub fn set_source(&mut self, source: PortIndex) {
        self.source = source;
    }

    #[must_use]
    pub fn with_source(mut self, source: PortIndex) -> Self {
        self.set_source(source);
        self
    }

    #[must_use]
    pub const fn body(&self) -> &MessageBody {
        &self.body
    }

    #[must_use]
    pub fn into_body(self) -> MessageBody {
        self.body
    }

    #[must_use]
    pub fn status_byte(&self) -> u8 {
        self.body.status_byte()
    }

    #[must_use]
    pub fn serialized_len(&self) -> usize {
        self.body.serialized_len()
    }

    pub fn write_bytes(&self, out: &mut Vec<u8>) {
        self.body.write_bytes(out);
    }

    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.serialized_len());
        self.write_bytes(&mut bytes);
        bytes
    }
}

#[cfg(test)]
mod tests;
