// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Packing of messages into size-limited frames for transmission
//!
//! Encoded frame layout, all integers in little endian:
//!
//! ```text
//! frame header:  entry count (u32), total size in bytes (u32)
//! entry header:  time stamp in µs (u64), data length (u16)
//! entry body:    data bytes, zero padding up to a multiple of 4 bytes
//! ```

use std::mem;

use thiserror::Error;

use crate::{Message, TimeStamp};

pub const DEFAULT_MAX_FRAME_SIZE: usize = 65536;

pub const FRAME_HEADER_SIZE: usize = 8;

pub const ENTRY_HEADER_SIZE: usize = 10;

pub const ENTRY_ALIGNMENT: usize = 4;

/// Smallest frame that is able to hold a single byte of data.
pub const MIN_MAX_FRAME_SIZE: usize = FRAME_HEADER_SIZE + entry_size(1);

const MAX_ENTRY_DATA_LEN: usize = u16::MAX as usize;

const fn align_entry(size: usize) -> usize {
    size.div_ceil(ENTRY_ALIGNMENT) * ENTRY_ALIGNMENT
}

const fn entry_size(data_len: usize) -> usize {
    align_entry(ENTRY_HEADER_SIZE + data_len)
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid maximum frame size: {max_frame_size} byte(s)")]
    InvalidFrameSize { max_frame_size: usize },

    #[error("truncated frame: {expected} byte(s) expected but only {actual} available")]
    Truncated { expected: usize, actual: usize },

    #[error("frame size mismatch: {declared} byte(s) declared but {actual} byte(s) found")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("entry count mismatch: {declared} declared but {actual} found")]
    EntryCountMismatch { declared: usize, actual: usize },
}

pub type FrameResult<T> = std::result::Result<T, FrameError>;

/// Time-stamped chunk of MIDI bytes
///
/// Either a complete message or a fragment of an oversized message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameEntry {
    ts: TimeStamp,
    data: Vec<u8>,
}

impl FrameEntry {
    #[must_use]
    pub const fn ts(&self) -> TimeStamp {
        self.ts
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }

    /// Encoded size including the header and padding.
    #[must_use]
    pub fn serialized_size(&self) -> usize {
        entry_size(self.data.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    entries: Vec<FrameEntry>,
    size: usize,
}

impl Default for Frame {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            size: FRAME_HEADER_SIZE,
        }
    }
}

impl Frame {
    #[must_use]
    pub fn entries(&self) -> &[FrameEntry] {
        &self.entries
    }

    #[must_use]
    pub fn into_entries(self) -> Vec<FrameEntry> {
        self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Encoded size including all headers and padding.
    #[must_use]
    pub const fn serialized_size(&self) -> usize {
        self.size
    }

    /// All data bytes of all entries in order.
    pub fn data_bytes(&self) -> impl Iterator<Item = u8> + '_ {
        self.entries
            .iter()
            .flat_map(|entry| entry.data.iter().copied())
    }

    fn fits(&self, data_len: usize, max_frame_size: usize) -> bool {
        data_len <= MAX_ENTRY_DATA_LEN && self.size + entry_size(data_len) <= max_frame_size
    }

    fn push(&mut self, ts: TimeStamp, data: &[u8]) {
        debug_assert!(data.len() <= MAX_ENTRY_DATA_LEN);
        self.size += entry_size(data.len());
        self.entries.push(FrameEntry {
            ts,
            data: data.to_vec(),
        });
    }

    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        // Packed frames never exceed the maximum frame size that fits into u32
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.size as u32).to_le_bytes());
        for FrameEntry { ts, data } in &self.entries {
            out.extend_from_slice(&ts.to_micros().to_le_bytes());
            out.extend_from_slice(&(data.len() as u16).to_le_bytes());
            out.extend_from_slice(data);
            out.resize(align_entry(out.len()), 0);
        }
        debug_assert_eq!(self.size, out.len());
        out
    }

    pub fn decode(bytes: &[u8]) -> FrameResult<Self> {
        let declared_count = u32::from_le_bytes(read_array(bytes, 0)?) as usize;
        let declared_size = u32::from_le_bytes(read_array(bytes, 4)?) as usize;
        if declared_size != bytes.len() {
            return Err(FrameError::SizeMismatch {
                declared: declared_size,
                actual: bytes.len(),
            });
        }
        let mut frame = Self::default();
        while frame.size < bytes.len() {
            let offset = frame.size;
            let ts = TimeStamp::from_micros(u64::from_le_bytes(read_array(bytes, offset)?));
            let data_len = u16::from_le_bytes(read_array(bytes, offset + 8)?) as usize;
            let data_start = offset + ENTRY_HEADER_SIZE;
            let entry_end = offset + entry_size(data_len);
            if entry_end > bytes.len() {
                return Err(FrameError::Truncated {
                    expected: entry_end,
                    actual: bytes.len(),
                });
            }
            frame.push(ts, &bytes[data_start..data_start + data_len]);
        }
        if frame.len() != declared_count {
            return Err(FrameError::EntryCountMismatch {
                declared: declared_count,
                actual: frame.len(),
            });
        }
        Ok(frame)
    }
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize) -> FrameResult<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(FrameError::Truncated {
            expected: offset + N,
            actual: bytes.len(),
        })
}

/// Origin of the entry time stamps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimestampPolicy {
    /// The time stamp of the message.
    #[default]
    Original,
    /// The current time while packing.
    ///
    /// Uses [`TimeStamp::now()`] that counts from a process-local origin.
    /// This timebase is unrelated to the time stamps that the caller
    /// assigned to the messages. Don't mix frames packed with different
    /// policies.
    Now,
}

/// Packs messages into frames of limited size.
///
/// Messages are kept in order and never reordered for a better fit.
/// Messages that do not even fit into an empty frame are split into
/// multiple entries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packetizer {
    max_frame_size: usize,
    timestamps: TimestampPolicy,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            timestamps: TimestampPolicy::Original,
        }
    }
}

impl Packetizer {
    /// The maximum frame size includes all headers.
    pub fn new(max_frame_size: usize) -> FrameResult<Self> {
        if !(MIN_MAX_FRAME_SIZE..=u32::MAX as usize).contains(&max_frame_size) {
            return Err(FrameError::InvalidFrameSize { max_frame_size });
        }
        Ok(Self {
            max_frame_size,
            ..Default::default()
        })
    }

    #[must_use]
    pub const fn with_timestamps(mut self, timestamps: TimestampPolicy) -> Self {
        self.timestamps = timestamps;
        self
    }

    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    #[must_use]
    pub const fn timestamps(&self) -> TimestampPolicy {
        self.timestamps
    }

    /// Maximum number of data bytes of a single entry in an empty frame.
    #[must_use]
    pub const fn max_entry_data_len(&self) -> usize {
        let available = (self.max_frame_size - FRAME_HEADER_SIZE) / ENTRY_ALIGNMENT
            * ENTRY_ALIGNMENT
            - ENTRY_HEADER_SIZE;
        if available < MAX_ENTRY_DATA_LEN {
            available
        } else {
            MAX_ENTRY_DATA_LEN
        }
    }

    #[must_use]
    pub fn pack<'m>(&self, messages: impl IntoIterator<Item = &'m Message>) -> Vec<Frame> {
        let mut frames = Vec::new();
        let mut frame = Frame::default();
        let mut bytes = Vec::new();
        for message in messages {
            bytes.clear();
            message.write_bytes(&mut bytes);
            let ts = match self.timestamps {
                TimestampPolicy::Original => message.ts(),
                TimestampPolicy::Now => TimeStamp::now(),
            };
            if !frame.fits(bytes.len(), self.max_frame_size) && !frame.is_empty() {
                flush_frame(&mut frames, &mut frame);
            }
            if frame.fits(bytes.len(), self.max_frame_size) {
                frame.push(ts, &bytes);
                continue;
            }
            debug_assert!(frame.is_empty());
            let max_chunk_len = self.max_entry_data_len();
            log::trace!(
                "Splitting message with {len} byte(s) into chunks of {max_chunk_len} byte(s)",
                len = bytes.len()
            );
            for chunk in bytes.chunks(max_chunk_len) {
                frame.push(ts, chunk);
                if chunk.len() == max_chunk_len {
                    flush_frame(&mut frames, &mut frame);
                }
            }
        }
        if !frame.is_empty() {
            flush_frame(&mut frames, &mut frame);
        }
        frames
    }
}

fn flush_frame(frames: &mut Vec<Frame>, frame: &mut Frame) {
    let frame = mem::take(frame);
    log::debug!(
        "Packed frame with {count} entries and {size} byte(s)",
        count = frame.len(),
        size = frame.serialized_size()
    );
    frames.push(frame);
}

/// Pack messages with the original time stamps.
///
/// See also [`Packetizer::pack()`].
pub fn pack<'m>(
    messages: impl IntoIterator<Item = &'m Message>,
    max_frame_size: usize,
) -> FrameResult<Vec<Frame>> {
    Packetizer::new(max_frame_size).map(|packetizer| packetizer.pack(messages))
}
