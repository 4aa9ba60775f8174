// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

use std::{
    borrow::Cow,
    ops::DerefMut,
    sync::{Arc, Mutex},
};

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OutputError {
    #[error("disconnected")]
    Disconnected,

    #[error("Send: {msg}")]
    Send { msg: Cow<'static, str> },
}

pub type OutputResult<T> = std::result::Result<T, OutputError>;

/// Destination for outgoing MIDI bytes.
///
/// Implemented by the transport. Each invocation transmits a contiguous
/// chunk of bytes that might not be aligned with message boundaries,
/// e.g. the chunks of a paced SysEx transmission.
pub trait MidiOutputConnection {
    fn send_midi_output(&mut self, output: &[u8]) -> OutputResult<()>;
}

impl<C> MidiOutputConnection for Box<C>
where
    C: MidiOutputConnection + ?Sized,
{
    fn send_midi_output(&mut self, output: &[u8]) -> OutputResult<()> {
        self.deref_mut().send_midi_output(output)
    }
}

/// Shared destination, e.g. for multiple concurrent senders.
impl<C> MidiOutputConnection for Arc<Mutex<C>>
where
    C: MidiOutputConnection + ?Sized,
{
    fn send_midi_output(&mut self, output: &[u8]) -> OutputResult<()> {
        let Ok(mut connection) = self.lock() else {
            return Err(OutputError::Disconnected);
        };
        connection.send_midi_output(output)
    }
}

/// Collects all output, e.g. for testing or for recording.
impl MidiOutputConnection for Vec<u8> {
    fn send_midi_output(&mut self, output: &[u8]) -> OutputResult<()> {
        self.extend_from_slice(output);
        Ok(())
    }
}
