// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

//! Decodes hex encoded MIDI bytes from stdin, one block per line.
//!
//! The optional argument sets the maximum frame size for packing
//! the decoded messages at the end of the input.

use std::io::{stdin, BufRead as _};

use midistream::{
    pack, Message, ParserConfig, PortIndexGenerator, SinkFn, StreamParser, TimeStamp,
    DEFAULT_MAX_FRAME_SIZE,
};

fn parse_hex_line(line: &str) -> anyhow::Result<Vec<u8>> {
    line.split_whitespace()
        .map(|token| {
            let digits = token.trim_start_matches("0x");
            u8::from_str_radix(digits, 16)
                .map_err(|err| anyhow::anyhow!("invalid byte {token:?}: {err}"))
        })
        .collect()
}

fn main() {
    pretty_env_logger::init();
    match run() {
        Ok(()) => (),
        Err(err) => eprintln!("Error: {err}"),
    }
}

fn run() -> anyhow::Result<()> {
    let max_frame_size = std::env::args()
        .nth(1)
        .map(|arg| arg.parse())
        .transpose()?
        .unwrap_or(DEFAULT_MAX_FRAME_SIZE);
    let port_index_generator = PortIndexGenerator::new();
    let mut parser = StreamParser::new(ParserConfig::default());
    parser.set_source(port_index_generator.next());
    let mut messages = Vec::new();
    for line in stdin().lock().lines() {
        let input = parse_hex_line(&line?)?;
        if input.is_empty() {
            continue;
        }
        let ts = TimeStamp::now();
        let mut sink = SinkFn(|message: Message| {
            println!(
                "{ts} (port {source}): {body:?}",
                ts = message.ts(),
                source = message.source(),
                body = message.body()
            );
            messages.push(message);
        });
        parser.feed_block(ts, &input, &mut sink);
    }
    if parser.expire_sysex(&mut messages) {
        println!("Closed truncated SysEx at end of input");
    }
    let frames = pack(&messages, max_frame_size)?;
    for (index, frame) in frames.iter().enumerate() {
        println!(
            "Frame #{index}: {count} entries, {size} bytes",
            count = frame.len(),
            size = frame.serialized_size(),
        );
    }
    Ok(())
}
