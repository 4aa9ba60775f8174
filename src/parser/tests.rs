// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

use super::*;
use crate::{MessageBody, U7};

const TS: TimeStamp = TimeStamp::from_micros(1_000);

fn note_on(channel: u8, key: u8, velocity: u8) -> MessageBody {
    VoiceMessage::note_on(
        Channel::new(channel).unwrap(),
        U7::new(key).unwrap(),
        U7::new(velocity).unwrap(),
    )
    .into()
}

fn sysex(payload: &[u8], received_with_terminator: bool) -> MessageBody {
    SysExMessage::from_parts(payload.to_vec(), received_with_terminator)
        .unwrap()
        .into()
}

fn invalid(raw: &[u8]) -> MessageBody {
    InvalidBytes::new(raw.to_vec()).unwrap().into()
}

fn bodies(messages: Vec<Message>) -> Vec<MessageBody> {
    messages.into_iter().map(Message::into_body).collect()
}

fn parse(input: &[u8]) -> Vec<MessageBody> {
    bodies(StreamParser::default().feed_all(TS, input))
}

#[derive(Debug, Default)]
struct RecordingSink {
    messages: Vec<Message>,
    progress: Vec<usize>,
}

impl MessageSink for RecordingSink {
    fn sink_message(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn sysex_progress(&mut self, _ts: TimeStamp, len: usize) {
        self.progress.push(len);
    }
}

#[test]
fn note_on_channel_1() {
    let messages = StreamParser::default().feed_all(TS, &[0x90, 0x40, 0x7f]);
    assert_eq!(1, messages.len());
    let voice = messages[0].body().as_voice().unwrap();
    assert_eq!(VoiceStatus::NoteOn, voice.status());
    assert_eq!(1, voice.channel().number());
    assert_eq!(64, voice.data1().value());
    assert_eq!(Some(127), voice.data2().map(U7::value));
    assert_eq!(TS, messages[0].ts());
}

#[test]
fn terminated_sysex() {
    assert_eq!(
        vec![sysex(&[0x01, 0x02], true)],
        parse(&[0xf0, 0x01, 0x02, 0xf7])
    );
}

#[test]
fn real_time_interleaved_with_voice_message() {
    assert_eq!(
        vec![SystemRealTime::Clock.into(), note_on(1, 0x40, 0x7f)],
        parse(&[0x90, 0x40, 0xf8, 0x7f])
    );
}

#[test]
fn real_time_interleaved_with_sysex() {
    assert_eq!(
        vec![
            SystemRealTime::Start.into(),
            SystemRealTime::Stop.into(),
            sysex(&[0x01, 0x02], true)
        ],
        parse(&[0xf0, 0x01, 0xfa, 0x02, 0xfc, 0xf7])
    );
}

#[test]
fn invalid_status_followed_by_note_on() {
    assert_eq!(
        vec![invalid(&[0xf4]), note_on(1, 0x40, 0x7f)],
        parse(&[0xf4, 0x90, 0x40, 0x7f])
    );
}

#[test]
fn contiguous_invalid_bytes_are_reported_once() {
    assert_eq!(
        vec![invalid(&[0x01, 0xf5, 0xf9, 0x02]), note_on(2, 0x3c, 0x00)],
        parse(&[0x01, 0xf5, 0xf9, 0x02, 0x91, 0x3c, 0x00])
    );
}

#[test]
fn invalid_run_is_closed_at_end_of_block() {
    let mut parser = StreamParser::default();
    assert_eq!(vec![invalid(&[0x01])], bodies(parser.feed(TS, 0x01)));
    assert_eq!(vec![invalid(&[0x02])], bodies(parser.feed(TS, 0x02)));
}

#[test]
fn sysex_end_without_sysex_is_invalid() {
    assert_eq!(vec![invalid(&[0xf7])], parse(&[0xf7]));
}

#[test]
fn invalid_bytes_are_dropped_if_not_collected() {
    let mut parser = StreamParser::new(ParserConfig {
        collect_invalid: false,
        ..Default::default()
    });
    assert_eq!(
        vec![note_on(1, 0x40, 0x7f)],
        bodies(parser.feed_all(TS, &[0xf7, 0x12, 0xf4, 0x90, 0x40, 0x7f, 0x7f]))
    );
}

#[test]
fn undefined_real_time_does_not_disturb_pending_message() {
    assert_eq!(
        vec![invalid(&[0xfd]), note_on(1, 0x40, 0x7f)],
        parse(&[0x90, 0x40, 0xfd, 0x7f])
    );
}

#[test]
fn superseded_message_is_invalid() {
    assert_eq!(
        vec![invalid(&[0x90, 0x40]), note_on(1, 0x41, 0x7f)],
        parse(&[0x90, 0x40, 0x90, 0x41, 0x7f])
    );
    assert_eq!(vec![invalid(&[0xb0, 0xf4])], parse(&[0xb0, 0xf4]));
}

#[test]
fn superseded_message_keeps_arrival_order_of_invalid_bytes() {
    assert_eq!(
        vec![
            invalid(&[0x90, 0x40, 0xf9]),
            VoiceMessage::note_off(Channel::MIN, U7::new(0x40).unwrap(), U7::MIN).into(),
        ],
        parse(&[0x90, 0x40, 0xf9, 0x80, 0x40, 0x00])
    );
    assert_eq!(
        vec![invalid(&[0x90, 0x40, 0xf9, 0xf4])],
        parse(&[0x90, 0x40, 0xf9, 0xf4])
    );
    assert_eq!(
        vec![invalid(&[0x90, 0x40, 0xfd, 0xf7])],
        parse(&[0x90, 0x40, 0xfd, 0xf7])
    );
}

#[test]
fn no_running_status() {
    assert_eq!(
        vec![note_on(1, 0x40, 0x7f), invalid(&[0x41, 0x7f])],
        parse(&[0x90, 0x40, 0x7f, 0x41, 0x7f])
    );
}

#[test]
fn status_byte_closes_sysex() {
    assert_eq!(
        vec![sysex(&[0x01], false), note_on(1, 0x40, 0x7f)],
        parse(&[0xf0, 0x01, 0x90, 0x40, 0x7f])
    );
    assert_eq!(
        vec![sysex(&[0x01], false), sysex(&[0x02], true)],
        parse(&[0xf0, 0x01, 0xf0, 0x02, 0xf7])
    );
    assert_eq!(
        vec![sysex(&[], false), invalid(&[0xf5])],
        parse(&[0xf0, 0xf5])
    );
}

#[test]
fn invalid_bytes_during_sysex_precede_closed_sysex() {
    assert_eq!(
        vec![invalid(&[0xf9]), sysex(&[0x01], false), invalid(&[0xf4])],
        parse(&[0xf0, 0x01, 0xf9, 0xf4])
    );
    assert_eq!(
        vec![invalid(&[0xf9]), sysex(&[0x01], false), note_on(1, 0x40, 0x7f)],
        parse(&[0xf0, 0x01, 0xf9, 0x90, 0x40, 0x7f])
    );
}

#[test]
fn system_common_messages() {
    assert_eq!(
        vec![
            MessageBody::from(SystemCommonMessage::tune_request()),
            SystemCommonMessage::song_position(0x0081).unwrap().into(),
            SystemCommonMessage::song_select(U7::new(5).unwrap()).into(),
            SystemCommonMessage::time_code_quarter_frame(U7::new(0x21).unwrap()).into(),
        ],
        parse(&[0xf6, 0xf2, 0x01, 0x01, 0xf3, 0x05, 0xf1, 0x21])
    );
}

#[test]
fn tune_request_during_sysex() {
    assert_eq!(
        vec![
            sysex(&[0x01], false),
            SystemCommonMessage::tune_request().into()
        ],
        parse(&[0xf0, 0x01, 0xf6])
    );
}

#[test]
fn messages_spanning_blocks() {
    let mut parser = StreamParser::default();
    let first = TimeStamp::from_micros(1);
    let second = TimeStamp::from_micros(2);
    assert!(parser.feed_all(first, &[0xf0, 0x01]).is_empty());
    assert!(parser.feed_all(first, &[0xc3]).len() == 1);
    let messages = parser.feed_all(second, &[0x05, 0xf0, 0x02]);
    assert_eq!(1, messages.len());
    // Completed messages carry the time stamp of the completing block
    assert_eq!(second, messages[0].ts());
    let messages = parser.feed_all(TS, &[0x03, 0xf7]);
    assert_eq!(vec![sysex(&[0x02, 0x03], true)], bodies(messages.clone()));
    // SysEx messages carry the time stamp of their start
    assert_eq!(second, messages[0].ts());
}

#[test]
fn byte_by_byte_equals_block() {
    let input = [
        0xf8, 0x90, 0x40, 0x7f, 0xf0, 0x01, 0xfe, 0x02, 0x03, 0xf7, 0xe0, 0x00, 0x40, 0xf2,
        0x10, 0xfa, 0x20, 0xc0, 0x01, 0xf0, 0x7e, 0xd2, 0x10, 0xf6,
    ];
    let mut parser = StreamParser::default();
    let byte_by_byte = input
        .iter()
        .flat_map(|&byte| parser.feed(TS, byte))
        .collect::<Vec<_>>();
    let block = StreamParser::default().feed_all(TS, &input);
    assert_eq!(block, byte_by_byte);
    assert_eq!(11, block.len());
}

#[test]
fn cancel_sysex() {
    let mut parser = StreamParser::default();
    assert!(parser.feed_all(TS, &[0xf0, 0x01]).is_empty());
    assert_eq!(Some(1), parser.sysex_len());
    assert!(parser.cancel_sysex());
    assert!(!parser.cancel_sysex());
    assert!(!parser.is_sysex_in_progress());
    // Subsequent data bytes are invalid
    assert_eq!(vec![invalid(&[0x02])], bodies(parser.feed_all(TS, &[0x02])));
}

#[test]
fn cancel_sysex_does_not_affect_pending_message() {
    let mut parser = StreamParser::default();
    assert!(parser.feed_all(TS, &[0x80, 0x40]).is_empty());
    assert!(!parser.cancel_sysex());
    assert_eq!(
        vec![MessageBody::from(VoiceMessage::note_off(
            Channel::MIN,
            U7::new(0x40).unwrap(),
            U7::MIN
        ))],
        bodies(parser.feed_all(TS, &[0x00]))
    );
}

#[test]
fn expire_sysex() {
    let mut parser = StreamParser::default();
    let mut messages: Vec<Message> = Vec::new();
    parser.feed_block(TS, &[0xf0, 0x01, 0x02], &mut messages);
    assert!(messages.is_empty());
    assert!(parser.expire_sysex(&mut messages));
    assert!(!parser.expire_sysex(&mut messages));
    assert_eq!(vec![sysex(&[0x01, 0x02], false)], bodies(messages));
}

#[test]
fn sysex_progress() {
    let mut parser = StreamParser::default();
    let mut sink = RecordingSink::default();
    parser.feed_block(TS, &[0xf0], &mut sink);
    parser.feed_block(TS, &[0x00; 600], &mut sink);
    parser.feed_block(TS, &[0xf7], &mut sink);
    assert_eq!(vec![256, 512], sink.progress);
    assert_eq!(1, sink.messages.len());
    assert_eq!(
        600,
        sink.messages[0]
            .body()
            .as_system_exclusive()
            .unwrap()
            .payload()
            .len()
    );
}

#[test]
fn source_is_attached() {
    let source = crate::PortIndexGenerator::new().next();
    let mut parser = StreamParser::default();
    parser.set_source(source);
    let messages = parser.feed_all(TS, &[0xf4, 0xff]);
    assert_eq!(2, messages.len());
    assert!(messages.iter().all(|message| message.source() == source));
}

#[test]
fn reset_discards_incomplete_messages() {
    let mut parser = StreamParser::default();
    assert!(parser.feed_all(TS, &[0x90, 0x40]).is_empty());
    parser.reset();
    assert_eq!(vec![invalid(&[0x7f])], bodies(parser.feed_all(TS, &[0x7f])));
}

#[test]
fn step_outcomes() {
    let mut parser = StreamParser::default();
    let mut sink: Vec<Message> = Vec::new();
    assert_eq!(ByteOutcome::Invalid, parser.step(TS, 0x40, &mut sink));
    assert_eq!(ByteOutcome::Continue, parser.step(TS, 0xb0, &mut sink));
    assert_eq!(ByteOutcome::Continue, parser.step(TS, 0x07, &mut sink));
    let ByteOutcome::Emit(message) = parser.step(TS, 0x64, &mut sink) else {
        panic!("expected message");
    };
    assert_eq!(vec![0xb0, 0x07, 0x64], message.to_bytes());
    assert!(sink.is_empty());
}
