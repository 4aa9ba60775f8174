// SPDX-FileCopyrightText: The midistream authors
// SPDX-License-Identifier: MPL-2.0

use strum::IntoEnumIterator as _;

use super::*;

fn channel(number: u8) -> Channel {
    Channel::new(number).unwrap()
}

fn u7(value: u8) -> U7 {
    U7::new(value).unwrap()
}

#[test]
fn u7_rejects_status_bytes() {
    assert_eq!(0x7f, U7::new(0x7f).unwrap().value());
    assert_eq!(
        Err(MessageError::DataOutOfRange { value: 0x80 }),
        U7::try_from(0x80)
    );
}

#[test]
fn channel_numbers() {
    assert_eq!(Channel::MIN, channel(1));
    assert_eq!(Channel::MAX, channel(16));
    assert_eq!(
        Err(MessageError::ChannelOutOfRange { channel: 0 }),
        Channel::new(0)
    );
    assert_eq!(
        Err(MessageError::ChannelOutOfRange { channel: 17 }),
        Channel::new(17)
    );
    assert_eq!("16", channel(16).to_string());
}

#[test]
fn voice_status_byte_encodes_channel() {
    let note_on = VoiceMessage::note_on(channel(1), u7(64), u7(127));
    assert_eq!(0x90, note_on.status_byte());
    let program = VoiceMessage::program_change(channel(10), u7(5));
    assert_eq!(0xc9, program.status_byte());
    assert_eq!(None, program.data2());
    for status in VoiceStatus::iter() {
        let status_byte = status.status_byte(channel(3));
        assert_eq!(
            Some((status, channel(3))),
            VoiceStatus::from_status_byte(status_byte)
        );
    }
}

#[test]
fn voice_message_rejects_wrong_data() {
    assert_eq!(
        Err(MessageError::DataOutOfRange { value: 0x80 }),
        VoiceMessage::new(VoiceStatus::NoteOn, channel(1), &[0x40, 0x80])
    );
    assert_eq!(
        Err(MessageError::DataLength {
            status: 0xc0,
            expected: 1,
            actual: 2,
        }),
        VoiceMessage::new(VoiceStatus::Program, channel(1), &[0x01, 0x02])
    );
    assert!(VoiceMessage::new(VoiceStatus::Control, channel(1), &[0x07]).is_err());
}

#[test]
fn pitch_wheel_14bit() {
    let center = VoiceMessage::pitch_wheel(channel(1), 0x2000).unwrap();
    assert_eq!(U7::MIN, center.data1());
    assert_eq!(Some(u7(0x40)), center.data2());
    assert_eq!(Some(0x2000), center.pitch_wheel_value());
    assert!(VoiceMessage::pitch_wheel(channel(1), 0x4000).is_err());
    assert_eq!(
        None,
        VoiceMessage::note_off(channel(1), u7(1), u7(2)).pitch_wheel_value()
    );
}

#[test]
fn system_common_data_len() {
    assert_eq!(
        Some(0x3fff),
        SystemCommonMessage::song_position(0x3fff)
            .unwrap()
            .song_position_value()
    );
    assert!(SystemCommonMessage::new(SystemCommonStatus::TuneRequest, &[0x00]).is_err());
    assert!(SystemCommonMessage::new(SystemCommonStatus::SongSelect, &[0x90]).is_err());
    assert_eq!(
        SystemCommonMessage::song_select(u7(3)),
        SystemCommonMessage::new(SystemCommonStatus::SongSelect, &[0x03]).unwrap()
    );
}

#[test]
fn sysex_rejects_status_bytes_in_payload() {
    assert!(SysExMessage::new(vec![0x01, 0xf7]).is_err());
    let sysex = SysExMessage::from_parts(vec![0x01, 0x02], false).unwrap();
    assert!(!sysex.received_with_terminator());
    assert_eq!(vec![0xf0, 0x01, 0x02, 0xf7], sysex.to_bytes());
}

#[test]
fn invalid_bytes_must_not_be_empty() {
    assert_eq!(Err(MessageError::Empty), InvalidBytes::new(Vec::new()));
    let message = Message::new(TimeStamp::ZERO, InvalidBytes::new(vec![0xf4]).unwrap());
    assert_eq!(0xf4, message.status_byte());
    assert_eq!(vec![0xf4], message.to_bytes());
}

#[test]
fn message_serialization() {
    let ts = TimeStamp::from_micros(1);
    let message = Message::new(ts, SystemRealTime::Clock);
    assert_eq!(1, message.serialized_len());
    assert_eq!(vec![0xf8], message.to_bytes());

    let message = Message::new(ts, SystemCommonMessage::tune_request());
    assert_eq!(vec![0xf6], message.to_bytes());

    let message = Message::new(ts, VoiceMessage::control_change(channel(2), u7(7), u7(100)));
    assert_eq!(vec![0xb1, 0x07, 0x64], message.to_bytes());
    assert_eq!(message.serialized_len(), message.to_bytes().len());
}

#[test]
fn message_from_bytes() {
    let ts = TimeStamp::from_micros(42);
    let message = Message::from_bytes(ts, &[0x92, 0x3c, 0x40]).unwrap();
    assert_eq!(ts, message.ts());
    let voice = message.body().as_voice().unwrap();
    assert_eq!(VoiceStatus::NoteOn, voice.status());
    assert_eq!(3, voice.channel().number());

    let message = Message::from_bytes(ts, &[0xf0, 0x7e, 0x7f]).unwrap();
    let sysex = message.body().as_system_exclusive().unwrap();
    assert_eq!(&[0x7e, 0x7f], sysex.payload());
    assert!(!sysex.received_with_terminator());

    let message = Message::from_bytes(ts, &[0xf0, 0x7e, 0xf7]).unwrap();
    assert!(message
        .body()
        .as_system_exclusive()
        .unwrap()
        .received_with_terminator());

    assert_eq!(
        Err(MessageError::InvalidStatus { byte: 0xf4 }),
        Message::from_bytes(ts, &[0xf4])
    );
    assert_eq!(
        Err(MessageError::InvalidStatus { byte: 0x40 }),
        Message::from_bytes(ts, &[0x40])
    );
    assert!(Message::from_bytes(ts, &[0xf8, 0x00]).is_err());
    assert_eq!(Err(MessageError::Empty), Message::from_bytes(ts, &[]));
}

#[test]
fn source_is_attached_after_construction() {
    let source = crate::PortIndexGenerator::new().next();
    let message = Message::new(TimeStamp::ZERO, SystemRealTime::Start);
    assert!(!message.source().is_valid());
    let message = message.with_source(source);
    assert_eq!(source, message.source());
}
