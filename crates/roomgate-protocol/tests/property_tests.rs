//! Property-based tests for the bus protocol.
//!
//! proptest generates random valid inputs and checks that framing and
//! payload invariants hold across the whole input space, not just the
//! handful of cases the unit tests spell out.

mod common;

use bytes::BytesMut;
use proptest::prelude::*;
use roomgate_protocol::{
    AckPayload, ActionPayload, BusCodec, BuzzerPattern, CommandKind, Frame, FrameKind,
};
use tokio_util::codec::{Decoder, Encoder};

/// Strategy for bus target characters (single uppercase letter).
fn valid_target() -> impl Strategy<Value = char> {
    prop::char::range('A', 'Z')
}

/// Strategy for frame payloads.
///
/// Anything line-safe is a legal payload, including `;` and JSON
/// punctuation. `\n` breaks framing and `\r` is stripped by the
/// decoder's CRLF tolerance, so both are excluded.
fn valid_payload() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^\\n\\r]{0,200}")
        .expect("failed to create payload regex strategy")
}

/// Strategy for device ids (1-20 lowercase alphanumeric with dashes).
fn valid_device_id() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9][a-z0-9-]{0,19}")
        .expect("failed to create device id regex strategy")
}

fn valid_frame_kind() -> impl Strategy<Value = FrameKind> {
    prop_oneof![
        Just(FrameKind::Event),
        Just(FrameKind::Action),
        Just(FrameKind::Status),
        Just(FrameKind::Display),
        Just(FrameKind::CommandAck),
    ]
}

/// Strategy covering every command variant, including payload-bearing
/// ones.
fn valid_command_kind() -> impl Strategy<Value = CommandKind> {
    prop_oneof![
        Just(CommandKind::DoorUnlock),
        Just(CommandKind::DoorLock),
        Just(CommandKind::LightsOn),
        Just(CommandKind::LightsOff),
        Just(CommandKind::AcOn),
        Just(CommandKind::AcOff),
        Just(CommandKind::OutletsOn),
        Just(CommandKind::OutletsOff),
        prop_oneof![
            Just(BuzzerPattern::Confirm),
            Just(BuzzerPattern::Goodbye),
            Just(BuzzerPattern::Emergency),
        ]
        .prop_map(|pattern| CommandKind::Buzzer { pattern }),
        prop::string::string_regex("[^\\n\\r]{0,64}")
            .expect("failed to create display text regex strategy")
            .prop_map(|text| CommandKind::DisplayText { text }),
    ]
}

proptest! {
    /// Property: any line-safe payload survives encode then decode
    /// unchanged, regardless of target and kind.
    #[test]
    fn prop_frame_roundtrip(
        target in valid_target(),
        kind in valid_frame_kind(),
        payload in valid_payload(),
    ) {
        let frame = Frame::new(common::addr(target), kind, payload.clone()).unwrap();
        let decoded = Frame::decode(&frame.encode()).unwrap();

        prop_assert_eq!(decoded.target(), common::addr(target));
        prop_assert_eq!(decoded.kind(), kind);
        prop_assert_eq!(decoded.payload(), payload);
    }

    /// Property: the encoded line is exactly one line with the
    /// structural prefix `<TARGET>;<TYPE>;`.
    #[test]
    fn prop_encoded_line_shape(
        target in valid_target(),
        kind in valid_frame_kind(),
        payload in valid_payload(),
    ) {
        let frame = Frame::new(common::addr(target), kind, payload).unwrap();
        let line = frame.encode();

        prop_assert!(line.ends_with('\n'));
        prop_assert_eq!(line.matches('\n').count(), 1);
        let prefix = format!("{target};{};", kind.as_str());
        prop_assert!(line.starts_with(&prefix));
    }

    /// Property: every command variant serializes to an action payload
    /// that parses back to the same structure.
    #[test]
    fn prop_action_payload_roundtrip(
        device_id in valid_device_id(),
        kind in valid_command_kind(),
    ) {
        let payload = ActionPayload {
            device_id: common::device(&device_id),
            kind: kind.clone(),
        };
        let parsed = ActionPayload::from_json(&payload.to_json().unwrap()).unwrap();

        prop_assert_eq!(parsed.device_id, common::device(&device_id));
        prop_assert_eq!(parsed.kind, kind);
    }

    /// Property: an ack built from a command always correlates with
    /// that command, and never with a different device.
    #[test]
    fn prop_ack_correlation(
        device_id in valid_device_id(),
        other_id in valid_device_id(),
        kind in valid_command_kind(),
        ok in any::<bool>(),
    ) {
        let ack = AckPayload {
            device_id: common::device(&device_id),
            command: kind.name().to_string(),
            ok,
        };

        prop_assert!(ack.matches(&common::device(&device_id), &kind));
        if other_id != device_id {
            prop_assert!(!ack.matches(&common::device(&other_id), &kind));
        }
    }

    /// Property: a batch of frames written through the codec decodes
    /// back in order with nothing left in the buffer.
    #[test]
    fn prop_codec_preserves_frame_boundaries(
        frames in prop::collection::vec(
            (valid_target(), valid_frame_kind(), valid_payload()),
            1..10,
        ),
    ) {
        let mut codec = BusCodec::new();
        let mut buffer = BytesMut::new();

        let frames: Vec<Frame> = frames
            .into_iter()
            .map(|(target, kind, payload)| {
                Frame::new(common::addr(target), kind, payload).unwrap()
            })
            .collect();

        for frame in &frames {
            codec.encode(frame.clone(), &mut buffer).unwrap();
        }

        for expected in &frames {
            let decoded = codec.decode(&mut buffer).unwrap().unwrap();
            prop_assert_eq!(&decoded, expected);
        }
        prop_assert!(codec.decode(&mut buffer).unwrap().is_none());
        prop_assert!(buffer.is_empty());
    }
}
