//! Property-based tests for the wire codec.
//!
//! Uses proptest to verify:
//! 1. Arbitrary input never panics the decoder (it returns `Err`
//!    gracefully).
//! 2. An encoded outbound chat payload always decodes back as chat, with
//!    every field intact, whether or not the server adds its `type` tag.
//! 3. Notification frames never decode as chat, whatever the `from`
//!    value.

use proptest::prelude::*;

use duochat_proto::identity::UserId;
use duochat_proto::message::ContentKind;
use duochat_proto::wire::{ChatPayload, InboundFrame, decode_inbound, encode_chat};

// --- Strategies ---

/// Usernames as the directory hands them out: non-empty, no exotic JSON.
fn arb_username() -> impl Strategy<Value = UserId> {
    "[a-zA-Z0-9_.-]{1,32}".prop_map(UserId::new)
}

/// Message bodies: anything printable, including JSON metacharacters.
fn arb_body() -> impl Strategy<Value = String> {
    "[^\u{0}]{1,512}"
}

fn arb_kind() -> impl Strategy<Value = ContentKind> {
    prop_oneof![Just(ContentKind::Text), Just(ContentKind::Image)]
}

fn arb_payload() -> impl Strategy<Value = ChatPayload> {
    (arb_username(), arb_username(), arb_body(), arb_kind()).prop_map(
        |(sender, receiver, message, kind)| ChatPayload::outbound(sender, receiver, message, kind),
    )
}

// --- Properties ---

proptest! {
    /// Arbitrary input never panics the decoder.
    #[test]
    fn arbitrary_input_never_panics(input in ".{0,512}") {
        // Ok or Err both fine; the property is "no panic".
        let _ = decode_inbound(&input);
    }

    /// Arbitrary JSON values never panic the decoder either, and anything
    /// that is not an object is rejected.
    #[test]
    fn arbitrary_json_scalars_are_rejected(n in any::<i64>()) {
        let result = decode_inbound(&n.to_string());
        prop_assert!(result.is_err());
    }

    /// An outbound payload decodes back as the same chat frame.
    #[test]
    fn outbound_payload_round_trips(payload in arb_payload()) {
        let frame = encode_chat(&payload).expect("encode should succeed");
        match decode_inbound(&frame) {
            Ok(InboundFrame::Chat(decoded)) => {
                prop_assert_eq!(decoded.sender, payload.sender);
                prop_assert_eq!(decoded.receiver, payload.receiver);
                prop_assert_eq!(decoded.message, payload.message);
                prop_assert_eq!(decoded.content_type, payload.content_type);
            }
            other => prop_assert!(false, "expected chat frame, got {:?}", other),
        }
    }

    /// The server's tagged reflection of a payload decodes to the same
    /// chat frame as the untagged original.
    #[test]
    fn tagged_and_untagged_chat_frames_decode_equivalently(payload in arb_payload()) {
        let untagged = encode_chat(&payload).expect("encode should succeed");
        let mut value: serde_json::Value =
            serde_json::from_str(&untagged).expect("payload is json");
        value["type"] = "chat".into();
        let tagged = value.to_string();

        let a = decode_inbound(&untagged).expect("untagged should decode");
        let b = decode_inbound(&tagged).expect("tagged should decode");
        prop_assert_eq!(a, b);
    }

    /// Notification frames decode as notifications, never as chat.
    #[test]
    fn notification_frames_never_become_chat(from in arb_username()) {
        let frame = serde_json::json!({"type": "notification", "from": from.as_str()})
            .to_string();
        match decode_inbound(&frame) {
            Ok(InboundFrame::Notification { from: decoded }) => {
                prop_assert_eq!(decoded, from);
            }
            other => prop_assert!(false, "expected notification, got {:?}", other),
        }
    }

    /// User-list broadcasts survive with their member order intact.
    #[test]
    fn user_list_preserves_members(users in prop::collection::vec(arb_username(), 0..16)) {
        let names: Vec<&str> = users.iter().map(UserId::as_str).collect();
        let frame = serde_json::json!({"type": "user_list", "users": names}).to_string();
        match decode_inbound(&frame) {
            Ok(InboundFrame::UserList { users: decoded }) => {
                prop_assert_eq!(decoded, users);
            }
            other => prop_assert!(false, "expected user_list, got {:?}", other),
        }
    }

    /// A frame missing required chat fields is an error, not a panic or a
    /// mangled message.
    #[test]
    fn partial_chat_frames_are_rejected(sender in arb_username()) {
        let frame = serde_json::json!({"sender": sender.as_str()}).to_string();
        prop_assert!(decode_inbound(&frame).is_err());
    }
}
