//! Property-based tests for the envelope codec
//!
//! - encoding then decoding any well-formed envelope yields the same envelope
//! - decoding never panics on arbitrary input

use gatemcp_protocol::{Envelope, JsonRpcError, RequestId};
use proptest::prelude::*;
use serde_json::Value;

// =============================================================================
// STRATEGIES
// =============================================================================

/// JSON values without floats (float text parsing is not bit-exact).
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 _\\-]{0,16}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn params_strategy() -> impl Strategy<Value = Option<Value>> {
    prop_oneof![
        Just(None),
        prop::collection::btree_map("[a-z]{1,8}", json_value_strategy(), 0..4)
            .prop_map(|m| Some(Value::Object(m.into_iter().collect()))),
        prop::collection::vec(json_value_strategy(), 0..4).prop_map(|v| Some(Value::Array(v))),
    ]
}

fn request_id_strategy() -> impl Strategy<Value = RequestId> {
    prop_oneof![
        any::<i64>().prop_map(RequestId::Number),
        "[a-zA-Z0-9\\-]{1,24}".prop_map(RequestId::String),
    ]
}

fn error_strategy() -> impl Strategy<Value = JsonRpcError> {
    (
        -33000i32..1000,
        "[a-zA-Z ]{0,32}",
        prop::option::of(json_value_strategy().prop_filter("data null collapses", |v| !v.is_null())),
    )
        .prop_map(|(code, message, data)| JsonRpcError {
            code,
            message,
            data,
        })
}

fn envelope_strategy() -> impl Strategy<Value = Envelope> {
    prop_oneof![
        (request_id_strategy(), "[a-z/_]{1,24}", params_strategy())
            .prop_map(|(id, method, params)| Envelope::request(id, method, params)),
        ("[a-z/_]{1,24}", params_strategy())
            .prop_map(|(method, params)| Envelope::notification(method, params)),
        (request_id_strategy(), json_value_strategy())
            .prop_map(|(id, result)| Envelope::success(id, result)),
        (prop::option::of(request_id_strategy()), error_strategy())
            .prop_map(|(id, error)| Envelope::error(id, error)),
    ]
}

// =============================================================================
// PROPERTIES
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property: decode(encode(e)) == e
    #[test]
    fn prop_encode_decode_identity(envelope in envelope_strategy()) {
        let bytes = envelope.encode().unwrap();
        let decoded = Envelope::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, envelope);
    }

    /// Property: the correlation id survives the wire
    #[test]
    fn prop_id_preserved(envelope in envelope_strategy()) {
        let text = envelope.encode_string().unwrap();
        let decoded = Envelope::decode_str(&text).unwrap();
        prop_assert_eq!(decoded.id(), envelope.id());
        prop_assert_eq!(decoded.kind(), envelope.kind());
    }

    /// Property: arbitrary bytes are rejected or accepted, never panic
    #[test]
    fn prop_decode_total(bytes in prop::collection::vec(any::<u8>(), 0..128)) {
        let _ = Envelope::decode(&bytes);
    }
}
