//! Property tests: argument and result values survive the frame codec.

use bytes::BytesMut;
use labnet_rpc::{Arguments, FrameCodec, Message, Request, Response};
use proptest::prelude::*;
use serde_json::{Map, Value, json};
use tokio_util::codec::{Decoder, Encoder};

fn arb_finite_f64() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("must be finite", |x| x.is_finite())
}

fn arb_key() -> impl Strategy<Value = String> {
    proptest::string::string_regex("[a-zA-Z_][a-zA-Z0-9_]{0,12}").unwrap()
}

fn arb_leaf() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        arb_finite_f64().prop_map(Value::from),
        proptest::string::string_regex("[a-zA-Z0-9_\\-. ]{0,40}")
            .unwrap()
            .prop_map(Value::String),
    ]
}

fn arb_value() -> impl Strategy<Value = Value> {
    arb_leaf().prop_recursive(4, 64, 8, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
            proptest::collection::btree_map(arb_key(), inner, 0..8)
                .prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
        ]
    })
}

fn roundtrip(msg: Message) -> Message {
    let mut codec = FrameCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(msg, &mut buf).unwrap();
    codec.decode(&mut buf).unwrap().unwrap()
}

proptest! {
    #[test]
    fn result_values_roundtrip(value in arb_value()) {
        let msg = Message::Response(Response::success(1.into(), value.clone()));
        let Message::Response(resp) = roundtrip(msg) else {
            panic!("Expected Response");
        };
        let decoded = resp.into_outcome().unwrap();
        prop_assert_eq!(value, decoded);
    }

    #[test]
    fn positional_arguments_roundtrip(values in proptest::collection::vec(arb_value(), 0..6)) {
        let msg = Message::Request(Request::new("op", Arguments::positional(values.clone()), 9.into()));
        let Message::Request(req) = roundtrip(msg) else {
            panic!("Expected Request");
        };
        let Arguments::Positional(decoded) = req.args else {
            panic!("Expected positional arguments");
        };
        prop_assert_eq!(values, decoded);
    }
}

proptest! {
    #[test]
    fn float_results_are_bit_exact(x in arb_finite_f64()) {
        let msg = Message::Response(Response::success(5.into(), json!(x)));
        let Message::Response(resp) = roundtrip(msg) else {
            panic!("Expected Response");
        };
        let decoded = resp.into_outcome().unwrap().as_f64().unwrap();
        prop_assert_eq!(x.to_bits(), decoded.to_bits());
    }
}

#[test]
fn edge_values_roundtrip() {
    for value in [
        json!(-273.15),
        json!(-1.333_566_297_123_956_3e-7),
        json!(f64::MAX),
        json!(f64::MIN_POSITIVE),
        json!(5e-324),
        json!(-0.0),
        json!([]),
        json!({}),
        json!({"trace": {"x": [-1.5e-9, 0.0, 2.5e-9], "meta": {"units": "V", "avg": []}}}),
        json!([[[]]]),
        json!(u64::MAX),
    ] {
        let Message::Response(resp) = roundtrip(Message::Response(Response::success(
            3.into(),
            value.clone(),
        ))) else {
            panic!("Expected Response");
        };
        let decoded = resp.into_outcome().unwrap();
        assert_eq!(value, decoded);
    }
}

#[test]
fn named_arguments_roundtrip() {
    let args = Arguments::named([("channel", json!(2)), ("gain", json!(-3.25))]);
    let Message::Request(req) = roundtrip(Message::Request(Request::new(
        "configure",
        args.clone(),
        "a".into(),
    ))) else {
        panic!("Expected Request");
    };
    assert_eq!(req.args, args);
}
