use luacall::{CallResult, ErrorKind, Interpreter, FUNCTION_NOT_FOUND, INVALID_RETURN_VALUE};
use proptest::prelude::*;
use serde_json::{json, Value};

const SCRIPT: &str = r#"
function echo(s) return s end
function shout(s) return string.upper(s) .. "!" end
function fail(s) error("failed on " .. s) end
function count(s) return #s end
function nothing(s) end
function roundtrip(s) return s end
not_a_function = "hello"
"#;

fn interpreter() -> Interpreter {
    let mut lua = Interpreter::new().unwrap();
    lua.load("contract.lua", SCRIPT).unwrap();
    lua
}

#[test]
fn test_success_is_byte_exact() {
    let mut lua = interpreter();
    let payload = b"\x00binary\xff\xfe payload \xe2\x9c\x93\x00";
    assert_eq!(lua.invoke("echo", payload).value(), Some(&payload[..]));
    assert_eq!(lua.invoke("shout", "abc").as_str(), Some("ABC!"));
    assert_eq!(lua.invoke("echo", "").value(), Some(&b""[..]));
}

#[test]
fn test_missing_function() {
    let mut lua = interpreter();
    let result = lua.invoke("does_not_exist", "x");
    assert_eq!(result.failure_message().as_deref(), Some(FUNCTION_NOT_FOUND));
    assert_eq!(result.error().unwrap().kind(), ErrorKind::Lookup);
}

#[test]
fn test_non_callable_global() {
    let mut lua = interpreter();
    assert_eq!(lua.invoke("not_a_function", "x").failure_message().as_deref(), Some(FUNCTION_NOT_FOUND));
    // the global itself is untouched
    assert_eq!(lua.get_global("not_a_function"), json!("hello"));
}

#[test]
fn test_raising_function() {
    let mut lua = interpreter();
    let result = lua.invoke("fail", "input-7");
    let err = result.error().unwrap();
    assert_eq!(err.kind(), ErrorKind::Runtime);
    assert!(err.message().contains("failed on input-7"), "{}", err.message());
}

#[test]
fn test_non_string_return() {
    let mut lua = interpreter();
    for name in ["count", "nothing"] {
        let result = lua.invoke(name, "four");
        assert_eq!(result.failure_message().as_deref(), Some(INVALID_RETURN_VALUE), "{}", name);
        assert_eq!(result.error().unwrap().kind(), ErrorKind::Type);
    }
}

#[test]
fn test_interleaved_calls_keep_stack_and_memory_bounded() {
    let mut lua = interpreter();
    let depth = lua.stack_depth();
    lua.collect_garbage();
    let baseline = lua.memory_bytes();

    for i in 0..10_000 {
        let payload = format!("payload-{}", i);
        let result = match i % 4 {
            0 => lua.invoke("echo", &payload),
            1 => lua.invoke("missing", &payload),
            2 => lua.invoke("fail", &payload),
            _ => lua.invoke("count", &payload),
        };
        match i % 4 {
            0 => assert_eq!(result.as_str(), Some(payload.as_str())),
            _ => assert!(result.is_failure()),
        }
        assert_eq!(lua.stack_depth(), depth);
    }

    lua.collect_garbage();
    let after = lua.memory_bytes();
    assert!(
        after <= baseline + 256 * 1024,
        "memory grew from {} to {} bytes",
        baseline,
        after
    );
}

#[test]
fn test_call_json_roundtrip() {
    let mut lua = interpreter();
    let input = json!({"user": "ada", "tags": ["a", "b"], "score": 9.5});
    let output: Value = lua.call_json("roundtrip", &input).unwrap();
    assert_eq!(output, input);
}

#[test]
fn test_globals_roundtrip() {
    let mut lua = interpreter();
    let globals = json!({
        "name": "svc",
        "limits": [1, 2, 3],
        "nested": {"on": true, "ratio": 0.25},
    });
    let globals = globals.as_object().unwrap();
    lua.set_globals(globals);

    let back = lua.get_globals(&["name", "limits", "nested"]);
    assert_eq!(&back, globals);
}

#[test]
fn test_result_conversion() {
    let mut lua = interpreter();
    let ok: Result<Vec<u8>, _> = lua.invoke("echo", "x").into();
    assert_eq!(ok.unwrap(), b"x");
    assert!(matches!(lua.invoke("missing", ""), CallResult::Failure(_)));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_echo_preserves_bytes(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
        let mut lua = interpreter();
        let result = lua.invoke("echo", &payload);
        prop_assert_eq!(result.value(), Some(&payload[..]));
        prop_assert_eq!(lua.stack_depth(), 0);
    }
}
