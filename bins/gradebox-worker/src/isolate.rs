/// Isolate - evaluates one request inside a fresh JavaScript context
///
/// **Core Responsibility:**
/// Compile the learner's source with `boa_engine`, locate the function and,
/// when arguments are supplied, call it once and report what happened.
///
/// **Isolation:**
/// - A fresh `Context` per request; nothing survives between requests
/// - Globals outside the allow-list are deleted before user code runs
/// - Arguments are rebuilt from the wire encoding, so the caller's values
///   are never shared with user code
/// - Console output is buffered and only recorded during the call
///
/// The isolate has no notion of wall-clock time. The host enforces the
/// budget by killing the whole process.

use boa_engine::vm::RuntimeLimits;
use boa_engine::{Context, JsError, Source};
use gradebox_common::protocol::{decode_message, IsolateRequest, IsolateResponse};
use gradebox_common::types::{is_valid_function_name, CompileErrorKind};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::debug;

const PRELUDE: &str = include_str!("prelude.js");

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PreludeConfig<'a> {
    allowed_globals: &'a [String],
    max_console_lines: usize,
    max_value_depth: usize,
}

/// Serve one request
pub fn execute(request: &IsolateRequest) -> IsolateResponse {
    if !is_valid_function_name(&request.function_name) {
        return IsolateResponse::Internal {
            message: format!("'{}' is not a valid function name", request.function_name),
        };
    }

    let mut context = Context::default();
    let mut limits = RuntimeLimits::default();
    limits.set_recursion_limit(request.limits.recursion_limit);
    context.set_runtime_limits(limits);

    if let Err(message) = install_prelude(&mut context, request) {
        return IsolateResponse::Internal { message };
    }

    if let Err(e) = context.eval(Source::from_bytes(request.source.as_str())) {
        return compile_error(&e);
    }

    let name = &request.function_name;
    let check = format!("typeof {} === 'function'", name);
    match context.eval(Source::from_bytes(check.as_str())) {
        Ok(defined) if defined.to_boolean() => {}
        Ok(_) => {
            return IsolateResponse::CompileError {
                error_kind: CompileErrorKind::MissingFunction,
                message: format!("source does not define a function named `{}`", name),
                line: None,
                column: None,
            };
        }
        Err(e) => return compile_error(&e),
    }

    let Some(args) = &request.args else {
        return IsolateResponse::Ready;
    };

    let args_json = match serde_json::to_string(args) {
        Ok(json) => json,
        Err(e) => {
            return IsolateResponse::Internal {
                message: format!("failed to encode arguments: {}", e),
            }
        }
    };

    let call = format!("__gradebox.invoke({}, {})", name, args_json);
    match context.eval(Source::from_bytes(call.as_str())) {
        Ok(result) => {
            let Some(text) = result.as_string().map(|s| s.to_std_string_escaped()) else {
                return IsolateResponse::Internal {
                    message: "invocation wrapper returned a non-string".to_string(),
                };
            };
            decode_message(text.as_bytes()).unwrap_or_else(|e| IsolateResponse::Internal {
                message: format!("failed to decode invocation result: {}", e),
            })
        }
        // Engine limits are not catchable from JavaScript
        Err(e) => {
            debug!(error = %e, "invocation aborted by the engine");
            IsolateResponse::Threw {
                message: e.to_string(),
                console: drain_console(&mut context),
            }
        }
    }
}

fn install_prelude(context: &mut Context, request: &IsolateRequest) -> Result<(), String> {
    let config = PreludeConfig {
        allowed_globals: &request.limits.allowed_globals,
        max_console_lines: request.limits.max_console_lines,
        max_value_depth: request.limits.max_value_depth,
    };
    let config_json = serde_json::to_string(&config)
        .map_err(|e| format!("failed to encode prelude config: {}", e))?;
    let script = format!("{}({});", PRELUDE.trim_end(), config_json);
    context
        .eval(Source::from_bytes(script.as_str()))
        .map(|_| ())
        .map_err(|e| format!("failed to install prelude: {}", e))
}

fn drain_console(context: &mut Context) -> Vec<String> {
    context
        .eval(Source::from_bytes("__gradebox.drainConsole()"))
        .ok()
        .and_then(|v| v.as_string().map(|s| s.to_std_string_escaped()))
        .and_then(|text| decode_message(text.as_bytes()).ok())
        .unwrap_or_default()
}

fn compile_error(error: &JsError) -> IsolateResponse {
    let message = error.to_string();
    let error_kind = if message.starts_with("SyntaxError") {
        CompileErrorKind::Syntax
    } else {
        CompileErrorKind::Evaluation
    };
    let (line, column) = match error_location(&message) {
        Some((line, column)) => (Some(line), Some(column)),
        None => (None, None),
    };
    IsolateResponse::CompileError {
        error_kind,
        message,
        line,
        column,
    }
}

/// Extract `line N, col M` from an engine error message
fn error_location(message: &str) -> Option<(u32, u32)> {
    static LOCATION: OnceLock<Option<Regex>> = OnceLock::new();
    let pattern = LOCATION
        .get_or_init(|| Regex::new(r"line (\d+), col(?:umn)? (\d+)").ok())
        .as_ref()?;
    let captures = pattern.captures(message)?;
    let line = captures.get(1)?.as_str().parse().ok()?;
    let column = captures.get(2)?.as_str().parse().ok()?;
    Some((line, column))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gradebox_common::protocol::{IsolateLimits, WireValue};
    use gradebox_common::{GraderConfig, Value};
    use serde_json::json;

    fn limits() -> IsolateLimits {
        GraderConfig::default().isolate_limits()
    }

    fn call(source: &str, function_name: &str, args: Vec<Value>) -> IsolateResponse {
        execute(&IsolateRequest {
            source: source.to_string(),
            function_name: function_name.to_string(),
            args: Some(args.iter().map(WireValue::from).collect()),
            limits: limits(),
        })
    }

    fn check(source: &str, function_name: &str) -> IsolateResponse {
        execute(&IsolateRequest {
            source: source.to_string(),
            function_name: function_name.to_string(),
            args: None,
            limits: limits(),
        })
    }

    fn on_large_stack<T: Send + 'static>(f: impl FnOnce() -> T + Send + 'static) -> T {
        std::thread::Builder::new()
            .stack_size(crate::ISOLATE_STACK_BYTES)
            .spawn(f)
            .unwrap()
            .join()
            .unwrap()
    }

    fn linked_list(len: usize) -> Value {
        let mut node = Value::Null;
        for i in (0..len).rev() {
            let mut fields = std::collections::BTreeMap::new();
            fields.insert("val".to_string(), Value::Number(i as f64));
            fields.insert("next".to_string(), node);
            node = Value::Object(fields);
        }
        node
    }

    fn nested_arrays(depth: usize) -> Value {
        let mut value = Value::Array(Vec::new());
        for _ in 0..depth {
            value = Value::Array(vec![value]);
        }
        value
    }

    fn returned(response: IsolateResponse) -> (Value, Vec<String>) {
        match response {
            IsolateResponse::Returned { value, console } => (value.into(), console),
            other => panic!("expected a return value, got {:?}", other),
        }
    }

    #[test]
    fn test_add_returns_sum() {
        let (value, console) = returned(call(
            "function add(a, b) { return a + b; }",
            "add",
            vec![Value::from(2i64), Value::from(3i64)],
        ));
        assert_eq!(value, Value::Number(5.0));
        assert!(console.is_empty());
    }

    #[test]
    fn test_thrown_error_message() {
        let response = call("function add(a, b) { throw new Error(\"x\"); }", "add", vec![]);
        match response {
            IsolateResponse::Threw { message, .. } => assert!(message.contains('x'), "{}", message),
            other => panic!("expected throw, got {:?}", other),
        }
    }

    #[test]
    fn test_thrown_non_error_value() {
        let response = call("function f() { throw 42; }", "f", vec![]);
        assert!(matches!(response, IsolateResponse::Threw { ref message, .. } if message == "Uncaught 42"));
    }

    #[test]
    fn test_syntax_error_is_compile_error() {
        match check("function add(a,b){return a+b", "add") {
            IsolateResponse::CompileError { error_kind, .. } => {
                assert_eq!(error_kind, CompileErrorKind::Syntax)
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_function() {
        match check("function sub(a, b) { return a - b; }", "add") {
            IsolateResponse::CompileError { error_kind, message, .. } => {
                assert_eq!(error_kind, CompileErrorKind::MissingFunction);
                assert!(message.contains("add"));
            }
            other => panic!("expected compile error, got {:?}", other),
        }
        assert!(matches!(check("var add = 5;", "add"), IsolateResponse::CompileError { .. }));
    }

    #[test]
    fn test_top_level_throw_is_evaluation_error() {
        match check("throw new TypeError('boom'); function add() {}", "add") {
            IsolateResponse::CompileError { error_kind, .. } => {
                assert_eq!(error_kind, CompileErrorKind::Evaluation)
            }
            other => panic!("expected compile error, got {:?}", other),
        }
    }

    #[test]
    fn test_check_only_reports_ready() {
        assert_eq!(check("const add = (a, b) => a + b;", "add"), IsolateResponse::Ready);
    }

    #[test]
    fn test_console_captured_during_call_only() {
        let source = r#"
            console.log("top level");
            function greet(name) {
                console.log("hello", name, [1, { a: null }]);
                console.warn("careful");
                console.error(new Error("bad"));
                return name.length;
            }
        "#;
        let (value, console) = returned(call(source, "greet", vec![Value::from("ada")]));
        assert_eq!(value, Value::Number(3.0));
        assert_eq!(
            console,
            vec![
                "hello ada [1, { \"a\": null }]".to_string(),
                "[warn] careful".to_string(),
                "[error] Error: bad".to_string(),
            ]
        );
    }

    #[test]
    fn test_console_kept_when_function_throws() {
        let response = call("function f() { console.log('before'); null.x; }", "f", vec![]);
        match response {
            IsolateResponse::Threw { message, console } => {
                assert!(message.starts_with("TypeError"), "{}", message);
                assert_eq!(console, vec!["before".to_string()]);
            }
            other => panic!("expected throw, got {:?}", other),
        }
    }

    #[test]
    fn test_console_truncation() {
        let mut limits = limits();
        limits.max_console_lines = 2;
        let response = execute(&IsolateRequest {
            source: "function f() { for (var i = 0; i < 5; i++) console.log(i); return 0; }".to_string(),
            function_name: "f".to_string(),
            args: Some(vec![]),
            limits,
        });
        let (_, console) = returned(response);
        assert_eq!(console, vec!["0", "1", "... 3 more line(s) truncated"]);
    }

    #[test]
    fn test_edge_values_cross_boundary() {
        let source = "function f(x) { return [undefined, NaN, -0, Infinity, null, x]; }";
        let input: Value = Value::from(json!({"k": [true, "s"]}));
        let (value, _) = returned(call(source, "f", vec![input.clone()]));
        let Value::Array(items) = value else { panic!("expected array") };
        assert_eq!(items[0], Value::Undefined);
        assert!(matches!(items[1], Value::Number(n) if n.is_nan()));
        assert!(matches!(items[2], Value::Number(n) if n == 0.0 && n.is_sign_negative()));
        assert_eq!(items[3], Value::Number(f64::INFINITY));
        assert_eq!(items[4], Value::Null);
        assert_eq!(items[5], input);
    }

    #[test]
    fn test_cycle_becomes_circular() {
        let source = "function f() { var a = [1]; a.push(a); var shared = {}; return [a, shared, shared]; }";
        let (value, _) = returned(call(source, "f", vec![]));
        let Value::Array(items) = value else { panic!("expected array") };
        assert_eq!(items[0], Value::Array(vec![Value::Number(1.0), Value::Circular]));
        // shared but acyclic references are plain data
        assert_eq!(items[1], items[2]);
    }

    #[test]
    fn test_functions_are_opaque() {
        let (value, _) = returned(call("function f() { return function inner() {}; }", "f", vec![]));
        assert_eq!(value, Value::Opaque("[Function inner]".to_string()));
    }

    #[test]
    fn test_host_globals_removed() {
        let mut limits = limits();
        limits.allowed_globals.retain(|g| g != "Reflect");
        let response = execute(&IsolateRequest {
            source: "function f() { return [typeof Reflect, typeof Math, typeof eval, typeof Function]; }".to_string(),
            function_name: "f".to_string(),
            args: Some(vec![]),
            limits,
        });
        let (value, _) = returned(response);
        assert_eq!(value, Value::from(json!(["undefined", "object", "undefined", "undefined"])));
    }

    #[test]
    fn test_proto_key_is_data() {
        let input = Value::from(json!({"__proto__": 1}));
        let (value, _) = returned(call("function f(o) { return Object.keys(o); }", "f", vec![input]));
        assert_eq!(value, Value::from(json!(["__proto__"])));
    }

    #[test]
    fn test_runaway_recursion_is_reported() {
        let response =
            on_large_stack(|| call("function f(n) { return f(n + 1) + 1; }", "f", vec![Value::from(0i64)]));
        assert!(matches!(response, IsolateResponse::Threw { .. }), "{:?}", response);
    }

    #[test]
    fn test_linked_list_result_crosses_boundary() {
        let source = "function build(n) { var head = null; for (var i = n - 1; i >= 0; i--) head = { val: i, next: head }; return head; }";
        let (value, _) = returned(on_large_stack(move || call(source, "build", vec![Value::from(50i64)])));
        assert_eq!(value, linked_list(50));
    }

    #[test]
    fn test_deeply_nested_arrays_cross_boundary() {
        let source = "function nest(n) { var v = []; for (var i = 0; i < n; i++) v = [v]; return v; }";
        let (value, _) = returned(on_large_stack(move || call(source, "nest", vec![Value::from(70i64)])));
        assert_eq!(value, nested_arrays(70));
    }

    #[test]
    fn test_deep_arguments_do_not_use_engine_recursion() {
        let mut limits = limits();
        limits.recursion_limit = 64;
        let request = IsolateRequest {
            source: "function depth(v) { var d = 0; while (v.length) { v = v[0]; d++; } return d; }".to_string(),
            function_name: "depth".to_string(),
            args: Some(vec![WireValue::from(&nested_arrays(200))]),
            limits,
        };
        let (value, _) = returned(on_large_stack(move || execute(&request)));
        assert_eq!(value, Value::Number(200.0));
    }

    #[test]
    fn test_nesting_beyond_limit_is_opaque() {
        let mut limits = limits();
        limits.max_value_depth = 3;
        let response = execute(&IsolateRequest {
            source: "function f() { return [[[[1]]]]; }".to_string(),
            function_name: "f".to_string(),
            args: Some(vec![]),
            limits,
        });
        let (value, _) = returned(response);
        let opaque = Value::Opaque("[nested deeper than 3 levels]".to_string());
        assert_eq!(value, Value::Array(vec![Value::Array(vec![Value::Array(vec![opaque])])]));
    }

    #[test]
    fn test_lone_surrogates_are_replaced() {
        let source = r#"
            function rev(s) {
                var out = s.split("").reverse().join("");
                console.log(out);
                var keyed = {};
                keyed[out] = 1;
                return [out, keyed];
            }
        "#;
        let (value, console) = returned(call(source, "rev", vec![Value::from("ab\u{1F600}")]));
        let broken = "\u{FFFD}\u{FFFD}ba";
        let mut keyed = std::collections::BTreeMap::new();
        keyed.insert(broken.to_string(), Value::Number(1.0));
        assert_eq!(value, Value::Array(vec![Value::from(broken), Value::Object(keyed)]));
        assert_eq!(console, vec![broken.to_string()]);
    }

    #[test]
    fn test_surrogate_pairs_kept() {
        let (value, _) = returned(call("function f(s) { return s + s; }", "f", vec![Value::from("\u{1F600}")]));
        assert_eq!(value, Value::from("\u{1F600}\u{1F600}"));
    }

    #[test]
    fn test_thrown_lone_surrogate_message() {
        let response = call("function f() { throw new Error('\\ud83d'); }", "f", vec![]);
        match response {
            IsolateResponse::Threw { message, .. } => assert_eq!(message, "Error: \u{FFFD}"),
            other => panic!("expected throw, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_injected_function_name() {
        let response = check("function add() {}", "add); while(true){}; (");
        assert!(matches!(response, IsolateResponse::Internal { .. }));
    }

    #[test]
    fn test_error_location_parsing() {
        assert_eq!(error_location("SyntaxError: abrupt end at line 1, col 29"), Some((1, 29)));
        assert_eq!(error_location("at line 12, column 3"), Some((12, 3)));
        assert_eq!(error_location("no location"), None);
    }
}
