//! Script generators for interpreted languages.
//!
//! A wrapper binds the decoded inputs to `inputs`, runs the snippet and, except
//! for shell, prints the snippet's `result` as JSON on a final line starting
//! with [`RESULT_MARKER`]. [`extract_result`] removes that line again.

use serde_json::Value;

pub const RESULT_MARKER: &str = "__CITADEL_RESULT__";

/// Modules a Python snippet may import.
pub const PYTHON_IMPORT_ALLOWLIST: &[&str] = &[
    "json",
    "math",
    "datetime",
    "re",
    "collections",
    "itertools",
    "functools",
    "random",
    "string",
    "time",
];

const PYTHON_SAFE_BUILTINS: &[&str] = &[
    "abs", "all", "any", "bool", "bytes", "callable", "chr", "dict", "divmod", "enumerate",
    "filter", "float", "format", "frozenset", "hash", "int", "isinstance", "issubclass", "iter",
    "len", "list", "map", "max", "min", "next", "object", "ord", "pow", "print", "range", "repr",
    "reversed", "round", "set", "slice", "sorted", "str", "sum", "tuple", "zip",
    "__build_class__", "ArithmeticError", "AssertionError", "AttributeError", "Exception",
    "IndexError", "KeyError", "LookupError", "NameError", "NotImplementedError", "RuntimeError",
    "StopIteration", "TypeError", "ValueError", "ZeroDivisionError",
];

/// Split the marker line off `stdout`. Returns the user-visible output and the
/// decoded result; a missing or malformed marker line leaves `stdout` intact.
pub fn extract_result(stdout: &str) -> (String, Option<Value>) {
    let needle = format!("\n{}", RESULT_MARKER);
    let Some(index) = stdout.rfind(&needle) else {
        return (stdout.to_string(), None);
    };

    let payload = stdout[index + needle.len()..].trim_end_matches(['\r', '\n']);
    match serde_json::from_str::<Value>(payload) {
        Ok(Value::Null) => (stdout[..index].to_string(), None),
        Ok(value) => (stdout[..index].to_string(), Some(value)),
        Err(e) => {
            log::debug!("ignoring undecodable result line: {}", e);
            (stdout.to_string(), None)
        }
    }
}

pub fn python(code: &str, inputs_json: &str) -> String {
    let allowlist = PYTHON_IMPORT_ALLOWLIST
        .iter()
        .map(|m| format!("\"{}\"", m))
        .collect::<Vec<_>>()
        .join(", ");
    let builtins = PYTHON_SAFE_BUILTINS
        .iter()
        .map(|b| format!("\"{}\"", b))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"import builtins as _builtins
import json as _json
import sys as _sys
import traceback as _traceback

_ALLOWED = {{{allowlist}}}


def _guarded_import(name, globals=None, locals=None, fromlist=(), level=0):
    if level != 0 or name.split(".")[0] not in _ALLOWED:
        raise ImportError("import of '%s' is not allowed" % name)
    return _builtins.__import__(name, globals, locals, fromlist, level)


_safe = {{n: getattr(_builtins, n) for n in ({builtins}) if hasattr(_builtins, n)}}
_safe["__import__"] = _guarded_import
_scope = {{
    "__builtins__": _safe,
    "__name__": "__snippet__",
    "inputs": _json.loads({inputs}),
    "result": None,
}}
try:
    exec(compile({code}, "<snippet>", "exec"), _scope)
except Exception:
    _traceback.print_exc()
    _sys.exit(1)
_sys.stdout.write("\n{marker}" + _json.dumps(_scope.get("result"), default=str) + "\n")
"#,
        allowlist = allowlist,
        builtins = builtins,
        inputs = json_literal(inputs_json),
        code = json_literal(code),
        marker = RESULT_MARKER,
    )
}

pub fn javascript(code: &str, inputs_json: &str) -> String {
    format!(
        r#"const inputs = JSON.parse({inputs});
let __citadelResult;
try {{
  // A declared or an implicitly global `result` are both visible here.
  __citadelResult = (function () {{
{code}
;
return typeof result === "undefined" ? null : result;
  }})();
}} catch (err) {{
  process.stderr.write(String(err && err.stack ? err.stack : err) + "\n");
  process.exit(1);
}}
const __citadelEncoded = JSON.stringify(__citadelResult);
process.stdout.write("\n{marker}" + (__citadelEncoded === undefined ? "null" : __citadelEncoded) + "\n");
"#,
        inputs = json_literal(inputs_json),
        code = code,
        marker = RESULT_MARKER,
    )
}

pub fn ruby(code: &str, inputs_json: &str) -> String {
    format!(
        r##"require 'json'

def __citadel_run(source, payload)
  scope = Object.new.instance_eval {{ binding }}
  scope.local_variable_set(:inputs, JSON.parse(payload))
  scope.local_variable_set(:result, nil)
  last = scope.eval(source, 'snippet.rb', 1)
  assigned = scope.local_variable_get(:result)
  assigned.nil? ? last : assigned
end

begin
  __citadel_value = __citadel_run({code}, {inputs})
rescue StandardError, ScriptError => e
  $stderr.puts("#{{e.class}}: #{{e.message}}")
  $stderr.puts(e.backtrace.join("\n")) if e.backtrace
  exit 1
end
$stdout.write("\n{marker}" + JSON.generate(__citadel_value) + "\n")
"##,
        code = single_quoted(code),
        inputs = single_quoted(inputs_json),
        marker = RESULT_MARKER,
    )
}

pub fn php(code: &str, inputs_json: &str) -> String {
    format!(
        r#"<?php
$__citadel_inputs = json_decode({inputs}, true);
$__citadel_run = function ($inputs) {{
    $input = $inputs;
    $result = null;
{code}
;
    return $result;
}};
try {{
    $__citadel_result = $__citadel_run($__citadel_inputs);
}} catch (\Throwable $e) {{
    fwrite(STDERR, get_class($e) . ': ' . $e->getMessage() . "\n");
    exit(1);
}}
echo "\n{marker}" . json_encode($__citadel_result) . "\n";
"#,
        inputs = single_quoted(inputs_json),
        code = strip_php_tags(code),
        marker = RESULT_MARKER,
    )
}

pub fn shell(code: &str, inputs_json: &str) -> String {
    let mut script = format!("inputs={}\nexport inputs\n", shell_quoted(inputs_json));

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(inputs_json) {
        for (key, value) in &map {
            if !is_shell_identifier(key) {
                continue;
            }
            let scalar = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                Value::Null => String::new(),
                Value::Array(_) | Value::Object(_) => continue,
            };
            script.push_str(&format!("input_{}={}\n", key, shell_quoted(&scalar)));
        }
    }

    script.push('\n');
    script.push_str(code);
    script.push('\n');
    script
}

fn strip_php_tags(code: &str) -> &str {
    let trimmed = code.trim();
    let trimmed = trimmed.strip_prefix("<?php").unwrap_or(trimmed);
    trimmed.strip_suffix("?>").unwrap_or(trimmed)
}

/// A JSON string literal; valid as a Python and JavaScript string literal too.
fn json_literal(s: &str) -> String {
    Value::String(s.to_string()).to_string()
}

/// Single-quoted Ruby or PHP literal: only `\` and `'` are escapes.
fn single_quoted(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn shell_quoted(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

fn is_shell_identifier(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
