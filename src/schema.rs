//! Code Normalization and Schema Generation
//!
//! Submitted code is normalized (dedent + trim) and its first function
//! signature is lifted into a JSON input schema of the usual
//! object/properties/required shape. Annotation types map onto JSON schema
//! types; anything unrecognized falls back to "string".

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Value};

/// Normalize submitted code: dedent to the common leading indent and trim
/// outer whitespace. Syntax validation happens in the analyzer, not here.
pub fn normalize_code(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    // Indent width is counted in characters, not bytes; multibyte
    // whitespace like U+00A0 must not land a slice mid-character.
    let min_indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.chars().take_while(|c| c.is_whitespace()).count())
        .min()
        .unwrap_or(0);

    lines
        .iter()
        .map(|l| dedent_line(l, min_indent))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Strip up to `n` leading whitespace characters.
fn dedent_line(line: &str, n: usize) -> &str {
    let mut rest = line;
    for _ in 0..n {
        match rest.chars().next() {
            Some(c) if c.is_whitespace() => rest = &rest[c.len_utf8()..],
            _ => break,
        }
    }
    rest
}

/// One extracted parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamInfo {
    pub name: String,
    pub type_name: String,
    pub default: Option<Value>,
    pub required: bool,
    pub description: String,
}

/// Signature of the first function (or class) definition in the code.
#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub name: String,
    /// First docstring line
    pub description: String,
    pub parameters: Vec<ParamInfo>,
    pub return_type: String,
}

impl Default for FunctionInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            parameters: Vec::new(),
            return_type: "any".to_string(),
        }
    }
}

static RE_DEF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:async\s+)?def\s+(\w+)\s*\(").unwrap());
static RE_CLASS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)^\s*class\s+(\w+)").unwrap());
static RE_RETURN: Lazy<Regex> = Lazy::new(|| Regex::new(r"->\s*([^:]+):").unwrap());
static RE_DOCSTRING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?s)(?:"{3}(.*?)"{3}|'{3}(.*?)'{3})"#).unwrap());

/// Name for a tool derived from its code: the first function definition,
/// then the first class, then a fixed fallback.
pub fn extract_tool_name(code: &str) -> String {
    if let Some(caps) = RE_DEF.captures(code) {
        return caps[1].to_string();
    }
    if let Some(caps) = RE_CLASS.captures(code) {
        return caps[1].to_string();
    }
    "unknown_tool".to_string()
}

/// Extract the first function's signature. Returns the default (empty)
/// info when no function definition is present.
pub fn extract_function_info(code: &str) -> FunctionInfo {
    let caps = match RE_DEF.captures(code) {
        Some(caps) => caps,
        None => return FunctionInfo::default(),
    };
    let name = caps[1].to_string();
    let open_paren = match caps.get(0) {
        Some(m) => m.end() - 1,
        None => return FunctionInfo::default(),
    };

    let (params_src, after_params) = match balanced_parens(code, open_paren) {
        Some(v) => v,
        None => return FunctionInfo::default(),
    };

    let header_rest: String = code[after_params..]
        .lines()
        .next()
        .unwrap_or("")
        .to_string();
    let return_type = RE_RETURN
        .captures(&header_rest)
        .map(|c| c[1].trim().to_string())
        .unwrap_or_else(|| "any".to_string());

    let docstring = extract_docstring(&code[after_params..]);
    let description = docstring
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
        .to_string();

    let parameters = split_params(&params_src)
        .into_iter()
        .filter_map(|p| parse_param(&p, &docstring))
        .collect();

    FunctionInfo {
        name,
        description,
        parameters,
        return_type,
    }
}

/// Generate a JSON input schema (object/properties/required) from the
/// first function signature in the code.
pub fn generate_input_schema(code: &str) -> Value {
    let info = extract_function_info(code);

    let mut properties = serde_json::Map::new();
    let mut required = Vec::new();

    for param in &info.parameters {
        let mut prop = serde_json::Map::new();
        prop.insert("type".to_string(), json!(json_type(&param.type_name)));
        if !param.description.is_empty() {
            prop.insert("description".to_string(), json!(param.description));
        }
        if let Some(default) = &param.default {
            prop.insert("default".to_string(), default.clone());
        }
        if param.required {
            required.push(param.name.clone());
        }
        properties.insert(param.name.clone(), Value::Object(prop));
    }

    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Map an annotation to a JSON schema type. Subscripted annotations like
/// `list[int]` map by their root.
fn json_type(type_name: &str) -> &'static str {
    let root = type_name.split('[').next().unwrap_or(type_name).trim();
    match root {
        "str" => "string",
        "int" => "integer",
        "float" => "number",
        "bool" => "boolean",
        "list" => "array",
        "dict" => "object",
        "None" => "null",
        _ => "string",
    }
}

/// Extract the source between a balanced paren pair starting at `open`.
/// Returns the inner text and the index just past the closing paren.
fn balanced_parens(code: &str, open: usize) -> Option<(String, usize)> {
    let bytes = code.as_bytes();
    let mut depth = 0usize;
    let mut i = open;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some((code[open + 1..i].to_string(), i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split a parameter list on top-level commas.
fn split_params(src: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut depth = 0i32;
    let mut current = String::new();
    for c in src.chars() {
        match c {
            '(' | '[' | '{' => {
                depth += 1;
                current.push(c);
            }
            ')' | ']' | '}' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                params.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        params.push(current.trim().to_string());
    }
    params
}

fn parse_param(src: &str, docstring: &str) -> Option<ParamInfo> {
    let src = src.trim();
    if src.is_empty() || src == "self" || src.starts_with('*') {
        return None;
    }

    let (sig, default_src) = match split_once_top_level(src, '=') {
        Some((sig, default)) => (sig.trim().to_string(), Some(default.trim().to_string())),
        None => (src.to_string(), None),
    };

    let (name, type_name) = match sig.split_once(':') {
        Some((n, t)) => (n.trim().to_string(), t.trim().to_string()),
        None => (sig.clone(), "any".to_string()),
    };

    let default = default_src.map(|d| parse_literal(&d));

    Some(ParamInfo {
        description: param_doc(docstring, &name),
        required: default.is_none(),
        name,
        type_name,
        default,
    })
}

/// Split on the first occurrence of `sep` outside brackets.
fn split_once_top_level(src: &str, sep: char) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (i, c) in src.char_indices() {
        match c {
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            c if c == sep && depth == 0 => {
                return Some((&src[..i], &src[i + c.len_utf8()..]));
            }
            _ => {}
        }
    }
    None
}

/// Best-effort literal parse of a default value. Unrecognized expressions
/// become null.
fn parse_literal(src: &str) -> Value {
    match src {
        "None" => return Value::Null,
        "True" => return json!(true),
        "False" => return json!(false),
        _ => {}
    }
    if (src.starts_with('\'') && src.ends_with('\'') && src.len() >= 2)
        || (src.starts_with('"') && src.ends_with('"') && src.len() >= 2)
    {
        return json!(src[1..src.len() - 1]);
    }
    if let Ok(v) = src.parse::<i64>() {
        return json!(v);
    }
    if let Ok(v) = src.parse::<f64>() {
        return json!(v);
    }
    if src == "[]" {
        return json!([]);
    }
    if src == "{}" {
        return json!({});
    }
    Value::Null
}

fn extract_docstring(after_signature: &str) -> String {
    // Only a docstring that opens the body counts; skip past the header line
    let body_start = match after_signature.find(':') {
        Some(i) => i + 1,
        None => return String::new(),
    };
    let body = &after_signature[body_start..];
    let leading = body.trim_start();
    if !leading.starts_with("\"\"\"") && !leading.starts_with("'''") {
        return String::new();
    }
    RE_DOCSTRING
        .captures(leading)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Pull a parameter description out of a docstring. Understands the
/// sphinx (`:param x:`) and plain (`x: ...`) conventions.
fn param_doc(docstring: &str, param_name: &str) -> String {
    for line in docstring.lines() {
        let stripped = line.trim();
        let sphinx = format!(":param {param_name}:");
        if let Some(rest) = stripped.strip_prefix(&sphinx) {
            return rest.trim().to_string();
        }
        let plain = format!("{param_name}:");
        if let Some(rest) = stripped.strip_prefix(&plain) {
            return rest.trim().to_string();
        }
        let spaced = format!("{param_name} :");
        if let Some(rest) = stripped.strip_prefix(&spaced) {
            return rest.trim().to_string();
        }
    }
    String::new()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_dedents_and_trims() {
        let code = "\n    def f(x):\n        return x\n";
        assert_eq!(normalize_code(code), "def f(x):\n    return x");
    }

    #[test]
    fn normalize_survives_multibyte_indentation() {
        // Non-breaking spaces are two bytes each; dedent must count
        // characters so the shorter ascii indent does not split one.
        let code = "\u{00A0}\u{00A0}x = 1\n y = 2";
        // min indent is one char; the outer trim then drops the leftover
        // leading non-breaking space on the first line.
        assert_eq!(normalize_code(code), "x = 1\ny = 2");
    }

    #[test]
    fn tool_name_from_first_def() {
        assert_eq!(extract_tool_name("def word_count(s):\n    pass"), "word_count");
        assert_eq!(extract_tool_name("class Parser:\n    pass"), "Parser");
        assert_eq!(extract_tool_name("x = 1"), "unknown_tool");
    }

    #[test]
    fn signature_with_annotations() {
        let info = extract_function_info(
            "def convert(amount: float, currency: str = 'USD') -> float:\n    return amount\n",
        );
        assert_eq!(info.name, "convert");
        assert_eq!(info.return_type, "float");
        assert_eq!(info.parameters.len(), 2);
        assert_eq!(info.parameters[0].name, "amount");
        assert_eq!(info.parameters[0].type_name, "float");
        assert!(info.parameters[0].required);
        assert_eq!(info.parameters[1].default, Some(json!("USD")));
        assert!(!info.parameters[1].required);
    }

    #[test]
    fn self_and_star_args_are_skipped() {
        let info = extract_function_info("def m(self, x, *args, **kwargs):\n    pass\n");
        assert_eq!(info.parameters.len(), 1);
        assert_eq!(info.parameters[0].name, "x");
    }

    #[test]
    fn docstring_first_line_becomes_description() {
        let code = "def f(x):\n    \"\"\"Counts words.\n\n    x: the input text\n    \"\"\"\n    return x\n";
        let info = extract_function_info(code);
        assert_eq!(info.description, "Counts words.");
        assert_eq!(info.parameters[0].description, "the input text");
    }

    #[test]
    fn schema_shape() {
        let schema = generate_input_schema(
            "def add(a: int, b: int = 0) -> int:\n    return a + b\n",
        );
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["a"]["type"], "integer");
        assert_eq!(schema["properties"]["b"]["default"], json!(0));
        assert_eq!(schema["required"], json!(["a"]));
    }

    #[test]
    fn schema_for_no_params() {
        let schema = generate_input_schema("def ping():\n    return 'pong'\n");
        assert_eq!(schema["properties"], json!({}));
        assert_eq!(schema["required"], json!([]));
    }

    #[test]
    fn subscripted_annotation_maps_by_root() {
        let schema = generate_input_schema("def f(items: list[int]):\n    pass\n");
        assert_eq!(schema["properties"]["items"]["type"], "array");
    }

    #[test]
    fn unknown_annotation_falls_back_to_string() {
        let schema = generate_input_schema("def f(x: MyType):\n    pass\n");
        assert_eq!(schema["properties"]["x"]["type"], "string");
    }

    #[test]
    fn multiline_signature() {
        let info = extract_function_info(
            "def f(\n    a: int,\n    b: str = 'x',\n) -> bool:\n    return True\n",
        );
        assert_eq!(info.parameters.len(), 2);
        assert_eq!(info.return_type, "bool");
    }
}
