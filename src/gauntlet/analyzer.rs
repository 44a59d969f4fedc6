//! Static Security Analyzer
//!
//! Inspects submitted source before anything is executed. The source is
//! lowered into a flat stream of grammar-agnostic syntax nodes (imports,
//! calls, attribute accesses, definitions); the scan itself is a walk keyed
//! on node kind, so swapping the guest grammar only means swapping the
//! scanner that produces the nodes.
//!
//! Severity rules:
//! - denylisted import: critical
//! - dangerous built-in call (eval/exec/reflection/process control): critical
//! - sensitive attribute reached through a call: critical
//! - bare sensitive attribute access: warning
//! - file open in write mode: warning
//! - source that fails to scan: critical

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

use crate::config::GauntletConfig;
use crate::models::SecurityVerdict;

/// Built-in operations that must never run in the sandbox.
static DANGEROUS_BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "eval", "exec", "compile", "__import__", "globals", "locals", "getattr", "setattr",
        "delattr", "breakpoint", "exit", "quit",
    ]
    .into_iter()
    .collect()
});

/// Modules denylisted regardless of configuration.
static DANGEROUS_MODULES: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "subprocess", "shutil", "ctypes", "multiprocessing", "signal", "resource", "pty",
        "termios", "socket", "xmlrpc", "pickle", "shelve", "webbrowser",
    ]
    .into_iter()
    .collect()
});

/// Attribute names that expose privileged OS operations or interpreter
/// internals.
static DANGEROUS_ATTRS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "__subclasses__", "__bases__", "__mro__", "__globals__", "__code__", "__builtins__",
        "system", "popen", "rmtree", "unlink",
    ]
    .into_iter()
    .collect()
});

/// One grammar-agnostic node produced by the source scanner.
#[derive(Debug, Clone, PartialEq)]
pub enum SyntaxNode {
    Import { module: String, line: usize },
    Call { name: String, line: usize },
    /// Attribute reached through a call: `x.attr(...)`
    AttributeCall { attr: String, line: usize },
    /// Bare attribute access: `x.attr`
    Attribute { attr: String, line: usize },
    Definition { name: String, line: usize },
    /// A call to `open` with its literal mode argument, when present
    FileOpen { mode: String, line: usize },
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Critical,
    Warning,
}

/// One issue found during scanning.
#[derive(Debug, Clone)]
pub struct SecurityIssue {
    pub severity: Severity,
    pub message: String,
    pub line: usize,
}

/// Outcome of a scan. Transient; consumed synchronously by the gate.
#[derive(Debug, Clone)]
pub struct SecurityReport {
    pub verdict: SecurityVerdict,
    pub issues: Vec<SecurityIssue>,
}

impl SecurityReport {
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return "No security issues found.".to_string();
        }
        let mut lines = vec![format!("Found {} issue(s):", self.issues.len())];
        for issue in &self.issues {
            let sev = match issue.severity {
                Severity::Critical => "CRITICAL",
                Severity::Warning => "WARNING",
            };
            lines.push(format!("  [{}] Line {}: {}", sev, issue.line, issue.message));
        }
        lines.join("\n")
    }
}

/// Denylist-driven scanner over the syntax-node stream.
pub struct StaticAnalyzer {
    blocked_imports: HashSet<String>,
}

impl StaticAnalyzer {
    pub fn new(config: &GauntletConfig) -> Self {
        let mut blocked_imports: HashSet<String> =
            DANGEROUS_MODULES.iter().map(|s| s.to_string()).collect();
        blocked_imports.extend(config.blocked_imports.iter().cloned());
        Self { blocked_imports }
    }

    /// Scan source and derive a verdict. Never executes anything.
    pub fn scan(&self, code: &str) -> SecurityReport {
        let nodes = match scan_source(code) {
            Ok(nodes) => nodes,
            Err(e) => {
                return SecurityReport {
                    verdict: SecurityVerdict::Fail,
                    issues: vec![SecurityIssue {
                        severity: Severity::Critical,
                        message: format!("Syntax error: {}", e.message),
                        line: e.line,
                    }],
                }
            }
        };

        let mut issues = Vec::new();
        for node in &nodes {
            self.check_node(node, &mut issues);
        }

        let has_critical = issues.iter().any(|i| i.severity == Severity::Critical);
        let has_warning = issues.iter().any(|i| i.severity == Severity::Warning);
        let verdict = if has_critical {
            SecurityVerdict::Fail
        } else if has_warning {
            SecurityVerdict::Warning
        } else {
            SecurityVerdict::Pass
        };

        SecurityReport { verdict, issues }
    }

    fn check_node(&self, node: &SyntaxNode, issues: &mut Vec<SecurityIssue>) {
        match node {
            SyntaxNode::Import { module, line } => {
                let root = module.split('.').next().unwrap_or(module);
                if self.blocked_imports.contains(module) || self.blocked_imports.contains(root) {
                    issues.push(SecurityIssue {
                        severity: Severity::Critical,
                        message: format!("Blocked import: '{module}'"),
                        line: *line,
                    });
                }
            }
            SyntaxNode::Call { name, line } => {
                if DANGEROUS_BUILTINS.contains(name.as_str()) {
                    issues.push(SecurityIssue {
                        severity: Severity::Critical,
                        message: format!("Dangerous built-in call: '{name}()'"),
                        line: *line,
                    });
                }
            }
            SyntaxNode::AttributeCall { attr, line } => {
                if DANGEROUS_ATTRS.contains(attr.as_str()) {
                    issues.push(SecurityIssue {
                        severity: Severity::Critical,
                        message: format!("Dangerous attribute call: '.{attr}()'"),
                        line: *line,
                    });
                }
            }
            SyntaxNode::Attribute { attr, line } => {
                if DANGEROUS_ATTRS.contains(attr.as_str()) {
                    issues.push(SecurityIssue {
                        severity: Severity::Warning,
                        message: format!("Suspicious attribute access: '.{attr}'"),
                        line: *line,
                    });
                }
            }
            SyntaxNode::FileOpen { mode, line } => {
                if mode.contains('w') || mode.contains('a') {
                    issues.push(SecurityIssue {
                        severity: Severity::Warning,
                        message: "File write operation detected".to_string(),
                        line: *line,
                    });
                }
            }
            SyntaxNode::Definition { .. } => {}
        }
    }
}

/// Scan failure: malformed source that cannot be lowered into nodes.
#[derive(Debug, Clone)]
pub struct ScanError {
    pub message: String,
    pub line: usize,
}

static RE_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*import\s+([\w\.]+(?:\s*,\s*[\w\.]+)*)").unwrap());
static RE_FROM_IMPORT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*from\s+([\w\.]+)\s+import\b").unwrap());
static RE_DEFINITION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:async\s+)?(?:def|class)\s+(\w+)").unwrap());
static RE_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?:^|[^\w.])([A-Za-z_]\w*)\s*\(").unwrap());
static RE_ATTR_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z_]\w*)\s*\(").unwrap());
static RE_ATTR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.([A-Za-z_]\w*)\b").unwrap());
static RE_OPEN_MODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?:^|[^\w.])open\s*\([^)]*,\s*['"]([a-z+]+)['"]"#).unwrap());

/// Lower source into a flat node stream. Comments and string literals are
/// removed first so their contents never produce findings; unbalanced
/// delimiters or an unterminated string are a scan failure. The one place
/// the original text is consulted again is the `open` mode argument,
/// which is itself a string literal.
pub fn scan_source(code: &str) -> Result<Vec<SyntaxNode>, ScanError> {
    let stripped = strip_strings_and_comments(code)?;
    check_balanced(&stripped)?;

    let raw_lines: Vec<&str> = code.lines().collect();
    let mut nodes = Vec::new();
    for (idx, line) in stripped.lines().enumerate() {
        let lineno = idx + 1;
        let raw_line = raw_lines.get(idx).copied().unwrap_or("");

        // No `continue` after an import match: a line like
        // `import os; os.system(...)` still gets its calls scanned.
        if let Some(caps) = RE_IMPORT.captures(line) {
            for module in caps[1].split(',') {
                nodes.push(SyntaxNode::Import {
                    module: module.trim().to_string(),
                    line: lineno,
                });
            }
        } else if let Some(caps) = RE_FROM_IMPORT.captures(line) {
            nodes.push(SyntaxNode::Import {
                module: caps[1].to_string(),
                line: lineno,
            });
        }

        // A definition line still gets scanned for calls in default args,
        // but the defined name itself is not a call.
        let mut scan_line = line.to_string();
        if let Some(caps) = RE_DEFINITION.captures(line) {
            nodes.push(SyntaxNode::Definition {
                name: caps[1].to_string(),
                line: lineno,
            });
            scan_line = RE_DEFINITION.replace(line, " ").to_string();
        }

        for caps in RE_CALL.captures_iter(&scan_line) {
            let name = caps[1].to_string();
            if name == "open" {
                // The mode is a string literal, so it only survives in the
                // raw line.
                if let Some(mode) = RE_OPEN_MODE.captures(raw_line) {
                    nodes.push(SyntaxNode::FileOpen {
                        mode: mode[1].to_string(),
                        line: lineno,
                    });
                    continue;
                }
            }
            nodes.push(SyntaxNode::Call { name, line: lineno });
        }

        let mut attr_call_spans: Vec<(usize, usize)> = Vec::new();
        for caps in RE_ATTR_CALL.captures_iter(&scan_line) {
            if let Some(m) = caps.get(1) {
                attr_call_spans.push((m.start(), m.end()));
                nodes.push(SyntaxNode::AttributeCall {
                    attr: m.as_str().to_string(),
                    line: lineno,
                });
            }
        }
        for caps in RE_ATTR.captures_iter(&scan_line) {
            let Some(m) = caps.get(1) else { continue };
            // Skip attributes already recorded as calls
            if attr_call_spans.iter().any(|&(s, e)| s == m.start() && e == m.end()) {
                continue;
            }
            nodes.push(SyntaxNode::Attribute {
                attr: m.as_str().to_string(),
                line: lineno,
            });
        }
    }

    Ok(nodes)
}

/// Replace string literal contents with spaces and drop comments, keeping
/// line structure intact.
fn strip_strings_and_comments(code: &str) -> Result<String, ScanError> {
    let mut out = String::with_capacity(code.len());
    let chars: Vec<char> = code.chars().collect();
    let mut i = 0;
    let mut lineno = 1;
    let mut in_string: Option<(char, bool)> = None; // (quote, triple)

    while i < chars.len() {
        let c = chars[i];
        if c == '\n' {
            lineno += 1;
            // Single-quoted strings do not span lines
            if let Some((q, false)) = in_string {
                return Err(ScanError {
                    message: format!("unterminated string (quote {q})"),
                    line: lineno - 1,
                });
            }
            out.push('\n');
            i += 1;
            continue;
        }

        match in_string {
            Some((quote, triple)) => {
                if c == '\\' {
                    // A continuation keeps line numbers aligned with the
                    // original source.
                    if i + 1 < chars.len() && chars[i + 1] == '\n' {
                        lineno += 1;
                        out.push('\n');
                    }
                    i += 2;
                    continue;
                }
                if c == quote {
                    if triple {
                        if i + 2 < chars.len() && chars[i + 1] == quote && chars[i + 2] == quote {
                            in_string = None;
                            i += 3;
                            continue;
                        }
                    } else {
                        in_string = None;
                        i += 1;
                        continue;
                    }
                }
                out.push(' ');
                i += 1;
            }
            None => {
                if c == '#' {
                    while i < chars.len() && chars[i] != '\n' {
                        i += 1;
                    }
                } else if c == '\'' || c == '"' {
                    let triple =
                        i + 2 < chars.len() && chars[i + 1] == c && chars[i + 2] == c;
                    in_string = Some((c, triple));
                    i += if triple { 3 } else { 1 };
                } else {
                    out.push(c);
                    i += 1;
                }
            }
        }
    }

    if let Some((q, _)) = in_string {
        return Err(ScanError {
            message: format!("unterminated string (quote {q})"),
            line: lineno,
        });
    }

    Ok(out)
}

fn check_balanced(stripped: &str) -> Result<(), ScanError> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (idx, line) in stripped.lines().enumerate() {
        for c in line.chars() {
            match c {
                '(' | '[' | '{' => stack.push((c, idx + 1)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        _ => {
                            return Err(ScanError {
                                message: format!("unbalanced '{c}'"),
                                line: idx + 1,
                            })
                        }
                    }
                }
                _ => {}
            }
        }
    }
    if let Some((open, line)) = stack.pop() {
        return Err(ScanError {
            message: format!("unclosed '{open}'"),
            line,
        });
    }
    Ok(())
}
