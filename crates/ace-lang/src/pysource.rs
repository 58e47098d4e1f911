//! Bundled Python source model.
//!
//! A line-oriented parser, not a full grammar: it groups physical lines into
//! logical lines by tracking bracket depth, string state, and backslash
//! continuations, classifies each logical line (import / def / class /
//! statement / comment / blank), and validates the structural properties the
//! guard depends on — balanced brackets, terminated strings, block headers
//! ending in `:`, and indentation that only deepens after a block header.
//!
//! Raw text is preserved per node, so re-emission is byte-identical. The
//! canonical hash covers significant nodes only, with in-line comments and
//! trailing whitespace normalized away, which is what lets whitespace-level
//! codemods pass the guard's AST-hash layer while literal changes fail it.

use std::path::Path;

use ace_core::fingerprint::ContentHasher;
use ace_core::traits::{
    EmissionFidelity, LanguageParser, NodeKind, ParseDiagnostic, ParseTree, SymbolCounts,
    SyntaxNode,
};

/// Keywords that open an indented block and must end their logical line
/// with `:`.
const BLOCK_KEYWORDS: &[&str] = &[
    "def", "class", "if", "elif", "else", "for", "while", "try", "except", "finally", "with",
];

/// The bundled `LanguageParser` implementation for Python sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct PySourceParser;

impl LanguageParser for PySourceParser {
    fn language(&self) -> &'static str {
        "python"
    }

    fn handles(&self, path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == "py")
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParseTree, ParseDiagnostic> {
        let source = std::str::from_utf8(bytes).map_err(|err| ParseDiagnostic {
            line: 1,
            detail: format!("source is not valid UTF-8: {err}"),
        })?;
        parse_source(source)
    }

    fn reemit(&self, tree: &ParseTree) -> Vec<u8> {
        let mut out = String::new();
        for (idx, node) in tree.nodes.iter().enumerate() {
            if idx > 0 {
                out.push_str(tree.newline);
            }
            out.push_str(&node.text);
        }
        if tree.had_trailing_newline && !tree.nodes.is_empty() {
            out.push_str(tree.newline);
        }
        out.into_bytes()
    }

    fn canonical_hash(&self, tree: &ParseTree) -> [u8; 32] {
        let mut seed = String::new();
        for node in &tree.nodes {
            if !node.kind.is_significant() {
                continue;
            }
            seed.push_str(kind_tag(node.kind));
            seed.push('|');
            seed.push_str(&node.indent.to_string());
            seed.push('|');
            seed.push_str(&normalize_logical_text(&node.text));
            seed.push('\n');
        }
        ContentHasher::hash(seed.as_bytes())
    }

    fn count_symbols(&self, tree: &ParseTree) -> SymbolCounts {
        let mut counts = SymbolCounts::default();
        for node in &tree.nodes {
            match node.kind {
                NodeKind::Function => counts.functions += 1,
                NodeKind::Class => counts.classes += 1,
                NodeKind::Import => {
                    counts.imports += node
                        .name
                        .as_deref()
                        .map_or(0, |names| names.split(',').filter(|n| !n.trim().is_empty()).count());
                }
                _ => {}
            }
        }
        counts
    }

    fn emission_fidelity(&self) -> EmissionFidelity {
        EmissionFidelity::ByteIdentical
    }
}

fn kind_tag(kind: NodeKind) -> &'static str {
    match kind {
        NodeKind::Module => "module",
        NodeKind::Function => "function",
        NodeKind::Class => "class",
        NodeKind::Import => "import",
        NodeKind::Statement => "statement",
        NodeKind::Comment => "comment",
        NodeKind::Blank => "blank",
    }
}

/// Per-logical-line scan state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StringState {
    None,
    /// Inside a single-quoted or double-quoted string.
    Short(char),
    /// Inside a triple-quoted string with the given quote char.
    Triple(char),
}

fn parse_source(source: &str) -> Result<ParseTree, ParseDiagnostic> {
    let newline: &'static str = if source.contains("\r\n") { "\r\n" } else { "\n" };
    let had_trailing_newline = source.ends_with('\n');

    let physical: Vec<&str> = if source.is_empty() {
        Vec::new()
    } else {
        let mut lines: Vec<&str> = source.split(newline).collect();
        if had_trailing_newline {
            lines.pop();
        }
        lines
    };

    let mut nodes: Vec<SyntaxNode> = Vec::new();
    // (indent, line) stack of enclosing block headers for the indent check
    let mut indent_stack: Vec<usize> = vec![0];
    let mut prev_opened_block = false;
    let mut prev_indent = 0usize;

    let mut i = 0;
    while i < physical.len() {
        let start_line = i + 1;
        let mut depth: i32 = 0;
        let mut string_state = StringState::None;
        let mut open_line = start_line;
        let mut text = String::new();
        let mut continued;

        loop {
            let line = physical[i];
            if !text.is_empty() {
                text.push_str(newline);
            }
            text.push_str(line);

            let (new_depth, new_state, backslash) =
                scan_physical_line(line, depth, string_state, open_line)?;
            if new_depth > depth && depth == 0 {
                open_line = i + 1;
            }
            depth = new_depth;
            string_state = new_state;
            continued = depth > 0 || matches!(string_state, StringState::Triple(_)) || backslash;

            i += 1;
            if !continued || i >= physical.len() {
                break;
            }
        }

        if depth > 0 {
            return Err(ParseDiagnostic {
                line: open_line,
                detail: "unbalanced bracket: opened but never closed".into(),
            });
        }
        if let StringState::Triple(quote) = string_state {
            return Err(ParseDiagnostic {
                line: start_line,
                detail: format!("unterminated triple-quoted string ({quote}{quote}{quote})"),
            });
        }
        if let StringState::Short(quote) = string_state {
            return Err(ParseDiagnostic {
                line: start_line,
                detail: format!("unterminated string literal ({quote})"),
            });
        }

        let node = classify_logical_line(&text, start_line);

        if node.kind.is_significant() {
            // Indentation may only deepen immediately after a block header.
            if node.indent > prev_indent && !prev_opened_block {
                return Err(ParseDiagnostic {
                    line: start_line,
                    detail: "unexpected indent: no enclosing block header".into(),
                });
            }
            while let Some(&top) = indent_stack.last() {
                if node.indent < top && indent_stack.len() > 1 {
                    indent_stack.pop();
                } else {
                    break;
                }
            }
            if node.indent > prev_indent {
                indent_stack.push(node.indent);
            }

            let stripped = strip_inline_comment(&text);
            // one-liner blocks (`if x: pass`) carry their colon mid-line
            if starts_with_block_keyword(&stripped) && !stripped.contains(':') {
                return Err(ParseDiagnostic {
                    line: start_line,
                    detail: "block header does not end with ':'".into(),
                });
            }
            // any colon-terminated line may open an indented suite
            // (covers match/case and soft keywords without naming them)
            prev_opened_block = stripped.trim_end().ends_with(':');
            prev_indent = node.indent;
        }

        nodes.push(node);
    }

    Ok(ParseTree {
        nodes,
        newline,
        had_trailing_newline,
    })
}

/// Scan one physical line, updating bracket depth and string state.
/// Returns `(depth, string_state, ends_with_backslash_continuation)`.
fn scan_physical_line(
    line: &str,
    mut depth: i32,
    mut state: StringState,
    open_line: usize,
) -> Result<(i32, StringState, bool), ParseDiagnostic> {
    let chars: Vec<char> = line.chars().collect();
    let mut idx = 0;

    while idx < chars.len() {
        let c = chars[idx];
        match state {
            StringState::Short(quote) => {
                if c == '\\' {
                    idx += 2;
                    continue;
                }
                if c == quote {
                    state = StringState::None;
                }
            }
            StringState::Triple(quote) => {
                if c == '\\' {
                    idx += 2;
                    continue;
                }
                if c == quote && chars.get(idx + 1) == Some(&quote) && chars.get(idx + 2) == Some(&quote) {
                    state = StringState::None;
                    idx += 3;
                    continue;
                }
            }
            StringState::None => match c {
                '#' => break,
                '\'' | '"' => {
                    if chars.get(idx + 1) == Some(&c) && chars.get(idx + 2) == Some(&c) {
                        state = StringState::Triple(c);
                        idx += 3;
                        continue;
                    }
                    state = StringState::Short(c);
                }
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    depth -= 1;
                    if depth < 0 {
                        return Err(ParseDiagnostic {
                            line: open_line,
                            detail: format!("unbalanced bracket: unexpected '{c}'"),
                        });
                    }
                }
                _ => {}
            },
        }
        idx += 1;
    }

    // A short string left open at end of line is only legal with a trailing
    // backslash continuation.
    let backslash = matches!(state, StringState::None | StringState::Short(_))
        && line.trim_end().ends_with('\\');
    if let StringState::Short(quote) = state {
        if !backslash {
            return Err(ParseDiagnostic {
                line: open_line,
                detail: format!("unterminated string literal ({quote})"),
            });
        }
    }
    Ok((depth, state, backslash))
}

fn classify_logical_line(text: &str, start_line: usize) -> SyntaxNode {
    let first_physical = text.split(['\n', '\r']).next().unwrap_or(text);
    let trimmed = first_physical.trim_start();
    let indent = indent_width(first_physical);

    if trimmed.is_empty() {
        return node(NodeKind::Blank, None, start_line, 0, text);
    }
    if trimmed.starts_with('#') {
        return node(NodeKind::Comment, None, start_line, indent, text);
    }
    if let Some(rest) = strip_keyword(trimmed, "import") {
        let names = parse_import_names(rest);
        return node(NodeKind::Import, Some(names), start_line, indent, text);
    }
    if let Some(rest) = strip_keyword(trimmed, "from") {
        let module: String = rest.chars().take_while(|c| !c.is_whitespace()).collect();
        if !module.is_empty() {
            return node(NodeKind::Import, Some(module), start_line, indent, text);
        }
    }
    let def_rest = strip_keyword(trimmed, "def").or_else(|| {
        strip_keyword(trimmed, "async").and_then(|rest| strip_keyword(rest.trim_start(), "def"))
    });
    if let Some(rest) = def_rest {
        let name = identifier_prefix(rest.trim_start());
        if !name.is_empty() {
            return node(NodeKind::Function, Some(name), start_line, indent, text);
        }
    }
    if let Some(rest) = strip_keyword(trimmed, "class") {
        let name = identifier_prefix(rest.trim_start());
        if !name.is_empty() {
            return node(NodeKind::Class, Some(name), start_line, indent, text);
        }
    }
    node(NodeKind::Statement, None, start_line, indent, text)
}

fn node(
    kind: NodeKind,
    name: Option<String>,
    line: usize,
    indent: usize,
    text: &str,
) -> SyntaxNode {
    SyntaxNode {
        kind,
        name,
        line,
        indent,
        text: text.to_owned(),
    }
}

/// Width of leading indentation; tabs count as 8 columns like CPython's
/// tokenizer default.
fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width += 8 - (width % 8),
            _ => break,
        }
    }
    width
}

/// Strip a leading keyword followed by whitespace; `None` if absent.
fn strip_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    let rest = text.strip_prefix(keyword)?;
    if rest.starts_with(char::is_whitespace) {
        Some(rest)
    } else {
        None
    }
}

fn identifier_prefix(text: &str) -> String {
    text.chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// `import a, b as c` → `"a,b"` (aliases resolve to their source module).
fn parse_import_names(rest: &str) -> String {
    rest.split(',')
        .map(|part| {
            let part = part.trim();
            part.split_whitespace().next().unwrap_or("").to_owned()
        })
        .filter(|name| !name.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

fn starts_with_block_keyword(text: &str) -> bool {
    let trimmed = text.trim_start();
    let trimmed = trimmed.strip_prefix("async ").unwrap_or(trimmed);
    BLOCK_KEYWORDS.iter().any(|kw| {
        trimmed
            .strip_prefix(kw)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with([' ', ':', '(']))
    })
}

/// Remove an in-line comment (outside strings) and trailing whitespace from
/// each physical line of a logical line.
fn strip_inline_comment(text: &str) -> String {
    let mut out_lines = Vec::new();
    let mut state = StringState::None;
    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let chars: Vec<char> = line.chars().collect();
        let mut cut = chars.len();
        let mut idx = 0;
        while idx < chars.len() {
            let c = chars[idx];
            match state {
                StringState::Short(quote) => {
                    if c == '\\' {
                        idx += 2;
                        continue;
                    }
                    if c == quote {
                        state = StringState::None;
                    }
                }
                StringState::Triple(quote) => {
                    if c == quote
                        && chars.get(idx + 1) == Some(&quote)
                        && chars.get(idx + 2) == Some(&quote)
                    {
                        state = StringState::None;
                        idx += 3;
                        continue;
                    }
                }
                StringState::None => match c {
                    '#' => {
                        cut = idx;
                        break;
                    }
                    '\'' | '"' => {
                        if chars.get(idx + 1) == Some(&c) && chars.get(idx + 2) == Some(&c) {
                            state = StringState::Triple(c);
                            idx += 3;
                            continue;
                        }
                        state = StringState::Short(c);
                    }
                    _ => {}
                },
            }
            idx += 1;
        }
        // open short strings at EOL only occur with backslash continuations
        if matches!(state, StringState::Short(_)) {
            state = StringState::None;
        }
        let kept: String = chars[..cut].iter().collect();
        out_lines.push(kept.trim_end().to_owned());
    }
    out_lines.join("\n")
}

/// Normalized logical-line text for the canonical hash.
fn normalize_logical_text(text: &str) -> String {
    strip_inline_comment(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> ParseTree {
        PySourceParser.parse(src.as_bytes()).expect("should parse")
    }

    #[test]
    fn classifies_basic_constructs() {
        let tree = parse("import os\nfrom json import dumps\n\ndef run(x):\n    return x\n\nclass App:\n    pass\n");
        let kinds: Vec<NodeKind> = tree.nodes.iter().map(|n| n.kind).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::Import,
                NodeKind::Import,
                NodeKind::Blank,
                NodeKind::Function,
                NodeKind::Statement,
                NodeKind::Blank,
                NodeKind::Class,
                NodeKind::Statement,
            ]
        );
        assert_eq!(tree.imports(), vec!["os", "json"]);
    }

    #[test]
    fn multi_import_counts_each_module() {
        let tree = parse("import os, sys\n");
        assert_eq!(tree.imports(), vec!["os", "sys"]);
        let counts = PySourceParser.count_symbols(&tree);
        assert_eq!(counts.imports, 2);
    }

    #[test]
    fn import_alias_resolves_to_source_module() {
        let tree = parse("import numpy as np\n");
        assert_eq!(tree.imports(), vec!["numpy"]);
    }

    #[test]
    fn symbol_counts() {
        let tree = parse("import os\n\ndef a():\n    pass\n\nasync def b():\n    pass\n\nclass C:\n    def method(self):\n        pass\n");
        let counts = PySourceParser.count_symbols(&tree);
        assert_eq!(counts.functions, 3);
        assert_eq!(counts.classes, 1);
        assert_eq!(counts.imports, 1);
    }

    #[test]
    fn reemit_is_byte_identical() {
        let src = "import os\n\n\ndef f(a,\n      b):\n    return (a +\n            b)\n";
        let tree = parse(src);
        assert_eq!(PySourceParser.reemit(&tree), src.as_bytes());
    }

    #[test]
    fn reemit_preserves_missing_trailing_newline() {
        let src = "x = 1";
        let tree = parse(src);
        assert_eq!(PySourceParser.reemit(&tree), src.as_bytes());
    }

    #[test]
    fn reemit_preserves_crlf() {
        let src = "x = 1\r\ny = 2\r\n";
        let tree = parse(src);
        assert_eq!(tree.newline, "\r\n");
        assert_eq!(PySourceParser.reemit(&tree), src.as_bytes());
    }

    #[test]
    fn multiline_call_is_one_logical_line() {
        let tree = parse("result = call(\n    1,\n    2,\n)\nnext_stmt = 1\n");
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[1].line, 5);
    }

    #[test]
    fn triple_quoted_string_spans_lines() {
        let tree = parse("doc = \"\"\"\nnot # a comment\n(\n\"\"\"\nx = 1\n");
        assert_eq!(tree.nodes.len(), 2);
    }

    #[test]
    fn rejects_unbalanced_bracket() {
        let err = PySourceParser.parse(b"x = call(1, 2\n").unwrap_err();
        assert!(err.detail.contains("unbalanced bracket"));
    }

    #[test]
    fn rejects_stray_closing_bracket() {
        let err = PySourceParser.parse(b"x = 1)\n").unwrap_err();
        assert!(err.detail.contains("unexpected ')'"));
    }

    #[test]
    fn rejects_unterminated_string() {
        let err = PySourceParser.parse(b"x = 'abc\n").unwrap_err();
        assert!(err.detail.contains("unterminated string"));
    }

    #[test]
    fn rejects_unterminated_triple_string() {
        let err = PySourceParser.parse(b"x = \"\"\"abc\n").unwrap_err();
        assert!(err.detail.contains("triple-quoted"));
    }

    #[test]
    fn rejects_block_header_without_colon() {
        let err = PySourceParser.parse(b"def broken(x)\n    return x\n").unwrap_err();
        assert!(err.detail.contains("block header"));
    }

    #[test]
    fn rejects_unexpected_indent() {
        let err = PySourceParser.parse(b"x = 1\n    y = 2\n").unwrap_err();
        assert!(err.detail.contains("unexpected indent"));
    }

    #[test]
    fn accepts_indent_after_block_header() {
        assert!(PySourceParser.parse(b"if x:\n    y = 2\nz = 3\n").is_ok());
    }

    #[test]
    fn hash_ignores_comments_blank_lines_and_trailing_ws() {
        let a = parse("x = 1\ny = 2\n");
        let b = parse("x = 1  \n\n# a note\ny = 2  # trailing comment\n");
        assert_eq!(
            PySourceParser.canonical_hash(&a),
            PySourceParser.canonical_hash(&b)
        );
    }

    #[test]
    fn hash_detects_literal_change() {
        let a = parse("x = 1\n");
        let b = parse("x = 2\n");
        assert_ne!(
            PySourceParser.canonical_hash(&a),
            PySourceParser.canonical_hash(&b)
        );
    }

    #[test]
    fn hash_keeps_hash_character_inside_strings() {
        let a = parse("x = '#literal'\n");
        let b = parse("x = ''\n");
        assert_ne!(
            PySourceParser.canonical_hash(&a),
            PySourceParser.canonical_hash(&b)
        );
    }

    #[test]
    fn roundtrip_tree_is_stable() {
        let src = "import os\n\ndef f():\n    return os.name  # comment\n";
        let tree = parse(src);
        let reemitted = PySourceParser.reemit(&tree);
        let tree2 = PySourceParser.parse(&reemitted).unwrap();
        assert_eq!(tree, tree2);
    }

    #[test]
    fn handles_only_python_paths() {
        assert!(PySourceParser.handles(Path::new("src/app.py")));
        assert!(!PySourceParser.handles(Path::new("README.md")));
    }

    #[test]
    fn empty_source_parses() {
        let tree = parse("");
        assert!(tree.nodes.is_empty());
        assert_eq!(PySourceParser.reemit(&tree), b"");
    }
}
