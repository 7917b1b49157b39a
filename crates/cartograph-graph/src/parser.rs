//! Pattern-based symbol, import, and call-site extraction.
//!
//! Parsing is line-oriented regex matching, not a syntax tree. It never fails:
//! constructs that do not match a pattern are simply absent from the output.
//!
//! Known gaps: aliased imports (`import { a as b }`) are recorded under their
//! original name, re-exports (`export { x } from`) are not imports, calls made
//! through computed properties (`obj[name]()`) are invisible, and decorated
//! declarations are seen only when the declaration itself sits on its own line.

use std::collections::HashSet;
use std::sync::OnceLock;

use cartograph_core::NodeType;
use regex::Regex;

/// Source language family, detected from the file extension.
///
/// # Examples
///
/// ```
/// use cartograph_graph::parser::Language;
///
/// assert_eq!(Language::from_path("src/app.tsx"), Some(Language::TypeScript));
/// assert_eq!(Language::from_path("lib/util.mjs"), Some(Language::JavaScript));
/// assert_eq!(Language::from_path("pkg/main.py"), Some(Language::Python));
/// assert_eq!(Language::from_path("README.md"), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    TypeScript,
    JavaScript,
    Python,
}

impl Language {
    /// Detect language from a path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        let file_name = path.rsplit('/').next().unwrap_or(path);
        let (_, ext) = file_name.rsplit_once('.')?;
        match ext {
            "ts" | "tsx" | "mts" | "cts" => Some(Language::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Language::JavaScript),
            "py" => Some(Language::Python),
            _ => None,
        }
    }

    /// Lower-case name stored on nodes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::TypeScript => "typescript",
            Language::JavaScript => "javascript",
            Language::Python => "python",
        }
    }

    fn is_script(&self) -> bool {
        matches!(self, Language::TypeScript | Language::JavaScript)
    }
}

/// A declared symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedSymbol {
    pub name: String,
    pub kind: NodeType,
    /// Declaration line (1-based).
    pub line_start: u32,
    /// Estimated closing line (1-based).
    pub line_end: u32,
    /// Named supertypes (`extends`, or Python base classes).
    pub extends: Vec<String>,
    /// Named interfaces (`implements`).
    pub implements: Vec<String>,
}

/// One import statement.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportStatement {
    /// Names bound by the statement (empty for side-effect imports).
    pub names: Vec<String>,
    /// Module path as written (`./util`, `..models`, `pkg.mod`).
    pub module: String,
    pub line: u32,
}

/// A function or method invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct CallSite {
    /// Called identifier (the last segment for `a.b.c()`).
    pub callee: String,
    pub line: u32,
}

/// Everything extracted from one file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFile {
    pub symbols: Vec<ParsedSymbol>,
    pub imports: Vec<ImportStatement>,
    pub calls: Vec<CallSite>,
}

/// Parse one file's text. Unknown extensions yield an empty result.
///
/// # Examples
///
/// ```
/// use cartograph_graph::parser::parse;
///
/// let source = "import { bar } from './b';\n\nexport function foo() {\n  return bar();\n}\n";
/// let parsed = parse(source, "src/a.ts");
/// assert_eq!(parsed.symbols[0].name, "foo");
/// assert_eq!(parsed.symbols[0].line_start, 3);
/// assert_eq!(parsed.imports[0].names, vec!["bar"]);
/// assert_eq!(parsed.calls[0].callee, "bar");
/// assert_eq!(parsed.calls[0].line, 4);
/// ```
pub fn parse(content: &str, file_path: &str) -> ParsedFile {
    let Some(language) = Language::from_path(file_path) else {
        return ParsedFile::default();
    };
    let lines: Vec<&str> = content.lines().collect();

    let symbols = if language.is_script() {
        script_symbols(&lines)
    } else {
        python_symbols(&lines)
    };
    let imports = if language.is_script() {
        script_imports(content)
    } else {
        python_imports(content)
    };
    let calls = call_sites(&lines, &symbols, language);

    ParsedFile {
        symbols,
        imports,
        calls,
    }
}

struct ScriptPatterns {
    function: Regex,
    arrow: Regex,
    class: Regex,
    interface: Regex,
    type_alias: Regex,
    variable: Regex,
    method: Regex,
    method_arrow: Regex,
    extends: Regex,
    implements: Regex,
    import_from: Regex,
    import_bare: Regex,
    require: Regex,
}

fn script_patterns() -> &'static ScriptPatterns {
    static PATTERNS: OnceLock<ScriptPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ScriptPatterns {
        function: compile(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*[<(]",
        ),
        arrow: compile(
            r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?(?:function\b|\([^)]*\)\s*(?::[^=]+)?=>|[A-Za-z_$][\w$]*\s*=>|\($)",
        ),
        class: compile(
            r"^\s*(?:export\s+)?(?:default\s+)?(?:abstract\s+)?class\s+([A-Za-z_$][\w$]*)",
        ),
        interface: compile(r"^\s*(?:export\s+)?(?:declare\s+)?interface\s+([A-Za-z_$][\w$]*)"),
        type_alias: compile(
            r"^\s*(?:export\s+)?(?:declare\s+)?type\s+([A-Za-z_$][\w$]*)\s*(?:<[^=]*>)?\s*=",
        ),
        variable: compile(r"^(?:export\s+)(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*(?::[^=]+)?="),
        method: compile(
            r"^\s+(?:(?:public|private|protected|static|async|override|readonly|get|set)\s+)*([A-Za-z_$][\w$]*)\s*(?:<[^>]*>)?\s*\([^;]*\)\s*(?::\s*[^{;]+)?\{\s*$",
        ),
        method_arrow: compile(
            r"^\s+(?:(?:public|private|protected|static|readonly)\s+)*([A-Za-z_$][\w$]*)\s*(?::[^=]+)?=\s*(?:async\s+)?\([^)]*\)\s*(?::[^=]+)?=>",
        ),
        extends: compile(r"\bextends\s+([A-Za-z_$][\w$.]*(?:\s*<[^>]*>)?(?:\s*,\s*[A-Za-z_$][\w$.]*(?:\s*<[^>]*>)?)*)"),
        implements: compile(r"\bimplements\s+([A-Za-z_$][\w$.,\s<>]*?)\s*\{?\s*$"),
        import_from: compile(r#"(?m)^\s*import\s+([^;'"]*?)\s+from\s+['"]([^'"]+)['"]"#),
        import_bare: compile(r#"(?m)^\s*import\s+['"]([^'"]+)['"]"#),
        require: compile(
            r#"(?m)^\s*(?:const|let|var)\s+(\{[^}]*\}|[A-Za-z_$][\w$]*)\s*=\s*require\(\s*['"]([^'"]+)['"]\s*\)"#,
        ),
    })
}

struct PythonPatterns {
    def: Regex,
    class: Regex,
    constant: Regex,
    from_import: Regex,
    import: Regex,
}

fn python_patterns() -> &'static PythonPatterns {
    static PATTERNS: OnceLock<PythonPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| PythonPatterns {
        def: compile(r"^(\s*)(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\("),
        class: compile(r"^(\s*)class\s+([A-Za-z_]\w*)\s*(?:\(([^)]*)\))?\s*:"),
        constant: compile(r"^([A-Z][A-Z0-9_]+)\s*(?::[^=]+)?=[^=]"),
        from_import: compile(r"(?m)^\s*from\s+([.\w]+)\s+import\s+(\([^)]*\)|[^\n#]+)"),
        import: compile(r"(?m)^\s*import\s+([\w.]+(?:\s+as\s+\w+)?(?:\s*,\s*[\w.]+(?:\s+as\s+\w+)?)*)"),
    })
}

fn call_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"([A-Za-z_$][\w$]*)\s*\("))
}

fn string_literal_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        compile(r#""(?:[^"\\]|\\.)*"|'(?:[^'\\]|\\.)*'|`(?:[^`\\]|\\.)*`"#)
    })
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static pattern is valid")
}

const SCRIPT_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "function", "typeof", "super", "import",
    "require", "await", "new", "delete", "void", "yield", "constructor", "else", "do", "try",
    "with", "in", "of", "instanceof",
];

const PYTHON_KEYWORDS: &[&str] = &[
    "if", "elif", "for", "while", "return", "def", "class", "and", "or", "not", "in", "is",
    "lambda", "with", "assert", "yield", "await", "print", "except", "raise", "del", "super",
    "self",
];

fn script_symbols(lines: &[&str]) -> Vec<ParsedSymbol> {
    let p = script_patterns();
    let mut symbols = Vec::new();
    let mut seen: HashSet<(NodeType, String)> = HashSet::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let found = if let Some(c) = p.class.captures(line) {
            let name = c[1].to_string();
            let tail = &line[c.get(0).map_or(0, |m| m.end())..];
            let extends = p
                .extends
                .captures(tail)
                .map(|e| split_type_list(&e[1]))
                .unwrap_or_default();
            let implements = p
                .implements
                .captures(tail)
                .map(|e| split_type_list(&e[1]))
                .unwrap_or_default();
            Some((NodeType::Class, name, extends, implements))
        } else if let Some(c) = p.interface.captures(line) {
            let name = c[1].to_string();
            let tail = &line[c.get(0).map_or(0, |m| m.end())..];
            let extends = p
                .extends
                .captures(tail)
                .map(|e| split_type_list(&e[1]))
                .unwrap_or_default();
            Some((NodeType::Interface, name, extends, Vec::new()))
        } else if let Some(c) = p.function.captures(line) {
            Some((NodeType::Function, c[1].to_string(), Vec::new(), Vec::new()))
        } else if let Some(c) = p.arrow.captures(line) {
            Some((NodeType::Function, c[1].to_string(), Vec::new(), Vec::new()))
        } else if let Some(c) = p.type_alias.captures(line) {
            Some((NodeType::Type, c[1].to_string(), Vec::new(), Vec::new()))
        } else if let Some(c) = p.variable.captures(line) {
            Some((NodeType::Variable, c[1].to_string(), Vec::new(), Vec::new()))
        } else {
            None
        };

        if let Some((kind, name, extends, implements)) = found {
            if seen.insert((kind, name.clone())) {
                let line_end = brace_block_end(lines, idx);
                symbols.push(ParsedSymbol {
                    name,
                    kind,
                    line_start: line_no,
                    line_end,
                    extends,
                    implements,
                });
            }
        }
    }

    // Methods are only recognized inside a class body.
    let class_ranges: Vec<(u32, u32)> = symbols
        .iter()
        .filter(|s| s.kind == NodeType::Class)
        .map(|s| (s.line_start, s.line_end))
        .collect();
    let mut methods = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let inside_class = class_ranges
            .iter()
            .any(|&(start, end)| line_no > start && line_no < end);
        if !inside_class {
            continue;
        }
        let name = p
            .method
            .captures(line)
            .or_else(|| p.method_arrow.captures(line))
            .map(|c| c[1].to_string());
        let Some(name) = name else {
            continue;
        };
        if SCRIPT_KEYWORDS.contains(&name.as_str()) {
            continue;
        }
        if seen.insert((NodeType::Function, name.clone())) {
            methods.push(ParsedSymbol {
                name,
                kind: NodeType::Function,
                line_start: line_no,
                line_end: brace_block_end(lines, idx),
                extends: Vec::new(),
                implements: Vec::new(),
            });
        }
    }
    symbols.extend(methods);
    symbols.sort_by_key(|s| s.line_start);
    symbols
}

fn python_symbols(lines: &[&str]) -> Vec<ParsedSymbol> {
    let p = python_patterns();
    let mut symbols = Vec::new();
    let mut seen: HashSet<(NodeType, String)> = HashSet::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let found = if let Some(c) = p.class.captures(line) {
            let indent = c[1].len();
            let bases = c
                .get(3)
                .map(|b| {
                    b.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty() && !s.contains('='))
                        .map(|s| s.rsplit('.').next().unwrap_or(s).to_string())
                        .filter(|s| s != "object")
                        .collect::<Vec<String>>()
                })
                .unwrap_or_default();
            Some((NodeType::Class, c[2].to_string(), indent, bases))
        } else if let Some(c) = p.def.captures(line) {
            Some((NodeType::Function, c[2].to_string(), c[1].len(), Vec::new()))
        } else {
            p.constant
                .captures(line)
                .map(|c| (NodeType::Variable, c[1].to_string(), 0, Vec::new()))
        };

        if let Some((kind, name, indent, extends)) = found {
            if seen.insert((kind, name.clone())) {
                let line_end = if kind == NodeType::Variable {
                    line_no
                } else {
                    indented_block_end(lines, idx, indent)
                };
                symbols.push(ParsedSymbol {
                    name,
                    kind,
                    line_start: line_no,
                    line_end,
                    extends,
                    implements: Vec::new(),
                });
            }
        }
    }
    symbols
}

/// Split `A, B<T>, ns.C` into bare type names.
fn split_type_list(list: &str) -> Vec<String> {
    let mut depth = 0usize;
    let mut current = String::new();
    let mut names = Vec::new();
    for ch in list.chars() {
        match ch {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                names.push(std::mem::take(&mut current));
                continue;
            }
            _ if depth == 0 => current.push(ch),
            _ => {}
        }
    }
    names.push(current);
    names
        .into_iter()
        .map(|n| {
            let n = n.trim();
            n.rsplit('.').next().unwrap_or(n).trim().to_string()
        })
        .filter(|n| !n.is_empty())
        .collect()
}

/// Estimate the closing line of a brace-delimited declaration starting at `start`.
///
/// If a `;` terminates the statement before any `{` opens, the statement ends there.
fn brace_block_end(lines: &[&str], start: usize) -> u32 {
    let mut depth = 0i32;
    let mut parens = 0i32;
    let mut opened = false;
    for (offset, line) in lines[start..].iter().enumerate() {
        let line = strip_strings(line);
        for ch in line.chars() {
            match ch {
                '(' => parens += 1,
                ')' => parens -= 1,
                '{' => {
                    depth += 1;
                    opened = true;
                }
                '}' => {
                    depth -= 1;
                    if opened && depth <= 0 {
                        return (start + offset) as u32 + 1;
                    }
                }
                ';' if !opened => return (start + offset) as u32 + 1,
                _ => {}
            }
        }
        // Brace-less single-line arrow functions and aliases end on their own line.
        if !opened && parens <= 0 && !line.trim_end().ends_with(['=', '(', ',', '>', '|', '&'])
        {
            return (start + offset) as u32 + 1;
        }
    }
    lines.len() as u32
}

/// Estimate the last line of a Python block whose header has `indent` leading whitespace.
fn indented_block_end(lines: &[&str], start: usize, indent: usize) -> u32 {
    let mut end = start;
    for (offset, line) in lines[start + 1..].iter().enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        if line.len() - trimmed.len() <= indent {
            break;
        }
        end = start + 1 + offset;
    }
    end as u32 + 1
}

fn script_imports(content: &str) -> Vec<ImportStatement> {
    let p = script_patterns();
    let mut imports = Vec::new();

    for c in p.import_from.captures_iter(content) {
        let start = c.get(0).map_or(0, |m| m.start());
        imports.push(ImportStatement {
            names: script_import_names(&c[1]),
            module: c[2].to_string(),
            line: line_of(content, start),
        });
    }
    for c in p.import_bare.captures_iter(content) {
        let start = c.get(0).map_or(0, |m| m.start());
        imports.push(ImportStatement {
            names: Vec::new(),
            module: c[1].to_string(),
            line: line_of(content, start),
        });
    }
    for c in p.require.captures_iter(content) {
        let start = c.get(0).map_or(0, |m| m.start());
        imports.push(ImportStatement {
            names: script_import_names(&c[1]),
            module: c[2].to_string(),
            line: line_of(content, start),
        });
    }

    imports.sort_by_key(|i| i.line);
    imports
}

/// Names bound by an import clause such as `Def, { a, b as c }` or `* as ns`.
fn script_import_names(clause: &str) -> Vec<String> {
    let clause = clause.trim();
    let clause = clause.strip_prefix("type ").unwrap_or(clause);
    let mut names = Vec::new();

    let (outside, inside) = match (clause.find('{'), clause.rfind('}')) {
        (Some(open), Some(close)) if open < close => (
            format!("{}{}", &clause[..open], &clause[close + 1..]),
            Some(&clause[open + 1..close]),
        ),
        _ => (clause.to_string(), None),
    };

    for part in outside.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let name = match part.strip_prefix("* as ") {
            Some(ns) => ns.trim(),
            None => part,
        };
        if is_identifier(name) {
            names.push(name.to_string());
        }
    }
    if let Some(inside) = inside {
        for part in inside.split(',') {
            let part = part.trim();
            let part = part.strip_prefix("type ").unwrap_or(part);
            let original = part.split_whitespace().next().unwrap_or("");
            let original = original.split(':').next().unwrap_or("");
            if is_identifier(original) {
                names.push(original.to_string());
            }
        }
    }
    names
}

fn python_imports(content: &str) -> Vec<ImportStatement> {
    let p = python_patterns();
    let mut imports = Vec::new();

    for c in p.from_import.captures_iter(content) {
        let start = c.get(0).map_or(0, |m| m.start());
        let list = c[2].trim().trim_start_matches('(').trim_end_matches(')');
        let names = list
            .split(',')
            .filter_map(|part| part.split_whitespace().next())
            .filter(|name| is_identifier(name))
            .map(str::to_string)
            .collect();
        imports.push(ImportStatement {
            names,
            module: c[1].to_string(),
            line: line_of(content, start),
        });
    }
    for c in p.import.captures_iter(content) {
        let start = c.get(0).map_or(0, |m| m.start());
        let line = line_of(content, start);
        for part in c[1].split(',') {
            let mut words = part.split_whitespace();
            let Some(module) = words.next() else {
                continue;
            };
            let bound = match (words.next(), words.next()) {
                (Some("as"), Some(alias)) => alias.to_string(),
                _ => module.rsplit('.').next().unwrap_or(module).to_string(),
            };
            imports.push(ImportStatement {
                names: vec![bound],
                module: module.to_string(),
                line,
            });
        }
    }

    imports.sort_by_key(|i| i.line);
    imports
}

fn call_sites(lines: &[&str], symbols: &[ParsedSymbol], language: Language) -> Vec<CallSite> {
    let keywords = if language.is_script() {
        SCRIPT_KEYWORDS
    } else {
        PYTHON_KEYWORDS
    };
    let comment_prefixes: &[&str] = if language.is_script() {
        &["//", "/*", "*"]
    } else {
        &["#"]
    };

    let mut calls = Vec::new();
    for (idx, raw) in lines.iter().enumerate() {
        let line_no = idx as u32 + 1;
        let trimmed = raw.trim_start();
        if comment_prefixes.iter().any(|p| trimmed.starts_with(p)) {
            continue;
        }
        if trimmed.starts_with("import ") || trimmed.starts_with("from ") {
            continue;
        }
        let code = strip_strings(raw);
        let code = match code.find(if language.is_script() { "//" } else { "#" }) {
            Some(pos) => &code[..pos],
            None => &code[..],
        };
        // Start of the name a class method declaration introduces on this
        // line. Same-named methods of other classes are not symbols, so the
        // symbol list alone cannot tell a declaration from a call.
        let method_decl = if language.is_script() {
            let p = script_patterns();
            p.method
                .captures(code)
                .or_else(|| p.method_arrow.captures(code))
                .and_then(|m| m.get(1))
                .map(|m| m.start())
        } else {
            None
        };

        for c in call_pattern().captures_iter(code) {
            let callee = &c[1];
            if keywords.contains(&callee) {
                continue;
            }
            if method_decl.is_some() && method_decl == c.get(1).map(|m| m.start()) {
                continue;
            }
            // The declaration line of a symbol names it but does not call it.
            let declares_here = symbols
                .iter()
                .any(|s| s.line_start == line_no && s.name == callee);
            if declares_here {
                continue;
            }
            let prefix = &code[..c.get(1).map_or(0, |m| m.start())];
            if prefix.trim_end().ends_with("function") || prefix.trim_end().ends_with("def") {
                continue;
            }
            calls.push(CallSite {
                callee: callee.to_string(),
                line: line_no,
            });
        }
    }
    calls
}

fn strip_strings(line: &str) -> String {
    string_literal_pattern().replace_all(line, "\"\"").into_owned()
}

fn line_of(content: &str, byte_offset: usize) -> u32 {
    let leading_ws = content[byte_offset..]
        .chars()
        .take_while(|c| c.is_whitespace())
        .filter(|&c| c == '\n')
        .count();
    (content[..byte_offset].matches('\n').count() + leading_ws) as u32 + 1
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}
