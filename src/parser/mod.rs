//! Static parser for MongoEngine model modules.
//!
//! Python source is first folded into logical lines (bracket continuations,
//! backslash continuations and comments handled), then matched line by line
//! against a small set of conservative regexes. Class bodies are tracked by
//! indentation: only assignments at the direct body level of a top-level
//! class, or of a class nested one level inside it, are considered fields.
use crate::model::FieldKind;
use regex::Regex;

/// Target of a reference or embedded field as written in source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeExpr {
    /// Bare or dotted name, e.g. `Patient` or `patient.Patient`.
    Name(String),
    /// String literal, e.g. `'Patient'` or `'self'`.
    Literal(String),
    /// No target argument could be read.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportDecl {
    /// `from <module> import <name> [as <alias>]`; `module` keeps its leading dots.
    From { module: String, name: String, alias: Option<String> },
    /// `from <module> import *`
    Glob { module: String },
    /// `import <path> [as <alias>]`
    Module { path: String, alias: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDecl {
    pub name: String,
    pub kind: FieldKind<TypeExpr>,
    pub primary_key: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDef {
    pub name: String,
    /// `Outer.Inner` for nested classes, otherwise equal to `name`.
    pub qualname: String,
    pub outer: Option<String>,
    pub bases: Vec<String>,
    pub fields: Vec<FieldDecl>,
    pub is_abstract: bool,
    pub line: usize,
}

#[derive(Debug, Clone, Default)]
pub struct ParsedModule {
    pub name: String,
    pub is_package: bool,
    pub imports: Vec<ImportDecl>,
    pub classes: Vec<ClassDef>,
}

impl ParsedModule {
    #[must_use]
    pub fn class(&self, qualname: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.qualname == qualname)
    }

    /// Turn an import path as written here (`.x`, `..y.z`, `a.b`) into an
    /// absolute module name.
    #[must_use]
    pub fn absolute_module(&self, src: &str) -> String {
        let dots = src.chars().take_while(|&c| c == '.').count();
        if dots == 0 {
            return src.to_string();
        }
        let mut package: Vec<&str> = self.name.split('.').collect();
        if !self.is_package {
            package.pop();
        }
        for _ in 1..dots {
            package.pop();
        }
        let rest = &src[dots..];
        if !rest.is_empty() {
            package.push(rest);
        }
        package.join(".")
    }

    /// Absolute names of the modules this one may import from, in statement
    /// order. `from a import b` yields both `a.b` (if `b` is a submodule) and `a`.
    #[must_use]
    pub fn imported_modules(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for import in &self.imports {
            let names = match import {
                ImportDecl::From { module, name, .. } => {
                    let src = self.absolute_module(module);
                    let sub = if src.is_empty() { name.clone() } else { format!("{src}.{name}") };
                    vec![sub, src]
                }
                ImportDecl::Glob { module } => vec![self.absolute_module(module)],
                ImportDecl::Module { path, .. } => vec![path.clone()],
            };
            for n in names {
                if !n.is_empty() && !out.contains(&n) {
                    out.push(n);
                }
            }
        }
        out
    }
}

#[derive(Debug, Default)]
pub struct ModelParser {
    patterns: RegexPatterns,
}

#[derive(Debug)]
pub struct RegexPatterns {
    pub class_def: Regex,
    pub assignment: Regex,
    pub from_import: Regex,
    pub import_stmt: Regex,
    pub meta_abstract: Regex,
    pub dotted_name: Regex,
    pub keyword_arg: Regex,
    pub string_prefix: Regex,
}

impl RegexPatterns {
    /// # Panics
    /// Never in practice: every pattern is a literal checked by the unit tests.
    #[must_use]
    pub fn compile() -> Self {
        let class_def = Regex::new(
            r"^class\s+(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*(?:\((?P<bases>.*?)\))?\s*:",
        )
        .expect("class regex");
        let assignment = Regex::new(r"^(?P<name>[A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?P<value>.+)$")
            .expect("assignment regex");
        let from_import =
            Regex::new(r"^from\s+(?P<module>\.*[A-Za-z0-9_.]*)\s+import\s+(?P<names>.+)$")
                .expect("from-import regex");
        let import_stmt = Regex::new(r"^import\s+(?P<names>.+)$").expect("import regex");
        let meta_abstract =
            Regex::new(r#"['"]abstract['"]\s*:\s*True\b"#).expect("meta regex");
        let dotted_name =
            Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(?:\s*\.\s*[A-Za-z_][A-Za-z0-9_]*)*")
                .expect("dotted name regex");
        let keyword_arg =
            Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_]*)\s*=(?P<value>[^=].*|)$")
                .expect("keyword regex");
        let string_prefix = Regex::new(r#"^[rRuUbB]{0,2}(?P<q>'|")"#).expect("string regex");
        Self {
            class_def,
            assignment,
            from_import,
            import_stmt,
            meta_abstract,
            dotted_name,
            keyword_arg,
            string_prefix,
        }
    }
}

impl Default for RegexPatterns {
    fn default() -> Self {
        Self::compile()
    }
}

/// One statement after joining continuation lines.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LogicalLine {
    indent: usize,
    line: usize,
    text: String,
}

/// Open class body while scanning; `target` is `None` for classes nested
/// too deeply to be collected.
struct Frame {
    indent: usize,
    body_indent: Option<usize>,
    target: Option<usize>,
}

/// Parsed call or operand inside a field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Expr {
    Call { callee: String, args: Vec<Arg> },
    Name(String),
    Str(String),
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    keyword: Option<String>,
    value: Expr,
}

impl ModelParser {
    #[must_use]
    pub fn new() -> Self {
        Self { patterns: RegexPatterns::compile() }
    }

    /// Parse one module's source. Unrecognised statements are skipped, so
    /// this never fails.
    #[must_use]
    pub fn parse_module(
        &self,
        content: &str,
        name: &str,
        is_package: bool,
    ) -> ParsedModule {
        let mut module =
            ParsedModule { name: name.to_string(), is_package, ..ParsedModule::default() };
        let mut stack: Vec<Frame> = Vec::new();

        for ll in logical_lines(content) {
            while stack.last().is_some_and(|f| ll.indent <= f.indent) {
                stack.pop();
            }
            let text = ll.text.as_str();

            if stack.is_empty() {
                // Module level: classes only at column zero, imports anywhere
                // (conditional imports are common in model packages).
                if ll.indent == 0 {
                    if let Some(class) = self.class_header(text, None, ll.line) {
                        module.classes.push(class);
                        let target = Some(module.classes.len() - 1);
                        stack.push(Frame { indent: 0, body_indent: None, target });
                        continue;
                    }
                }
                module.imports.extend(self.imports(text));
                continue;
            }

            let depth = stack.len();
            let (body_indent, owner) = match stack.last_mut() {
                Some(frame) => (*frame.body_indent.get_or_insert(ll.indent), frame.target),
                None => continue,
            };
            if ll.indent != body_indent {
                continue;
            }

            if text.starts_with("class ") {
                let nested = match owner {
                    Some(idx) if depth == 1 => {
                        let outer = module.classes[idx].name.clone();
                        self.class_header(text, Some(&outer), ll.line)
                    }
                    _ => None,
                };
                let target = nested.map(|class| {
                    module.classes.push(class);
                    module.classes.len() - 1
                });
                stack.push(Frame { indent: ll.indent, body_indent: None, target });
                continue;
            }

            let Some(idx) = owner else { continue };
            if let Some(cap) = self.patterns.assignment.captures(text) {
                let name = &cap["name"];
                let value = cap["value"].trim();
                if value.starts_with('=') {
                    continue;
                }
                if name == "meta" {
                    if self.patterns.meta_abstract.is_match(value) {
                        module.classes[idx].is_abstract = true;
                    }
                    continue;
                }
                let expr = self.parse_expr(value);
                if let Some(kind) = classify(&expr) {
                    let decl = FieldDecl {
                        name: name.to_string(),
                        kind,
                        primary_key: has_true_keyword(&expr, "primary_key"),
                        line: ll.line,
                    };
                    let class = &mut module.classes[idx];
                    // Re-assignment in a class body rebinds the same attribute.
                    if let Some(existing) = class.fields.iter_mut().find(|f| f.name == decl.name) {
                        log::debug!(
                            "{}.{}: field '{}' on line {} rebinds line {}",
                            module.name,
                            class.qualname,
                            decl.name,
                            decl.line,
                            existing.line
                        );
                        *existing = decl;
                    } else {
                        class.fields.push(decl);
                    }
                }
            }
        }
        module
    }

    fn class_header(&self, text: &str, outer: Option<&str>, line: usize) -> Option<ClassDef> {
        let cap = self.patterns.class_def.captures(text)?;
        let name = cap["name"].to_string();
        let bases = cap
            .name("bases")
            .map(|m| {
                split_top_level(m.as_str())
                    .into_iter()
                    .map(|b| b.trim().to_string())
                    // keyword arguments such as `metaclass=...` are not bases
                    .filter(|b| !b.is_empty() && self.patterns.keyword_arg.captures(b).is_none())
                    .map(|b| b.split_whitespace().collect::<String>())
                    .collect()
            })
            .unwrap_or_default();
        let qualname = outer.map_or_else(|| name.clone(), |o| format!("{o}.{name}"));
        Some(ClassDef {
            name,
            qualname,
            outer: outer.map(str::to_string),
            bases,
            fields: Vec::new(),
            is_abstract: false,
            line,
        })
    }

    fn imports(&self, text: &str) -> Vec<ImportDecl> {
        let mut out = Vec::new();
        if let Some(cap) = self.patterns.from_import.captures(text) {
            let module = cap["module"].to_string();
            let names = cap["names"].trim().trim_start_matches('(').trim_end_matches(')');
            for part in names.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                if part == "*" {
                    out.push(ImportDecl::Glob { module: module.clone() });
                    continue;
                }
                let (name, alias) = split_alias(part);
                out.push(ImportDecl::From { module: module.clone(), name, alias });
            }
        } else if let Some(cap) = self.patterns.import_stmt.captures(text) {
            for part in cap["names"].split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let (path, alias) = split_alias(part);
                out.push(ImportDecl::Module { path, alias });
            }
        }
        out
    }

    fn parse_expr(&self, text: &str) -> Expr {
        let text = text.trim();
        if let Some(cap) = self.patterns.string_prefix.captures(text) {
            let prefix_len = cap.get(0).map_or(0, |m| m.end());
            let quote = &cap["q"];
            let body = &text[prefix_len..];
            return match body.find(quote) {
                Some(end) => Expr::Str(body[..end].to_string()),
                None => Expr::Other,
            };
        }
        let Some(m) = self.patterns.dotted_name.find(text) else {
            return Expr::Other;
        };
        let name: String = m.as_str().split_whitespace().collect();
        let rest = text[m.end()..].trim();
        if rest.is_empty() {
            return Expr::Name(name);
        }
        if rest.starts_with('(') && rest.ends_with(')') && closing_paren(rest) == Some(rest.len() - 1)
        {
            let inner = &rest[1..rest.len() - 1];
            let args = split_top_level(inner)
                .into_iter()
                .map(str::trim)
                .filter(|a| !a.is_empty())
                .map(|a| self.parse_arg(a))
                .collect();
            return Expr::Call { callee: name, args };
        }
        Expr::Other
    }

    fn parse_arg(&self, text: &str) -> Arg {
        if text.starts_with('*') {
            return Arg { keyword: None, value: Expr::Other };
        }
        if let Some(cap) = self.patterns.keyword_arg.captures(text) {
            return Arg {
                keyword: Some(cap["key"].to_string()),
                value: self.parse_expr(&cap["value"]),
            };
        }
        Arg { keyword: None, value: self.parse_expr(text) }
    }
}

/// Map a field constructor call to its semantic kind. Non-field expressions
/// yield `None`.
fn classify(expr: &Expr) -> Option<FieldKind<TypeExpr>> {
    let Expr::Call { callee, args } = expr else {
        return None;
    };
    let type_name = callee.rsplit('.').next().unwrap_or(callee);
    if !type_name.ends_with("Field") {
        return None;
    }
    let kind = match type_name {
        "ObjectIdField" => FieldKind::Identifier,
        // Cached and lazy references are separate field classes, not
        // `ReferenceField` subclasses.
        "ReferenceField" => FieldKind::Reference { target: target_arg(args) },
        "EmbeddedDocumentField" => FieldKind::Embedded { target: target_arg(args) },
        "ListField" | "SortedListField" => FieldKind::Repeated {
            inner: argument(args, 0, "field").and_then(classify).map(Box::new),
        },
        "EmbeddedDocumentListField" => FieldKind::Repeated {
            inner: Some(Box::new(FieldKind::Embedded { target: target_arg(args) })),
        },
        other => FieldKind::Scalar { type_name: other.to_string() },
    };
    Some(kind)
}

fn argument<'a>(args: &'a [Arg], position: usize, keyword: &str) -> Option<&'a Expr> {
    args.iter()
        .find(|a| a.keyword.as_deref() == Some(keyword))
        .or_else(|| args.iter().filter(|a| a.keyword.is_none()).nth(position))
        .map(|a| &a.value)
}

fn target_arg(args: &[Arg]) -> TypeExpr {
    match argument(args, 0, "document_type") {
        Some(Expr::Name(n)) => TypeExpr::Name(n.clone()),
        Some(Expr::Str(s)) => TypeExpr::Literal(s.clone()),
        _ => TypeExpr::Missing,
    }
}

fn has_true_keyword(expr: &Expr, keyword: &str) -> bool {
    match expr {
        Expr::Call { args, .. } => args.iter().any(|a| {
            a.keyword.as_deref() == Some(keyword) && matches!(&a.value, Expr::Name(v) if v == "True")
        }),
        _ => false,
    }
}

fn split_alias(part: &str) -> (String, Option<String>) {
    let mut it = part.split_whitespace();
    let name = it.next().unwrap_or_default().to_string();
    let alias = match (it.next(), it.next()) {
        (Some("as"), Some(a)) => Some(a.to_string()),
        _ => None,
    };
    (name, alias)
}

/// Split on commas that are not nested inside brackets or string literals.
fn split_top_level(s: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                out.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&s[start..]);
    out
}

/// Byte index of the parenthesis closing the one at index 0.
fn closing_paren(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn logical_lines(content: &str) -> Vec<LogicalLine> {
    let chars: Vec<char> = content.chars().collect();
    let mut out = Vec::new();
    let mut text = String::new();
    let mut indent = 0usize;
    let mut start_line = 1usize;
    let mut line_no = 1usize;
    let mut depth = 0usize;
    let mut quote: Option<(char, bool)> = None;
    let mut at_line_start = true;

    let mut flush = |text: &mut String, indent: usize, line: usize| {
        let t = text.trim();
        if !t.is_empty() {
            out.push(LogicalLine { indent, line, text: t.to_string() });
        }
        text.clear();
    };

    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some((q, triple)) = quote {
            text.push(if c == '\n' { ' ' } else { c });
            if c == '\\' {
                if let Some(&next) = chars.get(i + 1) {
                    if next == '\n' {
                        line_no += 1;
                    }
                    text.push(if next == '\n' { ' ' } else { next });
                    i += 2;
                    continue;
                }
            }
            if c == '\n' {
                line_no += 1;
                if !triple {
                    // unterminated single-quoted string
                    quote = None;
                    if depth == 0 {
                        flush(&mut text, indent, start_line);
                        at_line_start = true;
                        indent = 0;
                    }
                }
            } else if c == q {
                if !triple {
                    quote = None;
                } else if chars.get(i + 1) == Some(&q) && chars.get(i + 2) == Some(&q) {
                    text.push(q);
                    text.push(q);
                    quote = None;
                    i += 3;
                    continue;
                }
            }
            i += 1;
            continue;
        }

        if at_line_start {
            match c {
                ' ' => {
                    indent += 1;
                    i += 1;
                    continue;
                }
                '\t' => {
                    indent += 8 - indent % 8;
                    i += 1;
                    continue;
                }
                _ => {
                    at_line_start = false;
                    start_line = line_no;
                }
            }
        }

        match c {
            '#' => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
                continue;
            }
            '\'' | '"' => {
                let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                text.push(c);
                if triple {
                    text.push(c);
                    text.push(c);
                    i += 3;
                } else {
                    i += 1;
                }
                quote = Some((c, triple));
                continue;
            }
            '(' | '[' | '{' => {
                depth += 1;
                text.push(c);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                text.push(c);
            }
            '\\' if chars.get(i + 1) == Some(&'\n') => {
                text.push(' ');
                line_no += 1;
                i += 2;
                continue;
            }
            '\n' => {
                line_no += 1;
                if depth == 0 {
                    flush(&mut text, indent, start_line);
                    at_line_start = true;
                    indent = 0;
                } else {
                    text.push(' ');
                }
            }
            _ => text.push(c),
        }
        i += 1;
    }
    flush(&mut text, indent, start_line);
    out
}
