//! Structural scanners
//!
//! Each scanner walks a source file once and returns the line spans of its
//! blocks (brace bodies, indented suites, COBOL paragraphs and IF/EXEC
//! scopes, SQL BEGIN/END scopes). Malformed input (unbalanced delimiters,
//! unterminated strings or comments, missing block bodies) is reported as a
//! `StructureError` so one bad file never poisons a batch.

use thiserror::Error;

/// A block span, 1-based and inclusive. `start` is the line that opens it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: usize,
    pub end: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct StructureError {
    pub line: usize,
    pub message: String,
}

impl StructureError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

/// Blocks of one file, sorted by start line.
#[derive(Debug, Clone, Default)]
pub struct SourceStructure {
    blocks: Vec<Block>,
}

impl SourceStructure {
    pub fn new(mut blocks: Vec<Block>) -> Self {
        blocks.sort_by_key(|b| (b.start, std::cmp::Reverse(b.end)));
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// First block opening within `lookahead` lines at or after `line`.
    pub fn block_opening_near(&self, line: usize, lookahead: usize) -> Option<Block> {
        self.blocks
            .iter()
            .find(|b| b.start >= line && b.start <= line + lookahead)
            .copied()
    }
}

// ============================================================================
// C-family (Java, C#, JavaScript/TypeScript)
// ============================================================================

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CFamilyOptions {
    /// JavaScript `template ${literals}`
    pub template_literals: bool,
    /// C# `@"verbatim"` strings
    pub verbatim_strings: bool,
    /// Java/C# `"""` text blocks
    pub text_blocks: bool,
    /// JavaScript `/regex/` literals
    pub regex_literals: bool,
}

enum Frame {
    Brace(usize),
    TemplateExpr,
}

pub(crate) fn brace_blocks(
    content: &str,
    opts: CFamilyOptions,
) -> Result<Vec<Block>, StructureError> {
    let chars: Vec<char> = content.chars().collect();
    let mut blocks = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();
    let mut line = 1usize;
    let mut i = 0usize;
    let mut in_template = false;
    let mut prev_sig: Option<char> = None;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if in_template {
            match c {
                '\\' => {
                    if next == Some('\n') {
                        line += 1;
                    }
                    i += 2;
                    continue;
                }
                '`' => in_template = false,
                '$' if next == Some('{') => {
                    stack.push(Frame::TemplateExpr);
                    in_template = false;
                    i += 2;
                    prev_sig = Some('{');
                    continue;
                }
                '\n' => line += 1,
                _ => {}
            }
            i += 1;
            continue;
        }

        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            c if c.is_whitespace() => i += 1,
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let opened = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(StructureError::new(opened, "unterminated block comment")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '/' if opts.regex_literals && regex_allowed(&chars, i, prev_sig) => {
                i = skip_regex_literal(&chars, i + 1, line)?;
                prev_sig = Some('/');
            }
            '"' if opts.text_blocks && next == Some('"') && chars.get(i + 2) == Some(&'"') => {
                let opened = line;
                i += 3;
                loop {
                    match chars.get(i) {
                        None => return Err(StructureError::new(opened, "unterminated text block")),
                        Some('\\') => i += 2,
                        Some('"') if chars.get(i + 1) == Some(&'"') && chars.get(i + 2) == Some(&'"') => {
                            i += 3;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
                prev_sig = Some('"');
            }
            '@' if opts.verbatim_strings && next == Some('"') => {
                let opened = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(StructureError::new(opened, "unterminated verbatim string")),
                        Some('"') if chars.get(i + 1) == Some(&'"') => i += 2,
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
                prev_sig = Some('"');
            }
            '"' | '\'' => {
                i = skip_quoted(&chars, i + 1, c, &mut line)?;
                prev_sig = Some(c);
            }
            '`' if opts.template_literals => {
                in_template = true;
                i += 1;
            }
            '{' => {
                stack.push(Frame::Brace(line));
                prev_sig = Some('{');
                i += 1;
            }
            '}' => {
                match stack.pop() {
                    Some(Frame::Brace(start)) => blocks.push(Block { start, end: line }),
                    Some(Frame::TemplateExpr) => in_template = true,
                    None => return Err(StructureError::new(line, "unbalanced '}'")),
                }
                prev_sig = Some('}');
                i += 1;
            }
            _ => {
                prev_sig = Some(c);
                i += 1;
            }
        }
    }

    if in_template {
        return Err(StructureError::new(line, "unterminated template literal"));
    }
    if let Some(frame) = stack.pop() {
        let opened = match frame {
            Frame::Brace(start) => start,
            Frame::TemplateExpr => line,
        };
        return Err(StructureError::new(opened, "unclosed '{'"));
    }
    Ok(blocks)
}

/// A `/` starts a regex literal after an operator or a value-introducing
/// keyword; anywhere else it is division.
fn regex_allowed(chars: &[char], i: usize, prev: Option<char>) -> bool {
    let Some(p) = prev else {
        return true;
    };
    if "(,=:[!&|?{};+-*%<>~^".contains(p) {
        return true;
    }
    if !(p.is_alphanumeric() || p == '_' || p == '$') {
        return false;
    }

    let mut j = i;
    while j > 0 && chars[j - 1].is_whitespace() {
        j -= 1;
    }
    let end = j;
    while j > 0 && (chars[j - 1].is_alphanumeric() || chars[j - 1] == '_' || chars[j - 1] == '$') {
        j -= 1;
    }
    let word: String = chars[j..end].iter().collect();
    matches!(
        word.as_str(),
        "return" | "typeof" | "case" | "yield" | "await" | "in" | "of" | "void" | "delete" | "throw"
            | "else" | "do"
    )
}

/// Skip a single-line quoted literal starting after its opening quote.
fn skip_quoted(
    chars: &[char],
    mut i: usize,
    quote: char,
    line: &mut usize,
) -> Result<usize, StructureError> {
    let opened = *line;
    loop {
        match chars.get(i) {
            None | Some('\n') => {
                return Err(StructureError::new(opened, "unterminated string literal"));
            }
            Some('\\') => {
                if chars.get(i + 1) == Some(&'\n') {
                    *line += 1;
                }
                i += 2;
            }
            Some(&c) if c == quote => return Ok(i + 1),
            Some(_) => i += 1,
        }
    }
}

fn skip_regex_literal(chars: &[char], mut i: usize, line: usize) -> Result<usize, StructureError> {
    let mut in_class = false;
    loop {
        match chars.get(i) {
            None | Some('\n') => {
                return Err(StructureError::new(line, "unterminated regular expression"));
            }
            Some('\\') => i += 2,
            Some('[') => {
                in_class = true;
                i += 1;
            }
            Some(']') => {
                in_class = false;
                i += 1;
            }
            Some('/') if !in_class => return Ok(i + 1),
            Some(_) => i += 1,
        }
    }
}

// ============================================================================
// Python (indentation suites)
// ============================================================================

struct LogicalLine {
    first: usize,
    last: usize,
    indent: usize,
    opens_suite: bool,
}

struct PyString {
    quote: char,
    triple: bool,
    opened: usize,
}

pub(crate) fn indent_blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    let mut logical: Vec<LogicalLine> = Vec::new();
    let mut string: Option<PyString> = None;
    let mut brackets: Vec<(char, usize)> = Vec::new();
    let mut continued = false;
    let mut current: Option<(usize, usize)> = None;
    let mut last_sig: Option<char> = None;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let starts_logical = string.is_none() && brackets.is_empty() && !continued;

        if starts_logical {
            let trimmed = raw.trim_start();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            current = Some((line_no, indent_width(raw)));
            last_sig = None;
        }
        continued = false;

        let chars: Vec<char> = raw.chars().collect();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if let Some(s) = &string {
                if c == '\\' {
                    i += 2;
                    continue;
                }
                if c == s.quote {
                    if !s.triple {
                        string = None;
                        last_sig = Some(c);
                    } else if chars.get(i + 1) == Some(&s.quote) && chars.get(i + 2) == Some(&s.quote) {
                        string = None;
                        last_sig = Some(c);
                        i += 3;
                        continue;
                    }
                }
                i += 1;
                continue;
            }

            match c {
                '#' => break,
                '"' | '\'' => {
                    let triple = chars.get(i + 1) == Some(&c) && chars.get(i + 2) == Some(&c);
                    string = Some(PyString {
                        quote: c,
                        triple,
                        opened: line_no,
                    });
                    i += if triple { 3 } else { 1 };
                    continue;
                }
                '(' | '[' | '{' => brackets.push((c, line_no)),
                ')' | ']' | '}' => {
                    let expected = match c {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match brackets.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, at)) => {
                            return Err(StructureError::new(
                                line_no,
                                format!("'{c}' does not match '{open}' opened on line {at}"),
                            ));
                        }
                        None => return Err(StructureError::new(line_no, format!("unbalanced '{c}'"))),
                    }
                }
                '\\' if i + 1 == chars.len() => {
                    continued = true;
                }
                _ => {}
            }
            if !c.is_whitespace() && !(c == '\\' && continued) {
                last_sig = Some(c);
            }
            i += 1;
        }

        if let Some(s) = &string {
            if !s.triple {
                if raw.ends_with('\\') {
                    continued = true;
                } else {
                    return Err(StructureError::new(s.opened, "unterminated string literal"));
                }
            }
        }

        if string.is_none() && brackets.is_empty() && !continued {
            if let Some((first, indent)) = current.take() {
                logical.push(LogicalLine {
                    first,
                    last: line_no,
                    indent,
                    opens_suite: last_sig == Some(':'),
                });
            }
        }
    }

    if let Some(s) = string {
        return Err(StructureError::new(s.opened, "unterminated triple-quoted string"));
    }
    if let Some((open, at)) = brackets.pop() {
        return Err(StructureError::new(at, format!("unclosed '{open}'")));
    }

    let mut blocks = Vec::new();
    for (i, header) in logical.iter().enumerate() {
        if !header.opens_suite {
            continue;
        }
        let body: Vec<&LogicalLine> = logical[i + 1..]
            .iter()
            .take_while(|l| l.indent > header.indent)
            .collect();
        match body.last() {
            Some(last) => blocks.push(Block {
                start: header.first,
                end: last.last,
            }),
            None => {
                return Err(StructureError::new(
                    header.last,
                    "expected an indented block",
                ));
            }
        }
    }
    Ok(blocks)
}

fn indent_width(line: &str) -> usize {
    let mut width = 0;
    for c in line.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            _ => break,
        }
    }
    width
}

// ============================================================================
// COBOL (paragraphs, IF / EVALUATE scopes, EXEC blocks)
// ============================================================================

enum CobolScope {
    If(usize),
    Evaluate(usize),
}

pub(crate) fn cobol_blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    let mut blocks = Vec::new();
    let mut scopes: Vec<CobolScope> = Vec::new();
    let mut exec_open: Option<usize> = None;
    let mut paragraph: Option<usize> = None;
    let mut last_code_line = 0;

    for (idx, raw) in content.lines().enumerate() {
        let line_no = idx + 1;
        let Some((code, area_a)) = cobol_code(raw) else {
            continue;
        };
        let code = strip_cobol_literals(code);
        let trimmed = code.trim();
        if trimmed.is_empty() {
            continue;
        }
        last_code_line = line_no;
        let tokens: Vec<String> = trimmed
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '-'))
            .filter(|t| !t.is_empty())
            .map(|t| t.to_ascii_uppercase())
            .collect();

        let is_header = area_a
            && exec_open.is_none()
            && trimmed.ends_with('.')
            && (tokens.len() == 1
                || (tokens.len() == 2 && (tokens[1] == "SECTION" || tokens[1] == "DIVISION")));
        if is_header {
            if let Some(start) = paragraph.take() {
                blocks.push(Block {
                    start,
                    end: line_no.saturating_sub(1).max(start),
                });
            }
            paragraph = Some(line_no);
            continue;
        }

        for token in &tokens {
            match token.as_str() {
                "EXEC" if exec_open.is_none() => exec_open = Some(line_no),
                "END-EXEC" => {
                    if exec_open.take().is_none() {
                        return Err(StructureError::new(line_no, "END-EXEC without EXEC"));
                    }
                }
                _ if exec_open.is_some() => {}
                "IF" => scopes.push(CobolScope::If(line_no)),
                "EVALUATE" => scopes.push(CobolScope::Evaluate(line_no)),
                "END-IF" => match scopes.pop() {
                    Some(CobolScope::If(start)) => blocks.push(Block { start, end: line_no }),
                    _ => return Err(StructureError::new(line_no, "END-IF without matching IF")),
                },
                "END-EVALUATE" => match scopes.pop() {
                    Some(CobolScope::Evaluate(start)) => blocks.push(Block { start, end: line_no }),
                    _ => {
                        return Err(StructureError::new(
                            line_no,
                            "END-EVALUATE without matching EVALUATE",
                        ));
                    }
                },
                _ => {}
            }
        }

        // A sentence-ending period closes every open conditional scope.
        if exec_open.is_none() && trimmed.ends_with('.') {
            while let Some(scope) = scopes.pop() {
                let start = match scope {
                    CobolScope::If(s) | CobolScope::Evaluate(s) => s,
                };
                blocks.push(Block { start, end: line_no });
            }
        }
    }

    if let Some(opened) = exec_open {
        return Err(StructureError::new(opened, "EXEC without END-EXEC"));
    }
    if let Some(scope) = scopes.pop() {
        let opened = match scope {
            CobolScope::If(s) | CobolScope::Evaluate(s) => s,
        };
        return Err(StructureError::new(opened, "unterminated conditional statement"));
    }
    if let Some(start) = paragraph {
        blocks.push(Block {
            start,
            end: last_code_line.max(start),
        });
    }
    Ok(blocks)
}

/// Code portion of a COBOL line and whether it starts in area A.
/// Returns None for comment lines.
fn cobol_code(raw: &str) -> Option<(&str, bool)> {
    let fixed = raw.len() > 6
        && raw.is_char_boundary(6)
        && raw[..6].chars().all(|c| c.is_ascii_digit() || c == ' ');
    if fixed {
        let indicator = raw[6..].chars().next().unwrap_or(' ');
        if matches!(indicator, '*' | '/') {
            return None;
        }
        let rest = &raw[6 + indicator.len_utf8()..];
        let end = rest
            .char_indices()
            .nth(65)
            .map(|(pos, _)| pos)
            .unwrap_or(rest.len());
        let code = &rest[..end];
        let code = code.split("*>").next().unwrap_or(code);
        let leading = code.len() - code.trim_start().len();
        return Some((code, leading < 4));
    }

    let trimmed = raw.trim_start();
    if trimmed.starts_with("*>") {
        return None;
    }
    let code = raw.split("*>").next().unwrap_or(raw);
    Some((code, raw.len() == trimmed.len()))
}

fn strip_cobol_literals(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut quote: Option<char> = None;
    for c in code.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                out.push(' ');
            }
            None => out.push(c),
        }
    }
    out
}

// ============================================================================
// Procedural SQL (BEGIN/END, IF..END IF, LOOP..END LOOP, CASE..END)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlScope {
    Begin,
    If,
    Loop,
    Case,
}

struct SqlToken {
    word: String,
    line: usize,
}

pub(crate) fn sql_blocks(content: &str) -> Result<Vec<Block>, StructureError> {
    let tokens = sql_tokens(content)?;
    let mut blocks = Vec::new();
    let mut stack: Vec<(SqlScope, usize)> = Vec::new();

    let mut i = 0;
    while i < tokens.len() {
        let word = tokens[i].word.as_str();
        let line = tokens[i].line;
        let next = tokens.get(i + 1).map(|t| t.word.as_str());
        let prev = if i > 0 { Some(tokens[i - 1].word.as_str()) } else { None };

        match word {
            "BEGIN" => {
                if !matches!(next, Some("TRAN" | "TRANSACTION" | "DISTRIBUTED" | ";")) {
                    stack.push((SqlScope::Begin, line));
                }
            }
            "IF" if prev != Some("END") && opens_then_block(&tokens[i + 1..]) => {
                stack.push((SqlScope::If, line));
            }
            "LOOP" if prev != Some("END") => stack.push((SqlScope::Loop, line)),
            "CASE" if prev != Some("END") => stack.push((SqlScope::Case, line)),
            "END" => {
                let (expected, skip) = match next {
                    Some("IF") => (Some(SqlScope::If), 1),
                    Some("LOOP") => (Some(SqlScope::Loop), 1),
                    Some("CASE") => (Some(SqlScope::Case), 1),
                    _ => (None, 0),
                };
                match stack.pop() {
                    Some((scope, start)) => {
                        let matches = match expected {
                            Some(kind) => kind == scope,
                            None => matches!(scope, SqlScope::Begin | SqlScope::Case),
                        };
                        if !matches {
                            return Err(StructureError::new(
                                line,
                                format!("END does not close {scope:?} opened on line {start}"),
                            ));
                        }
                        blocks.push(Block { start, end: line });
                    }
                    None => return Err(StructureError::new(line, "END without matching block")),
                }
                i += skip;
            }
            _ => {}
        }
        i += 1;
    }

    if let Some((scope, start)) = stack.pop() {
        return Err(StructureError::new(start, format!("unterminated {scope:?} block")));
    }
    Ok(blocks)
}

/// PL/SQL style `IF cond THEN`: a THEN appears before the statement ends.
fn opens_then_block(rest: &[SqlToken]) -> bool {
    for token in rest {
        match token.word.as_str() {
            "THEN" => return true,
            ";" | "BEGIN" | "END" => return false,
            _ => {}
        }
    }
    false
}

fn sql_tokens(content: &str) -> Result<Vec<SqlToken>, StructureError> {
    let chars: Vec<char> = content.chars().collect();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '\n' => {
                line += 1;
                i += 1;
            }
            '-' if next == Some('-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                let opened = line;
                i += 2;
                loop {
                    match chars.get(i) {
                        None => return Err(StructureError::new(opened, "unterminated block comment")),
                        Some('*') if chars.get(i + 1) == Some(&'/') => {
                            i += 2;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            '\'' => {
                let opened = line;
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err(StructureError::new(opened, "unterminated string literal")),
                        Some('\'') if chars.get(i + 1) == Some(&'\'') => i += 2,
                        Some('\'') => {
                            i += 1;
                            break;
                        }
                        Some('\n') => {
                            line += 1;
                            i += 1;
                        }
                        Some(_) => i += 1,
                    }
                }
            }
            ';' => {
                tokens.push(SqlToken {
                    word: ";".to_string(),
                    line,
                });
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || matches!(chars[i], '_' | '$' | '#')) {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                tokens.push(SqlToken {
                    word: word.to_ascii_uppercase(),
                    line,
                });
            }
            _ => i += 1,
        }
    }
    Ok(tokens)
}
