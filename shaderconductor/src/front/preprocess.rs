//! C-style preprocessor.
//!
//! Works line by line on comment-free text. The output carries `#line`
//! markers wherever the mapping to the original files is not sequential,
//! so the lexer can attribute every token to its original file and line.

use super::include::{FileSystemInclude, IncludeHandler};
use crate::desc::SourceDesc;
use crate::diag::{Diagnostics, ErrorKind, SourceLocation};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const MAX_INCLUDE_DEPTH: usize = 64;
const MAX_EXPANSION_DEPTH: usize = 256;

/// Preprocessed text plus the warnings raised while producing it
#[derive(Debug, Clone)]
pub struct Preprocessed {
    pub text: String,
    pub warnings: Diagnostics,
}

/// Runs the preprocessor over `desc`.
///
/// `predefined` macros are applied first, then the caller's defines, whose
/// empty values mean `1`.
pub fn preprocess_source(
    desc: &SourceDesc,
    predefined: &[(String, String)],
) -> Result<Preprocessed, Diagnostics> {
    let fs;
    let handler: &dyn IncludeHandler = match &desc.include_handler {
        Some(handler) => handler.as_ref(),
        None => {
            fs = FileSystemInclude::new();
            &fs
        }
    };

    let mut pp = Preprocessor::new(handler);
    for (name, value) in predefined {
        pp.define_object(name, value);
    }
    for define in &desc.defines {
        let value = if define.value.is_empty() {
            "1"
        } else {
            define.value.as_str()
        };
        pp.define_object(&define.name, value);
    }

    let file: Arc<str> = Arc::from(desc.file_name());
    pp.process_file(file, &desc.source);
    debug_log!(
        "preprocessed {} into {} bytes, {} macros defined",
        desc.file_name(),
        pp.out.len(),
        pp.macros.len()
    );

    if pp.diags.has_errors() {
        Err(pp.diags)
    } else {
        Ok(Preprocessed {
            text: pp.out,
            warnings: pp.diags,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Macro {
    params: Option<Vec<String>>,
    variadic: bool,
    body: String,
}

#[derive(Debug)]
struct Conditional {
    active: bool,
    taken: bool,
    saw_else: bool,
    parent_active: bool,
    location: SourceLocation,
}

enum LineControl {
    None,
    Line { line: u32, file: Option<String> },
}

struct Preprocessor<'a> {
    handler: &'a dyn IncludeHandler,
    macros: HashMap<String, Macro>,
    once: HashSet<String>,
    conds: Vec<Conditional>,
    include_depth: usize,
    out: String,
    out_file: Option<Arc<str>>,
    out_line: u32,
    diags: Diagnostics,
}

impl<'a> Preprocessor<'a> {
    fn new(handler: &'a dyn IncludeHandler) -> Self {
        Preprocessor {
            handler,
            macros: HashMap::new(),
            once: HashSet::new(),
            conds: Vec::new(),
            include_depth: 0,
            out: String::new(),
            out_file: None,
            out_line: 0,
            diags: Diagnostics::new(),
        }
    }

    fn define_object(&mut self, name: &str, value: &str) {
        self.macros.insert(
            name.to_string(),
            Macro {
                params: None,
                variadic: false,
                body: value.to_string(),
            },
        );
    }

    fn active(&self) -> bool {
        self.conds.last().is_none_or(|c| c.active)
    }

    fn error(&mut self, location: &SourceLocation, message: impl Into<String>) {
        self.diags
            .error(ErrorKind::Syntax, Some(location.clone()), message);
    }

    fn emit(&mut self, file: &Arc<str>, line: u32, text: &str) {
        let same_file = self.out_file.as_ref().is_some_and(|f| f == file);
        if !same_file || self.out_line != line {
            self.out.push_str(&format!("#line {} \"{}\"\n", line, file));
            self.out_file = Some(file.clone());
        }
        self.out.push_str(text);
        self.out.push('\n');
        self.out_line = line + 1;
    }

    fn process_file(&mut self, file: Arc<str>, source: &str) {
        let cleaned = strip_comments(source);
        let base_depth = self.conds.len();
        let mut shown_file = file.clone();
        let mut delta: i64 = 0;

        for (physical, text) in logical_lines(&cleaned) {
            let line = (physical as i64 + delta).max(1) as u32;
            let location = SourceLocation::new(shown_file.clone(), line, 1);
            let trimmed = text.trim_start();
            if let Some(directive) = trimmed.strip_prefix('#') {
                if let LineControl::Line { line: target, file: name } =
                    self.directive(directive, &location, &file)
                {
                    delta = target as i64 - (physical as i64 + 1);
                    if let Some(name) = name {
                        shown_file = Arc::from(name.as_str());
                    }
                }
            } else if self.active() {
                let expanded = self.expand(&text, &mut Vec::new(), &location, 0);
                self.emit(&shown_file, line, &expanded);
            }
        }

        while self.conds.len() > base_depth {
            if let Some(cond) = self.conds.pop() {
                self.error(&cond.location, "unterminated conditional directive");
            }
        }
    }

    fn directive(&mut self, text: &str, location: &SourceLocation, file: &Arc<str>) -> LineControl {
        let text = text.trim_start();
        let name_len = text
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(text.len());
        let (name, rest) = text.split_at(name_len);
        let rest = rest.trim();

        match name {
            "if" | "ifdef" | "ifndef" => {
                let parent_active = self.active();
                let value = parent_active
                    && match name {
                        "ifdef" => self.macros.contains_key(first_word(rest)),
                        "ifndef" => !self.macros.contains_key(first_word(rest)),
                        _ => self.eval_condition(rest, location),
                    };
                self.conds.push(Conditional {
                    active: value,
                    taken: value,
                    saw_else: false,
                    parent_active,
                    location: location.clone(),
                });
            }
            "elif" => {
                let state = self
                    .conds
                    .last()
                    .map(|c| (c.saw_else, c.taken, c.parent_active));
                match state {
                    None => self.error(location, "#elif without #if"),
                    Some((true, _, _)) => self.error(location, "#elif after #else"),
                    Some((false, taken, parent_active)) => {
                        let value =
                            !taken && parent_active && self.eval_condition(rest, location);
                        if let Some(cond) = self.conds.last_mut() {
                            cond.active = value;
                            cond.taken |= value;
                        }
                    }
                }
            }
            "else" => match self.conds.last_mut() {
                None => self.error(location, "#else without #if"),
                Some(cond) if cond.saw_else => self.error(location, "#else after #else"),
                Some(cond) => {
                    cond.active = cond.parent_active && !cond.taken;
                    cond.taken = true;
                    cond.saw_else = true;
                }
            },
            "endif" => {
                if self.conds.pop().is_none() {
                    self.error(location, "#endif without #if");
                }
            }
            _ if !self.active() => {}
            "" => {}
            "define" => match parse_define(rest) {
                Ok((name, mac)) => {
                    if let Some(previous) = self.macros.get(&name) {
                        if *previous != mac {
                            self.diags
                                .warning(Some(location.clone()), format!("'{}' macro redefined", name));
                        }
                    }
                    self.macros.insert(name, mac);
                }
                Err(message) => self.error(location, message),
            },
            "undef" => {
                self.macros.remove(first_word(rest));
            }
            "include" => self.include(rest, location, file),
            "error" => {
                let message = if rest.is_empty() { "#error" } else { rest };
                self.diags
                    .error(ErrorKind::Semantic, Some(location.clone()), message);
            }
            "warning" => self
                .diags
                .warning(Some(location.clone()), rest.to_string()),
            "pragma" => {
                if first_word(rest) == "once" {
                    self.once.insert(file.to_string());
                } else if first_word(rest) == "pack_matrix" {
                    // consumed by the lexer
                    let line = format!("#pragma {}", rest);
                    let shown = location.file.clone();
                    self.emit(&shown, location.line, &line);
                }
            }
            "line" => {
                let expanded = self.expand(rest, &mut Vec::new(), location, 0);
                let mut parts = expanded.split_whitespace();
                match parts.next().and_then(|n| n.parse::<u32>().ok()) {
                    Some(line) => {
                        let file = parts
                            .next()
                            .map(|f| f.trim_matches('"').to_string());
                        return LineControl::Line { line, file };
                    }
                    None => self.error(location, "#line directive requires a positive integer argument"),
                }
            }
            other => self.error(
                location,
                format!("invalid preprocessing directive '#{}'", other),
            ),
        }
        LineControl::None
    }

    fn include(&mut self, rest: &str, location: &SourceLocation, file: &Arc<str>) {
        let name = match rest.chars().next() {
            Some('"') => rest[1..].split('"').next(),
            Some('<') => rest[1..].split('>').next(),
            _ => None,
        };
        let Some(name) = name.filter(|n| !n.is_empty()) else {
            self.error(location, "expected \"FILENAME\" or <FILENAME>");
            return;
        };
        if self.include_depth >= MAX_INCLUDE_DEPTH {
            self.error(location, "#include nested too deeply");
            return;
        }
        let Some(included) = self.handler.load(name, file) else {
            self.diags.error(
                ErrorKind::Semantic,
                Some(location.clone()),
                format!("Couldn't load included file {}.", name),
            );
            return;
        };
        if self.once.contains(&included.name) {
            return;
        }
        self.include_depth += 1;
        self.process_file(Arc::from(included.name.as_str()), &included.source);
        self.include_depth -= 1;
    }

    fn eval_condition(&mut self, expr: &str, location: &SourceLocation) -> bool {
        let replaced = self.replace_defined(expr);
        let expanded = self.expand(&replaced, &mut Vec::new(), location, 0);
        match CondParser::new(&expanded).parse() {
            Ok(value) => value != 0,
            Err(message) => {
                self.error(location, message);
                false
            }
        }
    }

    fn replace_defined(&self, expr: &str) -> String {
        let tokens = tokenize(expr);
        let mut out = String::new();
        let mut i = 0;
        while i < tokens.len() {
            if tokens[i] == PpToken::Ident("defined".into()) {
                let mut j = skip_space(&tokens, i + 1);
                let parenthesized = tokens.get(j) == Some(&PpToken::Punct("(".into()));
                if parenthesized {
                    j = skip_space(&tokens, j + 1);
                }
                if let Some(PpToken::Ident(name)) = tokens.get(j) {
                    out.push_str(if self.macros.contains_key(name) { "1" } else { "0" });
                    j += 1;
                    if parenthesized {
                        j = skip_space(&tokens, j);
                        if tokens.get(j) == Some(&PpToken::Punct(")".into())) {
                            j += 1;
                        }
                    }
                    i = j;
                    continue;
                }
            }
            out.push_str(tokens[i].text());
            i += 1;
        }
        out
    }

    fn expand(
        &mut self,
        text: &str,
        disabled: &mut Vec<String>,
        location: &SourceLocation,
        depth: usize,
    ) -> String {
        let tokens = tokenize(text);
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        while i < tokens.len() {
            let PpToken::Ident(name) = &tokens[i] else {
                out.push_str(tokens[i].text());
                i += 1;
                continue;
            };
            match name.as_str() {
                "__LINE__" => {
                    out.push_str(&location.line.to_string());
                    i += 1;
                    continue;
                }
                "__FILE__" => {
                    out.push_str(&format!("\"{}\"", location.file));
                    i += 1;
                    continue;
                }
                _ => {}
            }
            let mac = match self.macros.get(name) {
                Some(mac) if !disabled.contains(name) && depth < MAX_EXPANSION_DEPTH => mac.clone(),
                _ => {
                    out.push_str(name);
                    i += 1;
                    continue;
                }
            };

            let Some(params) = &mac.params else {
                disabled.push(name.clone());
                let expanded = self.expand(&mac.body, disabled, location, depth + 1);
                disabled.pop();
                out.push_str(&expanded);
                i += 1;
                continue;
            };

            let open = skip_space(&tokens, i + 1);
            if tokens.get(open) != Some(&PpToken::Punct("(".into())) {
                out.push_str(name);
                i += 1;
                continue;
            }
            let Some((mut args, close)) = collect_args(&tokens, open) else {
                self.error(
                    location,
                    format!("unterminated function-like macro invocation '{}'", name),
                );
                return out;
            };
            if params.is_empty() && args.len() == 1 && args[0].trim().is_empty() {
                args.clear();
            }
            let count_ok = if mac.variadic {
                args.len() >= params.len()
            } else {
                args.len() == params.len()
            };
            if !count_ok {
                self.error(
                    location,
                    format!(
                        "macro '{}' requires {} arguments, but {} given",
                        name,
                        params.len(),
                        args.len()
                    ),
                );
                i = close + 1;
                continue;
            }

            let body = self.substitute(&mac, params, &args, disabled, location, depth);
            disabled.push(name.clone());
            let expanded = self.expand(&body, disabled, location, depth + 1);
            disabled.pop();
            out.push_str(&expanded);
            i = close + 1;
        }
        out
    }

    fn substitute(
        &mut self,
        mac: &Macro,
        params: &[String],
        args: &[String],
        disabled: &mut Vec<String>,
        location: &SourceLocation,
        depth: usize,
    ) -> String {
        let raw_arg = |name: &str| -> Option<String> {
            if mac.variadic && name == "__VA_ARGS__" {
                return Some(args[params.len()..].join(","));
            }
            params
                .iter()
                .position(|p| p == name)
                .map(|index| args[index].trim().to_string())
        };

        let body = tokenize(&mac.body);
        let mut out = String::new();
        let mut after_paste = false;
        let mut k = 0;
        while k < body.len() {
            match &body[k] {
                PpToken::Punct(p) if p == "##" => {
                    out.truncate(out.trim_end().len());
                    after_paste = true;
                    k = skip_space(&body, k + 1);
                    continue;
                }
                PpToken::Punct(p) if p == "#" => {
                    let next = skip_space(&body, k + 1);
                    if let Some(PpToken::Ident(param)) = body.get(next) {
                        if let Some(raw) = raw_arg(param) {
                            out.push_str(&stringize(&raw));
                            k = next + 1;
                            after_paste = false;
                            continue;
                        }
                    }
                    out.push('#');
                }
                PpToken::Ident(param) => match raw_arg(param) {
                    Some(raw) => {
                        let before_paste = body.get(skip_space(&body, k + 1))
                            == Some(&PpToken::Punct("##".into()));
                        if after_paste || before_paste {
                            out.push_str(&raw);
                        } else {
                            let expanded = self.expand(&raw, disabled, location, depth + 1);
                            out.push_str(&expanded);
                        }
                    }
                    None => out.push_str(param),
                },
                other => out.push_str(other.text()),
            }
            after_paste = false;
            k += 1;
        }
        out
    }
}

fn first_word(text: &str) -> &str {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .next()
        .unwrap_or("")
}

fn stringize(raw: &str) -> String {
    let mut out = String::from("\"");
    for c in raw.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}

fn parse_define(rest: &str) -> Result<(String, Macro), String> {
    let name_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if name_len == 0 || rest.starts_with(|c: char| c.is_ascii_digit()) {
        return Err("macro name must be an identifier".into());
    }
    let (name, after) = rest.split_at(name_len);

    let Some(param_text) = after.strip_prefix('(') else {
        return Ok((
            name.to_string(),
            Macro {
                params: None,
                variadic: false,
                body: after.trim().to_string(),
            },
        ));
    };
    let Some(close) = param_text.find(')') else {
        return Err("missing ')' in macro parameter list".into());
    };
    let mut params = Vec::new();
    let mut variadic = false;
    for param in param_text[..close].split(',').map(str::trim) {
        if param.is_empty() {
            continue;
        }
        if param == "..." {
            variadic = true;
        } else if variadic {
            return Err("'...' must be the last macro parameter".into());
        } else {
            params.push(param.to_string());
        }
    }
    Ok((
        name.to_string(),
        Macro {
            params: Some(params),
            variadic,
            body: param_text[close + 1..].trim().to_string(),
        },
    ))
}

/// Removes comments, keeping newlines so line numbers stay put.
fn strip_comments(source: &str) -> String {
    #[derive(PartialEq)]
    enum State {
        Code,
        Line,
        Block,
        Quoted(char),
    }

    let mut out = String::with_capacity(source.len());
    let mut state = State::Code;
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match state {
            State::Code => match c {
                '/' if chars.peek() == Some(&'/') => {
                    chars.next();
                    state = State::Line;
                }
                '/' if chars.peek() == Some(&'*') => {
                    chars.next();
                    out.push(' ');
                    state = State::Block;
                }
                '"' | '\'' => {
                    out.push(c);
                    state = State::Quoted(c);
                }
                _ => out.push(c),
            },
            State::Line => {
                if c == '\n' {
                    out.push('\n');
                    state = State::Code;
                }
            }
            State::Block => {
                if c == '*' && chars.peek() == Some(&'/') {
                    chars.next();
                    state = State::Code;
                } else if c == '\n' {
                    out.push('\n');
                }
            }
            State::Quoted(quote) => {
                out.push(c);
                if c == '\\' {
                    if let Some(escaped) = chars.next() {
                        out.push(escaped);
                    }
                } else if c == quote || c == '\n' {
                    state = State::Code;
                }
            }
        }
    }
    out
}

/// Joins backslash-continued lines; each entry carries its first physical line.
fn logical_lines(text: &str) -> Vec<(u32, String)> {
    let mut lines = Vec::new();
    let mut pending: Option<(u32, String)> = None;
    for (index, raw) in text.split('\n').enumerate() {
        let raw = raw.strip_suffix('\r').unwrap_or(raw);
        let (start, mut current) = pending.take().unwrap_or((index as u32 + 1, String::new()));
        match raw.strip_suffix('\\') {
            Some(head) => {
                current.push_str(head);
                pending = Some((start, current));
            }
            None => {
                current.push_str(raw);
                lines.push((start, current));
            }
        }
    }
    if let Some(last) = pending {
        lines.push(last);
    }
    lines
}

#[derive(Debug, Clone, PartialEq)]
enum PpToken {
    Ident(String),
    Number(String),
    Quoted(String),
    Punct(String),
    Space,
}

impl PpToken {
    fn text(&self) -> &str {
        match self {
            PpToken::Ident(s) | PpToken::Number(s) | PpToken::Quoted(s) | PpToken::Punct(s) => s,
            PpToken::Space => " ",
        }
    }
}

fn tokenize(text: &str) -> Vec<PpToken> {
    let chars: Vec<char> = text.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            while i < chars.len() && chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(PpToken::Space);
        } else if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            tokens.push(PpToken::Ident(chars[start..i].iter().collect()));
        } else if c.is_ascii_digit() || (c == '.' && chars.get(i + 1).is_some_and(char::is_ascii_digit)) {
            let start = i;
            i += 1;
            while i < chars.len() {
                let d = chars[i];
                if d.is_ascii_alphanumeric() || d == '_' || d == '.' {
                    i += 1;
                } else if (d == '+' || d == '-') && matches!(chars[i - 1], 'e' | 'E') {
                    i += 1;
                } else {
                    break;
                }
            }
            tokens.push(PpToken::Number(chars[start..i].iter().collect()));
        } else if c == '"' || c == '\'' {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != c {
                if chars[i] == '\\' {
                    i += 1;
                }
                i += 1;
            }
            i = (i + 1).min(chars.len());
            tokens.push(PpToken::Quoted(chars[start..i].iter().collect()));
        } else if c == '#' && chars.get(i + 1) == Some(&'#') {
            tokens.push(PpToken::Punct("##".into()));
            i += 2;
        } else {
            tokens.push(PpToken::Punct(c.to_string()));
            i += 1;
        }
    }
    tokens
}

fn skip_space(tokens: &[PpToken], mut index: usize) -> usize {
    while tokens.get(index) == Some(&PpToken::Space) {
        index += 1;
    }
    index
}

/// Splits a macro argument list; returns the arguments and the index of `)`.
fn collect_args(tokens: &[PpToken], open: usize) -> Option<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0;
    for (index, token) in tokens.iter().enumerate().skip(open) {
        match token {
            PpToken::Punct(p) if p == "(" => {
                depth += 1;
                if depth > 1 {
                    current.push('(');
                }
            }
            PpToken::Punct(p) if p == ")" => {
                depth -= 1;
                if depth == 0 {
                    args.push(current);
                    return Some((args, index));
                }
                current.push(')');
            }
            PpToken::Punct(p) if p == "," && depth == 1 => {
                args.push(std::mem::take(&mut current));
            }
            other => current.push_str(other.text()),
        }
    }
    None
}

/// Integer expression evaluator for `#if`
struct CondParser {
    tokens: Vec<String>,
    pos: usize,
}

impl CondParser {
    fn new(text: &str) -> Self {
        let mut tokens = Vec::new();
        for token in tokenize(text) {
            match token {
                PpToken::Space => {}
                PpToken::Punct(p) => {
                    let merged = tokens.last().map(|last: &String| format!("{}{}", last, p));
                    match merged.as_deref() {
                        Some("||" | "&&" | "==" | "!=" | "<=" | ">=" | "<<" | ">>") => {
                            if let Some(last) = tokens.last_mut() {
                                last.push_str(&p);
                            }
                        }
                        _ => tokens.push(p),
                    }
                }
                other => tokens.push(other.text().to_string()),
            }
        }
        CondParser { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<i64, String> {
        if self.tokens.is_empty() {
            return Err("#if with no expression".into());
        }
        let value = self.ternary()?;
        match self.tokens.get(self.pos) {
            None => Ok(value),
            Some(token) => Err(format!(
                "token is not a valid binary operator in a preprocessor subexpression: '{}'",
                token
            )),
        }
    }

    fn peek(&self) -> Option<&str> {
        self.tokens.get(self.pos).map(String::as_str)
    }

    fn ternary(&mut self) -> Result<i64, String> {
        let condition = self.binary(1)?;
        if self.peek() != Some("?") {
            return Ok(condition);
        }
        self.pos += 1;
        let accept = self.ternary()?;
        if self.peek() != Some(":") {
            return Err("expected ':' in preprocessor expression".into());
        }
        self.pos += 1;
        let reject = self.ternary()?;
        Ok(if condition != 0 { accept } else { reject })
    }

    fn precedence(op: &str) -> Option<u8> {
        Some(match op {
            "||" => 1,
            "&&" => 2,
            "|" => 3,
            "^" => 4,
            "&" => 5,
            "==" | "!=" => 6,
            "<" | "<=" | ">" | ">=" => 7,
            "<<" | ">>" => 8,
            "+" | "-" => 9,
            "*" | "/" | "%" => 10,
            _ => return None,
        })
    }

    fn binary(&mut self, min_prec: u8) -> Result<i64, String> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.peek().map(str::to_string) {
            let Some(prec) = Self::precedence(&op).filter(|p| *p >= min_prec) else {
                break;
            };
            self.pos += 1;
            let rhs = self.binary(prec + 1)?;
            lhs = match op.as_str() {
                "||" => (lhs != 0 || rhs != 0) as i64,
                "&&" => (lhs != 0 && rhs != 0) as i64,
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "==" => (lhs == rhs) as i64,
                "!=" => (lhs != rhs) as i64,
                "<" => (lhs < rhs) as i64,
                "<=" => (lhs <= rhs) as i64,
                ">" => (lhs > rhs) as i64,
                ">=" => (lhs >= rhs) as i64,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" | "%" if rhs == 0 => {
                    return Err("division by zero in preprocessor expression".into());
                }
                "/" => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        let Some(token) = self.tokens.get(self.pos).cloned() else {
            return Err("unexpected end of preprocessor expression".into());
        };
        self.pos += 1;
        match token.as_str() {
            "!" => Ok((self.unary()? == 0) as i64),
            "~" => Ok(!self.unary()?),
            "-" => Ok(self.unary()?.wrapping_neg()),
            "+" => self.unary(),
            "(" => {
                let value = self.ternary()?;
                if self.peek() != Some(")") {
                    return Err("expected ')' in preprocessor expression".into());
                }
                self.pos += 1;
                Ok(value)
            }
            "true" => Ok(1),
            text if text.starts_with(|c: char| c.is_ascii_digit()) => parse_int(text)
                .ok_or_else(|| format!("invalid integer literal '{}' in preprocessor expression", text)),
            text if text.starts_with(|c: char| c.is_ascii_alphabetic() || c == '_') => Ok(0),
            text => Err(format!("invalid token '{}' in preprocessor expression", text)),
        }
    }
}

fn parse_int(text: &str) -> Option<i64> {
    let digits = text.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok().map(|v| v as i64)
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok().map(|v| v as i64)
    } else {
        digits.parse::<u64>().ok().map(|v| v as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::{MacroDefine, ShaderStage};
    use crate::front::include::MemoryInclude;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> Result<Preprocessed, Diagnostics> {
        let desc = SourceDesc::new(source, "main", ShaderStage::Pixel);
        preprocess_source(&desc, &[])
    }

    fn code_lines(text: &str) -> Vec<String> {
        text.lines()
            .filter(|l| !l.starts_with("#line") && !l.trim().is_empty())
            .map(|l| l.trim().to_string())
            .collect()
    }

    #[test]
    fn test_object_and_function_macros() {
        let out = run("#define N 4\n#define SQ(x) ((x) * (x))\nint a = SQ(N + 1);\n").unwrap();
        assert_eq!(code_lines(&out.text), vec!["int a = ((4 + 1) * (4 + 1));"]);
    }

    #[test]
    fn test_conditionals_with_defined() {
        let source = "#define A\n#if defined(A) && !defined B\nyes\n#elif 1\nno\n#else\nnever\n#endif\n";
        let out = run(source).unwrap();
        assert_eq!(code_lines(&out.text), vec!["yes"]);
    }

    #[test]
    fn test_nested_conditionals_skip() {
        let source = "#if 0\n#if 1\na\n#else\nb\n#endif\n#else\nc\n#endif\n";
        assert_eq!(code_lines(&run(source).unwrap().text), vec!["c"]);
    }

    #[test]
    fn test_caller_define_defaults_to_one() {
        let mut desc = SourceDesc::new("#if FLAG == 1\nok\n#endif\n", "main", ShaderStage::Pixel);
        desc.defines.push(MacroDefine::new("FLAG", ""));
        let out = preprocess_source(&desc, &[]).unwrap();
        assert_eq!(code_lines(&out.text), vec!["ok"]);
    }

    #[test]
    fn test_include_with_line_markers() {
        let mut desc = SourceDesc::new("#include \"a.hlsli\"\nafter\n", "main", ShaderStage::Pixel);
        desc.include_handler = Some(Arc::new(
            MemoryInclude::new().with_file("a.hlsli", "#pragma once\ninside\n"),
        ));
        let out = preprocess_source(&desc, &[]).unwrap();
        assert_eq!(
            out.text,
            "#line 2 \"a.hlsli\"\ninside\n\n#line 2 \"shader.hlsl\"\nafter\n\n"
        );
    }

    #[test]
    fn test_missing_include_reports_name() {
        let mut desc = SourceDesc::new("#include \"nope.h\"\n", "main", ShaderStage::Pixel);
        desc.include_handler = Some(Arc::new(MemoryInclude::new()));
        let err = preprocess_source(&desc, &[]).unwrap_err();
        assert!(err.render().contains("Couldn't load included file nope.h."));
    }

    #[test]
    fn test_error_directive_and_unterminated_if() {
        let err = run("#error stop here\n").unwrap_err();
        assert!(err.render().contains("stop here"));
        let err = run("#ifdef X\n").unwrap_err();
        assert!(err.render().contains("unterminated conditional directive"));
    }

    #[test]
    fn test_comments_and_continuations() {
        let out = run("a /* x\ny */ b // tail\n#define LONG 1 + \\\n 2\nLONG\n").unwrap();
        assert_eq!(code_lines(&out.text), vec!["a", "b", "1 + 2"]);
    }

    #[test]
    fn test_stringize_and_paste() {
        let out = run("#define S(x) #x\n#define CAT(a, b) a ## b\nS(hi) CAT(foo, bar)\n").unwrap();
        assert_eq!(code_lines(&out.text), vec!["\"hi\" foobar"]);
    }

    #[test]
    fn test_condition_arithmetic() {
        assert_eq!(CondParser::new("1 + 2 * 3 == 7").parse(), Ok(1));
        assert_eq!(CondParser::new("(0x10 >> 2) | 1").parse(), Ok(5));
        assert_eq!(CondParser::new("0 ? 1 : 2").parse(), Ok(2));
        assert!(CondParser::new("1 / 0").parse().is_err());
    }
}
