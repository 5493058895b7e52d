//! Interface descriptions parsed from C declarations
//!
//! Accepts the subset of C used by plain library headers:
//! - function prototypes, including function-pointer parameters
//! - `extern` (or plain) scalar variable declarations
//! - `/* */` and `//` comments; preprocessor lines are skipped
//!
//! Anything else (typedefs, structs, arrays, initializers) is rejected with
//! the line it starts on, rather than guessed at.

use crate::error::{FfiError, FfiResult};
use crate::ffi::types::{Signature, TypeDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named signatures and globals declared by a header
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceDescription {
    functions: BTreeMap<String, Signature>,
    globals: BTreeMap<String, TypeDescriptor>,
}

impl InterfaceDescription {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a header
    pub fn parse(source: &str) -> FfiResult<Self> {
        let mut interface = Self::new();
        for (line, statement) in statements(&strip_comments(source)?)? {
            let tokens = tokenize(&statement, line)?;
            let declaration = Parser::new(tokens, line).declaration()?;
            interface.add(declaration, line)?;
        }
        Ok(interface)
    }

    /// Declared signature of a function
    pub fn function(&self, name: &str) -> Option<&Signature> {
        self.functions.get(name)
    }

    /// Declared type of a global
    pub fn global(&self, name: &str) -> Option<&TypeDescriptor> {
        self.globals.get(name)
    }

    pub fn functions(&self) -> impl Iterator<Item = (&str, &Signature)> {
        self.functions.iter().map(|(name, sig)| (name.as_str(), sig))
    }

    pub fn globals(&self) -> impl Iterator<Item = (&str, &TypeDescriptor)> {
        self.globals.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    fn add(&mut self, declaration: Declaration, line: usize) -> FfiResult<()> {
        let conflict = |name: &str| FfiError::InterfaceParse {
            line,
            message: format!("conflicting declaration of '{}'", name),
        };

        match declaration {
            Declaration::Function(name, signature) => {
                if self.globals.contains_key(&name) {
                    return Err(conflict(&name));
                }
                match self.functions.get(&name) {
                    Some(existing) if *existing != signature => Err(conflict(&name)),
                    Some(_) => Ok(()),
                    None => {
                        self.functions.insert(name, signature);
                        Ok(())
                    }
                }
            }
            Declaration::Global(name, ty) => {
                if self.functions.contains_key(&name) {
                    return Err(conflict(&name));
                }
                match self.globals.get(&name) {
                    Some(existing) if *existing != ty => Err(conflict(&name)),
                    Some(_) => Ok(()),
                    None => {
                        self.globals.insert(name, ty);
                        Ok(())
                    }
                }
            }
        }
    }
}

fn parse_error(line: usize, message: impl Into<String>) -> FfiError {
    FfiError::InterfaceParse {
        line,
        message: message.into(),
    }
}

/// Blank out comments, keeping newlines so line numbers survive
fn strip_comments(source: &str) -> FfiResult<String> {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    let mut line = 1;

    while let Some(ch) = chars.next() {
        let next = chars.peek().copied();
        match (ch, next) {
            ('/', Some('*')) => {
                let start = line;
                chars.next();
                out.push_str("  ");
                let mut closed = false;
                while let Some(c) = chars.next() {
                    if c == '*' && chars.peek() == Some(&'/') {
                        chars.next();
                        out.push_str("  ");
                        closed = true;
                        break;
                    }
                    if c == '\n' {
                        line += 1;
                        out.push('\n');
                    } else {
                        out.push(' ');
                    }
                }
                if !closed {
                    return Err(parse_error(start, "unterminated comment"));
                }
            }
            ('/', Some('/')) => {
                for c in chars.by_ref() {
                    if c == '\n' {
                        line += 1;
                        out.push('\n');
                        break;
                    }
                }
            }
            _ => {
                if ch == '\n' {
                    line += 1;
                }
                out.push(ch);
            }
        }
    }
    Ok(out)
}

/// Split on `;`, pairing each statement with the line it starts on
fn statements(source: &str) -> FfiResult<Vec<(usize, String)>> {
    let mut result = Vec::new();
    let mut current = String::new();
    let mut start = None;

    for (index, raw) in source.lines().enumerate() {
        let line = index + 1;
        if raw.trim_start().starts_with('#') {
            continue;
        }
        for ch in raw.chars() {
            if ch == ';' {
                let statement = std::mem::take(&mut current);
                match start.take() {
                    Some(first) => result.push((first, statement)),
                    None => return Err(parse_error(line, "empty declaration")),
                }
            } else {
                if start.is_none() && !ch.is_whitespace() {
                    start = Some(line);
                }
                current.push(ch);
            }
        }
        current.push(' ');
    }

    match start {
        Some(line) => Err(parse_error(line, "missing ';' after declaration")),
        None => Ok(result),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Star,
    LParen,
    RParen,
    Comma,
}

fn tokenize(statement: &str, line: usize) -> FfiResult<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = statement.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            c if c.is_whitespace() => {
                chars.next();
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            other => return Err(parse_error(line, format!("unsupported syntax '{}'", other))),
        }
    }
    Ok(tokens)
}

enum Declaration {
    Function(String, Signature),
    Global(String, TypeDescriptor),
}

const QUALIFIERS: &[&str] = &["const", "volatile", "extern", "static", "inline", "restrict"];

const TYPE_WORDS: &[&str] = &[
    "void", "char", "short", "int", "long", "signed", "unsigned", "double", "float", "size_t",
    "int16_t", "int32_t", "int64_t", "uint32_t",
];

const UNSUPPORTED: &[&str] = &["typedef", "struct", "union", "enum"];

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    line: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
        }
    }

    fn error(&self, message: impl Into<String>) -> FfiError {
        parse_error(self.line, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> FfiResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {}", what)))
        }
    }

    /// Top-level declaration
    fn declaration(&mut self) -> FfiResult<Declaration> {
        let ty = self.declared_type()?;

        if self.peek() == Some(&Token::LParen) {
            return Err(self.error("function pointer variables are not supported"));
        }
        let name = match self.advance() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.error("expected a name")),
        };

        let declaration = if self.eat(&Token::LParen) {
            let args = self.parameters()?;
            let signature = Signature::new(args, ty);
            signature
                .validate(&name)
                .map_err(|e| self.error(e.to_string()))?;
            Declaration::Function(name, signature)
        } else {
            if !ty.is_scalar() {
                return Err(self.error(format!("global '{}' must be a scalar, not {}", name, ty)));
            }
            Declaration::Global(name, ty)
        };

        if self.peek().is_some() {
            return Err(self.error("unexpected tokens after declaration"));
        }
        Ok(declaration)
    }

    /// Specifiers followed by pointer stars
    fn declared_type(&mut self) -> FfiResult<TypeDescriptor> {
        let mut words = Vec::new();
        while let Some(Token::Ident(word)) = self.peek() {
            if UNSUPPORTED.contains(&word.as_str()) {
                return Err(self.error(format!("unsupported declaration: {}", word)));
            }
            if QUALIFIERS.contains(&word.as_str()) {
                self.pos += 1;
                continue;
            }
            // A second type name ends the specifiers: it is the declarator
            if !TYPE_WORDS.contains(&word.as_str()) && !words.is_empty() {
                break;
            }
            words.push(word.clone());
            self.pos += 1;
        }

        let base = base_type(&words).map_err(|message| self.error(message))?;

        let mut depth = 0;
        loop {
            if self.eat(&Token::Star) {
                depth += 1;
            } else if matches!(self.peek(), Some(Token::Ident(w)) if QUALIFIERS.contains(&w.as_str())) {
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(apply_pointers(base, depth))
    }

    /// Parameter list after the opening parenthesis
    fn parameters(&mut self) -> FfiResult<Vec<TypeDescriptor>> {
        if self.eat(&Token::RParen) {
            return Ok(Vec::new());
        }
        if self.tokens.get(self.pos) == Some(&Token::Ident("void".to_string()))
            && self.tokens.get(self.pos + 1) == Some(&Token::RParen)
        {
            self.pos += 2;
            return Ok(Vec::new());
        }

        let mut params = Vec::new();
        loop {
            params.push(self.parameter()?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(self.error("expected ',' or ')' in parameter list")),
            }
        }
        Ok(params)
    }

    fn parameter(&mut self) -> FfiResult<TypeDescriptor> {
        let ty = self.declared_type()?;

        // ret (*name)(args)
        if self.eat(&Token::LParen) {
            self.expect(Token::Star, "'*' in function pointer")?;
            if let Some(Token::Ident(_)) = self.peek() {
                self.pos += 1;
            }
            self.expect(Token::RParen, "')' after function pointer name")?;
            self.expect(Token::LParen, "function pointer parameter list")?;
            let args = self.parameters()?;
            return Ok(TypeDescriptor::function(args, ty));
        }

        if let Some(Token::Ident(_)) = self.peek() {
            self.pos += 1;
        }
        Ok(ty)
    }
}

/// Descriptor for a list of type specifiers
fn base_type(words: &[String]) -> Result<TypeDescriptor, String> {
    let words: Vec<&str> = words.iter().map(String::as_str).collect();
    let count = |w: &str| words.iter().filter(|&&x| x == w).count();

    let unsigned = count("unsigned") > 0;
    let signed = count("signed") > 0;
    let longs = count("long");
    let short = count("short") > 0;

    let unsupported = || -> Result<TypeDescriptor, String> {
        Err(format!("unsupported type '{}'", words.join(" ")))
    };

    match words.as_slice() {
        [] => return Err("missing type".to_string()),
        ["void"] => return Ok(TypeDescriptor::Void),
        ["double"] => return Ok(TypeDescriptor::Double),
        ["size_t"] => return Ok(TypeDescriptor::USize),
        ["int16_t"] => return Ok(TypeDescriptor::Int16),
        ["int32_t"] => return Ok(TypeDescriptor::Int32),
        ["int64_t"] => return Ok(TypeDescriptor::Int64),
        ["uint32_t"] => return Ok(TypeDescriptor::UInt32),
        _ => {}
    }

    let known = words
        .iter()
        .all(|w| matches!(*w, "char" | "short" | "int" | "long" | "signed" | "unsigned"));
    if !known || (unsigned && signed) {
        return unsupported();
    }

    if count("char") > 0 {
        if words.len() > 1 + usize::from(unsigned || signed) {
            return unsupported();
        }
        return Ok(TypeDescriptor::Char);
    }

    match (short, longs, unsigned) {
        (true, 0, false) => Ok(TypeDescriptor::Int16),
        (false, 2, false) => Ok(TypeDescriptor::Int64),
        (false, 1, false) => Ok(if cfg!(all(target_pointer_width = "64", not(windows))) {
            TypeDescriptor::Int64
        } else {
            TypeDescriptor::Int32
        }),
        (false, 0, true) => Ok(TypeDescriptor::UInt32),
        (false, 0, false) => Ok(TypeDescriptor::Int32),
        _ => unsupported(),
    }
}

/// `char*` is a string; every other star wraps in `Pointer`
fn apply_pointers(base: TypeDescriptor, depth: usize) -> TypeDescriptor {
    if depth == 0 {
        return base;
    }
    let (mut ty, rest) = if base == TypeDescriptor::Char {
        (TypeDescriptor::CString, depth - 1)
    } else {
        (TypeDescriptor::pointer(base), depth - 1)
    };
    for _ in 0..rest {
        ty = TypeDescriptor::pointer(ty);
    }
    ty
}
