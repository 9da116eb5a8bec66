//! Minimal SQL recognizer for utility statements.
//!
//! This is not a SQL parser. It recognizes the database-level DDL the guard and
//! the host model care about and reduces everything else to a command tag.
//! Identifiers are treated the way the server treats them: unquoted names are
//! folded to lower case, quoted names keep their case, and anything longer than
//! [`MAX_NAME_LEN`] bytes is truncated with a notice.

use std::fmt;

use crate::matcher::MAX_NAME_LEN;
use crate::statement::{DropDatabaseStmt, ObjectType, UtilityStatement};

/// A statement that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// Byte offset into the statement text.
    pub position: usize,
}

impl ParseError {
    fn new(message: impl Into<String>, position: usize) -> Self {
        Self {
            message: message.into(),
            position,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ParseError {}

/// A recognized statement plus notices raised while reading it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedStatement {
    pub statement: UtilityStatement,
    pub notices: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    QuotedIdent,
    StringLit,
    Number,
    Symbol,
}

#[derive(Debug, Clone)]
struct Token<'a> {
    kind: TokenKind,
    /// Raw source text, quotes included.
    text: &'a str,
    start: usize,
}

impl Token<'_> {
    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_symbol(&self, symbol: &str) -> bool {
        self.kind == TokenKind::Symbol && self.text == symbol
    }
}

#[inline]
fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || !c.is_ascii()
}

#[inline]
fn is_ident_char(c: char) -> bool {
    is_ident_start(c) || c.is_ascii_digit() || c == '$'
}

/// Length of a comment starting at `rest`, if one starts there.
fn comment_len(rest: &str) -> Option<usize> {
    if rest.starts_with("--") {
        return Some(rest.find('\n').map_or(rest.len(), |i| i + 1));
    }
    if !rest.starts_with("/*") {
        return None;
    }
    // Block comments nest.
    let bytes = rest.as_bytes();
    let mut depth = 0usize;
    let mut i = 0;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => i += 1,
        }
    }
    Some(rest.len())
}

/// End offset of a quoted run starting at `start` (which holds `quote`).
/// A doubled quote is an escaped quote. `None` if unterminated.
fn quoted_end(text: &str, start: usize, quote: u8) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return Some(i + 1);
        }
        i += 1;
    }
    None
}

fn tokenize(text: &str) -> Result<Vec<Token<'_>>, ParseError> {
    let mut tokens = Vec::new();
    let mut pos = 0;
    while pos < text.len() {
        let rest = &text[pos..];
        let Some(c) = rest.chars().next() else { break };
        if c.is_whitespace() {
            pos += c.len_utf8();
            continue;
        }
        if let Some(len) = comment_len(rest) {
            pos += len;
            continue;
        }
        let (kind, end) = match c {
            '\'' => {
                let end = quoted_end(text, pos, b'\'')
                    .ok_or_else(|| ParseError::new("unterminated quoted string", pos))?;
                (TokenKind::StringLit, end)
            }
            '"' => {
                let end = quoted_end(text, pos, b'"')
                    .ok_or_else(|| ParseError::new("unterminated quoted identifier", pos))?;
                if end == pos + 2 {
                    return Err(ParseError::new(
                        "zero-length delimited identifier at or near \"\"\"\"",
                        pos,
                    ));
                }
                (TokenKind::QuotedIdent, end)
            }
            c if is_ident_start(c) => {
                let len = rest.find(|ch: char| !is_ident_char(ch)).unwrap_or(rest.len());
                (TokenKind::Word, pos + len)
            }
            c if c.is_ascii_digit() => {
                let len = rest
                    .find(|ch: char| !(ch.is_ascii_digit() || ch == '.'))
                    .unwrap_or(rest.len());
                (TokenKind::Number, pos + len)
            }
            c => (TokenKind::Symbol, pos + c.len_utf8()),
        };
        tokens.push(Token {
            kind,
            text: &text[pos..end],
            start: pos,
        });
        pos = end;
    }
    Ok(tokens)
}

/// Split a query string into statements on `;` outside quotes and comments.
///
/// Pieces that hold nothing but whitespace and comments are dropped.
#[must_use]
pub fn split_statements(sql: &str) -> Vec<&str> {
    let mut statements = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    let mut has_content = false;
    while pos < sql.len() {
        let rest = &sql[pos..];
        let Some(c) = rest.chars().next() else { break };
        if let Some(len) = comment_len(rest) {
            pos += len;
            continue;
        }
        match c {
            ';' => {
                if has_content {
                    statements.push(sql[start..pos].trim());
                }
                pos += 1;
                start = pos;
                has_content = false;
                continue;
            }
            '\'' | '"' => {
                // An unterminated quote swallows the rest; the parser reports it.
                let quote = if c == '\'' { b'\'' } else { b'"' };
                pos = quoted_end(sql, pos, quote).unwrap_or(sql.len());
                has_content = true;
                continue;
            }
            c if !c.is_whitespace() => has_content = true,
            _ => {}
        }
        pos += c.len_utf8();
    }
    if has_content {
        statements.push(sql[start..].trim());
    }
    statements
}

/// Truncate an identifier to [`MAX_NAME_LEN`] bytes at a character boundary.
///
/// Returns the notice the server would raise when truncation happens.
#[must_use]
pub fn truncate_identifier(ident: &str) -> (String, Option<String>) {
    if ident.len() <= MAX_NAME_LEN {
        return (ident.to_string(), None);
    }
    let mut cut = MAX_NAME_LEN;
    while !ident.is_char_boundary(cut) {
        cut -= 1;
    }
    let truncated = &ident[..cut];
    (
        truncated.to_string(),
        Some(format!(
            "identifier \"{ident}\" will be truncated to \"{truncated}\""
        )),
    )
}

struct Parser<'a> {
    tokens: Vec<Token<'a>>,
    pos: usize,
    end: usize,
    notices: Vec<String>,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn error_here(&self) -> ParseError {
        match self.peek() {
            Some(tok) => ParseError::new(format!("syntax error at or near \"{}\"", tok.text), tok.start),
            None => ParseError::new("syntax error at end of input", self.end),
        }
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_symbol(&mut self, symbol: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_symbol(symbol)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<(), ParseError> {
        if self.eat_keyword(keyword) {
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<(), ParseError> {
        if self.eat_symbol(symbol) {
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn expect_end(&self) -> Result<(), ParseError> {
        if self.peek().is_none() {
            Ok(())
        } else {
            Err(self.error_here())
        }
    }

    fn if_exists(&mut self) -> Result<bool, ParseError> {
        if self.eat_keyword("IF") {
            self.expect_keyword("EXISTS")?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Read one identifier, folded and truncated.
    fn identifier(&mut self) -> Result<String, ParseError> {
        let Some(tok) = self.peek() else {
            return Err(self.error_here());
        };
        let raw = match tok.kind {
            TokenKind::Word => tok.text.to_ascii_lowercase(),
            TokenKind::QuotedIdent => tok.text[1..tok.text.len() - 1].replace("\"\"", "\""),
            TokenKind::StringLit | TokenKind::Number | TokenKind::Symbol => {
                return Err(self.error_here());
            }
        };
        self.pos += 1;
        let (name, notice) = truncate_identifier(&raw);
        self.notices.extend(notice);
        Ok(name)
    }

    /// `name` or `schema.name`.
    fn qualified_name(&mut self) -> Result<String, ParseError> {
        let mut parts = vec![self.identifier()?];
        while self.eat_symbol(".") {
            parts.push(self.identifier()?);
        }
        Ok(parts.join("."))
    }

    fn word_tag(&self, count: usize) -> String {
        self.tokens
            .iter()
            .take(count)
            .take_while(|t| t.kind == TokenKind::Word)
            .map(|t| t.text.to_ascii_uppercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn statement(&mut self) -> Result<UtilityStatement, ParseError> {
        let Some(first) = self.peek() else {
            return Err(self.error_here());
        };
        if first.kind != TokenKind::Word {
            return Err(self.error_here());
        }
        if self.eat_keyword("DROP") {
            if self.eat_keyword("DATABASE") {
                return self.drop_database();
            }
            if let Some(object_type) = self
                .peek()
                .filter(|t| t.kind == TokenKind::Word)
                .and_then(|t| ObjectType::from_keyword(t.text))
            {
                self.pos += 1;
                return self.drop_objects(object_type);
            }
            return Ok(UtilityStatement::Other {
                tag: self.word_tag(2),
            });
        }
        if self.eat_keyword("CREATE") {
            if self.eat_keyword("DATABASE") {
                let name = self.identifier()?;
                return Ok(UtilityStatement::CreateDatabase { name });
            }
            return Ok(UtilityStatement::Other {
                tag: self.word_tag(2),
            });
        }
        if self.eat_keyword("ALTER") {
            if self.eat_keyword("DATABASE") {
                let name = self.identifier()?;
                if self.eat_keyword("RENAME") {
                    self.expect_keyword("TO")?;
                    let new_name = self.identifier()?;
                    self.expect_end()?;
                    return Ok(UtilityStatement::AlterDatabaseRename { name, new_name });
                }
            }
            return Ok(UtilityStatement::Other {
                tag: self.word_tag(2),
            });
        }
        Ok(UtilityStatement::Other {
            tag: self.word_tag(1),
        })
    }

    /// After `DROP DATABASE`.
    fn drop_database(&mut self) -> Result<UtilityStatement, ParseError> {
        let missing_ok = self.if_exists()?;
        let name = self.identifier()?;
        let mut force = false;
        let with = self.eat_keyword("WITH");
        if self.eat_symbol("(") {
            loop {
                self.expect_keyword("FORCE")?;
                force = true;
                if !self.eat_symbol(",") {
                    break;
                }
            }
            self.expect_symbol(")")?;
        } else if with {
            return Err(self.error_here());
        }
        self.expect_end()?;
        Ok(UtilityStatement::DropDatabase(DropDatabaseStmt {
            name,
            missing_ok,
            force,
        }))
    }

    /// After `DROP <object type>`.
    fn drop_objects(&mut self, object_type: ObjectType) -> Result<UtilityStatement, ParseError> {
        let missing_ok = self.if_exists()?;
        let mut names = vec![self.qualified_name()?];
        while self.eat_symbol(",") {
            names.push(self.qualified_name()?);
        }
        let cascade = if self.eat_keyword("CASCADE") {
            true
        } else {
            self.eat_keyword("RESTRICT");
            false
        };
        self.expect_end()?;
        Ok(UtilityStatement::DropObjects {
            object_type,
            names,
            missing_ok,
            cascade,
        })
    }
}

/// Recognize a single statement (no trailing `;`).
///
/// # Errors
///
/// Returns a [`ParseError`] for unterminated quotes, empty input, or a
/// malformed database-level statement.
pub fn parse_statement(text: &str) -> Result<ParsedStatement, ParseError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
        notices: Vec::new(),
    };
    let statement = parser.statement()?;
    Ok(ParsedStatement {
        statement,
        notices: parser.notices,
    })
}
