use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexerError {
    #[error("unterminated string literal")]
    UnterminatedString,
    #[error("unknown escape sequence '\\{0}'")]
    UnknownEscape(char),
    #[error("number literal out of range")]
    NumberOutOfRange,
    #[error("indentation is not a multiple of two spaces")]
    BadIndent,
    #[error("tab character in indentation")]
    TabIndent,
}

/// A lexeme of the token stream. Value-bearing variants compare by payload,
/// the singletons compare as themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Number(i64),
    Id(String),
    Char(char),
    String(String),
    Class,
    Return,
    If,
    Else,
    Def,
    Newline,
    Print,
    /// Indentation grew by one level (two spaces).
    Indent,
    /// Indentation shrank by one level.
    Dedent,
    And,
    Or,
    Not,
    Eq,
    NotEq,
    LessOrEq,
    GreaterOrEq,
    None,
    True,
    False,
    Eof,
}

const KEYWORDS: [(&str, Token); 12] = [
    ("class", Token::Class),
    ("return", Token::Return),
    ("if", Token::If),
    ("else", Token::Else),
    ("def", Token::Def),
    ("print", Token::Print),
    ("and", Token::And),
    ("or", Token::Or),
    ("not", Token::Not),
    ("None", Token::None),
    ("True", Token::True),
    ("False", Token::False),
];

/// Indentation-sensitive tokenizer.
///
/// Indentation is measured at the start of each logical line in units of two
/// spaces; between lines the lexer emits one `Indent` or `Dedent` per
/// `advance` until the emitted depth matches the measured depth. Blank lines
/// and comment-only lines produce no tokens at all. At end of input a
/// missing final newline is synthesized and all open indents are closed, so
/// the stream is always balanced before `Eof`.
pub struct Lexer<'code> {
    // Valid utf-8, scanned byte by byte; multi-byte sequences can only
    // occur inside string literals where they pass through untouched.
    code: &'code [u8],
    offset: usize,
    current: Token,
    // True until the first real token of a line is scanned.
    line_start: bool,
    // Depth measured from leading spaces of the current line.
    indents: usize,
    // Depth the emitted Indent/Dedent markers add up to.
    indent_pos: usize,
}

impl<'code> Lexer<'code> {
    /// Create a lexer over the source and load the first token.
    pub fn new(code: &'code str) -> Result<Lexer<'code>, LexerError> {
        let mut lexer = Lexer {
            code: code.as_bytes(),
            offset: 0,
            current: Token::Eof,
            line_start: true,
            indents: 0,
            indent_pos: 0,
        };
        lexer.load_next()?;
        Ok(lexer)
    }

    /// The current token. Idempotent.
    pub fn current(&self) -> &Token {
        &self.current
    }

    /// Load the next token and return it. Once `Eof` is reached, further
    /// calls keep returning `Eof`.
    pub fn advance(&mut self) -> Result<&Token, LexerError> {
        self.load_next()?;
        Ok(&self.current)
    }

    fn peek(&self) -> Option<u8> {
        self.code.get(self.offset).copied()
    }

    fn load_next(&mut self) -> Result<(), LexerError> {
        loop {
            match self.peek() {
                Option::None => {
                    if !self.line_start {
                        // The last line had content but no newline.
                        self.skip_line();
                        self.current = Token::Newline;
                    } else if self.indent_pos > 0 {
                        self.indent_pos -= 1;
                        self.current = Token::Dedent;
                    } else {
                        self.current = Token::Eof;
                    }
                    return Ok(());
                }
                Some(b'\n') => {
                    if self.line_start {
                        // Blank line: no token.
                        self.skip_line();
                        continue;
                    }
                    self.skip_line();
                    self.current = Token::Newline;
                    return Ok(());
                }
                Some(b'#') => {
                    self.skip_comment();
                    continue;
                }
                Some(b' ') => {
                    self.count_spaces()?;
                    continue;
                }
                Some(b'\t') if self.line_start => return Err(LexerError::TabIndent),
                Some(b'\t') | Some(b'\r') => {
                    self.offset += 1;
                    continue;
                }
                Some(_) => {}
            }
            if self.line_start && self.indent_pos != self.indents {
                if self.indent_pos < self.indents {
                    self.indent_pos += 1;
                    self.current = Token::Indent;
                } else {
                    self.indent_pos -= 1;
                    self.current = Token::Dedent;
                }
                return Ok(());
            }
            self.current = self.scan_token()?;
            self.line_start = false;
            return Ok(());
        }
    }

    // Consume the rest of the line including its newline and reset the
    // line-start state. The next line measures its indentation fresh.
    fn skip_line(&mut self) {
        while let Some(ch) = self.peek() {
            self.offset += 1;
            if ch == b'\n' {
                break;
            }
        }
        self.line_start = true;
        self.indents = 0;
    }

    // Consume a comment up to (not including) the terminating newline.
    fn skip_comment(&mut self) {
        while let Some(ch) = self.peek() {
            if ch == b'\n' {
                break;
            }
            self.offset += 1;
        }
    }

    fn count_spaces(&mut self) -> Result<(), LexerError> {
        let mut spaces = 0usize;
        while self.peek() == Some(b' ') {
            self.offset += 1;
            spaces += 1;
        }
        if self.line_start {
            if self.peek() == Some(b'\t') {
                return Err(LexerError::TabIndent);
            }
            // An odd run is fine on a line that turns out blank.
            if spaces % 2 != 0
                && !matches!(self.peek(), Option::None | Some(b'\n') | Some(b'#'))
            {
                return Err(LexerError::BadIndent);
            }
            self.indents = spaces / 2;
        }
        Ok(())
    }

    fn scan_token(&mut self) -> Result<Token, LexerError> {
        let ch = self.code[self.offset];
        if ch.is_ascii_digit() {
            return self.scan_number();
        }
        if ch.is_ascii_alphabetic() || ch == b'_' {
            return Ok(self.scan_name());
        }
        if ch == b'"' || ch == b'\'' {
            return self.scan_string();
        }
        self.offset += 1;
        if let Some(next) = self.peek() {
            let dual = match (ch, next) {
                (b'=', b'=') => Some(Token::Eq),
                (b'!', b'=') => Some(Token::NotEq),
                (b'<', b'=') => Some(Token::LessOrEq),
                (b'>', b'=') => Some(Token::GreaterOrEq),
                _ => Option::None,
            };
            if let Some(token) = dual {
                self.offset += 1;
                return Ok(token);
            }
        }
        Ok(Token::Char(ch as char))
    }

    fn scan_number(&mut self) -> Result<Token, LexerError> {
        let mut value: i64 = 0;
        while let Some(ch) = self.peek().filter(u8::is_ascii_digit) {
            value = value
                .checked_mul(10)
                .and_then(|v| v.checked_add((ch - b'0') as i64))
                .ok_or(LexerError::NumberOutOfRange)?;
            self.offset += 1;
        }
        Ok(Token::Number(value))
    }

    fn scan_name(&mut self) -> Token {
        let start = self.offset;
        while matches!(self.peek(), Some(ch) if ch.is_ascii_alphanumeric() || ch == b'_') {
            self.offset += 1;
        }
        let name = String::from_utf8_lossy(&self.code[start..self.offset]).into_owned();
        if let Some((_, keyword)) = KEYWORDS.iter().find(|(literal, _)| *literal == name) {
            keyword.clone()
        } else {
            Token::Id(name)
        }
    }

    fn scan_string(&mut self) -> Result<Token, LexerError> {
        let quote = self.code[self.offset];
        self.offset += 1;
        let mut value = Vec::new();
        loop {
            let Some(ch) = self.peek() else {
                return Err(LexerError::UnterminatedString);
            };
            self.offset += 1;
            match ch {
                b'\\' => {
                    let Some(escaped) = self.peek() else {
                        return Err(LexerError::UnterminatedString);
                    };
                    self.offset += 1;
                    match escaped {
                        b'"' => value.push(b'"'),
                        b'\'' => value.push(b'\''),
                        b'n' => value.push(b'\n'),
                        b't' => value.push(b'\t'),
                        other => return Err(LexerError::UnknownEscape(other as char)),
                    }
                }
                ch if ch == quote => {
                    return Ok(Token::String(String::from_utf8_lossy(&value).into_owned()));
                }
                other => value.push(other),
            }
        }
    }
}
