//! SQL Lexer (Tokenizer)
//!
//! Converts query text into tokens. Negative numbers are left to the parser,
//! so `a-1` lexes as `a`, `-`, `1`.

use super::token::Token;
use crate::error::{Error, Result};

/// SQL Lexer
pub struct Lexer {
    input: Vec<char>,
    position: usize,
}

impl Lexer {
    /// Create a new lexer for the given input
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
        }
    }

    /// Tokenize the entire input, ending with `Token::Eof`
    pub fn tokenize(&mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token == Token::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Result<Token> {
        self.skip_trivia();

        let Some(ch) = self.current() else {
            return Ok(Token::Eof);
        };

        let simple = match ch {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            ',' => Some(Token::Comma),
            ';' => Some(Token::Semicolon),
            '.' => Some(Token::Dot),
            '?' => Some(Token::Question),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Asterisk),
            '/' => Some(Token::Slash),
            '%' => Some(Token::Percent),
            '=' => Some(Token::Eq),
            '&' => Some(Token::Ampersand),
            '^' => Some(Token::Caret),
            '~' => Some(Token::Tilde),
            _ => None,
        };
        if let Some(token) = simple {
            self.advance();
            return Ok(token);
        }

        match ch {
            '<' => {
                self.advance();
                Ok(match self.current() {
                    Some('=') => self.take(Token::Lte),
                    Some('>') => self.take(Token::Neq),
                    Some('<') => self.take(Token::ShiftLeft),
                    _ => Token::Lt,
                })
            }
            '>' => {
                self.advance();
                Ok(match self.current() {
                    Some('=') => self.take(Token::Gte),
                    Some('>') => self.take(Token::ShiftRight),
                    _ => Token::Gt,
                })
            }
            '!' => {
                self.advance();
                match self.current() {
                    Some('=') => Ok(self.take(Token::Neq)),
                    _ => Err(Error::UnexpectedCharacter('!', self.position - 1)),
                }
            }
            '|' => {
                self.advance();
                Ok(match self.current() {
                    Some('|') => self.take(Token::Concat),
                    _ => Token::Pipe,
                })
            }
            '\'' => self.read_quoted('\'').map(Token::StringLiteral),
            '"' => self.read_quoted('"').map(Token::Identifier),
            c if c.is_ascii_digit() => self.read_number(),
            c if c.is_alphabetic() || c == '_' => Ok(self.read_identifier()),
            c => Err(Error::UnexpectedCharacter(c, self.position)),
        }
    }

    fn current(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position + 1).copied()
    }

    fn advance(&mut self) {
        self.position += 1;
    }

    /// Consume the current character and yield `token`
    fn take(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    /// Skip whitespace and comments (`--` to end of line, `/* */`)
    fn skip_trivia(&mut self) {
        loop {
            while self.current().is_some_and(char::is_whitespace) {
                self.advance();
            }

            match (self.current(), self.peek()) {
                (Some('-'), Some('-')) => {
                    while self.current().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                (Some('/'), Some('*')) => {
                    self.position += 2;
                    while self.current().is_some() {
                        if self.current() == Some('*') && self.peek() == Some('/') {
                            self.position += 2;
                            break;
                        }
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    /// Read text between `quote` characters; a doubled quote escapes itself.
    fn read_quoted(&mut self, quote: char) -> Result<String> {
        let start = self.position;
        self.advance();

        let mut value = String::new();
        while let Some(ch) = self.current() {
            self.advance();
            if ch != quote {
                value.push(ch);
            } else if self.current() == Some(quote) {
                value.push(quote);
                self.advance();
            } else {
                return Ok(value);
            }
        }

        Err(Error::UnterminatedString(start))
    }

    /// Read a number (integer or float)
    fn read_number(&mut self) -> Result<Token> {
        let start = self.position;
        let mut value = String::new();
        let mut is_float = false;

        while let Some(ch) = self.current() {
            if ch.is_ascii_digit() {
                value.push(ch);
            } else if ch == '.' && !is_float && self.peek().is_some_and(|c| c.is_ascii_digit()) {
                is_float = true;
                value.push(ch);
            } else if ch == 'e' || ch == 'E' {
                is_float = true;
                value.push(ch);
                if let Some(sign @ ('+' | '-')) = self.peek() {
                    value.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
            self.advance();
        }

        if is_float {
            value
                .parse::<f64>()
                .map(Token::FloatLiteral)
                .map_err(|_| Error::InvalidNumber(start))
        } else {
            value
                .parse::<i64>()
                .map(Token::IntegerLiteral)
                .map_err(|_| Error::InvalidNumber(start))
        }
    }

    /// Read an identifier or keyword
    fn read_identifier(&mut self) -> Token {
        let start = self.position;
        while self.current().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            self.advance();
        }
        let word: String = self.input[start..self.position].iter().collect();

        Token::from_keyword(&word).unwrap_or(Token::Identifier(word))
    }
}
