// Vexel lexer -- tokenizer for the sigil-driven Vexel language.

mod cursor;
mod unescape;

use cursor::Cursor;
use vexel_common::span::{FileId, Span};
use vexel_common::token::{Token, TokenKind};

pub use unescape::{unescape_char, unescape_string, UnescapeError};

/// The Vexel lexer. Converts source text into a stream of tokens.
///
/// Implements `Iterator<Item = Token>` so callers can consume tokens lazily
/// or collect them into a `Vec`. Tokens carry spans only; consumers slice
/// the source for literal text.
pub struct Lexer<'src> {
    cursor: Cursor<'src>,
    file: FileId,
    /// Whether we have already emitted the `Eof` token.
    emitted_eof: bool,
}

impl<'src> Lexer<'src> {
    pub fn new(file: FileId, source: &'src str) -> Self {
        Self { cursor: Cursor::new(source), file, emitted_eof: false }
    }

    /// Convenience: tokenize the entire source into a `Vec<Token>`.
    ///
    /// The returned vector includes the final `Eof` token.
    pub fn tokenize(file: FileId, source: &str) -> Vec<Token> {
        Lexer::new(file, source).collect()
    }

    fn token(&self, kind: TokenKind, start: u32) -> Token {
        Token::new(kind, Span::new(self.file, start, self.cursor.pos()))
    }

    /// Consume one character and produce a single-character token.
    fn single(&mut self, kind: TokenKind, start: u32) -> Token {
        self.cursor.advance();
        self.token(kind, start)
    }

    /// Consume one character, then pick between a two-character token and
    /// the single-character fallback.
    fn one_or_two(&mut self, second: char, two: TokenKind, one: TokenKind, start: u32) -> Token {
        self.cursor.advance();
        if self.cursor.eat(second) {
            self.token(two, start)
        } else {
            self.token(one, start)
        }
    }

    fn next_token(&mut self) -> Token {
        self.skip_trivia();

        let start = self.cursor.pos();
        let Some(c) = self.cursor.peek() else {
            return self.token(TokenKind::Eof, start);
        };

        match c {
            // ── Delimiters ─────────────────────────────────────────────
            '(' => self.single(TokenKind::LParen, start),
            ')' => self.single(TokenKind::RParen, start),
            '[' => self.single(TokenKind::LBracket, start),
            ']' => self.single(TokenKind::RBracket, start),
            '{' => self.single(TokenKind::LBrace, start),
            '}' => self.single(TokenKind::RBrace, start),
            ',' => self.single(TokenKind::Comma, start),
            ';' => self.single(TokenKind::Semi, start),

            // ── Sigils and multi-character operators ───────────────────
            ':' => self.one_or_two(':', TokenKind::ColonColon, TokenKind::Colon, start),
            '.' => self.one_or_two('.', TokenKind::DotDot, TokenKind::Dot, start),
            '@' => self.one_or_two('@', TokenKind::AtAt, TokenKind::At, start),
            '&' => self.one_or_two('&', TokenKind::AmpAmp, TokenKind::Amp, start),
            '|' => self.one_or_two('|', TokenKind::PipePipe, TokenKind::Pipe, start),
            '^' => self.one_or_two('^', TokenKind::CaretCaret, TokenKind::Caret, start),
            '!' => self.one_or_two('=', TokenKind::Ne, TokenKind::Bang, start),
            '+' => self.single(TokenKind::Plus, start),
            '*' => self.single(TokenKind::Star, start),
            '%' => self.single(TokenKind::Percent, start),
            '~' => self.single(TokenKind::Tilde, start),
            '?' => self.single(TokenKind::Question, start),
            '#' => self.single(TokenKind::Hash, start),
            '$' => self.single(TokenKind::Dollar, start),
            '-' => self.one_or_two('>', TokenKind::Arrow, TokenKind::Minus, start),
            '/' => self.single(TokenKind::Slash, start),
            '=' => {
                self.cursor.advance();
                match self.cursor.peek() {
                    Some('=') => {
                        self.cursor.advance();
                        self.token(TokenKind::EqEq, start)
                    }
                    Some('>') => {
                        self.cursor.advance();
                        self.token(TokenKind::FatArrow, start)
                    }
                    _ => self.token(TokenKind::Eq, start),
                }
            }
            '<' => {
                self.cursor.advance();
                match self.cursor.peek() {
                    Some('<') => {
                        self.cursor.advance();
                        self.token(TokenKind::Shl, start)
                    }
                    Some('=') => {
                        self.cursor.advance();
                        self.token(TokenKind::Le, start)
                    }
                    _ => self.token(TokenKind::Lt, start),
                }
            }
            '>' => {
                self.cursor.advance();
                match self.cursor.peek() {
                    Some('>') => {
                        self.cursor.advance();
                        self.token(TokenKind::Shr, start)
                    }
                    Some('=') => {
                        self.cursor.advance();
                        self.token(TokenKind::Ge, start)
                    }
                    _ => self.token(TokenKind::Gt, start),
                }
            }

            // ── Literals ───────────────────────────────────────────────
            '0'..='9' => self.lex_number(start),
            '"' => self.lex_string(start),
            '\'' => self.lex_char(start),
            '`' => self.lex_process(start),

            // ── Identifiers ────────────────────────────────────────────
            c if is_ident_start(c) => {
                self.cursor.advance();
                self.cursor.eat_while(is_ident_continue);
                self.token(TokenKind::Ident, start)
            }

            // ── Unknown character (error recovery) ─────────────────────
            _ => {
                self.cursor.advance();
                self.token(TokenKind::Error, start)
            }
        }
    }

    /// Skip whitespace (newlines are insignificant) and `//` line comments.
    fn skip_trivia(&mut self) {
        loop {
            self.cursor.eat_while(|c| c == ' ' || c == '\t' || c == '\r' || c == '\n');
            if self.cursor.peek() == Some('/') && self.cursor.peek_next() == Some('/') {
                self.cursor.eat_while(|c| c != '\n');
            } else {
                return;
            }
        }
    }

    /// Lex an integer or float literal.
    ///
    /// Integers are decimal or `0x…` hex and may carry a width suffix
    /// (`1u8`, `200u16`); the suffix is validated by the parser. A `.` only
    /// continues the literal when followed by a digit, so `1..5` lexes as
    /// `1` `..` `5`.
    fn lex_number(&mut self, start: u32) -> Token {
        let first = self.cursor.advance().unwrap_or('0');

        if first == '0' && matches!(self.cursor.peek(), Some('x' | 'X')) {
            self.cursor.advance();
            self.cursor.eat_while(|c| c.is_ascii_hexdigit());
            return self.token(TokenKind::Int, start);
        }

        self.cursor.eat_while(|c| c.is_ascii_digit());

        if self.cursor.peek() == Some('.')
            && self.cursor.peek_next().is_some_and(|c| c.is_ascii_digit())
        {
            self.cursor.advance();
            self.cursor.eat_while(|c| c.is_ascii_digit());
            return self.token(TokenKind::Float, start);
        }

        // Width suffix, e.g. `1u8`. Eaten here so the parser sees a single
        // token; an invalid suffix becomes a parse error with this span.
        self.cursor.eat_while(is_ident_continue);
        self.token(TokenKind::Int, start)
    }

    fn lex_string(&mut self, start: u32) -> Token {
        self.cursor.advance(); // opening quote
        loop {
            match self.cursor.advance() {
                Some('"') => return self.token(TokenKind::Str, start),
                Some('\\') => {
                    self.cursor.advance();
                }
                Some(_) => {}
                None => return self.token(TokenKind::Error, start),
            }
        }
    }

    fn lex_char(&mut self, start: u32) -> Token {
        self.cursor.advance(); // opening quote
        match self.cursor.advance() {
            Some('\\') => {
                self.cursor.advance();
                // \xHH and \NNN escapes have a multi-character body.
                self.cursor.eat_while(|c| c != '\'' && c != '\n');
            }
            Some('\'') | None => return self.token(TokenKind::Error, start),
            Some(_) => {}
        }
        if self.cursor.eat('\'') {
            self.token(TokenKind::Char, start)
        } else {
            self.token(TokenKind::Error, start)
        }
    }

    fn lex_process(&mut self, start: u32) -> Token {
        self.cursor.advance(); // opening backtick
        loop {
            match self.cursor.advance() {
                Some('`') => return self.token(TokenKind::Process, start),
                Some(_) => {}
                None => return self.token(TokenKind::Error, start),
            }
        }
    }
}

impl<'src> Iterator for Lexer<'src> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.emitted_eof {
            return None;
        }
        let token = self.next_token();
        if token.kind == TokenKind::Eof {
            self.emitted_eof = true;
        }
        Some(token)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        Lexer::tokenize(FileId(0), source)
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn sigil_soup() {
        use TokenKind::*;
        assert_eq!(
            kinds("&^main() -> #i32 { 0 }"),
            vec![Amp, Caret, Ident, LParen, RParen, Arrow, Hash, Ident, LBrace, Int, RBrace, Eof]
        );
    }

    #[test]
    fn double_sigils() {
        use TokenKind::*;
        assert_eq!(kinds(":: .. @@ && || ^^ << >>"), vec![
            ColonColon, DotDot, AtAt, AmpAmp, PipePipe, CaretCaret, Shl, Shr, Eof
        ]);
    }

    #[test]
    fn range_is_not_a_float() {
        use TokenKind::*;
        assert_eq!(kinds("1..5"), vec![Int, DotDot, Int, Eof]);
        assert_eq!(kinds("1.5"), vec![Float, Eof]);
    }

    #[test]
    fn int_suffix_stays_in_token() {
        let tokens = Lexer::tokenize(FileId(0), "1u8 + 2u8");
        assert_eq!(tokens[0].kind, TokenKind::Int);
        assert_eq!(tokens[0].span.end - tokens[0].span.start, 3);
    }

    #[test]
    fn hex_literal() {
        assert_eq!(kinds("0xFF"), vec![TokenKind::Int, TokenKind::Eof]);
    }

    #[test]
    fn comments_are_trivia() {
        assert_eq!(
            kinds("1 // two three\n2"),
            vec![TokenKind::Int, TokenKind::Int, TokenKind::Eof]
        );
    }

    #[test]
    fn string_with_escapes() {
        assert_eq!(kinds(r#""a\"b\n""#), vec![TokenKind::Str, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_error() {
        assert_eq!(kinds("\"abc"), vec![TokenKind::Error, TokenKind::Eof]);
    }

    #[test]
    fn char_literals() {
        assert_eq!(kinds(r"'a' '\n' '\x41'"), vec![
            TokenKind::Char,
            TokenKind::Char,
            TokenKind::Char,
            TokenKind::Eof
        ]);
    }

    #[test]
    fn process_literal() {
        assert_eq!(kinds("`ls -la`"), vec![TokenKind::Process, TokenKind::Eof]);
    }

    #[test]
    fn annotation_brackets() {
        use TokenKind::*;
        assert_eq!(
            kinds("[[reentrant]]"),
            vec![LBracket, LBracket, Ident, RBracket, RBracket, Eof]
        );
    }
}
