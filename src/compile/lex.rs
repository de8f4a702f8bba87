use crate::compile::search::{self, Kind};
use crate::types::span::Span;
use crate::{Error, ErrorKind, Result};

/// Splits template source into tokens for the parser.
///
/// Call [`.next()?`][Lexer::next] until it yields [`None`]; whitespace
/// inside tags is skipped.
#[cfg_attr(internal_debug, derive(Debug))]
pub struct Lexer<'source> {
    /// Template source being lexed.
    pub source: &'source str,

    /// Byte offset of the next unread character.
    cursor: usize,

    state: State,

    /// Set by a `-` on a closing tag, strips leading whitespace from the
    /// following raw text.
    left_trim: bool,

    /// Whether the previous token was a `.`, numbers following it are
    /// list indexes rather than floats.
    after_dot: bool,

    /// Token queued behind a raw token.
    next: Option<(Token, Span)>,
}

/// Where the lexer is: raw text, inside `{{ }}`/`{% %}`, or inside `{# #}`.
#[cfg_attr(internal_debug, derive(Debug))]
enum State {
    /// Within raw template.
    Template,

    /// Inside `{{ }}` or `{% %}`.
    Block {
        /// The span of the begin tag.
        begin: Span,
        /// The end token we are expecting.
        end: Token,
        /// The number of unclosed brackets, end tags are only recognized
        /// outside of them so that `{{ {"a": {"b": 1}} }}` works.
        depth: usize,
    },

    /// Between comment tags.
    Comment {
        /// The span of the begin tag.
        begin: Span,
    },
}

/// The unit yielded by the lexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token {
    /// Raw template
    Raw,
    /// Begin expression tag, e.g. `{{`
    BeginExpr,
    /// End expression tag, e.g. `}}`
    EndExpr,
    /// Begin block tag, e.g. `{%`
    BeginBlock,
    /// End block tag, e.g. `%}`
    EndBlock,
    /// Begin comment tag, e.g. `{#`
    BeginComment,
    /// End comment tag, e.g. `#}`
    EndComment,
    /// `.`
    Dot,
    /// `,`
    Comma,
    /// `:`
    Colon,
    /// `|`
    Pipe,
    /// `~`
    Tilde,
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `/`
    Slash,
    /// `//`
    SlashSlash,
    /// `%`
    Percent,
    /// `=`
    Assign,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `(`
    OpenParen,
    /// `)`
    CloseParen,
    /// `[`
    OpenBracket,
    /// `]`
    CloseBracket,
    /// `{`
    OpenBrace,
    /// `}`
    CloseBrace,
    /// Sequence of whitespace characters.
    Whitespace,
    /// An identifier or keyword, e.g. `user` or `endfor`.
    Ident,
    /// An integer or float literal, e.g. `19`, `0b1011`, `0o777`, `0x7f` or
    /// `1.5e3`.
    Number,
    /// A string literal, e.g. `"Hello World!\n"` or `'hi'`.
    String,
}

impl<'source> Lexer<'source> {
    /// Construct a new lexer.
    pub fn new(source: &'source str) -> Self {
        Self {
            source,
            cursor: 0,
            state: State::Template,
            left_trim: false,
            after_dot: false,
            next: None,
        }
    }

    /// Returns the next non-whitespace token and its span.
    pub fn next(&mut self) -> Result<Option<(Token, Span)>> {
        loop {
            match self.lex()? {
                Some((tk, sp)) if !tk.is_whitespace() => return Ok(Some((tk, sp))),
                None => return Ok(None),
                _ => continue,
            }
        }
    }

    /// Returns the next token and span.
    fn lex(&mut self) -> Result<Option<(Token, Span)>> {
        if let Some(next) = self.next.take() {
            return Ok(Some(next));
        }

        let i = self.cursor;

        if self.source[i..].is_empty() {
            return match self.state {
                State::Template => Ok(None),
                State::Block { begin, end, .. } => Err(self.err_unclosed(begin, end)),
                State::Comment { begin } => Err(self.err_unclosed(begin, Token::EndComment)),
            };
        }

        match self.state {
            State::Template => self.lex_template(i),
            State::Block { begin, end, depth } => self.lex_block(begin, end, depth, i),
            State::Comment { begin } => self.lex_comment(begin, i),
        }
    }

    fn lex_template(&mut self, i: usize) -> Result<Option<(Token, Span)>> {
        // Raw text runs from `i` up to the next opening delimiter.

        let m = match search::find_begin(self.source, i) {
            Some(m) => m,
            None => {
                let j = self.source.len();
                self.cursor = j;
                return Ok(self.raw_token(i, j, false));
            }
        };

        if m.kind == Kind::BeginBlock {
            if let Some((trim, end)) = search::keyword_tag(self.source, m.end, "raw") {
                return self.lex_raw_block(i, m, trim, end);
            }
        }

        let tk = Token::from_kind(m.kind);
        let begin = Span::from(m.start..m.end);
        self.cursor = m.end;
        self.after_dot = false;
        self.state = match tk {
            Token::BeginComment => State::Comment { begin },
            _ => State::Block {
                begin,
                end: tk.pair(),
                depth: 0,
            },
        };

        match self.raw_token(i, m.start, m.trim) {
            // Raw text goes out first, the tag waits in `next`.
            Some(raw) => {
                self.next = Some((tk, begin));
                Ok(Some(raw))
            }
            None => Ok(Some((tk, begin))),
        }
    }

    /// Lexes a `{% raw %}...{% endraw %}` section, the content is emitted as
    /// a single raw token.
    fn lex_raw_block(
        &mut self,
        i: usize,
        open: search::Match,
        trim_content_start: bool,
        content_start: usize,
    ) -> Result<Option<(Token, Span)>> {
        let mut at = content_start;
        let (close, endraw) = loop {
            match search::find_begin(self.source, at) {
                Some(m) if m.kind == Kind::BeginBlock => {
                    if let Some(end) = search::keyword_tag(self.source, m.end, "endraw") {
                        break (m, end);
                    }
                    at = m.end;
                }
                Some(m) => at = m.end,
                None => {
                    return Err(Error::span(
                        ErrorKind::UnclosedDelimiter,
                        "unclosed `raw` block",
                        self.source,
                        open.start..content_start,
                    ));
                }
            }
        };
        let (trim_after, end) = endraw;

        let mut m = content_start;
        let mut n = close.start;
        if trim_content_start {
            let s = &self.source[m..n];
            m += s.len() - s.trim_start().len();
        }
        if close.trim {
            n = m + self.source[m..n].trim_end().len();
        }
        let content_span = Span::from(m..n);

        self.cursor = end;

        let raw = self.raw_token(i, open.start, open.trim);
        self.left_trim = trim_after;
        match raw {
            Some(raw) => {
                self.next = Some((Token::Raw, content_span));
                Ok(Some(raw))
            }
            None => Ok(Some((Token::Raw, content_span))),
        }
    }

    fn lex_block(
        &mut self,
        begin: Span,
        end: Token,
        depth: usize,
        i: usize,
    ) -> Result<Option<(Token, Span)>> {

        if depth == 0 {
            if let Some(m) = search::end_at(self.source, i) {
                let tk = Token::from_kind(m.kind);
                if tk != end {
                    return Err(self.err_unexpected_token(tk, m.start..m.end));
                }

                self.state = State::Template;
                self.left_trim = m.trim;
                self.cursor = m.end;
                return Ok(Some((tk, Span::from(m.start..m.end))));
            }
            if search::begin_at(self.source, i).is_some() {
                return Err(self.err_unclosed(begin, end));
            }
        }

        // Indexes are absolute offsets into `source`.
        let mut iter = self.source[i..].char_indices().map(|(d, c)| (i + d, c));

        let c = match iter.next() {
            Some((_, c)) => c,
            None => return Err(self.err_unclosed(begin, end)),
        };
        let next = iter.clone().next().map(|(_, c)| c);

        let (tk, j) = match c {
            // Punctuation.
            '.' => (Token::Dot, i + 1),
            ',' => (Token::Comma, i + 1),
            ':' => (Token::Colon, i + 1),
            '|' => (Token::Pipe, i + 1),
            '~' => (Token::Tilde, i + 1),
            '+' => (Token::Plus, i + 1),
            '-' => (Token::Minus, i + 1),
            '*' => (Token::Star, i + 1),
            '%' => (Token::Percent, i + 1),
            '(' => (Token::OpenParen, i + 1),
            ')' => (Token::CloseParen, i + 1),
            '[' => (Token::OpenBracket, i + 1),
            ']' => (Token::CloseBracket, i + 1),
            '{' => (Token::OpenBrace, i + 1),
            '}' => (Token::CloseBrace, i + 1),

            // One or two character operators.
            '/' if next == Some('/') => (Token::SlashSlash, i + 2),
            '/' => (Token::Slash, i + 1),
            '=' if next == Some('=') => (Token::Eq, i + 2),
            '=' => (Token::Assign, i + 1),
            '!' if next == Some('=') => (Token::Ne, i + 2),
            '<' if next == Some('=') => (Token::Le, i + 2),
            '<' => (Token::Lt, i + 1),
            '>' if next == Some('=') => (Token::Ge, i + 2),
            '>' => (Token::Gt, i + 1),

            // Multi-character tokens with a distinct start character.
            '"' | '\'' => self.lex_string(iter, i, c)?,
            c if c.is_ascii_digit() => self.lex_number(i),
            c if is_whitespace(c) => (Token::Whitespace, self.lex_while(iter, is_whitespace)),
            c if is_ident_start(c) => (Token::Ident, self.lex_while(iter, is_ident)),

            // Any other character...
            _ => {
                return Err(self.err_unexpected_character(i..(i + c.len_utf8())));
            }
        };

        if let State::Block { depth, .. } = &mut self.state {
            match tk {
                Token::OpenParen | Token::OpenBracket | Token::OpenBrace => *depth += 1,
                Token::CloseParen | Token::CloseBracket | Token::CloseBrace => {
                    *depth = depth.saturating_sub(1)
                }
                _ => {}
            }
        }
        if !tk.is_whitespace() {
            self.after_dot = tk == Token::Dot;
        }

        self.cursor = j;

        Ok(Some((tk, Span::from(i..j))))
    }

    fn lex_comment(&mut self, begin: Span, i: usize) -> Result<Option<(Token, Span)>> {
        // The body is emitted as a raw token, the parser discards it.

        let m = match search::find_end_comment(self.source, i) {
            Some(m) => m,
            None => return Err(self.err_unclosed(begin, Token::EndComment)),
        };

        self.cursor = m.end;
        self.state = State::Template;
        self.left_trim = m.trim;
        let end = (Token::EndComment, Span::from(m.start..m.end));

        if i == m.start {
            Ok(Some(end))
        } else {
            self.next = Some(end);
            Ok(Some((Token::Raw, Span::from(i..m.start))))
        }
    }

    /// Returns a raw token for `i..j` after applying any trimming, or `None`
    /// if nothing remains.
    fn raw_token(&mut self, mut i: usize, mut j: usize, right_trim: bool) -> Option<(Token, Span)> {
        if right_trim {
            j = i + self.source[i..j].trim_end().len();
        }
        if self.left_trim {
            self.left_trim = false;
            let s = &self.source[i..j];
            i += s.len() - s.trim_start().len();
        }
        (i < j).then(|| (Token::Raw, Span::from(i..j)))
    }

    fn lex_string<I>(&mut self, mut iter: I, i: usize, quote: char) -> Result<(Token, usize)>
    where
        I: Iterator<Item = (usize, char)> + Clone,
    {
        loop {
            match iter.next() {
                None => {
                    return Err(Error::span(
                        ErrorKind::UnclosedDelimiter,
                        "undelimited string",
                        self.source,
                        i..self.source.len(),
                    ));
                }
                Some((_, '\\')) => {
                    iter.next();
                }
                Some((j, c)) if c == quote => {
                    return Ok((Token::String, j + 1));
                }
                Some(_) => {}
            }
        }
    }

    fn lex_number(&mut self, i: usize) -> (Token, usize) {
        let bytes = self.source.as_bytes();
        let digits = |mut j: usize, pred: fn(u8) -> bool| {
            while j < bytes.len() && (pred(bytes[j]) || bytes[j] == b'_') {
                j += 1;
            }
            j
        };

        if self.after_dot {
            return (Token::Number, digits(i, |b| b.is_ascii_digit()));
        }

        if bytes[i] == b'0' && matches!(bytes.get(i + 1), Some(b'x' | b'o' | b'b')) {
            return (Token::Number, digits(i + 2, |b| b.is_ascii_alphanumeric()));
        }

        let mut j = digits(i, |b| b.is_ascii_digit());
        if bytes.get(j) == Some(&b'.') && bytes.get(j + 1).map_or(false, u8::is_ascii_digit) {
            j = digits(j + 1, |b| b.is_ascii_digit());
        }
        if matches!(bytes.get(j), Some(b'e' | b'E')) {
            let k = match bytes.get(j + 1) {
                Some(b'+' | b'-') => j + 2,
                _ => j + 1,
            };
            if bytes.get(k).map_or(false, u8::is_ascii_digit) {
                j = digits(k, |b| b.is_ascii_digit());
            }
        }
        (Token::Number, j)
    }

    fn lex_while<I, P>(&mut self, mut iter: I, pred: P) -> usize
    where
        I: Iterator<Item = (usize, char)> + Clone,
        P: Fn(char) -> bool,
    {
        loop {
            match iter.clone().next() {
                Some((_, c)) if pred(c) => {
                    iter.next();
                }
                Some((j, _)) => return j,
                None => return self.source.len(),
            }
        }
    }

    fn err_unclosed(&self, begin: Span, end: Token) -> Error {
        let begin_tag = &self.source[begin];
        let end = end.human();
        Error::span(
            ErrorKind::UnclosedDelimiter,
            format!("unclosed `{begin_tag}`, expected {end}"),
            self.source,
            begin,
        )
    }

    fn err_unexpected_token(&self, tk: Token, span: impl Into<Span>) -> Error {
        let tk = tk.human();
        Error::syntax(format!("unexpected {tk}"), self.source, span)
    }

    fn err_unexpected_character(&self, span: impl Into<Span>) -> Error {
        Error::syntax("unexpected character", self.source, span)
    }
}

impl Token {
    pub fn human(&self) -> &'static str {
        match self {
            Self::Raw => "raw template",
            Self::BeginExpr => "begin expression",
            Self::EndExpr => "end expression",
            Self::BeginBlock => "begin block",
            Self::EndBlock => "end block",
            Self::BeginComment => "begin comment",
            Self::EndComment => "end comment",
            Self::Dot => "member access operator",
            Self::Comma => "comma",
            Self::Colon => "colon",
            Self::Pipe => "pipe",
            Self::Tilde => "`~`",
            Self::Plus => "`+`",
            Self::Minus => "`-`",
            Self::Star => "`*`",
            Self::Slash => "`/`",
            Self::SlashSlash => "`//`",
            Self::Percent => "`%`",
            Self::Assign => "`=`",
            Self::Eq => "`==`",
            Self::Ne => "`!=`",
            Self::Lt => "`<`",
            Self::Le => "`<=`",
            Self::Gt => "`>`",
            Self::Ge => "`>=`",
            Self::OpenParen => "`(`",
            Self::CloseParen => "`)`",
            Self::OpenBracket => "`[`",
            Self::CloseBracket => "`]`",
            Self::OpenBrace => "`{`",
            Self::CloseBrace => "`}`",
            Self::Whitespace => "whitespace",
            Self::Ident => "identifier",
            Self::Number => "number",
            Self::String => "string",
        }
    }

    /// Returns the corresponding end tag for a begin tag.
    fn pair(&self) -> Self {
        match self {
            Self::BeginExpr => Self::EndExpr,
            Self::BeginBlock => Self::EndBlock,
            _ => Self::EndComment,
        }
    }

    fn is_whitespace(&self) -> bool {
        matches!(self, Self::Whitespace)
    }

    fn from_kind(kind: Kind) -> Self {
        match kind {
            Kind::BeginExpr => Self::BeginExpr,
            Kind::EndExpr => Self::EndExpr,
            Kind::BeginBlock => Self::BeginBlock,
            Kind::EndBlock => Self::EndBlock,
            Kind::BeginComment => Self::BeginComment,
            Kind::EndComment => Self::EndComment,
        }
    }
}

fn is_whitespace(c: char) -> bool {
    matches!(c, '\t' | ' ' | '\n' | '\r')
}

#[cfg(feature = "unicode")]
fn is_ident_start(c: char) -> bool {
    c == '_' || unicode_ident::is_xid_start(c)
}

#[cfg(feature = "unicode")]
fn is_ident(c: char) -> bool {
    unicode_ident::is_xid_continue(c)
}

#[cfg(not(feature = "unicode"))]
fn is_ident_start(c: char) -> bool {
    matches!(c, 'A'..='Z' | 'a'..='z' | '_')
}

#[cfg(not(feature = "unicode"))]
fn is_ident(c: char) -> bool {
    matches!(c, '0'..='9' | 'A'..='Z' | 'a'..='z' | '_')
}
