use std::sync::Arc;

use records_model::parse_progress::{is_ident_part, is_ident_start};
use records_model::{
    recognise_temporal, ColumnId, DateTimeKind, Number, ParseProgress, RecogniseError, Span,
    TableId,
};
use serde::{Deserialize, Serialize};

use crate::ast::{
    AddSubtractOp, ComparisonOp, Definition, ExprKind, Expression, MatchClause, Pattern,
};
use crate::type_expr::{TypeExpression, TypeExpressionArg, UnitExpression};

/// A failure that leaves no tree to recover: unbalanced keywords, a missing `)`, trailing text.
/// Malformed leaves and operators are not errors; they parse to invalid nodes instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (at {}..{})", .span.start, .span.end)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    #[must_use]
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        Self {
            message: message.into(),
            span,
        }
    }

    #[must_use]
    pub fn add_offset(self, delta: usize) -> Self {
        Self {
            message: self.message,
            span: self.span.add_offset(delta),
        }
    }
}

impl From<RecogniseError> for ParseError {
    fn from(err: RecogniseError) -> Self {
        ParseError::new(err.message, Span::point(err.position))
    }
}

pub type ParseResult<T> = Result<T, ParseError>;

pub fn parse_expression(src: &str) -> ParseResult<Expression> {
    let mut parser = Parser::new(src);
    let expression = parser.parse_expr()?;
    parser.expect_end()?;
    Ok(expression)
}

/// Parses the text of a type, as found inside `type{...}` or in a saved document.
pub fn parse_type_expression(src: &str) -> ParseResult<TypeExpression> {
    let mut parser = Parser::new(src);
    let ty = parser.parse_type()?;
    parser.expect_end()?;
    Ok(ty)
}

/// Parses the text of a unit, as found inside `unit{...}` or after a number.
pub fn parse_unit_expression(src: &str) -> ParseResult<UnitExpression> {
    let mut parser = Parser::new(src);
    let unit = parser.parse_unit()?;
    parser.expect_end()?;
    Ok(unit)
}

/// Keywords that close a construct opened by an earlier keyword.
const CLOSING_KEYWORDS: &[&str] = &[
    "then",
    "else",
    "endif",
    "case",
    "given",
    "orcase",
    "endmatch",
    "endfunction",
    "enddefine",
];

#[derive(Clone, Debug, PartialEq)]
enum Token {
    /// Unsigned digits, with an optional fraction.
    Number(String),
    Text(String),
    Ident(String),
    Boolean(bool),
    /// `@word`
    Keyword(String),
    /// `_` (empty name) or `_name`.
    Underscore(String),
    Question,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Backslash,
    Hash,
    Op(&'static str),
    /// A run of characters with no meaning, kept as an operator so that it round-trips.
    Unknown(String),
    /// Text that cannot be lexed at all, such as an unterminated quote.
    Invalid(String),
    Eof,
}

fn describe(token: &Token) -> String {
    match token {
        Token::Number(raw) => format!("number {raw}"),
        Token::Text(_) => "quoted text".to_string(),
        Token::Ident(name) => format!("name {name}"),
        Token::Boolean(b) => b.to_string(),
        Token::Keyword(word) => format!("@{word}"),
        Token::Underscore(name) => format!("_{name}"),
        Token::Question => "'?'".to_string(),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::LBracket => "'['".to_string(),
        Token::RBracket => "']'".to_string(),
        Token::LBrace => "'{'".to_string(),
        Token::RBrace => "'}'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Colon => "':'".to_string(),
        Token::Backslash => "'\\'".to_string(),
        Token::Hash => "'#'".to_string(),
        Token::Op(op) => format!("'{op}'"),
        Token::Unknown(text) | Token::Invalid(text) => format!("{text:?}"),
        Token::Eof => "end of input".to_string(),
    }
}

fn starts_operand(token: &Token) -> bool {
    match token {
        Token::Number(_)
        | Token::Text(_)
        | Token::Ident(_)
        | Token::Boolean(_)
        | Token::Underscore(_)
        | Token::Question
        | Token::LParen
        | Token::LBracket
        | Token::LBrace
        | Token::Invalid(_) => true,
        Token::Keyword(word) => !CLOSING_KEYWORDS.contains(&word.as_str()),
        _ => false,
    }
}

fn is_unknown_operator_char(ch: char) -> bool {
    !ch.is_whitespace() && !ch.is_alphanumeric() && !"\"@_?()[]{},:\\#=<>|&;+-*/^".contains(ch)
}

#[derive(Clone, Debug)]
struct Spanned {
    token: Token,
    span: Span,
}

#[derive(Clone, Copy)]
struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn progress(&self) -> ParseProgress<'a> {
        ParseProgress::new(self.src).advance(self.pos)
    }

    fn next_token(&mut self) -> Spanned {
        let progress = self.progress().skip_spaces();
        let start = progress.position();
        self.pos = start;
        let token = self.lex(progress);
        Spanned {
            token,
            span: Span::new(start, self.pos),
        }
    }

    fn lex(&mut self, progress: ParseProgress<'a>) -> Token {
        let Some(ch) = progress.peek_char() else {
            return Token::Eof;
        };
        if ch.is_ascii_digit() {
            if let Some((raw, after)) = progress.consume_number() {
                self.pos = after.position();
                return Token::Number(raw.to_string());
            }
        }
        if is_ident_start(ch) {
            if let Some((ident, after)) = progress.consume_ident() {
                self.pos = after.position();
                return match ident {
                    "true" => Token::Boolean(true),
                    "false" => Token::Boolean(false),
                    _ => Token::Ident(ident.to_string()),
                };
            }
        }
        match ch {
            '"' => match progress.consume_quoted() {
                Ok(success) => {
                    self.pos = success.progress.position();
                    Token::Text(success.value)
                }
                Err(_) => {
                    self.pos = self.src.len();
                    Token::Invalid(progress.rest().to_string())
                }
            },
            '@' => {
                let (word, after) = progress.advance(1).consume_while(is_ident_part);
                self.pos = after.position();
                if word.is_empty() {
                    Token::Unknown("@".to_string())
                } else {
                    Token::Keyword(word.to_string())
                }
            }
            '_' => {
                let (name, after) = progress.advance(1).consume_while(is_ident_part);
                self.pos = after.position();
                Token::Underscore(name.to_string())
            }
            _ => {
                let (token, len) = self.punctuation(progress, ch);
                self.pos = progress.position() + len;
                token
            }
        }
    }

    fn punctuation(&self, progress: ParseProgress<'a>, ch: char) -> (Token, usize) {
        let rest = progress.rest();
        let two = |text: &'static str| (Token::Op(text), 2);
        let one = |token: Token| (token, 1);
        match ch {
            '?' => one(Token::Question),
            '(' => one(Token::LParen),
            ')' => one(Token::RParen),
            '[' => one(Token::LBracket),
            ']' => one(Token::RBracket),
            '{' => one(Token::LBrace),
            '}' => one(Token::RBrace),
            ',' => one(Token::Comma),
            '\\' => one(Token::Backslash),
            '#' => one(Token::Hash),
            ':' if rest.starts_with("::") => two("::"),
            ':' => one(Token::Colon),
            '=' if rest.starts_with("=~") => two("=~"),
            '=' => one(Token::Op("=")),
            '<' if rest.starts_with("<=") => two("<="),
            '<' if rest.starts_with("<>") => two("<>"),
            '<' => one(Token::Op("<")),
            '>' if rest.starts_with(">=") => two(">="),
            '>' => one(Token::Op(">")),
            '|' => one(Token::Op("|")),
            '&' => one(Token::Op("&")),
            ';' => one(Token::Op(";")),
            '+' => one(Token::Op("+")),
            '-' => one(Token::Op("-")),
            '*' => one(Token::Op("*")),
            '/' => one(Token::Op("/")),
            '^' => one(Token::Op("^")),
            _ => {
                let (text, _) = progress.consume_while(is_unknown_operator_char);
                let len = text.len().max(ch.len_utf8());
                (Token::Unknown(rest[..len].to_string()), len)
            }
        }
    }

    /// Reads up to the `}` matching an already consumed `{`, skipping quoted text. Returns the
    /// content and whether the closing brace was found.
    fn read_braced(&mut self) -> (&'a str, bool) {
        let rest = &self.src[self.pos..];
        let mut depth = 0usize;
        let mut in_quote = false;
        for (i, ch) in rest.char_indices() {
            match ch {
                '"' => in_quote = !in_quote,
                '{' if !in_quote => depth += 1,
                '}' if !in_quote => {
                    if depth == 0 {
                        self.pos += i + 1;
                        return (&rest[..i], true);
                    }
                    depth -= 1;
                }
                _ => {}
            }
        }
        self.pos = self.src.len();
        (rest, false)
    }
}

/// An operator between two operands in a flat chain, before levels are resolved.
struct PendingOp {
    text: String,
}

fn operator_level(text: &str) -> Option<u8> {
    Some(match text {
        "::" => 0,
        "|" => 1,
        "&" => 2,
        "=" | "=~" | "<>" | "<" | "<=" | ">" | ">=" => 3,
        ";" => 4,
        "+" | "-" => 5,
        "*" | "/" => 6,
        "^" => 7,
        _ => return None,
    })
}

fn span_of(operands: &[Expression]) -> Span {
    match (operands.first(), operands.last()) {
        (Some(first), Some(last)) => first.span.merge(last.span),
        _ => Span::default(),
    }
}

fn invalid_operator(operands: Vec<Expression>, operators: Vec<PendingOp>) -> Expression {
    let span = span_of(&operands);
    Expression::new(
        ExprKind::InvalidOperator {
            operands,
            operators: operators.into_iter().map(|op| op.text).collect(),
        },
        span,
    )
}

/// Resolves a flat `operand (op operand)*` chain. The loosest operator splits the chain; each
/// part is resolved recursively. Operators that cannot be combined, and unknown operator text,
/// give an `InvalidOperator` node instead of an error.
fn build_chain(first: Expression, rest: Vec<(PendingOp, Expression)>) -> Expression {
    if rest.is_empty() {
        return first;
    }
    let lowest = rest
        .iter()
        .map(|(op, _)| operator_level(&op.text))
        .collect::<Option<Vec<_>>>()
        .and_then(|levels| levels.into_iter().min());
    let Some(lowest) = lowest else {
        let mut operands = vec![first];
        let mut operators = Vec::new();
        for (op, operand) in rest {
            operators.push(op);
            operands.push(operand);
        }
        return invalid_operator(operands, operators);
    };

    let mut segments = Vec::new();
    let mut joiners = Vec::new();
    let mut segment_first = first;
    let mut segment_rest = Vec::new();
    for (op, operand) in rest {
        if operator_level(&op.text) == Some(lowest) {
            let previous = std::mem::replace(&mut segment_first, operand);
            segments.push(build_chain(previous, std::mem::take(&mut segment_rest)));
            joiners.push(op);
        } else {
            segment_rest.push((op, operand));
        }
    }
    segments.push(build_chain(segment_first, segment_rest));
    combine(lowest, segments, joiners)
}

enum Shape {
    HasType,
    Or,
    And,
    Concat,
    AddSubtract(Vec<AddSubtractOp>),
    Times,
    Divide,
    Raise,
    Equal { last_is_pattern: bool },
    NotEqual,
    Comparison(Vec<ComparisonOp>),
    Invalid,
}

fn classify(level: u8, ops: &[&str]) -> Shape {
    let single = ops.len() == 1;
    match level {
        0 if single => Shape::HasType,
        1 => Shape::Or,
        2 => Shape::And,
        3 => classify_comparison(ops),
        4 => Shape::Concat,
        5 => Shape::AddSubtract(
            ops.iter()
                .map(|op| {
                    if *op == "+" {
                        AddSubtractOp::Add
                    } else {
                        AddSubtractOp::Subtract
                    }
                })
                .collect(),
        ),
        6 if ops.iter().all(|op| *op == "*") => Shape::Times,
        6 if single && ops == ["/"] => Shape::Divide,
        7 if single => Shape::Raise,
        _ => Shape::Invalid,
    }
}

fn classify_comparison(ops: &[&str]) -> Shape {
    let (last, init) = match ops.split_last() {
        Some(split) => split,
        None => return Shape::Invalid,
    };
    if init.iter().all(|op| *op == "=") && matches!(*last, "=" | "=~") {
        return Shape::Equal {
            last_is_pattern: *last == "=~",
        };
    }
    if ops == ["<>"] {
        return Shape::NotEqual;
    }
    let comparison = |op: &&str| match *op {
        "<" => Some(ComparisonOp::Less),
        "<=" => Some(ComparisonOp::LessEqual),
        ">" => Some(ComparisonOp::Greater),
        ">=" => Some(ComparisonOp::GreaterEqual),
        _ => None,
    };
    match ops.iter().map(comparison).collect::<Option<Vec<_>>>() {
        Some(cmp) if cmp.windows(2).all(|w| w[0].is_ascending() == w[1].is_ascending()) => {
            Shape::Comparison(cmp)
        }
        _ => Shape::Invalid,
    }
}

fn combine(level: u8, segments: Vec<Expression>, joiners: Vec<PendingOp>) -> Expression {
    let span = span_of(&segments);
    let texts: Vec<&str> = joiners.iter().map(|op| op.text.as_str()).collect();
    let binary = |segments: Vec<Expression>,
                  joiners: Vec<PendingOp>,
                  make: fn(Box<Expression>, Box<Expression>) -> ExprKind| {
        match <[Expression; 2]>::try_from(segments) {
            Ok([a, b]) => Expression::new(make(Box::new(a), Box::new(b)), span),
            Err(segments) => invalid_operator(segments, joiners),
        }
    };
    let kind = match classify(level, &texts) {
        Shape::HasType => return binary(segments, joiners, ExprKind::HasType),
        Shape::Divide => return binary(segments, joiners, ExprKind::Divide),
        Shape::Raise => return binary(segments, joiners, ExprKind::Raise),
        Shape::NotEqual => return binary(segments, joiners, ExprKind::NotEqual),
        Shape::Invalid => return invalid_operator(segments, joiners),
        Shape::Or => ExprKind::Or(segments),
        Shape::And => ExprKind::And(segments),
        Shape::Concat => ExprKind::Concat(segments),
        Shape::Times => ExprKind::Times(segments),
        Shape::AddSubtract(ops) => ExprKind::AddSubtract {
            operands: segments,
            ops,
        },
        Shape::Equal { last_is_pattern } => ExprKind::Equal {
            operands: segments,
            last_is_pattern,
        },
        Shape::Comparison(ops) => ExprKind::Comparison {
            operands: segments,
            ops,
        },
    };
    Expression::new(kind, span)
}

/// Turns a parsed `x = value` or `x :: type{...}` into a definition of `@define`.
fn definition_from(expression: Expression) -> ParseResult<Definition> {
    let span = expression.span;
    match expression.kind {
        ExprKind::HasType(target, type_expr) => {
            if let ExprKind::Ident {
                namespace: None,
                name,
            } = target.kind
            {
                return Ok(Definition::Annotate {
                    name,
                    type_expr: *type_expr,
                });
            }
        }
        ExprKind::Equal {
            operands,
            last_is_pattern: false,
        } => {
            if let Ok([target, value]) = <[Expression; 2]>::try_from(operands) {
                if let ExprKind::Ident {
                    namespace: None,
                    name,
                } = target.kind
                {
                    return Ok(Definition::Bind { name, value });
                }
            }
        }
        _ => {}
    }
    Err(ParseError::new(
        "expected a definition: name = value, or name :: type",
        span,
    ))
}

struct Parser<'a> {
    src: &'a str,
    lexer: Lexer<'a>,
    lookahead: Spanned,
    /// End of the last consumed token.
    last_end: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        let mut lexer = Lexer::new(src);
        let lookahead = lexer.next_token();
        Self {
            src,
            lexer,
            lookahead,
            last_end: 0,
        }
    }

    fn bump(&mut self) -> Spanned {
        let next = self.lexer.next_token();
        self.last_end = self.lookahead.span.end;
        std::mem::replace(&mut self.lookahead, next)
    }

    fn peek_second(&self) -> Token {
        let mut lexer = self.lexer;
        lexer.next_token().token
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        ParseError::new(message, self.lookahead.span)
    }

    fn unexpected(&self, expected: &str) -> ParseError {
        self.error(format!(
            "expected {expected}, found {}",
            describe(&self.lookahead.token)
        ))
    }

    fn expect(&mut self, token: Token, expected: &str) -> ParseResult<Span> {
        if self.lookahead.token == token {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(expected))
        }
    }

    fn at_keyword(&self, word: &str) -> bool {
        matches!(&self.lookahead.token, Token::Keyword(w) if w == word)
    }

    fn expect_keyword(&mut self, word: &str) -> ParseResult<Span> {
        if self.at_keyword(word) {
            Ok(self.bump().span)
        } else {
            Err(self.unexpected(&format!("@{word}")))
        }
    }

    fn expect_end(&self) -> ParseResult<()> {
        if self.lookahead.token == Token::Eof {
            Ok(())
        } else {
            Err(self.error(format!("unexpected {}", describe(&self.lookahead.token))))
        }
    }

    fn eat_ident(&mut self) -> Option<(String, Span)> {
        if let Token::Ident(name) = &self.lookahead.token {
            let name = name.clone();
            return Some((name, self.bump().span));
        }
        None
    }

    fn expect_ident(&mut self) -> ParseResult<(String, Span)> {
        match self.eat_ident() {
            Some(ident) => Ok(ident),
            None => Err(self.unexpected("a name")),
        }
    }

    /// An unquoted identifier or a quoted name.
    fn expect_name(&mut self) -> ParseResult<(String, Span)> {
        if let Token::Text(text) = &self.lookahead.token {
            let text = text.clone();
            return Ok((text, self.bump().span));
        }
        self.expect_ident()
    }

    fn source(&self, span: Span) -> String {
        self.src[span.start..span.end].to_string()
    }

    /// With `{` as the lookahead, reads the raw text up to its matching `}`.
    fn take_braced(&mut self) -> (&'a str, bool) {
        let (content, closed) = self.lexer.read_braced();
        self.last_end = self.lexer.pos;
        self.lookahead = self.lexer.next_token();
        (content, closed)
    }

    /// A braced literal such as `date{...}`. Content that does not parse is kept verbatim in
    /// an `InvalidIdent`.
    fn parse_braced_literal(
        &mut self,
        start: Span,
        convert: impl FnOnce(&str) -> ParseResult<ExprKind>,
    ) -> Expression {
        let (content, closed) = self.take_braced();
        let span = Span::new(start.start, self.last_end);
        let kind = match closed.then(|| convert(content)) {
            Some(Ok(kind)) => kind,
            _ => ExprKind::InvalidIdent(self.source(span)),
        };
        Expression::new(kind, span)
    }

    fn parse_expr(&mut self) -> ParseResult<Expression> {
        let first = self.parse_operand()?;
        let mut rest = Vec::new();
        loop {
            let op = match &self.lookahead.token {
                Token::Op(op) => (*op).to_string(),
                Token::Unknown(text) => text.clone(),
                // Two operands with nothing between them.
                token if starts_operand(token) => String::new(),
                _ => break,
            };
            if !op.is_empty() {
                self.bump();
            }
            let operand = self.parse_operand()?;
            rest.push((PendingOp { text: op }, operand));
        }
        Ok(build_chain(first, rest))
    }

    fn digit_follows(&self) -> bool {
        self.src[self.lookahead.span.end..].starts_with(|c: char| c.is_ascii_digit())
    }

    fn parse_operand(&mut self) -> ParseResult<Expression> {
        match &self.lookahead.token {
            Token::Op(sign @ ("-" | "+")) if self.digit_follows() => {
                let sign = *sign;
                let start = self.bump().span;
                let digits = self.bump();
                let Token::Number(raw) = digits.token else {
                    return Err(ParseError::new("expected digits", digits.span));
                };
                let raw = if sign == "-" { format!("-{raw}") } else { raw };
                let literal = self.parse_number_literal(raw, start.merge(digits.span));
                self.parse_postfix(literal)
            }
            Token::LBrace => {
                let start = self.lookahead.span;
                self.take_braced();
                let span = Span::new(start.start, self.last_end);
                Ok(Expression::new(ExprKind::InvalidIdent(self.source(span)), span))
            }
            token if !starts_operand(token) => Ok(Expression::new(
                ExprKind::InvalidIdent(String::new()),
                Span::point(self.lookahead.span.start),
            )),
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_number_literal(&mut self, raw: String, span: Span) -> Expression {
        let value = raw.parse::<Number>();
        let adjacent_brace =
            self.lookahead.token == Token::LBrace && self.lookahead.span.start == span.end;
        if !adjacent_brace {
            return match value {
                Ok(value) => Expression::new(ExprKind::Number { value, unit: None }, span),
                Err(_) => Expression::new(ExprKind::InvalidIdent(raw), span),
            };
        }
        self.parse_braced_literal(span, |content| {
            let unit = parse_unit_expression(content)?;
            let value = value.map_err(|err| ParseError::new(err.message(), span))?;
            Ok(ExprKind::Number {
                value,
                unit: Some(unit),
            })
        })
    }

    fn parse_primary(&mut self) -> ParseResult<Expression> {
        let Spanned { token, span } = self.bump();
        let kind = match token {
            Token::Number(raw) => return Ok(self.parse_number_literal(raw, span)),
            Token::Ident(name) => return Ok(self.parse_ident(name, span)),
            Token::Keyword(word) => return self.parse_keyword(&word, span),
            Token::LParen => return self.parse_bracketed(span),
            Token::LBracket => {
                let (items, end) = self.parse_list(Token::RBracket, "']'")?;
                return Ok(Expression::new(ExprKind::Array(items), span.merge(end)));
            }
            Token::Text(text) => ExprKind::Text(text),
            Token::Boolean(b) => ExprKind::Boolean(b),
            Token::Invalid(raw) => ExprKind::InvalidIdent(raw),
            Token::Question => ExprKind::ImplicitLambdaArg,
            Token::Underscore(name) if name.is_empty() => ExprKind::MatchAnything,
            Token::Underscore(name) => ExprKind::VarDecl(name),
            other => {
                return Err(ParseError::new(
                    format!("unexpected {}", describe(&other)),
                    span,
                ))
            }
        };
        Ok(Expression::new(kind, span))
    }

    fn parse_ident(&mut self, name: String, span: Span) -> Expression {
        if self.lookahead.token == Token::LBrace {
            if let Some(kind) = DateTimeKind::from_literal_keyword(&name) {
                return self.parse_braced_literal(span, |content| {
                    let success = recognise_temporal(kind, ParseProgress::new(content))?;
                    if !success.progress.skip_spaces().at_end() {
                        return Err(ParseError::new(
                            "unexpected text after date",
                            Span::point(success.progress.position()),
                        ));
                    }
                    Ok(ExprKind::Temporal(success.value))
                });
            }
            match name.as_str() {
                "type" => {
                    return self.parse_braced_literal(span, |content| {
                        parse_type_expression(content).map(ExprKind::TypeLiteral)
                    })
                }
                "unit" => {
                    return self.parse_braced_literal(span, |content| {
                        parse_unit_expression(content).map(ExprKind::UnitLiteral)
                    })
                }
                _ => {}
            }
        }
        if self.lookahead.token == Token::Backslash
            && matches!(self.peek_second(), Token::Ident(_))
        {
            self.bump();
            if let Some((inner, inner_span)) = self.eat_ident() {
                return Expression::new(
                    ExprKind::Ident {
                        namespace: Some(name),
                        name: inner,
                    },
                    span.merge(inner_span),
                );
            }
        }
        Expression::new(
            ExprKind::Ident {
                namespace: None,
                name,
            },
            span,
        )
    }

    fn parse_keyword(&mut self, word: &str, start: Span) -> ParseResult<Expression> {
        match word {
            "column" => self.parse_column(false, start),
            "entire" => self.parse_column(true, start),
            "if" => self.parse_if(start),
            "match" => self.parse_match(start),
            "function" => self.parse_lambda(start),
            "define" => self.parse_define(start),
            "invalidops" => self.parse_invalid_ops(start),
            "unfinished" => {
                let Token::Text(raw) = &self.lookahead.token else {
                    return Err(self.unexpected("quoted text"));
                };
                let raw = raw.clone();
                let end = self.bump().span;
                Ok(Expression::new(ExprKind::InvalidIdent(raw), start.merge(end)))
            }
            _ => Ok(Expression::new(ExprKind::InvalidIdent(format!("@{word}")), start)),
        }
    }

    fn parse_column(&mut self, whole: bool, start: Span) -> ParseResult<Expression> {
        let (first, first_span) = self.expect_name()?;
        let (table, column, end) = if self.lookahead.token == Token::Backslash {
            self.bump();
            let (second, second_span) = self.expect_name()?;
            (Some(first), second, second_span)
        } else {
            (None, first, first_span)
        };
        let span = start.merge(end);
        let table = table.map(TableId::new).transpose();
        let kind = match (table, ColumnId::new(column)) {
            (Ok(table), Ok(column)) => ExprKind::Column {
                table,
                column,
                whole,
            },
            _ => ExprKind::InvalidIdent(self.source(span)),
        };
        Ok(Expression::new(kind, span))
    }

    fn parse_if(&mut self, start: Span) -> ParseResult<Expression> {
        let condition = self.parse_expr()?;
        self.expect_keyword("then")?;
        let then_branch = self.parse_expr()?;
        self.expect_keyword("else")?;
        let else_branch = self.parse_expr()?;
        let end = self.expect_keyword("endif")?;
        Ok(Expression::new(
            ExprKind::IfThenElse {
                condition: Box::new(condition),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            start.merge(end),
        ))
    }

    fn parse_match(&mut self, start: Span) -> ParseResult<Expression> {
        let scrutinee = self.parse_expr()?;
        let mut clauses = Vec::new();
        while self.at_keyword("case") {
            self.bump();
            let mut patterns = Vec::new();
            loop {
                let pattern = self.parse_expr()?;
                let guard = if self.at_keyword("given") {
                    self.bump();
                    Some(self.parse_expr()?)
                } else {
                    None
                };
                patterns.push(Pattern { pattern, guard });
                if !self.at_keyword("orcase") {
                    break;
                }
                self.bump();
            }
            self.expect_keyword("then")?;
            let outcome = self.parse_expr()?;
            clauses.push(MatchClause { patterns, outcome });
        }
        if clauses.is_empty() {
            return Err(self.unexpected("@case"));
        }
        let end = self.expect_keyword("endmatch")?;
        Ok(Expression::new(
            ExprKind::Match {
                scrutinee: Box::new(scrutinee),
                clauses,
            },
            start.merge(end),
        ))
    }

    fn parse_lambda(&mut self, start: Span) -> ParseResult<Expression> {
        self.expect(Token::LParen, "'('")?;
        let mut params = Vec::new();
        if self.lookahead.token != Token::RParen {
            loop {
                params.push(self.expect_ident()?.0);
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump();
            }
        }
        self.expect(Token::RParen, "')'")?;
        let body = self.parse_expr()?;
        let end = self.expect_keyword("endfunction")?;
        Ok(Expression::new(
            ExprKind::Lambda {
                params,
                body: Arc::new(body),
            },
            start.merge(end),
        ))
    }

    fn parse_define(&mut self, start: Span) -> ParseResult<Expression> {
        let mut definitions = Vec::new();
        loop {
            definitions.push(definition_from(self.parse_expr()?)?);
            if self.lookahead.token != Token::Comma {
                break;
            }
            self.bump();
        }
        self.expect_keyword("then")?;
        let body = self.parse_expr()?;
        let end = self.expect_keyword("enddefine")?;
        Ok(Expression::new(
            ExprKind::Define {
                definitions,
                body: Box::new(body),
            },
            start.merge(end),
        ))
    }

    /// `@invalidops(operand, "op", operand, ...)`
    fn parse_invalid_ops(&mut self, start: Span) -> ParseResult<Expression> {
        self.expect(Token::LParen, "'('")?;
        let mut operands = vec![self.parse_expr()?];
        let mut operators = Vec::new();
        while self.lookahead.token == Token::Comma {
            self.bump();
            let Token::Text(op) = &self.lookahead.token else {
                return Err(self.unexpected("a quoted operator"));
            };
            operators.push(op.clone());
            self.bump();
            self.expect(Token::Comma, "','")?;
            operands.push(self.parse_expr()?);
        }
        let end = self.expect(Token::RParen, "')'")?;
        Ok(Expression::new(
            ExprKind::InvalidOperator {
                operands,
                operators,
            },
            start.merge(end),
        ))
    }

    fn is_record_start(&self) -> bool {
        matches!(self.lookahead.token, Token::Ident(_) | Token::Text(_))
            && self.peek_second() == Token::Colon
    }

    /// After `(`: a record, a tuple or a bracketed expression.
    fn parse_bracketed(&mut self, start: Span) -> ParseResult<Expression> {
        if self.is_record_start() {
            let mut fields = Vec::new();
            loop {
                let (name, _) = self.expect_name()?;
                self.expect(Token::Colon, "':'")?;
                fields.push((name, self.parse_expr()?));
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump();
            }
            let end = self.expect(Token::RParen, "')'")?;
            return Ok(Expression::new(ExprKind::Record(fields), start.merge(end)));
        }
        let first = self.parse_expr()?;
        if self.lookahead.token != Token::Comma {
            self.expect(Token::RParen, "')'")?;
            return Ok(first);
        }
        let mut items = vec![first];
        while self.lookahead.token == Token::Comma {
            self.bump();
            items.push(self.parse_expr()?);
        }
        let end = self.expect(Token::RParen, "')'")?;
        Ok(Expression::new(ExprKind::Tuple(items), start.merge(end)))
    }

    /// Comma separated expressions up to `close`, which may follow immediately.
    fn parse_list(&mut self, close: Token, expected: &str) -> ParseResult<(Vec<Expression>, Span)> {
        let mut items = Vec::new();
        if self.lookahead.token != close {
            loop {
                items.push(self.parse_expr()?);
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump();
            }
        }
        let end = self.expect(close, expected)?;
        Ok((items, end))
    }

    fn parse_postfix(&mut self, mut expression: Expression) -> ParseResult<Expression> {
        loop {
            match self.lookahead.token {
                Token::LParen => {
                    self.bump();
                    let (args, end) = self.parse_list(Token::RParen, "')'")?;
                    let span = expression.span.merge(end);
                    expression = Expression::new(
                        ExprKind::Call {
                            function: Box::new(expression),
                            args,
                        },
                        span,
                    );
                }
                Token::Hash => {
                    self.bump();
                    let (field, end) = self.expect_name()?;
                    let span = expression.span.merge(end);
                    expression = Expression::new(
                        ExprKind::FieldAccess {
                            record: Box::new(expression),
                            field,
                        },
                        span,
                    );
                }
                _ => return Ok(expression),
            }
        }
    }

    fn parse_type(&mut self) -> ParseResult<TypeExpression> {
        let Spanned { token, span } = self.bump();
        match token {
            Token::Ident(name) => self.parse_named_type(name),
            Token::Text(name) => self.parse_type_args(name),
            Token::Keyword(word) if word == "typevar" => {
                Ok(TypeExpression::TypeVar(self.expect_ident()?.0))
            }
            Token::LBracket => {
                let element = self.parse_type()?;
                self.expect(Token::RBracket, "']'")?;
                Ok(TypeExpression::Array(Box::new(element)))
            }
            Token::LParen if self.is_record_start() => {
                let mut fields = Vec::new();
                loop {
                    let (name, _) = self.expect_name()?;
                    self.expect(Token::Colon, "':'")?;
                    fields.push((name, self.parse_type()?));
                    if self.lookahead.token != Token::Comma {
                        break;
                    }
                    self.bump();
                }
                self.expect(Token::RParen, "')'")?;
                Ok(TypeExpression::Record(fields))
            }
            Token::LParen => {
                let mut members = vec![self.parse_type()?];
                while self.lookahead.token == Token::Comma {
                    self.bump();
                    members.push(self.parse_type()?);
                }
                self.expect(Token::RParen, "')'")?;
                Ok(match <[TypeExpression; 1]>::try_from(members) {
                    Ok([single]) => single,
                    Err(members) => TypeExpression::Tuple(members),
                })
            }
            other => Err(ParseError::new(
                format!("expected a type, found {}", describe(&other)),
                span,
            )),
        }
    }

    fn parse_braced_unit(&mut self) -> ParseResult<UnitExpression> {
        self.expect(Token::LBrace, "'{'")?;
        let unit = self.parse_unit()?;
        self.expect(Token::RBrace, "'}'")?;
        Ok(unit)
    }

    fn parse_named_type(&mut self, name: String) -> ParseResult<TypeExpression> {
        match name.as_str() {
            "Number" if self.lookahead.token == Token::LBrace => {
                return Ok(TypeExpression::Number(Some(self.parse_braced_unit()?)))
            }
            "Number" => return Ok(TypeExpression::Number(None)),
            "Text" => return Ok(TypeExpression::Text),
            "Boolean" => return Ok(TypeExpression::Boolean),
            _ => {}
        }
        if let Some(kind) = DateTimeKind::from_type_name(&name) {
            return Ok(TypeExpression::Date(kind));
        }
        self.parse_type_args(name)
    }

    /// A tagged type name, with its arguments if any follow.
    fn parse_type_args(&mut self, name: String) -> ParseResult<TypeExpression> {
        let mut args = Vec::new();
        if self.lookahead.token == Token::LParen {
            self.bump();
            loop {
                args.push(if self.lookahead.token == Token::LBrace {
                    TypeExpressionArg::Unit(self.parse_braced_unit()?)
                } else {
                    TypeExpressionArg::Type(self.parse_type()?)
                });
                if self.lookahead.token != Token::Comma {
                    break;
                }
                self.bump();
            }
            self.expect(Token::RParen, "')'")?;
        }
        Ok(TypeExpression::Named { name, args })
    }

    /// unit := term ('/' term)?
    fn parse_unit(&mut self) -> ParseResult<UnitExpression> {
        let numerator = self.parse_unit_term()?;
        if self.lookahead.token != Token::Op("/") {
            return Ok(numerator);
        }
        self.bump();
        let denominator = self.parse_unit_term()?;
        Ok(UnitExpression::Divide(
            Box::new(numerator),
            Box::new(denominator),
        ))
    }

    fn parse_unit_term(&mut self) -> ParseResult<UnitExpression> {
        let mut factors = vec![self.parse_unit_factor()?];
        while self.lookahead.token == Token::Op("*") {
            self.bump();
            factors.push(self.parse_unit_factor()?);
        }
        Ok(match <[UnitExpression; 1]>::try_from(factors) {
            Ok([single]) => single,
            Err(factors) => UnitExpression::Times(factors),
        })
    }

    fn parse_unit_factor(&mut self) -> ParseResult<UnitExpression> {
        let atom = self.parse_unit_atom()?;
        if self.lookahead.token != Token::Op("^") {
            return Ok(atom);
        }
        self.bump();
        let negative = self.lookahead.token == Token::Op("-");
        if negative {
            self.bump();
        }
        let Spanned { token, span } = self.bump();
        let power = match token {
            Token::Number(raw) => raw.parse::<i32>().ok(),
            _ => None,
        }
        .ok_or_else(|| ParseError::new("expected an integer power", span))?;
        Ok(UnitExpression::Raise(
            Box::new(atom),
            if negative { -power } else { power },
        ))
    }

    fn parse_unit_atom(&mut self) -> ParseResult<UnitExpression> {
        let Spanned { token, span } = self.bump();
        match token {
            Token::Ident(name) => Ok(UnitExpression::Single(name)),
            Token::Number(raw) if raw == "1" => Ok(UnitExpression::Scalar),
            Token::LParen => {
                let inner = self.parse_unit()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Keyword(word) if word == "unitvar" => {
                Ok(UnitExpression::Var(self.expect_ident()?.0))
            }
            other => Err(ParseError::new(
                format!("expected a unit, found {}", describe(&other)),
                span,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kind(src: &str) -> ExprKind {
        parse_expression(src).unwrap().kind
    }

    fn ident(name: &str) -> Expression {
        Expression::unlocated(ExprKind::Ident {
            namespace: None,
            name: name.to_string(),
        })
    }

    fn number(n: i64) -> Expression {
        Expression::unlocated(ExprKind::Number {
            value: Number::from(n),
            unit: None,
        })
    }

    #[test]
    fn precedence_follows_operator_levels() {
        let parsed = kind("a + b * c = d");
        let product = Expression::unlocated(ExprKind::Times(vec![ident("b"), ident("c")]));
        let sum = Expression::unlocated(ExprKind::AddSubtract {
            operands: vec![ident("a"), product],
            ops: vec![AddSubtractOp::Add],
        });
        assert_eq!(
            parsed,
            ExprKind::Equal {
                operands: vec![sum, ident("d")],
                last_is_pattern: false,
            }
        );
    }

    #[test]
    fn incompatible_chains_become_invalid_operators() {
        assert_eq!(
            kind("a * b / c"),
            ExprKind::InvalidOperator {
                operands: vec![ident("a"), ident("b"), ident("c")],
                operators: vec!["*".to_string(), "/".to_string()],
            }
        );
        assert!(matches!(kind("a < b > c"), ExprKind::InvalidOperator { .. }));
        assert!(matches!(kind("a ^ b ^ c"), ExprKind::InvalidOperator { .. }));
        assert!(matches!(kind("a <> b <> c"), ExprKind::InvalidOperator { .. }));
        assert!(matches!(kind("a =~ b = c"), ExprKind::InvalidOperator { .. }));
        assert_eq!(
            kind("a b"),
            ExprKind::InvalidOperator {
                operands: vec![ident("a"), ident("b")],
                operators: vec![String::new()],
            }
        );
        // The node covers the whole chain.
        assert_eq!(parse_expression("x !! y * z").unwrap().span, Span::new(0, 10));
    }

    #[test]
    fn comparison_chains_keep_one_direction() {
        assert_eq!(
            kind("1 < x <= 3"),
            ExprKind::Comparison {
                operands: vec![number(1), ident("x"), number(3)],
                ops: vec![ComparisonOp::Less, ComparisonOp::LessEqual],
            }
        );
    }

    #[test]
    fn minus_before_digit_in_operand_position_is_a_literal() {
        assert_eq!(
            kind("a - -2"),
            ExprKind::AddSubtract {
                operands: vec![ident("a"), number(-2)],
                ops: vec![AddSubtractOp::Subtract],
            }
        );
        assert_eq!(
            kind("-x"),
            ExprKind::AddSubtract {
                operands: vec![
                    Expression::unlocated(ExprKind::InvalidIdent(String::new())),
                    ident("x"),
                ],
                ops: vec![AddSubtractOp::Subtract],
            }
        );
    }

    #[test]
    fn missing_operand_is_kept_as_empty_invalid_ident() {
        assert_eq!(
            kind("1 +"),
            ExprKind::AddSubtract {
                operands: vec![
                    number(1),
                    Expression::unlocated(ExprKind::InvalidIdent(String::new())),
                ],
                ops: vec![AddSubtractOp::Add],
            }
        );
    }

    #[test]
    fn braced_literals_parse_their_content() {
        assert_eq!(
            kind("5{m/s}"),
            ExprKind::Number {
                value: Number::from(5),
                unit: Some(UnitExpression::Divide(
                    Box::new(UnitExpression::Single("m".to_string())),
                    Box::new(UnitExpression::Single("s".to_string())),
                )),
            }
        );
        assert_eq!(
            kind("type{[Optional(Number{m})]}"),
            ExprKind::TypeLiteral(TypeExpression::Array(Box::new(TypeExpression::Named {
                name: "Optional".to_string(),
                args: vec![TypeExpressionArg::Type(TypeExpression::Number(Some(
                    UnitExpression::Single("m".to_string())
                )))],
            })))
        );
        assert_eq!(
            kind("date{2020-13-45}"),
            ExprKind::InvalidIdent("date{2020-13-45}".to_string())
        );
    }

    #[test]
    fn records_tuples_and_brackets() {
        assert_eq!(
            kind("(a: 1, \"b c\": 2)"),
            ExprKind::Record(vec![
                ("a".to_string(), number(1)),
                ("b c".to_string(), number(2)),
            ])
        );
        assert_eq!(kind("(1, 2)"), ExprKind::Tuple(vec![number(1), number(2)]));
        assert_eq!(kind("(x)"), ident("x").kind);
    }

    #[test]
    fn define_requires_bindings_or_annotations() {
        let parsed = kind("@define x :: type{Number}, x = 5 @then x @enddefine");
        let ExprKind::Define { definitions, .. } = parsed else {
            panic!("expected define");
        };
        assert_eq!(definitions.len(), 2);
        assert_eq!(definitions[0].name(), "x");
        assert!(matches!(definitions[1], Definition::Bind { .. }));

        let err = parse_expression("@define x + 1 @then x @enddefine").unwrap_err();
        assert!(err.message.starts_with("expected a definition"));
    }

    #[test]
    fn unbalanced_keywords_are_parse_errors() {
        let err = parse_expression("@if true @then 1 @endif").unwrap_err();
        assert_eq!(err.message, "expected @else, found @endif");
        assert!(parse_expression("f(1, 2").is_err());
    }

    #[test]
    fn unit_grammar_allows_one_division() {
        assert!(parse_unit_expression("m/s/s").is_err());
        assert_eq!(
            parse_unit_expression("kg*m^2/s^-1").unwrap(),
            UnitExpression::Divide(
                Box::new(UnitExpression::Times(vec![
                    UnitExpression::Single("kg".to_string()),
                    UnitExpression::Raise(Box::new(UnitExpression::Single("m".to_string())), 2),
                ])),
                Box::new(UnitExpression::Raise(
                    Box::new(UnitExpression::Single("s".to_string())),
                    -1
                )),
            )
        );
    }
}
