use crate::expr::{BinaryOperation, Expression, Parameter};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    iter::Peekable,
    ops::Range,
};

/// Parse an [`Expression`] tree from some text.
///
/// The grammar is the usual one for arithmetic, with `+`/`-` and `*`/`/`
/// chains associating to the left so `a - b + c` means `(a - b) + c`:
///
/// ```text
/// expression := term (("+" | "-") term)*
///
/// term       := factor (("*" | "/") factor)*
///
/// factor     := "-" factor
///             | IDENTIFIER "(" expression ")"
///             | IDENTIFIER
///             | NUMBER
///             | "(" expression ")"
/// ```
pub fn parse(src: &str) -> Result<Expression, ParseError> {
    let mut parser = Parser {
        tokens: Tokens { src, cursor: 0 }.peekable(),
    };
    let expr = parser.expression()?;

    match parser.tokens.next() {
        None => Ok(expr),
        Some(Ok(token)) => Err(ParseError::UnexpectedToken {
            found: token.kind,
            span: token.span,
        }),
        Some(Err(e)) => Err(e),
    }
}

/// Possible errors that may occur while parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseError {
    InvalidCharacter { character: char, index: usize },
    UnexpectedEndOfInput,
    UnexpectedToken { found: TokenKind, span: Range<usize> },
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidCharacter { character, index } => {
                write!(f, "Invalid character {:?} at index {}", character, index)
            },
            ParseError::UnexpectedEndOfInput => {
                write!(f, "Unexpected end of input")
            },
            ParseError::UnexpectedToken { found, span } => write!(
                f,
                "Unexpected {:?} at {}..{}",
                found, span.start, span.end
            ),
        }
    }
}

impl Error for ParseError {}

struct Parser<'a> {
    tokens: Peekable<Tokens<'a>>,
}

impl<'a> Parser<'a> {
    fn peek(&mut self) -> Option<TokenKind> {
        self.tokens
            .peek()
            .and_then(|result| result.as_ref().ok())
            .map(|tok| tok.kind)
    }

    fn advance(&mut self) -> Result<Token<'a>, ParseError> {
        match self.tokens.next() {
            Some(result) => result,
            None => Err(ParseError::UnexpectedEndOfInput),
        }
    }

    fn expression(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.term()?;

        while let Some(kind) = self.peek() {
            if kind != TokenKind::Plus && kind != TokenKind::Minus {
                break;
            }
            let _ = self.advance()?;
            let right = self.term()?;

            left = Expression::Binary {
                left: Box::new(left),
                right: Box::new(right),
                op: kind.as_binary_op(),
            };
        }

        Ok(left)
    }

    fn term(&mut self) -> Result<Expression, ParseError> {
        let mut left = self.factor()?;

        while let Some(kind) = self.peek() {
            if kind != TokenKind::Times && kind != TokenKind::Divide {
                break;
            }
            let _ = self.advance()?;
            let right = self.factor()?;

            left = Expression::Binary {
                left: Box::new(left),
                right: Box::new(right),
                op: kind.as_binary_op(),
            };
        }

        Ok(left)
    }

    fn factor(&mut self) -> Result<Expression, ParseError> {
        match self.peek() {
            Some(TokenKind::Minus) => {
                let _ = self.advance()?;
                let operand = self.factor()?;
                Ok(Expression::Negate(Box::new(operand)))
            },
            Some(TokenKind::Number) => {
                let token = self.advance()?;
                let number =
                    token.text.parse().expect("The lexer only accepts digits");
                Ok(Expression::Constant(number))
            },
            Some(TokenKind::Identifier) => self.variable_or_function_call(),
            Some(TokenKind::OpenParen) => {
                let _ = self.advance()?;
                let expr = self.expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(expr)
            },
            _ => match self.tokens.next() {
                Some(Ok(Token { kind, span, .. })) => {
                    Err(ParseError::UnexpectedToken { found: kind, span })
                },
                Some(Err(e)) => Err(e),
                None => Err(ParseError::UnexpectedEndOfInput),
            },
        }
    }

    fn variable_or_function_call(&mut self) -> Result<Expression, ParseError> {
        let ident = self.advance()?;
        debug_assert_eq!(ident.kind, TokenKind::Identifier);

        if self.peek() == Some(TokenKind::OpenParen) {
            let _ = self.advance()?;
            let argument = self.expression()?;
            self.expect(TokenKind::CloseParen)?;

            Ok(Expression::FunctionCall {
                function: ident.text.into(),
                argument: Box::new(argument),
            })
        } else {
            Ok(Expression::Parameter(Parameter::named(ident.text)))
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token<'a>, ParseError> {
        let token = self.advance()?;

        if token.kind == kind {
            Ok(token)
        } else {
            Err(ParseError::UnexpectedToken {
                found: token.kind,
                span: token.span,
            })
        }
    }
}

/// The kinds of token that can appear in an [`Expression`]'s text form.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum TokenKind {
    Identifier,
    Number,
    OpenParen,
    CloseParen,
    Plus,
    Minus,
    Times,
    Divide,
}

impl TokenKind {
    fn as_binary_op(self) -> BinaryOperation {
        match self {
            TokenKind::Plus => BinaryOperation::Plus,
            TokenKind::Minus => BinaryOperation::Minus,
            TokenKind::Times => BinaryOperation::Times,
            TokenKind::Divide => BinaryOperation::Divide,
            other => unreachable!("{:?} is not a binary op", other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Token<'a> {
    text: &'a str,
    span: Range<usize>,
    kind: TokenKind,
}

#[derive(Debug, Clone)]
struct Tokens<'a> {
    src: &'a str,
    cursor: usize,
}

impl<'a> Tokens<'a> {
    fn peek(&self) -> Option<char> { self.src[self.cursor..].chars().next() }

    fn take_while<P>(&mut self, mut predicate: P) -> Range<usize>
    where
        P: FnMut(char) -> bool,
    {
        let start = self.cursor;

        while let Some(c) = self.peek() {
            if !predicate(c) {
                break;
            }
            self.cursor += c.len_utf8();
        }

        start..self.cursor
    }

    fn chomp(&mut self, kind: TokenKind) -> Token<'a> {
        let span = match kind {
            TokenKind::Number => self.chomp_number(),
            TokenKind::Identifier => {
                let mut first = true;
                self.take_while(|c| {
                    let valid = if first {
                        c.is_alphabetic() || c == '_'
                    } else {
                        c.is_alphanumeric() || c == '_'
                    };
                    first = false;
                    valid
                })
            },
            _ => {
                let start = self.cursor;
                self.cursor += 1;
                start..self.cursor
            },
        };

        Token {
            text: &self.src[span.clone()],
            span,
            kind,
        }
    }

    fn chomp_number(&mut self) -> Range<usize> {
        let integer = self.take_while(|c| c.is_ascii_digit());

        if self.peek() == Some('.') {
            self.cursor += 1;
            let fraction = self.take_while(|c| c.is_ascii_digit());
            integer.start..fraction.end
        } else {
            integer
        }
    }
}

impl<'a> Iterator for Tokens<'a> {
    type Item = Result<Token<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let kind = match self.peek()? {
                space if space.is_whitespace() => {
                    self.cursor += space.len_utf8();
                    continue;
                },
                '(' => TokenKind::OpenParen,
                ')' => TokenKind::CloseParen,
                '+' => TokenKind::Plus,
                '-' => TokenKind::Minus,
                '*' => TokenKind::Times,
                '/' => TokenKind::Divide,
                '_' | 'a'..='z' | 'A'..='Z' => TokenKind::Identifier,
                '0'..='9' => TokenKind::Number,
                other => {
                    return Some(Err(ParseError::InvalidCharacter {
                        character: other,
                        index: self.cursor,
                    }));
                },
            };

            return Some(Ok(self.chomp(kind)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Tokens { src, cursor: 0 }
            .map(|tok| tok.unwrap().kind)
            .collect()
    }

    #[test]
    fn tokenize_a_transition_rate() {
        let got = kinds("beta*S*I/N");

        assert_eq!(
            got,
            vec![
                TokenKind::Identifier,
                TokenKind::Times,
                TokenKind::Identifier,
                TokenKind::Times,
                TokenKind::Identifier,
                TokenKind::Divide,
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn tokenize_numbers() {
        assert_eq!(kinds("3"), vec![TokenKind::Number]);
        assert_eq!(kinds("3.14"), vec![TokenKind::Number]);
        assert_eq!(
            kinds("0.5 * I"),
            vec![TokenKind::Number, TokenKind::Times, TokenKind::Identifier]
        );
    }

    macro_rules! parser_test {
        ($name:ident, $src:expr) => {
            parser_test!($name, $src, $src);
        };
        ($name:ident, $src:expr, $should_be:expr) => {
            #[test]
            fn $name() {
                let got = parse($src).unwrap();

                let round_tripped = got.to_string();
                assert_eq!(round_tripped, $should_be);
            }
        };
    }

    parser_test!(simple_integer, "1");
    parser_test!(negative_constant, "-1");
    parser_test!(infection_rate, "beta*S*I");
    parser_test!(net_birth, "Lambda - mu*S");
    parser_test!(parenthesised, "(1)", "1");
    parser_test!(function_call, "sqrt(gamma)");
    parser_test!(seasonal_forcing, "beta*(1 + a*cos(t))*S");

    #[test]
    fn operator_chains_associate_left() {
        let a = Expression::Parameter(Parameter::named("a"));
        let b = Expression::Parameter(Parameter::named("b"));
        let c = Expression::Parameter(Parameter::named("c"));

        // `a - b + c` is `(a - b) + c`, not `a - (b + c)`
        assert_eq!(
            parse("a - b + c").unwrap(),
            a.clone() - b.clone() + c.clone()
        );
        assert_eq!(
            parse("a - b - c").unwrap(),
            a.clone() - b.clone() - c.clone()
        );
        assert_eq!(parse("a/b/c").unwrap(), a / b / c);
    }

    #[test]
    fn report_bad_characters() {
        let err = parse("beta$I").unwrap_err();

        assert_eq!(
            err,
            ParseError::InvalidCharacter {
                character: '$',
                index: 4
            }
        );
    }
}
