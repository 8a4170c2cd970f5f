use super::XPathError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Slash,
    DoubleSlash,
    LBracket,
    RBracket,
    LParen,
    RParen,
    At,
    Comma,
    Dot,
    DotDot,
    DoubleColon,
    Pipe,
    Plus,
    Minus,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// `*` in operator position.
    Multiply,
    /// `*` as a name test.
    Star,
    And,
    Or,
    Div,
    Mod,
    Literal(String),
    Number(f64),
    Name(String),
}

impl Token {
    /// Whether a `*` or name following this token is an operator.
    ///
    /// Follows the XPath 1.0 disambiguation rule: operators only appear after
    /// something that can end an operand.
    fn ends_operand(&self) -> bool {
        !matches!(
            self,
            Token::At
                | Token::DoubleColon
                | Token::LParen
                | Token::LBracket
                | Token::Comma
                | Token::Slash
                | Token::DoubleSlash
                | Token::Pipe
                | Token::Plus
                | Token::Minus
                | Token::Eq
                | Token::NotEq
                | Token::Lt
                | Token::Lte
                | Token::Gt
                | Token::Gte
                | Token::Multiply
                | Token::And
                | Token::Or
                | Token::Div
                | Token::Mod
        )
    }
}

fn is_name_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_' || !ch.is_ascii() && !ch.is_whitespace()
}

fn is_name_char(ch: char) -> bool {
    is_name_start(ch) || ch.is_ascii_digit() || ch == '-' || ch == '.'
}

/// Splits an expression into tokens.
pub(crate) fn tokenize(input: &str) -> Result<Vec<Token>, XPathError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut i = 0;

    let syntax = |position: usize, message: &str| XPathError::Syntax {
        position,
        message: message.to_string(),
    };

    while i < chars.len() {
        let ch = chars[i];
        let operator_position = tokens.last().is_some_and(Token::ends_operand);
        let next = chars.get(i + 1).copied();

        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                i += 1;
                continue;
            }
            '/' if next == Some('/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '@' => {
                tokens.push(Token::At);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' if next == Some(':') => {
                tokens.push(Token::DoubleColon);
                i += 2;
            }
            '|' => {
                tokens.push(Token::Pipe);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Eq);
                i += 1;
            }
            '!' if next == Some('=') => {
                tokens.push(Token::NotEq);
                i += 2;
            }
            '<' if next == Some('=') => {
                tokens.push(Token::Lte);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if next == Some('=') => {
                tokens.push(Token::Gte);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '*' => {
                tokens.push(if operator_position {
                    Token::Multiply
                } else {
                    Token::Star
                });
                i += 1;
            }
            '"' | '\'' => {
                let start = i;
                let end = chars[i + 1..]
                    .iter()
                    .position(|&c| c == ch)
                    .ok_or_else(|| syntax(start, "unterminated string literal"))?;
                let literal: String = chars[i + 1..i + 1 + end].iter().collect();
                tokens.push(Token::Literal(literal));
                i += end + 2;
            }
            '.' if next.is_some_and(|c| c.is_ascii_digit()) => {
                let (number, len) = read_number(&chars[i..]);
                tokens.push(Token::Number(number));
                i += len;
            }
            '.' if next == Some('.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            c if c.is_ascii_digit() => {
                let (number, len) = read_number(&chars[i..]);
                tokens.push(Token::Number(number));
                i += len;
            }
            c if is_name_start(c) => {
                let start = i;
                while i < chars.len() && is_name_char(chars[i]) {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                let token = if operator_position {
                    match name.as_str() {
                        "and" => Token::And,
                        "or" => Token::Or,
                        "div" => Token::Div,
                        "mod" => Token::Mod,
                        _ => {
                            return Err(syntax(
                                start,
                                &format!("expected an operator, found '{name}'"),
                            ))
                        }
                    }
                } else {
                    Token::Name(name)
                };
                tokens.push(token);
            }
            '$' => return Err(syntax(i, "variable references are not supported")),
            other => return Err(syntax(i, &format!("unexpected character '{other}'"))),
        }
    }

    Ok(tokens)
}

fn read_number(chars: &[char]) -> (f64, usize) {
    let mut len = 0;
    let mut seen_dot = false;
    while len < chars.len() {
        match chars[len] {
            c if c.is_ascii_digit() => len += 1,
            '.' if !seen_dot => {
                seen_dot = true;
                len += 1;
            }
            _ => break,
        }
    }
    let text: String = chars[..len].iter().collect();
    (text.parse().unwrap_or(f64::NAN), len)
}
