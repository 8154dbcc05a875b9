#![forbid(unsafe_code)]

//! Closed expression grammar for `FUNC` mapping directives.
//!
//! The grammar is deliberately tiny: single-quoted string literals, numeric
//! literals, exactly one bound variable, `+ - * /` (where `+` concatenates
//! when either operand is text), and `replace(target, from, to)`. There is
//! no general code-execution facility.

#[derive(Clone, Debug, PartialEq)]
pub enum ExprValue {
    Number(f64),
    Text(String),
}

impl ExprValue {
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => n.as_f64().map(ExprValue::Number),
            serde_json::Value::String(s) => Some(ExprValue::Text(s.clone())),
            serde_json::Value::Bool(b) => Some(ExprValue::Number(f64::from(u8::from(*b)))),
            _ => None,
        }
    }

    fn to_text(&self) -> String {
        match self {
            ExprValue::Text(s) => s.clone(),
            ExprValue::Number(n) => format_number(*n),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExprError {
    Empty,
    UnexpectedChar(char),
    UnterminatedString,
    UnexpectedToken,
    TrailingInput,
    UnknownIdentifier(String),
    NotANumber,
    DivisionByZero,
    BadArity(&'static str),
}

impl std::fmt::Display for ExprError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "empty expression"),
            Self::UnexpectedChar(ch) => write!(f, "unexpected character `{ch}`"),
            Self::UnterminatedString => write!(f, "unterminated string literal"),
            Self::UnexpectedToken => write!(f, "unexpected token"),
            Self::TrailingInput => write!(f, "trailing input after expression"),
            Self::UnknownIdentifier(name) => write!(f, "unknown identifier `{name}`"),
            Self::NotANumber => write!(f, "arithmetic on non-numeric value"),
            Self::DivisionByZero => write!(f, "division by zero"),
            Self::BadArity(func) => write!(f, "`{func}` takes exactly three arguments"),
        }
    }
}

impl std::error::Error for ExprError {}

/// Evaluates `template` with the single binding `var = value`.
pub fn evaluate(template: &str, var: &str, value: &ExprValue) -> Result<ExprValue, ExprError> {
    let tokens = tokenize(template)?;
    if tokens.is_empty() {
        return Err(ExprError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        var,
        value,
    };
    let result = parser.expression()?;
    if parser.pos != parser.tokens.len() {
        return Err(ExprError::TrailingInput);
    }
    Ok(result)
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Number(f64),
    Str(String),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ExprError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
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
            '\'' => {
                chars.next();
                let mut literal = String::new();
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(c) => literal.push(c),
                        None => return Err(ExprError::UnterminatedString),
                    }
                }
                tokens.push(Token::Str(literal));
            }
            '0'..='9' | '.' => {
                let mut number = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        number.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = number.parse::<f64>().map_err(|_| ExprError::NotANumber)?;
                tokens.push(Token::Number(parsed));
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
            other => return Err(ExprError::UnexpectedChar(other)),
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    var: &'a str,
    value: &'a ExprValue,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ExprError> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            _ => Err(ExprError::UnexpectedToken),
        }
    }

    fn expression(&mut self) -> Result<ExprValue, ExprError> {
        let mut left = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.pos += 1;
                    let right = self.term()?;
                    left = add(left, right)?;
                }
                Token::Minus => {
                    self.pos += 1;
                    let right = self.term()?;
                    left = ExprValue::Number(as_number(&left)? - as_number(&right)?);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn term(&mut self) -> Result<ExprValue, ExprError> {
        let mut left = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.pos += 1;
                    let right = self.factor()?;
                    left = ExprValue::Number(as_number(&left)? * as_number(&right)?);
                }
                Token::Slash => {
                    self.pos += 1;
                    let right = self.factor()?;
                    let divisor = as_number(&right)?;
                    if divisor == 0.0 {
                        return Err(ExprError::DivisionByZero);
                    }
                    left = ExprValue::Number(as_number(&left)? / divisor);
                }
                _ => break,
            }
        }
        Ok(left)
    }

    fn factor(&mut self) -> Result<ExprValue, ExprError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(ExprValue::Number(n)),
            Some(Token::Str(s)) => Ok(ExprValue::Text(s)),
            Some(Token::Minus) => {
                let inner = self.factor()?;
                Ok(ExprValue::Number(-as_number(&inner)?))
            }
            Some(Token::LParen) => {
                let inner = self.expression()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) if name == "replace" => self.replace_call(),
            Some(Token::Ident(name)) => {
                if name == self.var {
                    Ok(self.value.clone())
                } else {
                    Err(ExprError::UnknownIdentifier(name))
                }
            }
            _ => Err(ExprError::UnexpectedToken),
        }
    }

    fn replace_call(&mut self) -> Result<ExprValue, ExprError> {
        self.expect(&Token::LParen)
            .map_err(|_| ExprError::BadArity("replace"))?;
        let target = self.expression()?;
        self.expect(&Token::Comma)
            .map_err(|_| ExprError::BadArity("replace"))?;
        let from = self.expression()?;
        self.expect(&Token::Comma)
            .map_err(|_| ExprError::BadArity("replace"))?;
        let to = self.expression()?;
        self.expect(&Token::RParen)
            .map_err(|_| ExprError::BadArity("replace"))?;

        let from = from.to_text();
        if from.is_empty() {
            // Replacing the empty string would loop the value into garbage.
            return Ok(target);
        }
        Ok(ExprValue::Text(target.to_text().replace(&from, &to.to_text())))
    }
}

fn add(left: ExprValue, right: ExprValue) -> Result<ExprValue, ExprError> {
    match (&left, &right) {
        (ExprValue::Number(a), ExprValue::Number(b)) => Ok(ExprValue::Number(a + b)),
        _ => Ok(ExprValue::Text(format!(
            "{}{}",
            left.to_text(),
            right.to_text()
        ))),
    }
}

fn as_number(value: &ExprValue) -> Result<f64, ExprError> {
    match value {
        ExprValue::Number(n) => Ok(*n),
        ExprValue::Text(_) => Err(ExprError::NotANumber),
    }
}

fn format_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> ExprValue {
        ExprValue::Text(value.to_string())
    }

    #[test]
    fn concatenates_text_with_plus() {
        let out = evaluate("'MR-' + protocol", "protocol", &text("WAIR")).expect("eval");
        assert_eq!(out, text("MR-WAIR"));
    }

    #[test]
    fn replace_rewrites_substrings() {
        let out = evaluate(
            "replace(session, 'POST', 'Post')",
            "session",
            &text("POST-op"),
        )
        .expect("eval");
        assert_eq!(out, text("Post-op"));
    }

    #[test]
    fn arithmetic_over_the_bound_variable() {
        let out = evaluate("record_id + 50", "record_id", &ExprValue::Number(7.0)).expect("eval");
        assert_eq!(out, ExprValue::Number(57.0));

        let out = evaluate("(record_id + 1) * 2", "record_id", &ExprValue::Number(3.0))
            .expect("eval");
        assert_eq!(out, ExprValue::Number(8.0));
    }

    #[test]
    fn unknown_identifiers_are_rejected() {
        let err = evaluate("protocol + other", "protocol", &text("x")).expect_err("must fail");
        assert_eq!(err, ExprError::UnknownIdentifier("other".to_string()));
    }

    #[test]
    fn no_code_execution_sneaks_through() {
        assert!(evaluate("__import__('os')", "x", &text("v")).is_err());
        assert!(evaluate("x; drop", "x", &text("v")).is_err());
        assert!(evaluate("x.upper()", "x", &text("v")).is_err());
    }

    #[test]
    fn division_by_zero_fails_cleanly() {
        let err = evaluate("x / 0", "x", &ExprValue::Number(4.0)).expect_err("must fail");
        assert_eq!(err, ExprError::DivisionByZero);
    }

    #[test]
    fn arithmetic_on_text_fails() {
        assert_eq!(
            evaluate("x * 2", "x", &text("seven")).expect_err("must fail"),
            ExprError::NotANumber
        );
    }
}
