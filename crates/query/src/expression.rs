//! Post-aggregation expressions.
//!
//! Grammar:
//!
//! ```text
//! statement := name "=" expr
//! expr      := term (("+" | "-") term)*
//! term      := unary (("*" | "/") unary)*
//! unary     := "-" unary | atom
//! atom      := number | ingredient | "(" expr ")"
//! ```
//!
//! `name` must be a valid identifier and every `ingredient` must be one of
//! the declared ingredient props. Nothing else in the input reaches SQL:
//! the output is re-rendered from the parse tree, with operands cast to
//! `numeric` and every divisor wrapped in `NULLIF(.., 0)`.

use std::iter::Peekable;
use std::str::Chars;

use panorama_core::Error;

use crate::columns::Identifier;

const MAX_EXPRESSION_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Number(String),
    Op(char),
    LParen,
    RParen,
    Assign,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(String),
    Ingredient(Identifier),
    Neg(Box<Expr>),
    Binary(Box<Expr>, char, Box<Expr>),
}

/// A validated `name = expr` statement.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedColumn {
    pub name: Identifier,
    expr: Expr,
}

impl DerivedColumn {
    /// Parse `input`, allowing only `ingredients` as operands.
    pub fn parse(input: &str, ingredients: &[Identifier]) -> Result<Self, Error> {
        if input.len() > MAX_EXPRESSION_LEN {
            return Err(Error::InvalidExpression(format!("longer than {MAX_EXPRESSION_LEN} characters")));
        }

        let tokens = tokenize(input)?;
        let mut parser = Parser { tokens, pos: 0, ingredients };

        let name = match parser.next() {
            Some(Token::Ident(name)) => {
                Identifier::new(name.clone())
                    .map_err(|_| Error::InvalidExpression(format!("invalid result name {name:?}")))?
            }
            _ => return Err(Error::InvalidExpression("expected `name = expression`".into())),
        };
        if parser.next() != Some(Token::Assign) {
            return Err(Error::InvalidExpression("expected `=` after result name".into()));
        }

        let expr = parser.expr()?;
        if let Some(extra) = parser.next() {
            return Err(Error::InvalidExpression(format!("unexpected {extra:?}")));
        }

        Ok(Self { name, expr })
    }

    /// SQL for the right-hand side.
    pub fn to_sql(&self) -> String {
        render(&self.expr)
    }
}

fn render(expr: &Expr) -> String {
    match expr {
        Expr::Number(n) => n.clone(),
        Expr::Ingredient(prop) => format!("{}::numeric", prop.quoted()),
        Expr::Neg(inner) => format!("(-{})", render(inner)),
        Expr::Binary(lhs, '/', rhs) => format!("({} / NULLIF({}, 0))", render(lhs), render(rhs)),
        Expr::Binary(lhs, op, rhs) => format!("({} {op} {})", render(lhs), render(rhs)),
    }
}

fn tokenize(input: &str) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '+' | '-' | '*' | '/' => {
                chars.next();
                tokens.push(Token::Op(c));
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '=' => {
                chars.next();
                tokens.push(Token::Assign);
            }
            c if c.is_ascii_digit() || c == '.' => tokens.push(Token::Number(number(&mut chars)?)),
            c if c.is_ascii_alphabetic() || c == '_' => {
                tokens.push(Token::Ident(take_while(&mut chars, |c| c.is_ascii_alphanumeric() || c == '_')))
            }
            other => return Err(Error::InvalidExpression(format!("unexpected character {other:?}"))),
        }
    }

    Ok(tokens)
}

fn number(chars: &mut Peekable<Chars<'_>>) -> Result<String, Error> {
    let literal = take_while(chars, |c| c.is_ascii_digit() || c == '.');
    let valid = literal.matches('.').count() <= 1 && literal.chars().any(|c| c.is_ascii_digit());
    if valid { Ok(literal) } else { Err(Error::InvalidExpression(format!("invalid number {literal:?}"))) }
}

fn take_while(chars: &mut Peekable<Chars<'_>>, pred: impl Fn(char) -> bool) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if !pred(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    ingredients: &'a [Identifier],
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.term()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(self.term()?));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, Error> {
        let mut lhs = self.unary()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek().cloned() {
            self.pos += 1;
            lhs = Expr::Binary(Box::new(lhs), op, Box::new(self.unary()?));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, Error> {
        if self.peek() == Some(&Token::Op('-')) {
            self.pos += 1;
            return Ok(Expr::Neg(Box::new(self.unary()?)));
        }
        self.atom()
    }

    fn atom(&mut self) -> Result<Expr, Error> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Ident(name)) => self
                .ingredients
                .iter()
                .find(|i| i.as_str() == name)
                .cloned()
                .map(Expr::Ingredient)
                .ok_or_else(|| Error::InvalidExpression(format!("{name:?} is not a declared ingredient"))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(Error::InvalidExpression("unbalanced parentheses".into())),
                }
            }
            Some(other) => Err(Error::InvalidExpression(format!("unexpected {other:?}"))),
            None => Err(Error::InvalidExpression("unexpected end of expression".into())),
        }
    }
}
