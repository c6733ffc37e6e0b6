use crate::error::EvalError;
use crate::formula::lexer::Token;

/// Deepest nesting of parentheses and unary operators accepted.
const MAX_DEPTH: usize = 64;

/// Most binary operators accepted in one expression. Bounds the depth of left-leaning chains.
const MAX_OPERATORS: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(f64),
    Variable(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

struct Parser {
    tokens: Vec<Token>,
    position: usize,
    depth: usize,
    operators: usize,
}

fn unsupported(what: impl Into<String>) -> EvalError {
    EvalError::UnsupportedConstruct(what.into())
}

/// Precedence, loosest first: `+ -`, then `* / // %`, then unary `+ -`, then right-associative `**`.
pub fn parse(tokens: Vec<Token>) -> Result<Expr, EvalError> {
    if tokens.is_empty() {
        return Err(unsupported("empty expression"));
    }

    let mut parser = Parser { tokens, position: 0, depth: 0, operators: 0 };
    let expr = parser.additive()?;
    match parser.peek() {
        None => Ok(expr),
        Some(token) => Err(unsupported(format!("unexpected {:?}", token))),
    }
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        self.position += 1;
        token
    }

    fn descend(&mut self) -> Result<(), EvalError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(unsupported("expression nested too deeply"));
        }
        Ok(())
    }

    fn count_operator(&mut self) -> Result<(), EvalError> {
        self.operators += 1;
        if self.operators > MAX_OPERATORS {
            return Err(unsupported("expression too long"));
        }
        Ok(())
    }

    fn additive(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            self.count_operator()?;
            let right = self.multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, EvalError> {
        let mut left = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::DoubleSlash) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            self.count_operator()?;
            let right = self.unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        let op = match self.peek() {
            Some(Token::Plus) => UnaryOp::Plus,
            Some(Token::Minus) => UnaryOp::Minus,
            _ => return self.power(),
        };
        self.advance();
        self.descend()?;
        let operand = self.unary()?;
        self.depth -= 1;
        Ok(Expr::Unary(op, Box::new(operand)))
    }

    fn power(&mut self) -> Result<Expr, EvalError> {
        let base = self.primary()?;
        if let Some(Token::DoubleStar) = self.peek() {
            self.advance();
            self.count_operator()?;
            self.descend()?;
            // -2**2 == -(2**2) but 2**-1 == 0.5
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let expr = match self.advance() {
            Some(Token::Number(value)) => Expr::Literal(value),
            Some(Token::Ident(name)) => Expr::Variable(name),
            Some(Token::LParen) => {
                self.descend()?;
                let inner = self.additive()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Token::RParen) => inner,
                    _ => return Err(unsupported("unbalanced parenthesis")),
                }
            },
            Some(token) => return Err(unsupported(format!("unexpected {:?}", token))),
            None => return Err(unsupported("unexpected end of expression")),
        };

        if let Some(Token::LParen) = self.peek() {
            return Err(unsupported("function call"));
        }
        Ok(expr)
    }
}
