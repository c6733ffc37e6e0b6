use crate::error::EvalError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    DoubleStar,
    LParen,
    RParen,
}

const KEYWORDS: [&str; 14] = [
    "and", "or", "not", "if", "else", "lambda", "for", "in", "is", "True", "False", "None", "await", "yield",
];

fn unsupported(what: impl Into<String>) -> EvalError {
    EvalError::UnsupportedConstruct(what.into())
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

pub fn tokenize(source: &str) -> Result<Vec<Token>, EvalError> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && next.map_or(false, |n| n.is_ascii_digit())) {
            let (value, end) = lex_number(&chars, i)?;
            tokens.push(Token::Number(value));
            i = end;
            continue;
        }

        if is_ident_start(c) {
            let start = i;
            while i < chars.len() && is_ident_char(chars[i]) {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if KEYWORDS.contains(&word.as_str()) {
                return Err(unsupported(format!("keyword '{}'", word)));
            }
            tokens.push(Token::Ident(word));
            continue;
        }

        let (token, width) = match (c, next) {
            ('*', Some('*')) => (Token::DoubleStar, 2),
            ('/', Some('/')) => (Token::DoubleSlash, 2),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            ('.', _) => return Err(unsupported("attribute access")),
            ('\'', _) | ('"', _) => return Err(unsupported("string literal")),
            ('<', _) | ('>', _) | ('=', _) | ('!', _) => return Err(unsupported("comparison or assignment")),
            ('&', _) | ('|', _) | ('^', _) | ('~', _) => return Err(unsupported("bitwise operator")),
            ('[', _) | (']', _) => return Err(unsupported("subscript")),
            ('{', _) | ('}', _) => return Err(unsupported("collection literal")),
            (',', _) => return Err(unsupported("tuple")),
            _ => return Err(unsupported(format!("character '{}'", c))),
        };
        tokens.push(token);
        i += width;
    }

    Ok(tokens)
}

fn lex_number(chars: &[char], start: usize) -> Result<(f64, usize), EvalError> {
    let mut i = start;
    let digits = |i: &mut usize| {
        while *i < chars.len() && chars[*i].is_ascii_digit() {
            *i += 1;
        }
    };

    digits(&mut i);
    if i < chars.len() && chars[i] == '.' {
        i += 1;
        digits(&mut i);
    }
    if i < chars.len() && (chars[i] == 'e' || chars[i] == 'E') {
        let mut j = i + 1;
        if j < chars.len() && (chars[j] == '+' || chars[j] == '-') {
            j += 1;
        }
        if j < chars.len() && chars[j].is_ascii_digit() {
            i = j;
            digits(&mut i);
        }
    }

    let text: String = chars[start..i].iter().collect();
    if i < chars.len() && (is_ident_char(chars[i]) || chars[i] == '.') {
        return Err(unsupported(format!("malformed number '{}{}'", text, chars[i])));
    }

    text.parse::<f64>()
        .map(|value| (value, i))
        .map_err(|_| unsupported(format!("malformed number '{}'", text)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_operators_greedily() {
        let tokens = tokenize("b1**2 // 3").unwrap();
        assert_eq!(tokens, vec![
            Token::Ident(String::from("b1")),
            Token::DoubleStar,
            Token::Number(2.0),
            Token::DoubleSlash,
            Token::Number(3.0),
        ]);
    }

    #[test]
    fn reads_float_forms() {
        assert_eq!(tokenize(".5").unwrap(), vec![Token::Number(0.5)]);
        assert_eq!(tokenize("2.").unwrap(), vec![Token::Number(2.0)]);
        assert_eq!(tokenize("1e3").unwrap(), vec![Token::Number(1000.0)]);
    }

    #[test]
    fn rejects_non_arithmetic_syntax() {
        assert!(matches!(tokenize("b1.bit_length()"), Err(EvalError::UnsupportedConstruct(_))));
        assert!(matches!(tokenize("'abc'"), Err(EvalError::UnsupportedConstruct(_))));
        assert!(matches!(tokenize("b1 < 2"), Err(EvalError::UnsupportedConstruct(_))));
        assert!(matches!(tokenize("b1 and b2"), Err(EvalError::UnsupportedConstruct(_))));
        assert!(matches!(tokenize("True"), Err(EvalError::UnsupportedConstruct(_))));
        assert!(matches!(tokenize("0x10"), Err(EvalError::UnsupportedConstruct(_))));
    }
}
