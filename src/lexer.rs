use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum LexError {
    // the number grammar is loose on purpose; extra decimal points only
    // surface here, at conversion time
    #[error("malformed number literal `{0}`")]
    MalformedNumber(String),
}

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    Def,
    Extern,
    Ident(String),
    Number(f64),
    Delimiter,
    OpenParen,
    CloseParen,
    Comma,
    Operator(char),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Def => write!(f, "def"),
            Token::Extern => write!(f, "extern"),
            Token::Ident(name) => write!(f, "{}", name),
            Token::Number(value) => write!(f, "{}", value),
            Token::Delimiter => write!(f, ";"),
            Token::OpenParen => write!(f, "("),
            Token::CloseParen => write!(f, ")"),
            Token::Comma => write!(f, ","),
            Token::Operator(op) => write!(f, "{}", op),
        }
    }
}

lazy_static! {
    static ref COMMENT_RE: Regex = Regex::new(r"(?m)#.*$").unwrap();
    static ref TOKEN_RE: Regex = Regex::new(&[
        r"(?P<ident>[A-Za-z][A-Za-z0-9]*)",
        r"(?P<number>[0-9.]+)",
        r"(?P<delimiter>;)",
        r"(?P<oppar>\()",
        r"(?P<clpar>\))",
        r"(?P<comma>,)",
        r"(?P<operator>\S)",
    ]
    .join("|"))
    .unwrap();
}

/// strip `#` line comments before tokenization
fn preprocess(input: &str) -> String {
    COMMENT_RE.replace_all(input, "").to_string()
}

/// Lex the whole input. The tokens come back reversed so the parser can use
/// the vector as a stack: the top is the current token, popping it advances,
/// and an empty stack is the (sticky) end of input.
pub fn lex(input: &str) -> Result<Vec<Token>, LexError> {
    let preprocessed = preprocess(input);

    let mut tokens = Vec::new();
    for cap in TOKEN_RE.captures_iter(&preprocessed) {
        let token = if let Some(ident) = cap.name("ident") {
            match ident.as_str() {
                "def" => Token::Def,
                "extern" => Token::Extern,
                text => Token::Ident(text.to_string()),
            }
        } else if let Some(number) = cap.name("number") {
            let text = number.as_str();
            let value = text
                .parse()
                .map_err(|_| LexError::MalformedNumber(text.to_string()))?;
            Token::Number(value)
        } else if cap.name("delimiter").is_some() {
            Token::Delimiter
        } else if cap.name("oppar").is_some() {
            Token::OpenParen
        } else if cap.name("clpar").is_some() {
            Token::CloseParen
        } else if cap.name("comma").is_some() {
            Token::Comma
        } else if let Some(op) = cap.name("operator") {
            let op = op
                .as_str()
                .chars()
                .next()
                .expect("`\\S` matches exactly one character");
            Token::Operator(op)
        } else {
            panic!("unknown token!");
        };

        tokens.push(token);
    }
    tokens.reverse();
    Ok(tokens)
}
