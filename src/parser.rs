use std::collections::HashMap;

use crate::ast::{ASTNode, Expression, Function, Prototype};
use crate::lexer::{lex, LexError, Token};

#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum ParserError {
    #[error("expected {expected}, found `{found}`")]
    UnexpectedToken {
        expected: &'static str,
        found: Token,
    },
    #[error("expected {expected}, found end of input")]
    UnexpectedEof { expected: &'static str },
}

/// Either front-end failure tier: tokenization or parsing.
#[derive(Debug, PartialEq, Clone, thiserror::Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParserError),
}

pub type PartialParseResult = Result<Expression, ParserError>;

/// Recursive-descent parser over a token stack (top of the stack is the
/// current token). Every rule either consumes exactly the tokens of its
/// production, or returns an error without consuming the offending token so
/// the caller can recover by skipping it.
#[derive(Debug, Clone)]
pub struct Parser {
    operator_precedence: HashMap<char, u32>,
}

impl Default for Parser {
    fn default() -> Self {
        let mut operator_precedence = HashMap::new();
        operator_precedence.insert('<', 10);
        operator_precedence.insert('>', 10);
        operator_precedence.insert('+', 20);
        operator_precedence.insert('-', 20);
        operator_precedence.insert('*', 40);
        operator_precedence.insert('/', 40);
        Self {
            operator_precedence,
        }
    }
}

impl Parser {
    /// The current token's binding power, if it is a known binary operator.
    fn peek_operator(&self, input: &[Token]) -> Option<(char, u32)> {
        match input.last() {
            Some(Token::Operator(op)) => self.operator_precedence.get(op).map(|pr| (*op, *pr)),
            _ => None,
        }
    }

    fn expect(
        &self,
        input: &mut Vec<Token>,
        token: &Token,
        expected: &'static str,
    ) -> Result<(), ParserError> {
        match input.last() {
            Some(found) if found == token => {
                input.pop();
                Ok(())
            }
            Some(found) => Err(ParserError::UnexpectedToken {
                expected,
                found: found.clone(),
            }),
            None => Err(ParserError::UnexpectedEof { expected }),
        }
    }

    /// identifierexpr := identifier | identifier '(' (primary (',' primary)*)? ')'
    ///
    /// The identifier itself has already been consumed. Call arguments are
    /// primaries, so anything larger must be parenthesized.
    fn parse_identifier(&self, name: String, input: &mut Vec<Token>) -> PartialParseResult {
        if input.last() != Some(&Token::OpenParen) {
            return Ok(Expression::Variable(name));
        }
        input.pop();

        let mut args = Vec::new();
        if input.last() != Some(&Token::CloseParen) {
            loop {
                args.push(self.parse_primary(input)?);
                if input.last() == Some(&Token::CloseParen) {
                    break;
                }
                self.expect(input, &Token::Comma, "`,` between call arguments")?;
            }
        }
        input.pop(); // ')'

        Ok(Expression::Call(name, args))
    }

    /// parenexpr := '(' expression ')'
    fn parse_nested(&self, input: &mut Vec<Token>) -> PartialParseResult {
        self.expect(input, &Token::OpenParen, "`(`")?;
        let expr = self.parse_expr(input)?;
        self.expect(input, &Token::CloseParen, "`)` to close the expression")?;
        Ok(expr)
    }

    /// primary := number | identifierexpr | parenexpr
    fn parse_primary(&self, input: &mut Vec<Token>) -> PartialParseResult {
        match input.last().cloned() {
            Some(Token::Number(value)) => {
                input.pop();
                Ok(Expression::Number(value))
            }
            Some(Token::Ident(name)) => {
                input.pop();
                self.parse_identifier(name, input)
            }
            Some(Token::OpenParen) => self.parse_nested(input),
            Some(found) => Err(ParserError::UnexpectedToken {
                expected: "an expression",
                found,
            }),
            None => Err(ParserError::UnexpectedEof {
                expected: "an expression",
            }),
        }
    }

    /// binoprhs := (binop primary)*
    ///
    /// Precedence climbing: fold operators onto `lhs` as long as they bind at
    /// least as tightly as `min_precedence`; when the operator after the
    /// right-hand side binds tighter than the one just consumed, climb into
    /// it first so the tighter operator ends up deeper in the tree.
    fn parse_rhs(
        &self,
        input: &mut Vec<Token>,
        min_precedence: u32,
        mut lhs: Expression,
    ) -> PartialParseResult {
        loop {
            let (op, precedence) = match self.peek_operator(input) {
                Some((op, precedence)) if precedence >= min_precedence => (op, precedence),
                _ => return Ok(lhs),
            };
            input.pop();

            let mut rhs = self.parse_primary(input)?;

            if let Some((_, next_precedence)) = self.peek_operator(input) {
                if next_precedence > precedence {
                    rhs = self.parse_rhs(input, precedence + 1, rhs)?;
                }
            }

            lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    /// expression := primary binoprhs
    pub fn parse_expr(&self, input: &mut Vec<Token>) -> PartialParseResult {
        let lhs = self.parse_primary(input)?;
        self.parse_rhs(input, 0, lhs)
    }

    /// prototype := identifier '(' (identifier (',' identifier)*)? ')'
    fn parse_prototype(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        let name = match input.last().cloned() {
            Some(Token::Ident(name)) => {
                input.pop();
                name
            }
            Some(found) => {
                return Err(ParserError::UnexpectedToken {
                    expected: "a function name",
                    found,
                })
            }
            None => {
                return Err(ParserError::UnexpectedEof {
                    expected: "a function name",
                })
            }
        };
        self.expect(input, &Token::OpenParen, "`(` after the function name")?;

        let mut args = Vec::new();
        if input.last() != Some(&Token::CloseParen) {
            loop {
                match input.last().cloned() {
                    Some(Token::Ident(arg)) => {
                        input.pop();
                        args.push(arg);
                    }
                    Some(found) => {
                        return Err(ParserError::UnexpectedToken {
                            expected: "a parameter name",
                            found,
                        })
                    }
                    None => {
                        return Err(ParserError::UnexpectedEof {
                            expected: "a parameter name",
                        })
                    }
                }
                if input.last() == Some(&Token::CloseParen) {
                    break;
                }
                self.expect(input, &Token::Comma, "`,` between parameters")?;
            }
        }
        input.pop(); // ')'

        Ok(Prototype { name, args })
    }

    /// definition := 'def' prototype expression
    fn parse_definition(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        self.expect(input, &Token::Def, "`def`")?;
        let prototype = self.parse_prototype(input)?;
        let body = self.parse_expr(input)?;
        Ok(Function { prototype, body })
    }

    /// external := 'extern' prototype
    fn parse_extern(&self, input: &mut Vec<Token>) -> Result<Prototype, ParserError> {
        self.expect(input, &Token::Extern, "`extern`")?;
        self.parse_prototype(input)
    }

    /// toplevelexpr := expression, wrapped as an anonymous nullary function
    fn parse_top_level_expr(&self, input: &mut Vec<Token>) -> Result<Function, ParserError> {
        let body = self.parse_expr(input)?;
        Ok(Function {
            prototype: Prototype {
                name: String::new(),
                args: Vec::new(),
            },
            body,
        })
    }

    /// top := definition | external | expression | ';'
    ///
    /// Returns `Ok(None)` for a lone `;` and at end of input.
    pub fn parse_top_level(&self, input: &mut Vec<Token>) -> Result<Option<ASTNode>, ParserError> {
        match input.last() {
            None => Ok(None),
            Some(Token::Delimiter) => {
                input.pop();
                Ok(None)
            }
            Some(Token::Def) => Ok(Some(ASTNode::Function(self.parse_definition(input)?))),
            Some(Token::Extern) => Ok(Some(ASTNode::Extern(self.parse_extern(input)?))),
            Some(_) => Ok(Some(ASTNode::Function(self.parse_top_level_expr(input)?))),
        }
    }

    /// Parse every top-level construct in the input, recovering from a failed
    /// construct by discarding one token and resuming dispatch.
    pub fn parse(&self, input: &mut Vec<Token>) -> (Vec<ASTNode>, Vec<ParserError>) {
        let mut nodes = Vec::new();
        let mut errors = Vec::new();

        while !input.is_empty() {
            match self.parse_top_level(input) {
                Ok(Some(node)) => nodes.push(node),
                Ok(None) => {}
                Err(err) => {
                    errors.push(err);
                    input.pop();
                }
            }
        }

        (nodes, errors)
    }

    /// Lex and parse a whole source string, failing on the first error.
    pub fn parse_str(&self, input: &str) -> Result<Vec<ASTNode>, SyntaxError> {
        let mut tokens = lex(input)?;

        let mut nodes = Vec::new();
        while !tokens.is_empty() {
            if let Some(node) = self.parse_top_level(&mut tokens)? {
                nodes.push(node);
            }
        }
        Ok(nodes)
    }
}
