use super::lexer::Token;
use super::program::Func;
use super::program::Instr;
use super::program::Program;
use crate::error::Result;
use crate::error::SylvaError;

/// recursive-descent compiler from a token stream to the postfix exec list.
/// precedence (loosest first): logical, comparison, additive, multiplicative,
/// power, unary sign, atom
pub(crate) struct Parser<'a> {
    source: &'a str,
    tokens: &'a [Token],
    pos: usize,
    program: Vec<Instr>,
    variables: Vec<String>,
    strict: bool,
}

impl<'a> Parser<'a> {
    /// compile `tokens`. With `declared` given, the parser is strict: only
    /// those variables may appear (in that slot order). Without, variables
    /// are registered in order of first use.
    pub fn compile(
        source: &'a str,
        tokens: &'a [Token],
        declared: Option<&[&str]>,
    ) -> Result<(Program, Vec<String>)> {
        let mut parser = Parser {
            source,
            tokens,
            pos: 0,
            program: Vec::new(),
            variables: declared
                .map(|names| names.iter().map(|n| n.to_string()).collect())
                .unwrap_or_default(),
            strict: declared.is_some(),
        };
        if !tokens.is_empty() {
            parser.logical()?;
            if parser.pos != tokens.len() {
                return Err(parser.fail("trailing input after expression"));
            }
        }
        Ok((Program(parser.program), parser.variables))
    }

    fn fail(&self, message: impl Into<String>) -> SylvaError {
        SylvaError::expression(self.source, message)
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn logical(&mut self) -> Result<()> {
        self.comparison()?;
        while let Some(op @ (Token::And | Token::Or)) = self.peek() {
            let instr = match op {
                Token::And => Instr::And,
                _ => Instr::Or,
            };
            self.pos += 1;
            self.comparison()?;
            self.program.push(instr);
        }
        Ok(())
    }

    fn comparison(&mut self) -> Result<()> {
        self.additive()?;
        while let Some(Token::Compare(cmp)) = self.peek() {
            let cmp = *cmp;
            self.pos += 1;
            self.additive()?;
            self.program.push(Instr::Compare(cmp));
        }
        Ok(())
    }

    fn additive(&mut self) -> Result<()> {
        self.multiplicative()?;
        while let Some(Token::Op(op @ ('+' | '-'))) = self.peek() {
            let instr = if *op == '+' { Instr::Add } else { Instr::Sub };
            self.pos += 1;
            self.multiplicative()?;
            self.program.push(instr);
        }
        Ok(())
    }

    fn multiplicative(&mut self) -> Result<()> {
        self.power()?;
        while let Some(Token::Op(op @ ('*' | '/'))) = self.peek() {
            let instr = if *op == '*' { Instr::Mul } else { Instr::Div };
            self.pos += 1;
            self.power()?;
            self.program.push(instr);
        }
        Ok(())
    }

    fn power(&mut self) -> Result<()> {
        self.unary()?;
        while let Some(Token::Op('^')) = self.peek() {
            self.pos += 1;
            self.unary()?;
            self.program.push(Instr::Pow);
        }
        Ok(())
    }

    fn unary(&mut self) -> Result<()> {
        match self.peek() {
            Some(Token::Op('-')) => {
                self.pos += 1;
                self.unary()?;
                self.program.push(Instr::Neg);
                Ok(())
            }
            Some(Token::Op('+')) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.atom(),
        }
    }

    fn atom(&mut self) -> Result<()> {
        match self.peek().cloned() {
            Some(Token::Number(value)) => {
                self.pos += 1;
                self.program.push(Instr::Number(value));
                Ok(())
            }
            Some(Token::Ident(name)) => {
                self.pos += 1;
                if let Some(Token::LParen) = self.peek() {
                    self.pos += 1;
                    self.call(&name)
                } else {
                    let index = self.variable(&name)?;
                    self.program.push(Instr::Variable(index));
                    Ok(())
                }
            }
            Some(Token::LParen) => {
                self.pos += 1;
                self.logical()?;
                match self.peek() {
                    Some(Token::RParen) => {
                        self.pos += 1;
                        Ok(())
                    }
                    _ => Err(self.fail("unbalanced parentheses")),
                }
            }
            Some(token) => Err(self.fail(format!("unexpected token {:?}", token))),
            None => Err(self.fail("unexpected end of expression")),
        }
    }

    fn call(&mut self, name: &str) -> Result<()> {
        let func =
            Func::lookup(name).ok_or_else(|| self.fail(format!("unknown function `{}`", name)))?;
        let mut argc = 0usize;
        loop {
            match self.peek() {
                Some(Token::RParen) => {
                    self.pos += 1;
                    break;
                }
                Some(Token::Comma) if argc > 0 => {
                    self.pos += 1;
                }
                Some(_) if argc == 0 => {}
                _ => return Err(self.fail("unbalanced parentheses")),
            }
            self.logical()?;
            argc += 1;
        }
        if let Some(expected) = func.arity() {
            if argc != expected {
                return Err(self.fail(format!(
                    "function `{}` takes {} arguments, got {}",
                    name, expected, argc
                )));
            }
        } else if argc < 2 {
            return Err(self.fail(format!("function `{}` needs at least 2 arguments", name)));
        }
        self.program.push(Instr::Call(func, argc));
        Ok(())
    }

    fn variable(&mut self, name: &str) -> Result<usize> {
        if let Some(index) = self.variables.iter().position(|v| v == name) {
            return Ok(index);
        }
        if self.strict {
            return Err(self.fail(format!("undefined symbol `{}`", name)));
        }
        self.variables.push(name.to_string());
        Ok(self.variables.len() - 1)
    }
}
