//! Custom rule parser.
//!
//! Recursive descent parser for the rule grammar. Converts text to AST with
//! meaningful error messages including character offset, expected/found tokens.
//!
//! ```text
//! expr       := or
//! or         := and (("or" | "||") and)*
//! and        := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | "(" expr ")" | "true" | "false" | comparison
//! comparison := operand (">" | ">=" | "<" | "<=" | "==" | "!=") operand
//! operand    := number | input-name
//! ```
//!
//! Keywords are case-insensitive; input names are lowercase.

use crate::domain::error::ParseError;
use crate::domain::rule::{CompareOp, Input, Operand, Rule};

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn remaining(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.remaining().chars().next()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.pos += ch.len_utf8();
        Some(ch)
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.peek() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn expect_char(&mut self, expected: char) -> Result<(), ParseError> {
        self.skip_whitespace();
        match self.peek() {
            Some(ch) if ch == expected => {
                self.advance();
                Ok(())
            }
            Some(ch) => Err(ParseError {
                message: format!("expected '{}', found '{}'", expected, ch),
                position: self.pos,
            }),
            None => Err(ParseError {
                message: format!("expected '{}', found end of input", expected),
                position: self.pos,
            }),
        }
    }

    fn read_word(&self) -> &'a str {
        let remaining = self.remaining();
        let end = remaining
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(remaining.len());
        &remaining[..end]
    }

    fn peek_word(&self) -> String {
        let word = self.read_word();
        if word.is_empty() {
            self.peek()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "end of input".to_string())
        } else {
            word.to_string()
        }
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.read_word().eq_ignore_ascii_case(keyword)
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn consume_exact(&mut self, s: &str) -> bool {
        if self.remaining().starts_with(s) {
            self.pos += s.len();
            true
        } else {
            false
        }
    }

    fn parse_number(&mut self) -> Result<f64, ParseError> {
        self.skip_whitespace();
        let start = self.pos;
        let mut has_dot = false;
        let mut digits = 0;

        if self.peek() == Some('-') {
            self.advance();
        }

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                digits += 1;
                self.advance();
            } else if ch == '.' && !has_dot {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        if digits == 0 {
            return Err(ParseError {
                message: "expected number".to_string(),
                position: start,
            });
        }

        let num_str = &self.input[start..self.pos];
        num_str.parse::<f64>().map_err(|_| ParseError {
            message: format!("invalid number: {}", num_str),
            position: start,
        })
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        self.skip_whitespace();

        if self
            .peek()
            .is_some_and(|ch| ch.is_ascii_digit() || ch == '-' || ch == '.')
        {
            let num = self.parse_number()?;
            return Ok(Operand::Constant(num));
        }

        let word = self.read_word();
        match Input::from_name(word) {
            Some(input) => {
                self.pos += word.len();
                Ok(Operand::Input(input))
            }
            None => Err(ParseError {
                message: format!("expected number or input name, found '{}'", self.peek_word()),
                position: self.pos,
            }),
        }
    }

    fn parse_compare_op(&mut self) -> Result<CompareOp, ParseError> {
        self.skip_whitespace();
        let ops = [
            (">=", CompareOp::Ge),
            ("<=", CompareOp::Le),
            ("==", CompareOp::Eq),
            ("!=", CompareOp::Ne),
            (">", CompareOp::Gt),
            ("<", CompareOp::Lt),
        ];
        for (text, op) in ops {
            if self.consume_exact(text) {
                return Ok(op);
            }
        }
        Err(ParseError {
            message: format!("expected comparison operator, found '{}'", self.peek_word()),
            position: self.pos,
        })
    }

    fn parse_comparison(&mut self) -> Result<Rule, ParseError> {
        let left = self.parse_operand()?;
        let op = self.parse_compare_op()?;
        let right = self.parse_operand()?;
        Ok(Rule::Compare { left, op, right })
    }

    fn parse_unary(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();

        if self.consume_keyword("not") {
            let inner = self.parse_unary()?;
            return Ok(Rule::Not(Box::new(inner)));
        }
        if self.remaining().starts_with('!') && !self.remaining().starts_with("!=") {
            self.advance();
            let inner = self.parse_unary()?;
            return Ok(Rule::Not(Box::new(inner)));
        }
        if self.peek() == Some('(') {
            self.advance();
            let inner = self.parse_or()?;
            self.expect_char(')')?;
            return Ok(inner);
        }
        if self.consume_keyword("true") {
            return Ok(Rule::Literal(true));
        }
        if self.consume_keyword("false") {
            return Ok(Rule::Literal(false));
        }

        self.parse_comparison()
    }

    fn parse_and(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_unary()?];
        loop {
            self.skip_whitespace();
            if self.consume_keyword("and") || self.consume_exact("&&") {
                rules.push(self.parse_unary()?);
            } else {
                break;
            }
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::And(rules)
        })
    }

    fn parse_or(&mut self) -> Result<Rule, ParseError> {
        let mut rules = vec![self.parse_and()?];
        loop {
            self.skip_whitespace();
            if self.consume_keyword("or") || self.consume_exact("||") {
                rules.push(self.parse_and()?);
            } else {
                break;
            }
        }
        Ok(if rules.len() == 1 {
            rules.remove(0)
        } else {
            Rule::Or(rules)
        })
    }

    fn parse(&mut self) -> Result<Rule, ParseError> {
        self.skip_whitespace();
        if self.remaining().is_empty() {
            return Err(ParseError {
                message: "empty rule".to_string(),
                position: 0,
            });
        }
        let rule = self.parse_or()?;
        self.skip_whitespace();
        if !self.remaining().is_empty() {
            return Err(ParseError {
                message: format!("unexpected input after rule: '{}'", self.remaining()),
                position: self.pos,
            });
        }
        Ok(rule)
    }
}

pub fn parse(input: &str) -> Result<Rule, ParseError> {
    let mut parser = Parser::new(input);
    parser.parse()
}
