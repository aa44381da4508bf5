//! Custom rule AST.
//!
//! A rule is a boolean expression over a fixed set of named numeric inputs
//! taken from the latest indicator snapshot:
//! - `Operand`: a named input or a numeric constant
//! - `Rule`: comparisons joined by `and`, `or`, `not`
//!
//! There is no arithmetic, no function call, and no way to name anything
//! outside `Input`.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Input {
    Open,
    High,
    Low,
    Close,
    Volume,
    Rsi,
    EmaFast,
    EmaSlow,
    Sma,
    Macd,
    MacdSignal,
    MacdHistogram,
    BbUpper,
    BbMiddle,
    BbLower,
    Atr,
    StochK,
    StochD,
}

impl Input {
    pub const ALL: [Input; 18] = [
        Input::Open,
        Input::High,
        Input::Low,
        Input::Close,
        Input::Volume,
        Input::Rsi,
        Input::EmaFast,
        Input::EmaSlow,
        Input::Sma,
        Input::Macd,
        Input::MacdSignal,
        Input::MacdHistogram,
        Input::BbUpper,
        Input::BbMiddle,
        Input::BbLower,
        Input::Atr,
        Input::StochK,
        Input::StochD,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Input::Open => "open",
            Input::High => "high",
            Input::Low => "low",
            Input::Close => "close",
            Input::Volume => "volume",
            Input::Rsi => "rsi",
            Input::EmaFast => "ema_fast",
            Input::EmaSlow => "ema_slow",
            Input::Sma => "sma",
            Input::Macd => "macd",
            Input::MacdSignal => "macd_signal",
            Input::MacdHistogram => "macd_histogram",
            Input::BbUpper => "bb_upper",
            Input::BbMiddle => "bb_middle",
            Input::BbLower => "bb_lower",
            Input::Atr => "atr",
            Input::StochK => "stoch_k",
            Input::StochD => "stoch_d",
        }
    }

    pub fn from_name(name: &str) -> Option<Input> {
        Input::ALL.into_iter().find(|i| i.name() == name)
    }
}

impl fmt::Display for Input {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    Input(Input),
    Constant(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Ge,
    Lt,
    Le,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Eq => "==",
            CompareOp::Ne => "!=",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Rule {
    Literal(bool),
    Compare {
        left: Operand,
        op: CompareOp,
        right: Operand,
    },
    And(Vec<Rule>),
    Or(Vec<Rule>),
    Not(Box<Rule>),
}

/// Collect the distinct inputs a rule reads.
pub fn referenced_inputs(rule: &Rule) -> Vec<Input> {
    let mut out = Vec::new();
    collect_inputs(rule, &mut out);
    out
}

fn collect_inputs(rule: &Rule, out: &mut Vec<Input>) {
    match rule {
        Rule::Literal(_) => {}
        Rule::Compare { left, right, .. } => {
            for operand in [left, right] {
                if let Operand::Input(input) = operand {
                    if !out.contains(input) {
                        out.push(*input);
                    }
                }
            }
        }
        Rule::And(rules) | Rule::Or(rules) => {
            for r in rules {
                collect_inputs(r, out);
            }
        }
        Rule::Not(inner) => collect_inputs(inner, out),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_names_round_trip() {
        for input in Input::ALL {
            assert_eq!(Input::from_name(input.name()), Some(input));
        }
        assert_eq!(Input::from_name("__import__"), None);
    }

    #[test]
    fn referenced_inputs_are_distinct() {
        let rule = Rule::And(vec![
            Rule::Compare {
                left: Operand::Input(Input::Rsi),
                op: CompareOp::Gt,
                right: Operand::Constant(70.0),
            },
            Rule::Not(Box::new(Rule::Compare {
                left: Operand::Input(Input::Close),
                op: CompareOp::Lt,
                right: Operand::Input(Input::Rsi),
            })),
        ]);
        assert_eq!(referenced_inputs(&rule), vec![Input::Rsi, Input::Close]);
    }

    #[test]
    fn compare_op_symbols() {
        assert_eq!(CompareOp::Ge.symbol(), ">=");
        assert_eq!(CompareOp::Ne.symbol(), "!=");
    }
}
