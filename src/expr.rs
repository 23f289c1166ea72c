use crate::parse::{self, ParseError};
use smol_str::SmolStr;
use std::{
    fmt::{self, Display, Formatter},
    ops::{Add, Div, Mul, Neg, Sub},
    str::FromStr,
};

/// A symbolic expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Parameter(Parameter),
    Constant(f64),
    /// An expression involving two operands.
    Binary {
        left: Box<Expression>,
        right: Box<Expression>,
        op: BinaryOperation,
    },
    /// Negate the expression.
    Negate(Box<Expression>),
    /// Invoke a builtin function.
    FunctionCall {
        function: SmolStr,
        argument: Box<Expression>,
    },
}

impl Expression {
    /// Every [`Parameter`] mentioned anywhere in this expression, in
    /// depth-first order. May contain duplicates.
    pub fn params(&self) -> impl Iterator<Item = &Parameter> + '_ {
        let mut found = Vec::new();
        self.collect_params(&mut found);
        found.into_iter()
    }

    fn collect_params<'expr>(&'expr self, found: &mut Vec<&'expr Parameter>) {
        match self {
            Expression::Parameter(p) => found.push(p),
            Expression::Constant(_) => {},
            Expression::Binary { left, right, .. } => {
                left.collect_params(found);
                right.collect_params(found);
            },
            Expression::Negate(inner) => inner.collect_params(found),
            Expression::FunctionCall { argument, .. } => {
                argument.collect_params(found)
            },
        }
    }

    pub fn depends_on(&self, param: &Parameter) -> bool {
        self.params().any(|p| p == param)
    }

    pub fn is_constant(&self) -> bool {
        match self {
            Expression::Constant(_) => true,
            _ => false,
        }
    }

    pub fn as_constant(&self) -> Option<f64> {
        match self {
            Expression::Constant(value) => Some(*value),
            _ => None,
        }
    }

    /// The immediate sub-expressions, without recursing.
    pub fn children(&self) -> impl Iterator<Item = &Expression> + '_ {
        let children: Vec<&Expression> = match self {
            Expression::Parameter(_) | Expression::Constant(_) => Vec::new(),
            Expression::Binary { left, right, .. } => vec![left, right],
            Expression::Negate(inner) => vec![inner],
            Expression::FunctionCall { argument, .. } => vec![argument],
        };

        children.into_iter()
    }

    fn precedence(&self) -> u8 {
        match self {
            Expression::Binary { op, .. } => match op {
                BinaryOperation::Plus | BinaryOperation::Minus => 1,
                BinaryOperation::Times | BinaryOperation::Divide => 2,
            },
            Expression::Negate(_) => 3,
            Expression::Parameter(_)
            | Expression::Constant(_)
            | Expression::FunctionCall { .. } => 4,
        }
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> { parse::parse(s) }
}

/// A named symbolic variable. A model state (`S`, `I`, ...) and a model
/// parameter (`beta`, `gamma`, ...) are both just [`Parameter`]s; the model
/// decides which is which.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Parameter {
    name: SmolStr,
}

impl Parameter {
    pub fn named<S: AsRef<str>>(name: S) -> Self {
        Parameter {
            name: name.as_ref().into(),
        }
    }

    pub fn name(&self) -> &str { &self.name }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// An operation that can be applied to two arguments.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum BinaryOperation {
    Plus,
    Minus,
    Times,
    Divide,
}

// define some operator overloads to make constructing an expression easier.

impl Add for Expression {
    type Output = Expression;

    fn add(self, rhs: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(self),
            right: Box::new(rhs),
            op: BinaryOperation::Plus,
        }
    }
}

impl Sub for Expression {
    type Output = Expression;

    fn sub(self, rhs: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(self),
            right: Box::new(rhs),
            op: BinaryOperation::Minus,
        }
    }
}

impl Mul for Expression {
    type Output = Expression;

    fn mul(self, rhs: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(self),
            right: Box::new(rhs),
            op: BinaryOperation::Times,
        }
    }
}

impl Div for Expression {
    type Output = Expression;

    fn div(self, rhs: Expression) -> Expression {
        Expression::Binary {
            left: Box::new(self),
            right: Box::new(rhs),
            op: BinaryOperation::Divide,
        }
    }
}

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Self::Output { Expression::Negate(Box::new(self)) }
}

impl From<Parameter> for Expression {
    fn from(p: Parameter) -> Expression { Expression::Parameter(p) }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Expression { Expression::Constant(value) }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Expression::Parameter(p) => write!(f, "{}", p),
            Expression::Constant(value) => write!(f, "{}", value),
            Expression::Binary { left, right, op } => {
                let precedence = self.precedence();
                // The parser associates to the left, so a right-hand operand
                // at the same precedence level needs parentheses to
                // round-trip.
                write_operand(left, left.precedence() < precedence, f)?;

                let op = match op {
                    BinaryOperation::Plus => " + ",
                    BinaryOperation::Minus => " - ",
                    BinaryOperation::Times => "*",
                    BinaryOperation::Divide => "/",
                };
                write!(f, "{}", op)?;

                write_operand(right, right.precedence() <= precedence, f)?;

                Ok(())
            },
            Expression::Negate(inner) => {
                write!(f, "-")?;
                write_operand(inner, inner.precedence() < self.precedence(), f)?;
                Ok(())
            },
            Expression::FunctionCall { function, argument } => {
                write!(f, "{}({})", function, argument)
            },
        }
    }
}

fn write_operand(
    expr: &Expression,
    parenthesise: bool,
    f: &mut Formatter<'_>,
) -> fmt::Result {
    if parenthesise {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let beta = Expression::Parameter(Parameter::named("beta"));
        let s = Expression::Parameter(Parameter::named("S"));
        let i = Expression::Parameter(Parameter::named("I"));
        let n = Expression::Parameter(Parameter::named("N"));

        let inputs = vec![
            (Expression::Constant(3.0), "3"),
            (
                Expression::Negate(Box::new(Expression::Constant(5.0))),
                "-5",
            ),
            (
                beta.clone() * s.clone() * i.clone() / n.clone(),
                "beta*S*I/N",
            ),
            (
                Expression::FunctionCall {
                    function: "sqrt".into(),
                    argument: Box::new(beta.clone()),
                },
                "sqrt(beta)",
            ),
            (s.clone() - (i.clone() - n), "S - (I - N)"),
            (s - i, "S - I"),
            (
                (Expression::Constant(1.0) + Expression::Constant(2.0))
                    / Expression::Constant(3.0),
                "(1 + 2)/3",
            ),
        ];

        for (expr, should_be) in inputs {
            let got = expr.to_string();
            assert_eq!(got, should_be);
        }
    }

    #[test]
    fn collect_all_parameters() {
        let expr: Expression = "beta*S*I/N - gamma*I".parse().unwrap();

        let got: Vec<_> = expr.params().map(|p| p.name().to_string()).collect();

        assert_eq!(got, vec!["beta", "S", "I", "N", "gamma", "I"]);
        assert!(expr.depends_on(&Parameter::named("gamma")));
        assert!(!expr.depends_on(&Parameter::named("mu")));
    }

    #[test]
    fn immediate_children_only() {
        let expr: Expression = "(a + b)*c".parse().unwrap();

        let children: Vec<String> =
            expr.children().map(|c| c.to_string()).collect();

        assert_eq!(children, vec!["a + b", "c"]);
    }
}
