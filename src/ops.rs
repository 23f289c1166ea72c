//! [`Expression`] operations.

use crate::expr::{BinaryOperation, Expression, Parameter};
use euclid::approxeq::ApproxEq;
use smol_str::SmolStr;
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

/// Contextual information used when evaluating an [`Expression`].
pub trait Context {
    fn evaluate_function(
        &self,
        name: &str,
        argument: f64,
    ) -> Result<f64, EvaluationError>;

    /// For some [`Parameter`], `x`, and function, `f`, get `f'(x)`.
    fn differentiate_function(
        &self,
        name: &str,
        param: &Parameter,
    ) -> Result<Expression, EvaluationError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationError {
    UnknownFunction { name: SmolStr },
    UnknownParameter { name: SmolStr },
    UnableToDifferentiate { name: SmolStr },
}

impl Display for EvaluationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EvaluationError::UnknownFunction { name } => {
                write!(f, "Unknown function, \"{}\"", name)
            },
            EvaluationError::UnknownParameter { name } => {
                write!(f, "No value bound for \"{}\"", name)
            },
            EvaluationError::UnableToDifferentiate { name } => {
                write!(f, "Unable to differentiate \"{}\"", name)
            },
        }
    }
}

impl Error for EvaluationError {}

/// The set of builtin functions.
#[derive(Debug, Default)]
pub struct Builtins;

impl Context for Builtins {
    fn evaluate_function(
        &self,
        name: &str,
        argument: f64,
    ) -> Result<f64, EvaluationError> {
        match name {
            "sin" => Ok(argument.sin()),
            "cos" => Ok(argument.cos()),
            "tan" => Ok(argument.tan()),
            "exp" => Ok(argument.exp()),
            "ln" => Ok(argument.ln()),
            "sqrt" => Ok(argument.sqrt()),
            _ => Err(EvaluationError::UnknownFunction { name: name.into() }),
        }
    }

    fn differentiate_function(
        &self,
        name: &str,
        param: &Parameter,
    ) -> Result<Expression, EvaluationError> {
        let x = Expression::Parameter(param.clone());

        match name {
            "sin" => Ok(Expression::FunctionCall {
                function: "cos".into(),
                argument: Box::new(x),
            }),
            "cos" => Ok(-Expression::FunctionCall {
                function: "sin".into(),
                argument: Box::new(x),
            }),
            "exp" => Ok(Expression::FunctionCall {
                function: "exp".into(),
                argument: Box::new(x),
            }),
            "ln" => Ok(Expression::Constant(1.0) / x),
            "sqrt" => {
                let sqrt_x = Expression::FunctionCall {
                    function: "sqrt".into(),
                    argument: Box::new(x),
                };
                Ok(Expression::Constant(0.5) / sqrt_x)
            },
            _ => Err(EvaluationError::UnableToDifferentiate {
                name: name.into(),
            }),
        }
    }
}

/// Simplify an expression by evaluating all constant operations.
pub fn fold_constants<C>(expr: &Expression, ctx: &C) -> Expression
where
    C: Context,
{
    match expr {
        Expression::Binary { left, right, op } => {
            fold_binary_op(left, right, *op, ctx)
        },
        Expression::Negate(expr) => match fold_constants(expr, ctx) {
            Expression::Constant(value) => Expression::Constant(-value),
            // double negative
            Expression::Negate(inner) => *inner,
            other => Expression::Negate(Box::new(other)),
        },
        Expression::FunctionCall { function, argument } => {
            let argument = fold_constants(argument, ctx);

            if let Expression::Constant(argument) = argument {
                if let Ok(result) = ctx.evaluate_function(function, argument) {
                    return Expression::Constant(result);
                }
            }

            Expression::FunctionCall {
                function: function.clone(),
                argument: Box::new(argument),
            }
        },
        _ => expr.clone(),
    }
}

fn fold_binary_op<C>(
    left: &Expression,
    right: &Expression,
    op: BinaryOperation,
    ctx: &C,
) -> Expression
where
    C: Context,
{
    let left = fold_constants(left, ctx);
    let right = fold_constants(right, ctx);

    // If our operands contain constants, we can use arithmetic's identity laws
    // to simplify things
    match (left, right, op) {
        (left, right, BinaryOperation::Plus) if left == right => {
            fold_constants(&(Expression::Constant(2.0) * right), ctx)
        },
        (left, right, BinaryOperation::Minus) if left == right => {
            Expression::Constant(0.0)
        },
        (left, right, BinaryOperation::Divide) if left == right => {
            Expression::Constant(1.0)
        },

        // the signs cancel
        (
            Expression::Negate(left),
            Expression::Negate(right),
            op @ BinaryOperation::Times,
        )
        | (
            Expression::Negate(left),
            Expression::Negate(right),
            op @ BinaryOperation::Divide,
        ) => fold_binary_op(&*left, &*right, op, ctx),

        // x + 0 = x
        (Expression::Constant(l), right, BinaryOperation::Plus)
            if l.approx_eq(&0.0) =>
        {
            right
        },
        (left, Expression::Constant(r), BinaryOperation::Plus)
            if r.approx_eq(&0.0) =>
        {
            left
        },

        // 0 * x = 0
        (Expression::Constant(l), _, BinaryOperation::Times)
            if l.approx_eq(&0.0) =>
        {
            Expression::Constant(0.0)
        },
        (_, Expression::Constant(r), BinaryOperation::Times)
            if r.approx_eq(&0.0) =>
        {
            Expression::Constant(0.0)
        },

        // 1 * x = x
        (Expression::Constant(l), right, BinaryOperation::Times)
            if l.approx_eq(&1.0) =>
        {
            right
        },
        (left, Expression::Constant(r), BinaryOperation::Times)
            if r.approx_eq(&1.0) =>
        {
            left
        },

        // 0 / x = 0
        (Expression::Constant(l), _, BinaryOperation::Divide)
            if l.approx_eq(&0.0) =>
        {
            Expression::Constant(0.0)
        },

        // x / 1 = x
        (left, Expression::Constant(r), BinaryOperation::Divide)
            if r.approx_eq(&1.0) =>
        {
            left
        },

        // 0 - x = -x
        (Expression::Constant(l), right, BinaryOperation::Minus)
            if l.approx_eq(&0.0) =>
        {
            fold_constants(&-right, ctx)
        },

        // x - 0 = x
        (left, Expression::Constant(r), BinaryOperation::Minus)
            if r.approx_eq(&0.0) =>
        {
            left
        },

        // constant * (constant * x), in either association
        (
            Expression::Constant(constant_a),
            Expression::Binary {
                left,
                right,
                op: BinaryOperation::Times,
            },
            BinaryOperation::Times,
        ) if left.is_constant() || right.is_constant() => {
            let (constant_b, expr) = match (&*left, &*right) {
                (Expression::Constant(left), right) => (left, right),
                (left, Expression::Constant(right)) => (right, left),
                _ => unreachable!(),
            };
            Expression::Constant(constant_a * constant_b)
                * Expression::clone(expr)
        },
        (
            Expression::Binary {
                left,
                right,
                op: BinaryOperation::Times,
            },
            Expression::Constant(constant_a),
            BinaryOperation::Times,
        ) if left.is_constant() || right.is_constant() => {
            let (constant_b, expr) = match (&*left, &*right) {
                (Expression::Constant(left), right) => (left, right),
                (left, Expression::Constant(right)) => (right, left),
                _ => unreachable!(),
            };
            Expression::Constant(constant_a * constant_b)
                * Expression::clone(expr)
        },

        // Evaluate in-place
        (Expression::Constant(l), Expression::Constant(r), op) => {
            let value = match op {
                BinaryOperation::Plus => l + r,
                BinaryOperation::Minus => l - r,
                BinaryOperation::Times => l * r,
                BinaryOperation::Divide => l / r,
            };

            Expression::Constant(value)
        },

        // Oh well, we tried
        (left, right, op) => Expression::Binary {
            left: Box::new(left),
            right: Box::new(right),
            op,
        },
    }
}

/// Does the expression fold down to the constant zero?
pub fn is_zero<C>(expr: &Expression, ctx: &C) -> bool
where
    C: Context,
{
    match fold_constants(expr, ctx) {
        Expression::Constant(value) => value.approx_eq(&0.0),
        _ => false,
    }
}

/// Replace all references to a [`Parameter`] with an [`Expression`].
pub fn substitute(
    expression: &Expression,
    param: &Parameter,
    value: &Expression,
) -> Expression {
    match expression {
        Expression::Parameter(p) => {
            if p == param {
                value.clone()
            } else {
                Expression::Parameter(p.clone())
            }
        },
        Expression::Constant(value) => Expression::Constant(*value),
        Expression::Binary { left, right, op } => {
            let left = substitute(left, param, value);
            let right = substitute(right, param, value);
            Expression::Binary {
                left: Box::new(left),
                right: Box::new(right),
                op: *op,
            }
        },
        Expression::Negate(inner) => -substitute(inner, param, value),
        Expression::FunctionCall { function, argument } => {
            Expression::FunctionCall {
                function: function.clone(),
                argument: Box::new(substitute(argument, param, value)),
            }
        },
    }
}

/// Apply a whole set of substitutions at once. Replacement values are never
/// themselves re-substituted.
pub fn substitute_all(
    expression: &Expression,
    substitutions: &HashMap<Parameter, Expression>,
) -> Expression {
    match expression {
        Expression::Parameter(p) => match substitutions.get(p) {
            Some(value) => value.clone(),
            None => Expression::Parameter(p.clone()),
        },
        Expression::Constant(value) => Expression::Constant(*value),
        Expression::Binary { left, right, op } => Expression::Binary {
            left: Box::new(substitute_all(left, substitutions)),
            right: Box::new(substitute_all(right, substitutions)),
            op: *op,
        },
        Expression::Negate(inner) => -substitute_all(inner, substitutions),
        Expression::FunctionCall { function, argument } => {
            Expression::FunctionCall {
                function: function.clone(),
                argument: Box::new(substitute_all(argument, substitutions)),
            }
        },
    }
}

/// Calculate an [`Expression`]'s partial derivative with respect to a
/// particular [`Parameter`].
pub fn partial_derivative<C>(
    expr: &Expression,
    param: &Parameter,
    ctx: &C,
) -> Result<Expression, EvaluationError>
where
    C: Context,
{
    let got = match expr {
        Expression::Parameter(p) => {
            if p == param {
                Expression::Constant(1.0)
            } else {
                Expression::Constant(0.0)
            }
        },
        Expression::Constant(_) => Expression::Constant(0.0),
        Expression::Binary {
            left,
            right,
            op: BinaryOperation::Plus,
        } => {
            partial_derivative(left, param, ctx)?
                + partial_derivative(right, param, ctx)?
        },
        Expression::Binary {
            left,
            right,
            op: BinaryOperation::Minus,
        } => {
            partial_derivative(left, param, ctx)?
                - partial_derivative(right, param, ctx)?
        },
        Expression::Binary {
            left,
            right,
            op: BinaryOperation::Times,
        } => {
            // The product rule
            let d_left = partial_derivative(left, param, ctx)?;
            let d_right = partial_derivative(right, param, ctx)?;
            let left = Expression::clone(left);
            let right = Expression::clone(right);

            d_left * right + d_right * left
        },
        Expression::Binary {
            left,
            right,
            op: BinaryOperation::Divide,
        } => {
            // The quotient rule
            let d_left = partial_derivative(left, param, ctx)?;
            let d_right = partial_derivative(right, param, ctx)?;
            let right = Expression::clone(right);
            let left = Expression::clone(left);

            (d_left * right.clone() - left * d_right) / (right.clone() * right)
        },

        Expression::Negate(inner) => -partial_derivative(inner, param, ctx)?,
        Expression::FunctionCall { function, argument } => {
            // implement the chain rule: (f o g)' = (f' o g) * g'
            let g = Parameter::named("__temp__");
            let f_dash_of_g = ctx.differentiate_function(function, &g)?;
            let g_dash = partial_derivative(argument, param, ctx)?;

            substitute(&f_dash_of_g, &g, argument) * g_dash
        },
    };

    Ok(got)
}

/// Evaluate an expression down to a number, looking parameter values up with
/// the provided closure.
pub fn evaluate<F, C>(
    expr: &Expression,
    lookup_parameter_value: &F,
    ctx: &C,
) -> Result<f64, EvaluationError>
where
    F: Fn(&Parameter) -> Option<f64>,
    C: Context,
{
    match expr {
        Expression::Parameter(p) => lookup_parameter_value(p).ok_or_else(|| {
            EvaluationError::UnknownParameter {
                name: p.name().into(),
            }
        }),
        Expression::Constant(value) => Ok(*value),
        Expression::Binary { left, right, op } => {
            let left = evaluate(left, lookup_parameter_value, ctx)?;
            let right = evaluate(right, lookup_parameter_value, ctx)?;

            Ok(match op {
                BinaryOperation::Plus => left + right,
                BinaryOperation::Minus => left - right,
                BinaryOperation::Times => left * right,
                BinaryOperation::Divide => left / right,
            })
        },
        Expression::Negate(inner) => {
            Ok(-evaluate(inner, lookup_parameter_value, ctx)?)
        },
        Expression::FunctionCall { function, argument } => {
            let argument = evaluate(argument, lookup_parameter_value, ctx)?;
            ctx.evaluate_function(function, argument)
        },
    }
}
