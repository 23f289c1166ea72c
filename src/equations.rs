use crate::{
    expr::{Expression, Parameter},
    ops::{self, Context, EvaluationError},
    parse::ParseError,
    solve::{self, Solution, SolveError},
};
use nalgebra::DVector as Vector;
use std::{
    iter::{Extend, FromIterator},
    str::FromStr,
};

/// A single equation, stored as `body = 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    pub(crate) body: Expression,
}

impl Equation {
    pub fn new(left: Expression, right: Expression) -> Self {
        Equation { body: left - right }
    }

    /// An equation stating that the expression equals zero, e.g. a steady
    /// state of one ODE right-hand side.
    pub fn equals_zero(body: Expression) -> Self { Equation { body } }

    pub fn body(&self) -> &Expression { &self.body }
}

impl FromStr for Equation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.find('=') {
            Some(index) => {
                let (left, right) = s.split_at(index);
                let right = &right[1..];
                Ok(Equation::new(left.parse()?, right.parse()?))
            },
            None => Ok(Equation { body: s.parse()? }),
        }
    }
}

/// A builder for constructing a system of equations and solving them.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SystemOfEquations {
    pub(crate) equations: Vec<Equation>,
}

impl SystemOfEquations {
    pub fn new() -> Self { SystemOfEquations::default() }

    pub fn with(mut self, equation: Equation) -> Self {
        self.push(equation);
        self
    }

    pub fn push(&mut self, equation: Equation) {
        self.equations.push(equation);
    }

    /// Solve numerically for *every* parameter mentioned by the equations,
    /// using Newton's method.
    pub fn solve<C>(&self, ctx: &C) -> Result<Solution, SolveError>
    where
        C: Context,
    {
        let unknowns = self.unknowns();
        solve::solve(&self.equations, &unknowns, ctx)
    }

    pub fn unknowns(&self) -> Vec<Parameter> {
        let mut unknowns: Vec<_> = self
            .equations
            .iter()
            .flat_map(|eq| eq.body.params())
            .cloned()
            .collect();
        unknowns.sort();
        unknowns.dedup();

        unknowns
    }

    pub fn num_unknowns(&self) -> usize { self.unknowns().len() }

    pub fn from_equations<E, S>(equations: E) -> Result<Self, ParseError>
    where
        E: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut system = SystemOfEquations::new();

        for equation in equations {
            system.push(equation.as_ref().parse()?);
        }

        Ok(system)
    }

    pub(crate) fn evaluate<F, C>(
        &self,
        lookup_parameter_value: F,
        ctx: &C,
    ) -> Result<Vector<f64>, EvaluationError>
    where
        F: Fn(&Parameter) -> Option<f64>,
        C: Context,
    {
        let mut values = Vec::new();

        for equation in &self.equations {
            values.push(ops::evaluate(
                &equation.body,
                &lookup_parameter_value,
                ctx,
            )?);
        }

        Ok(Vector::from_vec(values))
    }
}

impl Extend<Equation> for SystemOfEquations {
    fn extend<T: IntoIterator<Item = Equation>>(&mut self, iter: T) {
        self.equations.extend(iter);
    }
}

impl FromIterator<Equation> for SystemOfEquations {
    fn from_iter<T: IntoIterator<Item = Equation>>(iter: T) -> Self {
        SystemOfEquations {
            equations: Vec::from_iter(iter),
        }
    }
}

impl<'a> IntoIterator for &'a SystemOfEquations {
    type IntoIter = <&'a [Equation] as IntoIterator>::IntoIter;
    type Item = &'a Equation;

    fn into_iter(self) -> Self::IntoIter { self.equations.iter() }
}

impl IntoIterator for SystemOfEquations {
    type IntoIter = <Vec<Equation> as IntoIterator>::IntoIter;
    type Item = Equation;

    fn into_iter(self) -> Self::IntoIter { self.equations.into_iter() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equations_split_on_the_equals_sign() {
        let eq: Equation = "Lambda = mu*S".parse().unwrap();

        let left: Expression = "Lambda".parse().unwrap();
        let right: Expression = "mu*S".parse().unwrap();
        assert_eq!(eq.body, left - right);
    }

    #[test]
    fn collect_the_unknowns() {
        let system =
            SystemOfEquations::from_equations(&["Lambda - mu*S", "mu*R"])
                .unwrap();

        let got = system.unknowns();

        let should_be: Vec<_> = ["Lambda", "R", "S", "mu"]
            .iter()
            .map(Parameter::named)
            .collect();
        assert_eq!(got, should_be);
        assert_eq!(system.num_unknowns(), 4);
    }
}
