//! Equation-system solvers.
//!
//! Steady-state systems coming out of a compartmental model are solved
//! symbolically when they're linear in the unknown states, with a numeric
//! Newton's-method fallback for the nonlinear case.

use crate::{
    equations::{Equation, SystemOfEquations},
    expr::{Expression, Parameter},
    matrix::Matrix,
    ops::{self, Context, EvaluationError},
};
use nalgebra::{DMatrix as NumericMatrix, DVector as Vector};
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Debug, Clone, PartialEq)]
pub enum SolveError {
    Eval(EvaluationError),
    /// The system isn't linear in the requested unknowns, so symbolic
    /// elimination can't be applied.
    NonlinearSystem,
    /// Two equations contradict each other; the system has no solution.
    NoSolution,
    DidntConverge,
}

impl From<EvaluationError> for SolveError {
    fn from(e: EvaluationError) -> Self { SolveError::Eval(e) }
}

impl Display for SolveError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SolveError::Eval(_) => write!(f, "Evaluation failed"),
            SolveError::NonlinearSystem => {
                write!(f, "The system is nonlinear in its unknowns")
            },
            SolveError::NoSolution => write!(f, "No solution found"),
            SolveError::DidntConverge => {
                write!(f, "The solution didn't converge")
            },
        }
    }
}

impl Error for SolveError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SolveError::Eval(inner) => Some(inner),
            _ => None,
        }
    }
}

/// Symbolically solve a system that is *linear* in the chosen unknowns, by
/// Gauss-Jordan elimination over the expression field.
///
/// Every other symbol in the equations is carried through untouched, so the
/// solved values are expressions in the remaining parameters. Unknowns the
/// elimination can't pin down (no pivot in their column) are simply absent
/// from the returned map.
pub fn solve_linear<C>(
    equations: &[Equation],
    unknowns: &[Parameter],
    ctx: &C,
) -> Result<HashMap<Parameter, Expression>, SolveError>
where
    C: Context,
{
    let bodies: Vec<&Expression> =
        equations.iter().map(|eq| eq.body()).collect();

    // A[i][j] = d eq_i / d unknown_j. For a linear system none of these
    // coefficients may mention an unknown.
    let mut coefficients =
        Matrix::try_init(equations.len(), unknowns.len(), |row, column| {
            let derivative =
                ops::partial_derivative(bodies[row], &unknowns[column], ctx)?;
            Ok(ops::fold_constants(&derivative, ctx))
        })
        .map_err(SolveError::Eval)?;

    for row in coefficients.iter_rows() {
        for cell in row {
            if unknowns.iter().any(|unknown| cell.depends_on(unknown)) {
                return Err(SolveError::NonlinearSystem);
            }
        }
    }

    // b[i] = -eq_i with every unknown zeroed, so that A*y = b.
    let zeroed: HashMap<Parameter, Expression> = unknowns
        .iter()
        .map(|unknown| (unknown.clone(), Expression::Constant(0.0)))
        .collect();
    let mut constants: Vec<Expression> = bodies
        .iter()
        .map(|body| {
            ops::fold_constants(&-ops::substitute_all(body, &zeroed), ctx)
        })
        .collect();

    let pivots = eliminate(&mut coefficients, &mut constants, ctx);

    // A row reduced to `0 = b` with `b` not identically zero is contradictory.
    for (row, constant) in constants.iter().enumerate() {
        let coefficients_vanish = (0..coefficients.columns())
            .all(|column| ops::is_zero(&coefficients[(row, column)], ctx));

        if coefficients_vanish && !ops::is_zero(constant, ctx) {
            return Err(SolveError::NoSolution);
        }
    }

    Ok(pivots
        .into_iter()
        .map(|(row, column)| (unknowns[column].clone(), constants[row].clone()))
        .collect())
}

/// Gauss-Jordan elimination in place. Returns `(row, column)` pairs for each
/// pivot found.
fn eliminate<C>(
    coefficients: &mut Matrix<Expression>,
    constants: &mut Vec<Expression>,
    ctx: &C,
) -> Vec<(usize, usize)>
where
    C: Context,
{
    let rows = coefficients.rows();
    let columns = coefficients.columns();
    let mut pivots = Vec::new();
    let mut next_row = 0;

    for column in 0..columns {
        if next_row >= rows {
            break;
        }

        let pivot_row = (next_row..rows)
            .find(|&row| !ops::is_zero(&coefficients[(row, column)], ctx));
        let pivot_row = match pivot_row {
            Some(row) => row,
            None => continue,
        };

        swap_rows(coefficients, constants, next_row, pivot_row, columns);

        // normalise the pivot row
        let pivot = coefficients[(next_row, column)].clone();
        for c in 0..columns {
            let scaled = coefficients[(next_row, c)].clone() / pivot.clone();
            coefficients[(next_row, c)] = ops::fold_constants(&scaled, ctx);
        }
        constants[next_row] = ops::fold_constants(
            &(constants[next_row].clone() / pivot),
            ctx,
        );

        // clear the column everywhere else
        for row in 0..rows {
            if row == next_row {
                continue;
            }

            let factor = coefficients[(row, column)].clone();
            if ops::is_zero(&factor, ctx) {
                continue;
            }

            for c in 0..columns {
                let updated = coefficients[(row, c)].clone()
                    - factor.clone() * coefficients[(next_row, c)].clone();
                coefficients[(row, c)] = ops::fold_constants(&updated, ctx);
            }
            let updated = constants[row].clone()
                - factor * constants[next_row].clone();
            constants[row] = ops::fold_constants(&updated, ctx);
        }

        pivots.push((next_row, column));
        next_row += 1;
    }

    pivots
}

fn swap_rows(
    coefficients: &mut Matrix<Expression>,
    constants: &mut Vec<Expression>,
    a: usize,
    b: usize,
    columns: usize,
) {
    if a == b {
        return;
    }

    for column in 0..columns {
        let tmp = coefficients[(a, column)].clone();
        coefficients[(a, column)] = coefficients[(b, column)].clone();
        coefficients[(b, column)] = tmp;
    }
    constants.swap(a, b);
}

#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub known_values: HashMap<Parameter, f64>,
}

/// Solve a set of non-linear equations iteratively using Newton's method.
///
/// The iterative equation for Newton's method when applied to a set of
/// equations, `F`, is:
///
/// ```text
///  x_next = x_current - jacobian(F).inverse() * F(x_current)
/// ```
///
/// Calculating the inverse of a matrix is expensive, so we rearrange it as
///
/// ```text
/// jacobian(F) * (x_next - x_current) = -F(x_current)
/// ```
///
/// ... which is in the form `A.δx = b` and can be solved by LU decomposition.
pub(crate) fn solve<C>(
    equations: &[Equation],
    unknowns: &[Parameter],
    ctx: &C,
) -> Result<Solution, SolveError>
where
    C: Context,
{
    const MAX_ITERATIONS: usize = 50;

    let jacobian = NumericJacobian::for_equations(equations, unknowns, ctx)?;
    let system: SystemOfEquations =
        equations.iter().cloned().collect();

    let mut solution = jacobian.initial_values();

    for _ in 0..MAX_ITERATIONS {
        let x_next = {
            let evaluated_jacobian =
                jacobian.evaluate(solution.as_slice(), ctx)?;

            let lookup = jacobian.lookup_value_by_name(solution.as_slice());
            let f_of_x = system.evaluate(&lookup, ctx)?;
            step_newtons_method(evaluated_jacobian, &solution, f_of_x)?
        };

        if approx::relative_eq!(x_next, solution) {
            return Ok(Solution {
                known_values: jacobian.collate_unknowns(x_next.as_slice()),
            });
        }
        solution = x_next;
    }

    Err(SolveError::DidntConverge)
}

fn step_newtons_method(
    jacobian: NumericMatrix<f64>,
    x: &Vector<f64>,
    f_of_x: Vector<f64>,
) -> Result<Vector<f64>, SolveError> {
    let negative_f_of_x = -f_of_x;
    let delta_x = jacobian
        .lu()
        .solve(&negative_f_of_x)
        .ok_or(SolveError::NoSolution)?;

    Ok(delta_x + x)
}

/// The symbolic Jacobian of a system, evaluated numerically at each Newton
/// step.
#[derive(Debug, Clone, PartialEq)]
struct NumericJacobian<'a> {
    cells: Matrix<Expression>,
    unknowns: &'a [Parameter],
}

impl<'a> NumericJacobian<'a> {
    fn for_equations<C>(
        equations: &[Equation],
        unknowns: &'a [Parameter],
        ctx: &C,
    ) -> Result<Self, EvaluationError>
    where
        C: Context,
    {
        let bodies: Vec<Expression> =
            equations.iter().map(|eq| eq.body().clone()).collect();
        let cells = Matrix::jacobian(&bodies, unknowns, ctx)?;

        Ok(NumericJacobian { cells, unknowns })
    }

    fn evaluate<C>(
        &self,
        parameter_values: &[f64],
        ctx: &C,
    ) -> Result<NumericMatrix<f64>, EvaluationError>
    where
        C: Context,
    {
        assert_eq!(parameter_values.len(), self.unknowns.len());

        let mut values = Vec::with_capacity(
            self.cells.rows() * self.cells.columns(),
        );
        let lookup = self.lookup_value_by_name(parameter_values);

        // nalgebra's from_vec fills column-by-column
        for column in 0..self.cells.columns() {
            for row in 0..self.cells.rows() {
                values.push(ops::evaluate(
                    &self.cells[(row, column)],
                    &lookup,
                    ctx,
                )?);
            }
        }

        Ok(NumericMatrix::from_vec(
            self.cells.rows(),
            self.cells.columns(),
            values,
        ))
    }

    fn lookup_value_by_name<'p>(
        &'p self,
        parameter_values: &'p [f64],
    ) -> impl Fn(&Parameter) -> Option<f64> + 'p {
        move |parameter| {
            self.unknowns
                .iter()
                .position(|p| p == parameter)
                .map(|ix| parameter_values[ix])
        }
    }

    fn collate_unknowns(
        &self,
        parameter_values: &[f64],
    ) -> HashMap<Parameter, f64> {
        self.unknowns
            .iter()
            .cloned()
            .zip(parameter_values.iter().copied())
            .collect()
    }

    fn initial_values(&self) -> Vector<f64> {
        Vector::zeros(self.unknowns.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Builtins;

    #[test]
    fn solve_a_disease_free_balance_symbolically() {
        // 0 = Lambda - mu*S, linear in S
        let equations =
            vec!["Lambda - mu*S".parse::<Equation>().unwrap()];
        let unknowns = [Parameter::named("S")];
        let ctx = Builtins::default();

        let got = solve_linear(&equations, &unknowns, &ctx).unwrap();

        assert_eq!(got.len(), 1);
        let s = &got[&Parameter::named("S")];
        let value = ops::evaluate(
            s,
            &|p: &Parameter| match p.name() {
                "Lambda" => Some(20.0),
                "mu" => Some(0.1),
                _ => None,
            },
            &ctx,
        )
        .unwrap();
        assert!(approx::relative_eq!(value, 200.0), "S = {}", s);
    }

    #[test]
    fn two_coupled_unknowns() {
        // S + R = N and R = p*N have the solution S = N - p*N, R = p*N
        let equations = vec![
            "S + R - N".parse::<Equation>().unwrap(),
            "R - p*N".parse::<Equation>().unwrap(),
        ];
        let unknowns = [Parameter::named("S"), Parameter::named("R")];
        let ctx = Builtins::default();

        let got = solve_linear(&equations, &unknowns, &ctx).unwrap();

        let bindings = |p: &Parameter| match p.name() {
            "N" => Some(1000.0),
            "p" => Some(0.2),
            _ => None,
        };
        let s =
            ops::evaluate(&got[&Parameter::named("S")], &bindings, &ctx)
                .unwrap();
        let r =
            ops::evaluate(&got[&Parameter::named("R")], &bindings, &ctx)
                .unwrap();
        assert!(approx::relative_eq!(s, 800.0));
        assert!(approx::relative_eq!(r, 200.0));
    }

    #[test]
    fn degenerate_equations_leave_the_unknown_unsolved() {
        // 0 = 0 tells us nothing about S
        let equations = vec![Equation::equals_zero(Expression::Constant(0.0))];
        let unknowns = [Parameter::named("S")];

        let got =
            solve_linear(&equations, &unknowns, &Builtins::default()).unwrap();

        assert!(got.is_empty());
    }

    #[test]
    fn quadratic_systems_are_reported_as_nonlinear() {
        let equations = vec!["S*S - 4".parse::<Equation>().unwrap()];
        let unknowns = [Parameter::named("S")];

        let got =
            solve_linear(&equations, &unknowns, &Builtins::default());

        assert_eq!(got.unwrap_err(), SolveError::NonlinearSystem);
    }

    #[test]
    fn contradictory_equations_have_no_solution() {
        let equations = vec![
            "S - 1".parse::<Equation>().unwrap(),
            "S - 2".parse::<Equation>().unwrap(),
        ];
        let unknowns = [Parameter::named("S")];

        let got =
            solve_linear(&equations, &unknowns, &Builtins::default());

        assert_eq!(got.unwrap_err(), SolveError::NoSolution);
    }

    #[test]
    fn newtons_method_on_a_simple_system() {
        let system =
            SystemOfEquations::from_equations(&["x - 1", "y - 2", "z - 3"])
                .unwrap();
        let ctx = Builtins::default();

        let got = system.solve(&ctx).unwrap();

        assert_eq!(got.known_values.len(), 3);
        assert!(approx::relative_eq!(
            got.known_values[&Parameter::named("x")],
            1.0
        ));
        assert!(approx::relative_eq!(
            got.known_values[&Parameter::named("y")],
            2.0
        ));
        assert!(approx::relative_eq!(
            got.known_values[&Parameter::named("z")],
            3.0
        ));
    }

    #[test]
    fn newtons_method_on_a_nonlinear_system() {
        // x + y = 3 and x^2 + y = 5, picked so the jacobian is invertible at
        // the all-zeroes starting point
        let system = SystemOfEquations::from_equations(&[
            "x + y - 3",
            "x*x + y - 5",
        ])
        .unwrap();
        let ctx = Builtins::default();

        let got = system.solve(&ctx).unwrap();

        let x = got.known_values[&Parameter::named("x")];
        let y = got.known_values[&Parameter::named("y")];
        assert!(
            approx::relative_eq!(x + y, 3.0, epsilon = 1e-8),
            "x = {}, y = {}",
            x,
            y
        );
        assert!(approx::relative_eq!(x * x + y, 5.0, epsilon = 1e-8));
    }
}
