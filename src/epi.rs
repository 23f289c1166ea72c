//! Threshold quantities for compartmental models: the disease-free
//! equilibrium and the basic reproduction number, derived symbolically with
//! the next-generation-matrix method.
//!
//! The recipe is the standard one (Brauer, *Mathematical Epidemiology*,
//! chapter 6): split the flows touching the infected compartments into new
//! infections `F` and progression/removal `V`, linearise both about the
//! infected states, and read R0 off the spectrum of `F·V⁻¹` at the
//! disease-free equilibrium.

use crate::{
    equations::Equation,
    expr::{Expression, Parameter},
    matrix::{Matrix, MatrixError},
    model::{ModelError, OdeModel, Transition},
    ops::{self, Builtins, EvaluationError},
    solve::{self, SolveError},
};
use std::{
    collections::HashMap,
    error::Error,
    fmt::{self, Display, Formatter},
};

#[derive(Debug, Clone, PartialEq)]
pub enum EpiError {
    Model(ModelError),
    Matrix(MatrixError),
    Solve(SolveError),
    Eval(EvaluationError),
}

impl From<ModelError> for EpiError {
    fn from(e: ModelError) -> Self { EpiError::Model(e) }
}

impl From<MatrixError> for EpiError {
    fn from(e: MatrixError) -> Self { EpiError::Matrix(e) }
}

impl From<SolveError> for EpiError {
    fn from(e: SolveError) -> Self { EpiError::Solve(e) }
}

impl From<EvaluationError> for EpiError {
    fn from(e: EvaluationError) -> Self { EpiError::Eval(e) }
}

impl Display for EpiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EpiError::Model(inner) => Display::fmt(inner, f),
            EpiError::Matrix(inner) => Display::fmt(inner, f),
            EpiError::Solve(inner) => Display::fmt(inner, f),
            EpiError::Eval(inner) => Display::fmt(inner, f),
        }
    }
}

impl Error for EpiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EpiError::Model(inner) => Some(inner),
            EpiError::Matrix(inner) => Some(inner),
            EpiError::Solve(inner) => Some(inner),
            EpiError::Eval(inner) => Some(inner),
        }
    }
}

/// The outcome of a reproduction-number derivation.
///
/// Degenerate eigenvalue branches are filtered out along the way; when
/// exactly one candidate survives it is the R0 expression, otherwise every
/// surviving candidate is handed back for the caller to judge.
#[derive(Debug, Clone, PartialEq)]
pub enum ReproductionNumber {
    Unique(Expression),
    Candidates(Vec<Expression>),
}

impl ReproductionNumber {
    pub fn unique(&self) -> Option<&Expression> {
        match self {
            ReproductionNumber::Unique(expr) => Some(expr),
            ReproductionNumber::Candidates(_) => None,
        }
    }

    pub fn candidates(&self) -> &[Expression] {
        match self {
            ReproductionNumber::Unique(expr) => std::slice::from_ref(expr),
            ReproductionNumber::Candidates(exprs) => exprs,
        }
    }
}

impl Display for ReproductionNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ReproductionNumber::Unique(expr) => write!(f, "{}", expr),
            ReproductionNumber::Candidates(exprs) => {
                for (i, expr) in exprs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", expr)?;
                }
                Ok(())
            },
        }
    }
}

/// Split the model's flows into the secondary-infection matrix `F` and the
/// disease-progression matrix `V`, restricted to the listed disease states.
///
/// A transition counts as a *new infection* iff both its endpoints reduce to
/// a single compartment, its destination is a disease state, and its origin
/// is not. Composite or external endpoints never classify as new infections;
/// their flows end up in `V` instead.
///
/// With `differentiate` set, the Jacobians `(dF, dV)` with respect to the
/// disease states come back, square with dimension `disease_states.len()`;
/// otherwise `(F, V)` are single-column vectors of the raw rates. `V` is
/// defined by the balance `full derivative row = F row − V row`, so it picks
/// up every contribution that isn't a new infection.
pub fn disease_progression_matrices(
    model: &OdeModel,
    disease_states: &[&str],
    differentiate: bool,
) -> Result<(Matrix<Expression>, Matrix<Expression>), EpiError> {
    let indices = model.state_index(disease_states)?;
    let disease_params: Vec<Parameter> = indices
        .iter()
        .map(|&index| model.states()[index].clone())
        .collect();
    let ctx = Builtins::default();

    let infection_edges: Vec<Transition> = model
        .transitions()
        .iter()
        .filter(|transition| is_new_infection(transition, disease_states))
        .cloned()
        .collect();

    let infection_only = model.reduced(infection_edges);
    let infection_ode = infection_only.ode();
    let full_ode = model.ode();

    let f_rows: Vec<Expression> = indices
        .iter()
        .map(|&index| infection_ode[index].clone())
        .collect();
    let v_rows: Vec<Expression> = indices
        .iter()
        .zip(&f_rows)
        .map(|(&index, f_row)| {
            ops::fold_constants(
                &(f_row.clone() - full_ode[index].clone()),
                &ctx,
            )
        })
        .collect();

    if differentiate {
        let df = Matrix::jacobian(&f_rows, &disease_params, &ctx)
            .map_err(EpiError::Eval)?;
        let dv = Matrix::jacobian(&v_rows, &disease_params, &ctx)
            .map_err(EpiError::Eval)?;
        Ok((df, dv))
    } else {
        Ok((
            Matrix::column_vector(f_rows),
            Matrix::column_vector(v_rows),
        ))
    }
}

fn is_new_infection(transition: &Transition, disease_states: &[&str]) -> bool {
    match (transition.single_origin(), transition.single_destination()) {
        (Some(origin), Some(destination)) => {
            !disease_states.contains(&origin)
                && disease_states.contains(&destination)
        },
        _ => false,
    }
}

/// The non-zero eigenvalues of the next-generation matrix `F·V⁻¹`.
///
/// Pass `disease_states` to have the matrices differentiated here first;
/// leave it `None` when `f` and `v` are already Jacobians. Fails with a
/// singularity error when `V` can't be inverted, since a progression matrix
/// without full rank is a modelling error.
pub fn r0_from_matrices(
    f: &Matrix<Expression>,
    v: &Matrix<Expression>,
    disease_states: Option<&[Parameter]>,
) -> Result<Vec<Expression>, EpiError> {
    let ctx = Builtins::default();

    let (df, dv) = match disease_states {
        None => (f.clone(), v.clone()),
        Some(states) => {
            let df = Matrix::jacobian(&column_cells(f), states, &ctx)
                .map_err(EpiError::Eval)?;
            let dv = Matrix::jacobian(&column_cells(v), states, &ctx)
                .map_err(EpiError::Eval)?;
            (df, dv)
        },
    };

    // F and V must agree in shape before the product can be formed
    if df.rows() != dv.rows() || df.columns() != dv.columns() {
        return Err(MatrixError::NonSquare {
            rows: df.rows(),
            columns: df.columns(),
        }
        .into());
    }

    let next_generation = &df * &dv.inverted(&ctx)?;
    let eigenvalues = next_generation.eigenvalues(&ctx)?;

    Ok(eigenvalues
        .into_iter()
        .filter(|eigenvalue| !ops::is_zero(eigenvalue, &ctx))
        .collect())
}

fn column_cells(matrix: &Matrix<Expression>) -> Vec<Expression> {
    matrix
        .iter_rows()
        .flat_map(|row| row.iter().cloned())
        .collect()
}

/// The disease-free equilibrium: every disease state pinned to zero, and the
/// remaining states solved from what's left of the ODE system.
///
/// States the solver can't determine (their balance reduced to `0 = 0`)
/// default to zero, so the returned map always has exactly one entry per
/// model state.
///
/// The zero-disease system is solved symbolically when it's linear in the
/// remaining states. When it isn't, and every parameter carries a bound
/// numeric value, a Newton's-method fallback finds a numeric equilibrium;
/// otherwise the nonlinearity surfaces as a [`SolveError`].
pub fn disease_free_equilibrium(
    model: &OdeModel,
    disease_states: &[&str],
) -> Result<HashMap<Parameter, Expression>, EpiError> {
    let indices = model.state_index(disease_states)?;
    let ctx = Builtins::default();

    let zeroed: HashMap<Parameter, Expression> = indices
        .iter()
        .map(|&index| {
            (model.states()[index].clone(), Expression::Constant(0.0))
        })
        .collect();

    let equations: Vec<Equation> = model
        .ode()
        .iter()
        .map(|derivative| {
            let substituted = ops::substitute_all(derivative, &zeroed);
            Equation::equals_zero(ops::fold_constants(&substituted, &ctx))
        })
        .collect();

    let free_states: Vec<Parameter> = model
        .states()
        .iter()
        .filter(|state| !zeroed.contains_key(state))
        .cloned()
        .collect();

    let solved = match solve::solve_linear(&equations, &free_states, &ctx) {
        Ok(solution) => solution,
        Err(SolveError::NonlinearSystem) => {
            numeric_equilibrium(model, &equations, &free_states)?
        },
        Err(other) => return Err(other.into()),
    };

    Ok(model
        .states()
        .iter()
        .map(|state| {
            let value = if zeroed.contains_key(state) {
                Expression::Constant(0.0)
            } else {
                solved
                    .get(state)
                    .cloned()
                    .unwrap_or(Expression::Constant(0.0))
            };
            (state.clone(), value)
        })
        .collect())
}

/// Newton's-method fallback for a zero-disease system that's nonlinear in
/// the remaining states. Only possible once every parameter has a number.
fn numeric_equilibrium(
    model: &OdeModel,
    equations: &[Equation],
    free_states: &[Parameter],
) -> Result<HashMap<Parameter, Expression>, EpiError> {
    let ctx = Builtins::default();
    let bound: HashMap<Parameter, Expression> = model
        .parameter_values()
        .iter()
        .map(|(param, &value)| (param.clone(), Expression::Constant(value)))
        .collect();

    // rows that folded away to 0 = 0 carry no information, and would leave
    // Newton's method with a non-square jacobian
    let numeric_equations: Vec<Equation> = equations
        .iter()
        .map(|equation| {
            let substituted = ops::substitute_all(equation.body(), &bound);
            Equation::equals_zero(ops::fold_constants(&substituted, &ctx))
        })
        .filter(|equation| !ops::is_zero(equation.body(), &ctx))
        .collect();

    // any symbol left over means an unbound parameter, so Newton can't run
    let unbound = numeric_equations.iter().any(|equation| {
        equation.body().params().any(|p| !free_states.contains(p))
    });
    if unbound {
        return Err(SolveError::NonlinearSystem.into());
    }

    // states no remaining equation mentions stay out of the solve and pick
    // up the zero default later
    let active: Vec<Parameter> = free_states
        .iter()
        .filter(|state| {
            numeric_equations
                .iter()
                .any(|equation| equation.body().depends_on(state))
        })
        .cloned()
        .collect();

    // a leftover row that is nonzero yet mentions no unknown can never be
    // satisfied, and any other count mismatch would hand Newton's method a
    // non-square jacobian
    let unsatisfiable = numeric_equations.iter().any(|equation| {
        !active
            .iter()
            .any(|state| equation.body().depends_on(state))
    });
    if unsatisfiable || numeric_equations.len() != active.len() {
        return Err(SolveError::NoSolution.into());
    }

    let solution = solve::solve(&numeric_equations, &active, &ctx)?;

    Ok(solution
        .known_values
        .into_iter()
        .map(|(param, value)| (param, Expression::Constant(value)))
        .collect())
}

/// The basic reproduction number, symbolic where parameter values aren't
/// available.
///
/// Candidate expressions whose *immediate* sub-expressions contain the
/// literal constant −1 are discarded as degenerate eigenvalue branches.
/// That check inspects syntax, not value, so it only catches `-1*x` style
/// artifacts of the solve.
pub fn basic_reproduction_number(
    model: &OdeModel,
    disease_states: &[&str],
) -> Result<ReproductionNumber, EpiError> {
    let ctx = Builtins::default();

    let (df, dv) = disease_progression_matrices(model, disease_states, true)?;
    let eigenvalues = r0_from_matrices(&df, &dv, None)?;

    let equilibrium = disease_free_equilibrium(model, disease_states)?;
    let bound: HashMap<Parameter, Expression> = model
        .parameter_values()
        .iter()
        .map(|(param, &value)| (param.clone(), Expression::Constant(value)))
        .collect();

    let mut candidates: Vec<Expression> = eigenvalues
        .iter()
        .map(|eigenvalue| {
            let at_equilibrium = ops::substitute_all(eigenvalue, &equilibrium);
            let with_values = ops::substitute_all(&at_equilibrium, &bound);
            ops::fold_constants(&with_values, &ctx)
        })
        .filter(|candidate| !has_negative_unit_argument(candidate))
        .collect();

    if candidates.len() == 1 {
        Ok(ReproductionNumber::Unique(candidates.remove(0)))
    } else {
        Ok(ReproductionNumber::Candidates(candidates))
    }
}

/// Does any *immediate* sub-expression equal the literal constant −1?
fn has_negative_unit_argument(expr: &Expression) -> bool {
    expr.children().any(|child| match child {
        Expression::Constant(value) => *value == -1.0,
        Expression::Negate(inner) => **inner == Expression::Constant(1.0),
        _ => false,
    })
}
