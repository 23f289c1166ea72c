//! A small symbolic matrix, containing just the operations the
//! next-generation-matrix recipe needs.

use crate::{
    expr::{Expression, Parameter},
    ops::{self, Context, EvaluationError},
};
use std::{
    error::Error,
    fmt::{self, Debug, Display, Formatter},
    ops::{Index, IndexMut, Mul},
};

/// A dense MxN matrix laid out row-major in memory.
#[derive(Clone, PartialEq)]
pub struct Matrix<T> {
    cells: Box<[T]>,
    rows: usize,
    columns: usize,
}

impl<T> Matrix<T> {
    /// Create a new [`Matrix`] by invoking some `fn(row, column) -> T`
    /// function for each cell.
    pub fn init<F>(rows: usize, columns: usize, mut get_cell: F) -> Self
    where
        F: FnMut(usize, usize) -> T,
    {
        use std::convert::Infallible;

        Matrix::try_init::<_, Infallible>(rows, columns, |row, column| {
            Ok(get_cell(row, column))
        })
        .expect("The error type can never be constructed")
    }

    /// A version of [`Matrix::init()`] which lets you initialize a matrix
    /// using a function which may fail.
    pub fn try_init<F, E>(
        rows: usize,
        columns: usize,
        mut get_cell: F,
    ) -> Result<Self, E>
    where
        F: FnMut(usize, usize) -> Result<T, E>,
    {
        let mut cells = Vec::with_capacity(rows * columns);

        for row in 0..rows {
            for column in 0..columns {
                cells.push(get_cell(row, column)?);
            }
        }

        Ok(Matrix {
            cells: cells.into_boxed_slice(),
            rows,
            columns,
        })
    }

    /// A single-column matrix from a list of cells.
    pub fn column_vector(cells: Vec<T>) -> Self {
        let rows = cells.len();

        Matrix {
            cells: cells.into_boxed_slice(),
            rows,
            columns: 1,
        }
    }

    pub fn rows(&self) -> usize { self.rows }

    pub fn columns(&self) -> usize { self.columns }

    pub fn is_square(&self) -> bool { self.rows == self.columns }

    pub fn get(&self, row: usize, column: usize) -> Option<&T> {
        if row < self.rows && column < self.columns {
            self.cells.get(row * self.columns + column)
        } else {
            None
        }
    }

    pub fn get_mut(&mut self, row: usize, column: usize) -> Option<&mut T> {
        if row < self.rows && column < self.columns {
            self.cells.get_mut(row * self.columns + column)
        } else {
            None
        }
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.cells.chunks_exact(self.columns)
    }

    /// The matrix you get by deleting one row and one column, used when
    /// expanding determinants.
    fn minor(&self, deleted_row: usize, deleted_column: usize) -> Self
    where
        T: Clone,
    {
        Matrix::init(self.rows - 1, self.columns - 1, |row, column| {
            let row = if row < deleted_row { row } else { row + 1 };
            let column = if column < deleted_column {
                column
            } else {
                column + 1
            };
            self[(row, column)].clone()
        })
    }
}

impl<T: Debug> Debug for Matrix<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter_rows()).finish()
    }
}

impl<T> Index<(usize, usize)> for Matrix<T> {
    type Output = T;

    fn index(&self, (row, column): (usize, usize)) -> &Self::Output {
        self.get(row, column).expect("Index out of bounds")
    }
}

impl<T> IndexMut<(usize, usize)> for Matrix<T> {
    fn index_mut(&mut self, (row, column): (usize, usize)) -> &mut Self::Output {
        self.get_mut(row, column).expect("Index out of bounds")
    }
}

impl<T> From<Vec<Vec<T>>> for Matrix<T> {
    fn from(rows: Vec<Vec<T>>) -> Self {
        let row_count = rows.len();
        let columns = rows.first().map(|row| row.len()).unwrap_or(0);

        let mut cells = Vec::with_capacity(row_count * columns);
        for row in rows {
            assert_eq!(row.len(), columns, "All rows must be the same length");
            cells.extend(row);
        }

        Matrix {
            cells: cells.into_boxed_slice(),
            rows: row_count,
            columns,
        }
    }
}

impl Mul for &'_ Matrix<Expression> {
    type Output = Matrix<Expression>;

    fn mul(self, other: &Matrix<Expression>) -> Matrix<Expression> {
        assert_eq!(self.columns, other.rows);

        Matrix::init(self.rows, other.columns, |row, column| {
            let mut sum = Expression::Constant(0.0);

            for i in 0..self.columns {
                sum = sum
                    + self[(row, i)].clone() * other[(i, column)].clone();
            }

            ops::fold_constants(&sum, &ops::Builtins::default())
        })
    }
}

/// Errors from the symbolic matrix operations.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixError {
    /// The operation needs at least one row and column.
    Empty,
    NonSquare { rows: usize, columns: usize },
    /// The determinant folded to zero, so no inverse exists.
    Singular,
    /// No closed-form eigenvalues for matrices of this order.
    UnsupportedEigenOrder(usize),
    Eval(EvaluationError),
}

impl From<EvaluationError> for MatrixError {
    fn from(e: EvaluationError) -> Self { MatrixError::Eval(e) }
}

impl Display for MatrixError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            MatrixError::Empty => write!(f, "The matrix has no cells"),
            MatrixError::NonSquare { rows, columns } => {
                write!(f, "Expected a square matrix, found {}x{}", rows, columns)
            },
            MatrixError::Singular => {
                write!(f, "The matrix is singular and can't be inverted")
            },
            MatrixError::UnsupportedEigenOrder(order) => write!(
                f,
                "No closed-form eigenvalues for a {0}x{0} matrix",
                order
            ),
            MatrixError::Eval(_) => write!(f, "Evaluation failed"),
        }
    }
}

impl Error for MatrixError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            MatrixError::Eval(inner) => Some(inner),
            _ => None,
        }
    }
}

impl Matrix<Expression> {
    /// The matrix of partial derivatives, `J[i][j] = d exprs[i] / d wrt[j]`.
    pub fn jacobian<C>(
        exprs: &[Expression],
        wrt: &[Parameter],
        ctx: &C,
    ) -> Result<Self, EvaluationError>
    where
        C: Context,
    {
        Matrix::try_init(exprs.len(), wrt.len(), |row, column| {
            let expr = &exprs[row];
            let param = &wrt[column];

            if expr.depends_on(param) {
                ops::partial_derivative(expr, param, ctx)
                    .map(|derivative| ops::fold_constants(&derivative, ctx))
            } else {
                Ok(Expression::Constant(0.0))
            }
        })
    }

    /// The symbolic determinant, by Laplace expansion along the first row.
    pub fn determinant<C>(&self, ctx: &C) -> Result<Expression, MatrixError>
    where
        C: Context,
    {
        if !self.is_square() {
            return Err(MatrixError::NonSquare {
                rows: self.rows,
                columns: self.columns,
            });
        }
        if self.rows == 0 {
            return Err(MatrixError::Empty);
        }

        if self.rows == 1 {
            return Ok(self[(0, 0)].clone());
        }

        let mut determinant = Expression::Constant(0.0);

        for column in 0..self.columns {
            let cofactor =
                self[(0, column)].clone() * self.minor(0, column).determinant(ctx)?;

            determinant = if column % 2 == 0 {
                determinant + cofactor
            } else {
                determinant - cofactor
            };
        }

        Ok(ops::fold_constants(&determinant, ctx))
    }

    /// The symbolic inverse, computed as the adjugate over the determinant.
    ///
    /// Fails with [`MatrixError::Singular`] when the determinant folds to
    /// zero. A symbolic determinant that isn't *identically* zero is assumed
    /// to be generically invertible.
    pub fn inverted<C>(&self, ctx: &C) -> Result<Self, MatrixError>
    where
        C: Context,
    {
        let determinant = self.determinant(ctx)?;

        if ops::is_zero(&determinant, ctx) {
            return Err(MatrixError::Singular);
        }

        Matrix::try_init(self.rows, self.columns, |row, column| {
            // adjugate: transposed cofactors
            let minor_determinant =
                self.minor_determinant(column, row, ctx)?;
            let cofactor = if (row + column) % 2 == 0 {
                minor_determinant
            } else {
                -minor_determinant
            };

            Ok(ops::fold_constants(&(cofactor / determinant.clone()), ctx))
        })
    }

    fn minor_determinant<C>(
        &self,
        row: usize,
        column: usize,
        ctx: &C,
    ) -> Result<Expression, MatrixError>
    where
        C: Context,
    {
        if self.rows == 1 {
            // the 1x1 minor is the empty matrix, whose determinant is 1
            Ok(Expression::Constant(1.0))
        } else {
            self.minor(row, column).determinant(ctx)
        }
    }

    /// The *distinct* symbolic eigenvalues.
    ///
    /// Closed forms are only emitted for 1x1 and 2x2 matrices (the quadratic
    /// formula); anything larger is a
    /// [`MatrixError::UnsupportedEigenOrder`].
    pub fn eigenvalues<C>(&self, ctx: &C) -> Result<Vec<Expression>, MatrixError>
    where
        C: Context,
    {
        if !self.is_square() {
            return Err(MatrixError::NonSquare {
                rows: self.rows,
                columns: self.columns,
            });
        }

        let eigenvalues = match self.rows {
            0 => return Err(MatrixError::Empty),
            1 => vec![self[(0, 0)].clone()],
            2 => {
                let trace = self[(0, 0)].clone() + self[(1, 1)].clone();
                let determinant = self.determinant(ctx)?;

                if ops::is_zero(&determinant, ctx) {
                    // the characteristic polynomial factors as λ(λ - trace)
                    vec![trace, Expression::Constant(0.0)]
                } else {
                    return self.eigenvalues_via_quadratic(trace, determinant, ctx);
                }
            },
            order => return Err(MatrixError::UnsupportedEigenOrder(order)),
        };

        Ok(dedupe(eigenvalues, ctx))
    }

    fn eigenvalues_via_quadratic<C>(
        &self,
        trace: Expression,
        determinant: Expression,
        ctx: &C,
    ) -> Result<Vec<Expression>, MatrixError>
    where
        C: Context,
    {
        let discriminant = trace.clone() * trace.clone()
            - Expression::Constant(4.0) * determinant;
        let root = Expression::FunctionCall {
            function: "sqrt".into(),
            argument: Box::new(ops::fold_constants(&discriminant, ctx)),
        };

        let two = Expression::Constant(2.0);
        let eigenvalues = vec![
            (trace.clone() + root.clone()) / two.clone(),
            (trace - root) / two,
        ];

        Ok(dedupe(eigenvalues, ctx))
    }
}

fn dedupe<C>(eigenvalues: Vec<Expression>, ctx: &C) -> Vec<Expression>
where
    C: Context,
{
    let mut distinct: Vec<Expression> = Vec::new();

    for eigenvalue in eigenvalues {
        let folded = ops::fold_constants(&eigenvalue, ctx);
        if distinct.iter().all(|seen| *seen != folded) {
            distinct.push(folded);
        }
    }

    distinct
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::Builtins;

    fn expressions(rows: Vec<Vec<&str>>) -> Matrix<Expression> {
        Matrix::from(
            rows.into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|cell| cell.parse().unwrap())
                        .collect::<Vec<Expression>>()
                })
                .collect::<Vec<_>>(),
        )
    }

    fn eval(expr: &Expression, bindings: &[(&str, f64)]) -> f64 {
        let lookup = |p: &Parameter| {
            bindings
                .iter()
                .find(|(name, _)| *name == p.name())
                .map(|(_, value)| *value)
        };
        ops::evaluate(expr, &lookup, &Builtins::default()).unwrap()
    }

    #[test]
    fn matrix_representation() {
        let matrix = Matrix::init(2, 3, |row, column| row + column);
        let should_be = "[[0, 1, 2], [1, 2, 3]]";

        let got = format!("{:?}", matrix);

        assert_eq!(got, should_be);
    }

    #[test]
    fn two_by_two_determinant() {
        let matrix = expressions(vec![vec!["a", "b"], vec!["c", "d"]]);

        let got = matrix.determinant(&Builtins::default()).unwrap();

        let value = eval(
            &got,
            &[("a", 1.0), ("b", 2.0), ("c", 3.0), ("d", 4.0)],
        );
        assert!(approx::relative_eq!(value, 1.0 * 4.0 - 2.0 * 3.0));
    }

    #[test]
    fn invert_a_symbolic_matrix() {
        let matrix = expressions(vec![vec!["gamma", "0"], vec!["-gamma", "mu"]]);
        let ctx = Builtins::default();

        let inverse = matrix.inverted(&ctx).unwrap();
        let product = &matrix * &inverse;

        // the product should evaluate to the identity for any parameter values
        let bindings = [("gamma", 0.25), ("mu", 0.1)];
        for row in 0..2 {
            for column in 0..2 {
                let got = eval(&product[(row, column)], &bindings);
                let should_be = if row == column { 1.0 } else { 0.0 };
                assert!(
                    approx::relative_eq!(got, should_be, epsilon = 1e-12),
                    "cell ({}, {}) was {}",
                    row,
                    column,
                    got
                );
            }
        }
    }

    #[test]
    fn inverting_a_singular_matrix_fails() {
        let matrix = expressions(vec![vec!["a", "a"], vec!["a", "a"]]);

        let got = matrix.inverted(&Builtins::default()).unwrap_err();

        assert_eq!(got, MatrixError::Singular);
    }

    #[test]
    fn inverting_the_empty_matrix_fails() {
        let matrix: Matrix<Expression> = Matrix::init(0, 0, |_, _| unreachable!());

        let got = matrix.inverted(&Builtins::default()).unwrap_err();

        assert_eq!(got, MatrixError::Empty);
    }

    #[test]
    fn one_by_one_eigenvalue_is_the_cell_itself() {
        let matrix = expressions(vec![vec!["beta/gamma"]]);

        let got = matrix.eigenvalues(&Builtins::default()).unwrap();

        assert_eq!(got.len(), 1);
        let value = eval(&got[0], &[("beta", 0.6), ("gamma", 0.2)]);
        assert!(approx::relative_eq!(value, 3.0));
    }

    #[test]
    fn two_by_two_eigenvalues_solve_the_characteristic_polynomial() {
        // [[2, 0], [1, 3]] has eigenvalues 2 and 3
        let matrix = expressions(vec![vec!["2", "0"], vec!["1", "3"]]);

        let got = matrix.eigenvalues(&Builtins::default()).unwrap();

        let mut values: Vec<f64> =
            got.iter().map(|e| eval(e, &[])).collect();
        values.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert!(approx::relative_eq!(values[0], 2.0));
        assert!(approx::relative_eq!(values[1], 3.0));
    }

    #[test]
    fn repeated_eigenvalues_are_reported_once() {
        // the identity's only eigenvalue is 1
        let matrix = expressions(vec![vec!["1", "0"], vec!["0", "1"]]);

        let got = matrix.eigenvalues(&Builtins::default()).unwrap();

        assert_eq!(got, vec![Expression::Constant(1.0)]);
    }

    #[test]
    fn jacobian_of_a_derivative_vector() {
        let exprs: Vec<Expression> = vec![
            "beta*S*I/N - gamma*I".parse().unwrap(),
            "gamma*I".parse().unwrap(),
        ];
        let wrt = [Parameter::named("I"), Parameter::named("R")];

        let got =
            Matrix::jacobian(&exprs, &wrt, &Builtins::default()).unwrap();

        assert_eq!(got.rows(), 2);
        assert_eq!(got.columns(), 2);
        let bindings = [
            ("beta", 0.4),
            ("gamma", 0.2),
            ("S", 800.0),
            ("I", 10.0),
            ("N", 1000.0),
        ];
        // d/dI (beta*S*I/N - gamma*I) = beta*S/N - gamma
        assert!(approx::relative_eq!(
            eval(&got[(0, 0)], &bindings),
            0.4 * 800.0 / 1000.0 - 0.2
        ));
        // neither equation mentions R
        assert_eq!(got[(0, 1)], Expression::Constant(0.0));
        assert_eq!(got[(1, 1)], Expression::Constant(0.0));
    }
}
