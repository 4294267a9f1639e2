use anyhow::{anyhow, Result};
use faer::prelude::SpSolver;
use faer::{FaerMat, Mat};

/// Trait for solving dense linear systems (Ax = b).
///
/// Implementations must be deterministic: identical inputs yield
/// bit-identical solutions on every call.
pub trait LinearSystemBackend: Send + Sync {
    /// Solve the linear system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>>;

    /// Short name for reporting
    fn name(&self) -> &'static str;
}

fn check_dimensions(matrix: &[Vec<f64>], rhs: &[f64]) -> Result<usize> {
    let n = matrix.len();
    if rhs.len() != n {
        return Err(anyhow!(
            "rhs length ({}) does not match matrix dimension {}",
            rhs.len(),
            n
        ));
    }
    if matrix.iter().any(|row| row.len() != n) {
        return Err(anyhow!("matrix must be square"));
    }
    Ok(n)
}

/// Partial-pivot Gaussian elimination with back substitution.
///
/// Dependency-free reference implementation; the faer backend is preferred
/// for anything beyond toy systems.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSystemBackend for GaussSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>> {
        let n = check_dimensions(matrix, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mut a = matrix.to_vec();
        let mut b = rhs.to_vec();

        // Forward elimination to row echelon form
        for col in 0..n {
            let mut pivot = col;
            for row in col + 1..n {
                if a[row][col].abs() > a[pivot][col].abs() {
                    pivot = row;
                }
            }
            if a[pivot][col].abs() < 1e-12 {
                return Err(anyhow!("singular matrix at column {col}"));
            }
            if pivot != col {
                a.swap(col, pivot);
                b.swap(col, pivot);
            }

            for row in col + 1..n {
                let factor = a[row][col] / a[col][col];
                if factor == 0.0 {
                    continue;
                }
                let (upper, lower) = a.split_at_mut(row);
                for (target, &source) in lower[0][col..].iter_mut().zip(upper[col][col..].iter()) {
                    *target -= factor * source;
                }
                b[row] -= factor * b[col];
            }
        }

        // Back substitution
        let mut x = vec![0.0; n];
        for i in (0..n).rev() {
            let mut sum = b[i];
            for j in i + 1..n {
                sum -= a[i][j] * x[j];
            }
            x[i] = sum / a[i][i];
        }

        Ok(x)
    }

    fn name(&self) -> &'static str {
        "gauss"
    }
}

/// LU decomposition with partial pivoting via faer.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSystemBackend for FaerSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> Result<Vec<f64>> {
        let n = check_dimensions(matrix, rhs)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = mat.partial_piv_lu();
        let sol = lu.solve(&rhs_mat);

        let x: Vec<f64> = (0..n).map(|i| sol.read(i, 0)).collect();
        // LU of a singular matrix surfaces as non-finite entries
        if x.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("singular matrix"));
        }
        Ok(x)
    }

    fn name(&self) -> &'static str {
        "faer"
    }
}

/// Backend selection. Plain data, constructed per call: there is no global
/// registry, keeping solvers reentrant.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SolverKind {
    Gauss,
    #[default]
    Faer,
}

impl SolverKind {
    /// Parse a backend name ("gauss", "faer", "default").
    pub fn parse(input: &str) -> Result<Self> {
        match input.to_ascii_lowercase().as_str() {
            "gauss" => Ok(SolverKind::Gauss),
            "faer" | "default" => Ok(SolverKind::Faer),
            other => Err(anyhow!(
                "unknown solver '{}'; supported values: gauss, faer",
                other
            )),
        }
    }

    /// Instantiate the backend.
    pub fn build(self) -> Box<dyn LinearSystemBackend> {
        match self {
            SolverKind::Gauss => Box::new(GaussSolver),
            SolverKind::Faer => Box::new(FaerSolver),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SolverKind::Gauss => "gauss",
            SolverKind::Faer => "faer",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_supports_all_backends() {
        assert_eq!(SolverKind::parse("gauss").unwrap(), SolverKind::Gauss);
        assert_eq!(SolverKind::parse("faer").unwrap(), SolverKind::Faer);
        assert_eq!(SolverKind::parse("default").unwrap(), SolverKind::Faer);
        assert!(SolverKind::parse("umfpack").is_err());
    }

    #[test]
    fn backends_solve_diagonal_system() {
        let matrix = vec![vec![2.0, 0.0], vec![0.0, 3.0]];
        let rhs = vec![4.0, 6.0];

        assert_eq!(GaussSolver.solve(&matrix, &rhs).unwrap(), vec![2.0, 2.0]);
        assert_eq!(FaerSolver.solve(&matrix, &rhs).unwrap(), vec![2.0, 2.0]);
    }

    #[test]
    fn backends_agree_on_dense_system() {
        let matrix = vec![
            vec![4.0, 1.0, 0.0],
            vec![1.0, 4.0, 1.0],
            vec![0.0, 1.0, 4.0],
        ];
        let rhs = vec![1.0, 2.0, 1.0];

        let x_gauss = GaussSolver.solve(&matrix, &rhs).unwrap();
        let x_faer = FaerSolver.solve(&matrix, &rhs).unwrap();
        for i in 0..3 {
            assert!(
                (x_gauss[i] - x_faer[i]).abs() < 1e-12,
                "mismatch at {}: gauss={}, faer={}",
                i,
                x_gauss[i],
                x_faer[i]
            );
        }
    }

    #[test]
    fn singular_matrix_rejected() {
        let matrix = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        let rhs = vec![1.0, 2.0];
        assert!(GaussSolver.solve(&matrix, &rhs).is_err());
        assert!(FaerSolver.solve(&matrix, &rhs).is_err());
    }

    #[test]
    fn dimension_mismatch_rejected() {
        let matrix = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(GaussSolver.solve(&matrix, &[1.0]).is_err());
    }
}
