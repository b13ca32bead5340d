use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use stereo_core::Real;

/// Generic non-linear least squares problem with dense parameter/residual vectors.
///
/// The default Jacobian uses central finite differences; problems with a
/// cheap analytic Jacobian may override it.
pub trait NllsProblem {
    /// Number of parameters in the optimization vector.
    fn num_params(&self) -> usize;
    /// Number of residual rows in the problem.
    fn num_residuals(&self) -> usize;

    /// Residuals for the current parameters.
    fn residuals(&self, x: &DVector<Real>) -> DVector<Real>;

    /// Jacobian of [`NllsProblem::residuals`] with respect to `x`.
    fn jacobian(&self, x: &DVector<Real>) -> DMatrix<Real> {
        finite_difference_jacobian(|p| self.residuals(p), x, self.num_residuals())
    }
}

/// Central-difference Jacobian with a step relative to each parameter's magnitude.
pub fn finite_difference_jacobian<F>(f: F, x: &DVector<Real>, m: usize) -> DMatrix<Real>
where
    F: Fn(&DVector<Real>) -> DVector<Real>,
{
    let n = x.len();
    let mut j = DMatrix::zeros(m, n);
    let mut x_pert = x.clone();

    for k in 0..n {
        let h = 1e-6 * x[k].abs().max(1.0);
        x_pert[k] = x[k] + h;
        let r_plus = f(&x_pert);
        x_pert[k] = x[k] - h;
        let r_minus = f(&x_pert);
        x_pert[k] = x[k];

        j.set_column(k, &((r_plus - r_minus) / (2.0 * h)));
    }

    j
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Maximum number of solver iterations before termination.
    ///
    /// The LM backend follows the MINPACK convention and caps function
    /// evaluations at `max_iters * (n + 1)`.
    pub max_iters: usize,
    /// Relative tolerance on the objective (cost) reduction.
    pub ftol: Real,
    /// Orthogonality/gradient tolerance.
    pub gtol: Real,
    /// Relative tolerance on parameter updates.
    pub xtol: Real,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_iters: 200,
            ftol: 1e-10,
            gtol: 1e-10,
            xtol: 1e-10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SolveReport {
    /// Residual evaluations performed by the solver.
    pub iterations: usize,
    /// Final value of `0.5 * ||r||^2`.
    pub final_cost: Real,
    pub converged: bool,
    /// Solver-specific termination reason.
    pub termination: String,
}

pub trait NllsSolverBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport);
}
