use crate::{NllsProblem, NllsSolverBackend, SolveOptions, SolveReport};
use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn};
use stereo_core::Real;

struct LmWrapper<'a, P: NllsProblem> {
    problem: &'a P,
    params: DVector<Real>,
}

impl<'a, P: NllsProblem> LeastSquaresProblem<Real, Dyn, Dyn> for LmWrapper<'a, P> {
    type ResidualStorage = Owned<Real, Dyn>;
    type JacobianStorage = Owned<Real, Dyn, Dyn>;
    type ParameterStorage = Owned<Real, Dyn>;

    fn set_params(&mut self, x: &DVector<Real>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<Real> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<Real>> {
        let r = self.problem.residuals(&self.params);
        r.iter().all(|v| v.is_finite()).then_some(r)
    }

    fn jacobian(&self) -> Option<DMatrix<Real>> {
        let j = self.problem.jacobian(&self.params);
        j.iter().all(|v| v.is_finite()).then_some(j)
    }
}

/// Dense Levenberg–Marquardt backend (MINPACK port from `levenberg-marquardt`).
#[derive(Debug, Default, Clone)]
pub struct LmBackend;

impl NllsSolverBackend for LmBackend {
    fn solve<P: NllsProblem>(
        &self,
        problem: &P,
        x0: DVector<Real>,
        opts: &SolveOptions,
    ) -> (DVector<Real>, SolveReport) {
        let lm = LevenbergMarquardt::new()
            .with_ftol(opts.ftol)
            .with_xtol(opts.xtol)
            .with_gtol(opts.gtol)
            .with_patience(opts.max_iters.max(1));

        let wrapper = LmWrapper {
            problem,
            params: x0,
        };

        let (wrapper, report) = lm.minimize(wrapper);
        let x_opt = wrapper.params();

        (
            x_opt,
            SolveReport {
                iterations: report.number_of_evaluations,
                final_cost: report.objective_function,
                converged: report.termination.was_successful(),
                termination: format!("{:?}", report.termination),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::LmBackend;
    use crate::{NllsProblem, NllsSolverBackend, SolveOptions};
    use nalgebra::DVector;
    use stereo_core::Real;

    #[derive(Debug)]
    struct OneDimProblem;

    impl NllsProblem for OneDimProblem {
        fn num_params(&self) -> usize {
            1
        }

        fn num_residuals(&self) -> usize {
            1
        }

        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_element(1, x[0] - 3.0)
        }
    }

    /// Rosenbrock in residual form: r = (10 (y - x^2), 1 - x).
    struct Rosenbrock;

    impl NllsProblem for Rosenbrock {
        fn num_params(&self) -> usize {
            2
        }

        fn num_residuals(&self) -> usize {
            2
        }

        fn residuals(&self, x: &DVector<Real>) -> DVector<Real> {
            DVector::from_vec(vec![10.0 * (x[1] - x[0] * x[0]), 1.0 - x[0]])
        }
    }

    #[test]
    fn lm_backend_solves_trivial_problem() {
        let x0 = DVector::from_element(1, 10.0);
        let (x_opt, report) = LmBackend.solve(&OneDimProblem, x0, &SolveOptions::default());

        assert!(
            (x_opt[0] - 3.0).abs() < 1e-6,
            "expected optimizer to reach 3.0, got {}",
            x_opt[0]
        );
        assert!(report.final_cost.abs() < 1e-12, "final cost too high: {}", report.final_cost);
        assert!(report.converged, "LM backend did not report convergence: {:?}", report);
        assert!(report.iterations > 0);
    }

    #[test]
    fn lm_backend_solves_rosenbrock_with_numeric_jacobian() {
        let x0 = DVector::from_vec(vec![-1.2, 1.0]);
        let (x_opt, report) = LmBackend.solve(&Rosenbrock, x0, &SolveOptions::default());
        assert!((x_opt[0] - 1.0).abs() < 1e-6, "{:?}", report);
        assert!((x_opt[1] - 1.0).abs() < 1e-6, "{:?}", report);
    }
}
