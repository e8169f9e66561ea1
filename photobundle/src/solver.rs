use crate::PhotometricProblem;
use levenberg_marquardt::{LevenbergMarquardt, TerminationReason};
use log::*;

#[cfg(feature = "serde-serialize")]
use serde::{Deserialize, Serialize};

/// Diagnostics of one refinement pass.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct SolverReport {
    /// The number of residual and Jacobian evaluations the solver performed
    pub iterations: usize,
    /// Half the squared norm of the robustified residuals before solving
    pub initial_cost: f64,
    /// Half the squared norm of the robustified residuals after solving
    pub final_cost: f64,
    pub converged: bool,
    /// The solver ran out of iterations while still making progress
    pub budget_exhausted: bool,
    /// Observations inside their frame before solving
    pub initial_in_view: usize,
    /// Observations inside their frame after solving
    pub final_in_view: usize,
    /// Human readable reason the solver stopped
    pub termination: String,
}

impl SolverReport {
    /// Whether the parameters in the returned problem should replace the initial ones.
    ///
    /// Converged solves are used and so are solves that ran out of budget after lowering
    /// the cost. Neither is used if observations were pushed out of their frames.
    pub fn is_usable(&self) -> bool {
        self.final_cost.is_finite()
            && self.final_in_view >= self.initial_in_view
            && (self.converged || (self.budget_exhausted && self.final_cost < self.initial_cost))
    }
}

/// A nonlinear least-squares minimizer for the photometric problem.
pub trait NonlinearSolver {
    /// Minimizes the problem, returning it at the parameters found together with a report.
    fn solve<'a>(
        &self,
        problem: PhotometricProblem<'a>,
        max_iterations: usize,
    ) -> (PhotometricProblem<'a>, SolverReport);
}

/// Solves with the `levenberg-marquardt` crate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevenbergMarquardtSolver {
    pub ftol: f64,
    pub xtol: f64,
    pub gtol: f64,
    /// A final cost at or below this is reported as converged whatever the termination.
    pub cost_tolerance: f64,
}

impl Default for LevenbergMarquardtSolver {
    fn default() -> Self {
        Self {
            ftol: 1e-10,
            xtol: 1e-10,
            gtol: 1e-12,
            cost_tolerance: 1e-12,
        }
    }
}

impl LevenbergMarquardtSolver {
    pub fn ftol(self, ftol: f64) -> Self {
        Self { ftol, ..self }
    }

    pub fn xtol(self, xtol: f64) -> Self {
        Self { xtol, ..self }
    }

    pub fn gtol(self, gtol: f64) -> Self {
        Self { gtol, ..self }
    }

    pub fn cost_tolerance(self, cost_tolerance: f64) -> Self {
        Self {
            cost_tolerance,
            ..self
        }
    }
}

impl NonlinearSolver for LevenbergMarquardtSolver {
    fn solve<'a>(
        &self,
        problem: PhotometricProblem<'a>,
        max_iterations: usize,
    ) -> (PhotometricProblem<'a>, SolverReport) {
        let initial_cost = problem.cost();
        let initial_in_view = problem.observations_in_view();
        if problem.num_parameters() == 0 || problem.num_residuals() == 0 {
            return (
                problem,
                SolverReport {
                    iterations: 0,
                    initial_cost,
                    final_cost: initial_cost,
                    converged: true,
                    budget_exhausted: false,
                    initial_in_view,
                    final_in_view: initial_in_view,
                    termination: "nothing to optimize".to_owned(),
                },
            );
        }
        let (problem, report) = LevenbergMarquardt::new()
            .with_ftol(self.ftol)
            .with_xtol(self.xtol)
            .with_gtol(self.gtol)
            .with_patience(max_iterations.max(1))
            .minimize(problem);
        let final_cost = problem.cost();
        let final_in_view = problem.observations_in_view();
        let converged = report.termination.was_successful() || final_cost <= self.cost_tolerance;
        let budget_exhausted = matches!(report.termination, TerminationReason::LostPatience);
        debug!(
            "Levenberg-Marquardt terminated with reason {:?} after {} evaluations, cost {} -> {}, in view {} -> {}",
            report.termination,
            report.number_of_evaluations,
            initial_cost,
            final_cost,
            initial_in_view,
            final_in_view
        );
        (
            problem,
            SolverReport {
                iterations: report.number_of_evaluations,
                initial_cost,
                final_cost,
                converged,
                budget_exhausted,
                initial_in_view,
                final_in_view,
                termination: format!("{:?}", report.termination),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(converged: bool, budget_exhausted: bool, initial: f64, last: f64) -> SolverReport {
        SolverReport {
            iterations: 3,
            initial_cost: initial,
            final_cost: last,
            converged,
            budget_exhausted,
            initial_in_view: 4,
            final_in_view: 4,
            termination: String::new(),
        }
    }

    #[test]
    fn usable_reports() {
        assert!(report(true, false, 1.0, 0.5).is_usable());
        assert!(report(false, true, 1.0, 0.5).is_usable());
        assert!(!report(false, true, 1.0, 1.5).is_usable());
        assert!(!report(false, false, 1.0, 0.5).is_usable());
        assert!(!report(true, false, 1.0, f64::NAN).is_usable());
    }

    #[test]
    fn losing_observations_is_not_usable() {
        let mut lost = report(true, false, 1.0, 0.0);
        lost.final_in_view = 0;
        assert!(!lost.is_usable());
        let mut gained = report(true, false, 1.0, 0.5);
        gained.final_in_view = 5;
        assert!(gained.is_usable());
    }
}
