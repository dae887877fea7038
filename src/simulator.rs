//! Simulation facade over classification, substitution, and RHS building.
//!
//! This module provides the `Simulator` type, which takes a model with one
//! continuous domain, classifies its equality constraints into derivative
//! definitions and algebraic equations, and builds a callable right-hand side
//! `f(index_value, state_vector) -> derivative_vector` for an external
//! integrator.
//!
//! # Features
//!
//! - Two evaluation backends behind one selector: tree interpretation over
//!   shared numeric cells, or one combined native function compiled with
//!   Cranelift
//! - Read-only registries describing what was classified: differential
//!   states, derivatives, residuals, algebraic variables and equations
//! - Initial-state gathering in state-vector order
//! - A results slot populated only by the external integrator
//!
//! # Example
//!
//! ```
//! use dae_sim::{Backend, Model, Simulator};
//!
//! let mut m = Model::new("decay");
//! let t = m.continuous("t", 0.0, 10.0);
//! let v = m.var("v", &[t.dim()]);
//! let dv = m.derivative("dv", &v, &t);
//! v.set_initial(1.0);
//! m.constraint("deq", &[t.dim()], move |ix| {
//!     dv.at(ix).equals(-0.5 * v.at(ix))
//! });
//!
//! let sim = Simulator::new(&m, Backend::Interpreted).unwrap();
//! let derivs = sim.eval(0.0, &[2.0]).unwrap();
//! assert_eq!(derivs, vec![-1.0]);
//! ```
//!
//! # Backend differences
//!
//! The interpreted backend covers every intrinsic but refuses models with
//! algebraic equations or free algebraic quantities outright. The compiled
//! backend records those in `algvars`/`alglist` and only refuses evaluation;
//! it has no linked equivalents for the inverse trigonometric intrinsics.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use colored::Colorize;
use itertools::Itertools;

use crate::backends::vector::Vector;
use crate::builder::{build_combined_function, LiveValues};
use crate::classify::{classify, single_domain, Classification};
use crate::errors::SimulatorError;
use crate::expr::Expr;
use crate::key::CanonicalKey;
use crate::model::{ContinuousDomain, Model, VarData};
use crate::substitute::{CellFactory, CellRef, Placeholder, SlotFactory, TemplateMap};
use crate::types::{RawRhsFn, RhsFn};

/// Selector for how residual expressions are evaluated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Tree interpretation over shared numeric cells.
    Interpreted,
    /// One combined native function compiled with Cranelift.
    Compiled,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Interpreted => write!(f, "interpreted"),
            Backend::Compiled => write!(f, "compiled"),
        }
    }
}

impl FromStr for Backend {
    type Err = SimulatorError;

    /// Parses a backend name. `"interpreted"` (alias `"direct"`) and
    /// `"compiled"` (alias `"jit"`) are accepted, case-insensitively.
    ///
    /// # Example
    /// ```
    /// # use dae_sim::Backend;
    /// let backend: Backend = "jit".parse().unwrap();
    /// assert_eq!(backend, Backend::Compiled);
    /// assert!("casadi".parse::<Backend>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "interpreted" | "direct" => Ok(Backend::Interpreted),
            "compiled" | "jit" => Ok(Backend::Compiled),
            other => Err(SimulatorError::UnknownBackend(other.to_string())),
        }
    }
}

/// An equality with no derivative reference, recorded during classification.
///
/// Both sides are substituted against the shared template map, so the free
/// indexed quantities of these equations appear in the simulator's algebraic
/// variables. They are recorded for inspection, never solved.
#[derive(Debug)]
pub struct AlgebraicEquation {
    pub(crate) name: String,
    pub(crate) lhs: Expr,
    pub(crate) rhs: Expr,
}

impl AlgebraicEquation {
    /// Label of the expanded constraint instance this equality came from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Substituted left side.
    pub fn lhs(&self) -> &Expr {
        &self.lhs
    }

    /// Substituted right side.
    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }
}

impl fmt::Display for AlgebraicEquation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} == {}", self.name, self.lhs, self.rhs)
    }
}

/// A trajectory recorded by an external integrator.
///
/// One state snapshot per continuous-index sample, each aligned to the
/// simulator's differential-variable order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Solution {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
}

impl Solution {
    /// Continuous-index samples, in integration order.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    /// State snapshots, one per sample.
    pub fn states(&self) -> &[Vec<f64>] {
        &self.states
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        self.times.len()
    }

    /// Whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// The last recorded snapshot.
    pub fn final_state(&self) -> Option<&[f64]> {
        self.states.last().map(Vec::as_slice)
    }
}

/// Backend-specific evaluation state behind the public RHS surface.
enum RhsState {
    Interpreted {
        /// The continuous-index cell, written before every tree walk.
        time: CellRef,
        /// Per-state cells in `diffvars` order. `None` when a state never
        /// occurs in any residual.
        cells: Vec<Option<CellRef>>,
        /// Substituted residuals in `derivlist` order.
        residuals: Vec<Expr>,
    },
    Compiled {
        raw: RawRhsFn,
        /// Per-state input slots in `diffvars` order. `None` when a state
        /// never occurs in any residual.
        slots: Vec<Option<u32>>,
        live: LiveValues,
        /// Staging buffer for `[index value, states..., live scalars...]`.
        scratch: RefCell<Vec<f64>>,
    },
}

/// Classifies a model's equations and evaluates their derivative vector.
///
/// Construction runs the whole classification pass: the single continuous
/// domain is checked first, then every equality constraint is expanded over
/// its discrete index combinations, probed for a derivative, isolated, and
/// substituted. On success the simulator owns the registries (`diffvars`,
/// `derivlist`, `rhsdict`, `algvars`, `alglist`), the template map, and a
/// built right-hand side.
///
/// State vectors are ordered like [`diffvars`](Simulator::diffvars);
/// derivative vectors like [`derivlist`](Simulator::derivlist). The two
/// orders are aligned: element *i* of the derivative vector is the derivative
/// of state *i*.
pub struct Simulator {
    backend: Backend,
    domain: ContinuousDomain,
    diffvars: Vec<CanonicalKey>,
    derivlist: Vec<CanonicalKey>,
    rhsdict: HashMap<CanonicalKey, Expr>,
    algvars: Vec<CanonicalKey>,
    alglist: Vec<AlgebraicEquation>,
    templatemap: TemplateMap,
    diff_sources: Vec<(Rc<VarData>, Vec<i64>)>,
    built: Option<RhsState>,
    solution: Option<Solution>,
}

impl fmt::Display for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{{\n")?;
        writeln!(f, "    {}: {}\n", "Backend".cyan(), self.backend)?;
        writeln!(
            f,
            "    {}: {} in [{}, {}]\n",
            "Domain".cyan(),
            self.domain.name(),
            self.domain.bounds().0,
            self.domain.bounds().1
        )?;
        writeln!(
            f,
            "    {}: {:?}\n",
            "States".cyan(),
            display_keys(&self.diffvars)
        )?;
        writeln!(f, "    {}:\n", "Derivatives".cyan())?;
        for deriv in &self.derivlist {
            writeln!(f, "        {} = {}\n", deriv, self.rhsdict[deriv])?;
        }
        if !self.algvars.is_empty() {
            writeln!(
                f,
                "    {}: {:?}\n",
                "Algebraic".cyan(),
                display_keys(&self.algvars)
            )?;
        }
        for equation in &self.alglist {
            writeln!(f, "        {equation}\n")?;
        }
        writeln!(f, "}}")?;
        Ok(())
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Simulator {
    /// Classifies `model` and builds its right-hand side with the selected
    /// backend.
    ///
    /// # Arguments
    /// * `model` - The model whose equality constraints define derivatives
    /// * `backend` - How residuals are evaluated afterwards
    ///
    /// # Returns
    /// * `Result<Self, SimulatorError>` - The ready simulator or the first
    ///   classification failure
    ///
    /// # Errors
    /// Fails when the model does not declare exactly one continuous domain,
    /// declares no derivative definition, violates a solvability invariant
    /// (duplicate definition, several derivatives in one equation,
    /// self-reference, non-isolatable shape), or contains algebraic content
    /// the interpreted backend cannot accept. Compilation failures of the
    /// compiled backend are wrapped in
    /// [`SimulatorError::BuildFunctionError`].
    ///
    /// # Example
    /// ```
    /// # use dae_sim::{Backend, Model, Simulator};
    /// let mut m = Model::new("decay");
    /// let t = m.continuous("t", 0.0, 10.0);
    /// let v = m.var("v", &[t.dim()]);
    /// let dv = m.derivative("dv", &v, &t);
    /// m.constraint("deq", &[t.dim()], move |ix| {
    ///     dv.at(ix).equals(-2.0 * v.at(ix))
    /// });
    ///
    /// let sim = Simulator::new(&m, Backend::Interpreted).unwrap();
    /// assert_eq!(sim.num_states(), 1);
    /// ```
    pub fn new(model: &Model, backend: Backend) -> Result<Self, SimulatorError> {
        let domain = single_domain(model)?;
        let (classification, built) = match backend {
            Backend::Interpreted => {
                let mut factory = CellFactory::new(domain.name());
                let c = classify(model, backend, &mut factory)?;
                let built = build_interpreted(&c, &factory);
                (c, Some(built))
            }
            Backend::Compiled => {
                let mut factory = SlotFactory::new(domain.name());
                let c = classify(model, backend, &mut factory)?;
                let built = if c.algvars.is_empty() {
                    Some(build_compiled(&c, factory.slots_used())?)
                } else {
                    None
                };
                (c, built)
            }
        };

        let Classification {
            diffvars,
            derivlist,
            rhsdict,
            algvars,
            alglist,
            templatemap,
            diff_sources,
        } = classification;

        Ok(Simulator {
            backend,
            domain,
            diffvars,
            derivlist,
            rhsdict,
            algvars,
            alglist,
            templatemap,
            diff_sources,
            built,
            solution: None,
        })
    }

    /// Evaluates the derivative vector at one point, into a pre-allocated
    /// buffer. This should be more efficient than calling `eval()` and then
    /// copying the results.
    ///
    /// # Arguments
    /// * `t` - Value of the continuous index
    /// * `states` - Current state values in `diffvars` order
    /// * `out` - Buffer receiving the derivatives in `derivlist` order
    ///
    /// # Returns
    /// Reference to the buffer containing the evaluated derivatives
    ///
    /// # Errors
    /// Returns `SimulatorError::InvalidInputLength` /
    /// `InvalidOutputLength` on length mismatches, and the
    /// unsupported-algebraic reason when free algebraic quantities were
    /// recorded instead of a built right-hand side.
    pub fn eval_into<'a>(
        &self,
        t: f64,
        states: &[f64],
        out: &'a mut [f64],
    ) -> Result<&'a [f64], SimulatorError> {
        self.validate_input_length(states)?;
        if out.len() != self.derivlist.len() {
            return Err(SimulatorError::InvalidOutputLength {
                expected: self.derivlist.len(),
                got: out.len(),
            });
        }

        let built = self.built.as_ref().ok_or_else(|| self.algebraic_error())?;
        match built {
            RhsState::Interpreted {
                time,
                cells,
                residuals,
            } => {
                time.set(t);
                for (cell, value) in cells.iter().zip(states) {
                    if let Some(cell) = cell {
                        cell.set(*value);
                    }
                }
                for (slot, residual) in out.iter_mut().zip(residuals) {
                    *slot = residual.numeric();
                }
            }
            RhsState::Compiled {
                raw,
                slots,
                live,
                scratch,
            } => {
                let mut input = scratch.borrow_mut();
                stage_compiled_input(&mut input, t, states, slots, live);
                raw(input.as_ptr(), out.as_mut_ptr());
            }
        }
        Ok(out)
    }

    /// Evaluates the derivative vector at one point. Allocates a new vector
    /// for the results.
    ///
    /// # Arguments
    /// * `t` - Value of the continuous index
    /// * `states` - Current state values in `diffvars` order
    ///
    /// # Example
    /// ```
    /// # use dae_sim::{Backend, Model, Simulator};
    /// # let mut m = Model::new("decay");
    /// # let t = m.continuous("t", 0.0, 10.0);
    /// # let v = m.var("v", &[t.dim()]);
    /// # let dv = m.derivative("dv", &v, &t);
    /// # m.constraint("deq", &[t.dim()], move |ix| {
    /// #     dv.at(ix).equals(-2.0 * v.at(ix))
    /// # });
    /// let sim = Simulator::new(&m, Backend::Interpreted).unwrap();
    /// let derivs = sim.eval(0.0, &[3.0]).unwrap();
    /// assert_eq!(derivs, vec![-6.0]);
    /// ```
    ///
    /// # Errors
    /// Same conditions as [`eval_into`](Simulator::eval_into).
    pub fn eval<V: Vector>(&self, t: f64, states: &V) -> Result<Vec<f64>, SimulatorError> {
        let mut out = vec![0.0; self.derivlist.len()];
        self.eval_into(t, states.as_slice(), &mut out)?;
        Ok(out)
    }

    /// Packages the built right-hand side as an owning boxed closure for
    /// handing to an external integrator.
    ///
    /// The closure shares this simulator's placeholders, so it must not run
    /// concurrently with other evaluations. Lengths are only checked with
    /// `debug_assert`; use [`eval_into`](Simulator::eval_into) for validated
    /// evaluation.
    ///
    /// # Errors
    /// Returns the unsupported-algebraic reason when free algebraic
    /// quantities were recorded instead of a built right-hand side.
    pub fn rhs_fn(&self) -> Result<RhsFn, SimulatorError> {
        let built = self.built.as_ref().ok_or_else(|| self.algebraic_error())?;
        Ok(match built {
            RhsState::Interpreted {
                time,
                cells,
                residuals,
            } => {
                let time = time.clone();
                let cells = cells.clone();
                let residuals = residuals.clone();
                Box::new(move |t, states, out| {
                    debug_assert_eq!(states.len(), cells.len());
                    debug_assert_eq!(out.len(), residuals.len());
                    time.set(t);
                    for (cell, value) in cells.iter().zip(states) {
                        if let Some(cell) = cell {
                            cell.set(*value);
                        }
                    }
                    for (slot, residual) in out.iter_mut().zip(&residuals) {
                        *slot = residual.numeric();
                    }
                })
            }
            RhsState::Compiled {
                raw,
                slots,
                live,
                scratch,
            } => {
                let raw = *raw;
                let slots = slots.clone();
                let live = live.clone();
                let scratch = RefCell::new(vec![0.0; scratch.borrow().len()]);
                Box::new(move |t, states, out| {
                    debug_assert_eq!(states.len(), slots.len());
                    debug_assert_eq!(out.len(), slots.len());
                    let mut input = scratch.borrow_mut();
                    stage_compiled_input(&mut input, t, states, &slots, &live);
                    raw(input.as_ptr(), out.as_mut_ptr());
                })
            }
        })
    }

    /// Model-declared initial values gathered in `diffvars` order.
    ///
    /// Values are read at call time, so initial values set on the model after
    /// construction are picked up.
    ///
    /// # Example
    /// ```
    /// # use dae_sim::{Backend, Model, Simulator};
    /// # let mut m = Model::new("decay");
    /// # let t = m.continuous("t", 0.0, 10.0);
    /// # let v = m.var("v", &[t.dim()]);
    /// # let dv = m.derivative("dv", &v, &t);
    /// # m.constraint("deq", &[t.dim()], {
    /// #     let (v, dv) = (v.clone(), dv.clone());
    /// #     move |ix| dv.at(ix).equals(-2.0 * v.at(ix))
    /// # });
    /// let sim = Simulator::new(&m, Backend::Interpreted).unwrap();
    /// v.set_initial(5.0);
    /// let y0: Vec<f64> = sim.initial_state();
    /// assert_eq!(y0, vec![5.0]);
    /// ```
    pub fn initial_state<V: Vector>(&self) -> V {
        let mut state = V::zeros(self.diffvars.len());
        for (slot, (var, fixed)) in state.as_mut_slice().iter_mut().zip(&self.diff_sources) {
            *slot = var.initial_for(fixed);
        }
        state
    }

    /// The backend selected at construction.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The model's single continuous domain.
    pub fn domain(&self) -> &ContinuousDomain {
        &self.domain
    }

    /// Number of differential states, which is the expected state-vector
    /// length.
    pub fn num_states(&self) -> usize {
        self.diffvars.len()
    }

    /// Number of derivative definitions, which is the derivative-vector
    /// length (always equal to [`num_states`](Simulator::num_states)).
    pub fn num_derivatives(&self) -> usize {
        self.derivlist.len()
    }

    /// Canonical keys of the differentiated quantities, in discovery order.
    pub fn diffvars(&self) -> &[CanonicalKey] {
        &self.diffvars
    }

    /// Canonical keys of the derivatives, aligned with
    /// [`diffvars`](Simulator::diffvars).
    pub fn derivlist(&self) -> &[CanonicalKey] {
        &self.derivlist
    }

    /// Mapping from each derivative key to its isolated residual.
    pub fn rhsdict(&self) -> &HashMap<CanonicalKey, Expr> {
        &self.rhsdict
    }

    /// The residual defining one derivative, if that key was classified.
    pub fn rhs(&self, deriv: &CanonicalKey) -> Option<&Expr> {
        self.rhsdict.get(deriv)
    }

    /// Canonical keys occurring in residuals without being differentiated.
    pub fn algvars(&self) -> &[CanonicalKey] {
        &self.algvars
    }

    /// Algebraic equalities recorded during classification.
    pub fn alglist(&self) -> &[AlgebraicEquation] {
        &self.alglist
    }

    /// The shared key-to-placeholder mapping.
    pub fn template_map(&self) -> &TemplateMap {
        &self.templatemap
    }

    /// Stores a trajectory produced by an external integrator.
    ///
    /// # Errors
    /// Rejects snapshot widths differing from
    /// [`num_states`](Simulator::num_states) and sample/snapshot counts that
    /// differ from each other.
    pub fn record_solution(
        &mut self,
        times: Vec<f64>,
        states: Vec<Vec<f64>>,
    ) -> Result<(), SimulatorError> {
        if states.len() != times.len() {
            return Err(SimulatorError::InvalidOutputLength {
                expected: times.len(),
                got: states.len(),
            });
        }
        for snapshot in &states {
            if snapshot.len() != self.diffvars.len() {
                return Err(SimulatorError::InvalidInputLength {
                    expected: self.diffvars.len(),
                    got: snapshot.len(),
                });
            }
        }
        self.solution = Some(Solution { times, states });
        Ok(())
    }

    /// The recorded trajectory, or `None` before any integration.
    pub fn solution(&self) -> Option<&Solution> {
        self.solution.as_ref()
    }

    /// Drops the recorded trajectory.
    pub fn clear_solution(&mut self) {
        self.solution = None;
    }

    fn validate_input_length(&self, states: &[f64]) -> Result<(), SimulatorError> {
        if states.len() != self.diffvars.len() {
            return Err(SimulatorError::InvalidInputLength {
                expected: self.diffvars.len(),
                got: states.len(),
            });
        }
        Ok(())
    }

    fn algebraic_error(&self) -> SimulatorError {
        SimulatorError::UnsupportedAlgebraic {
            backend: self.backend,
            detail: format!(
                "free algebraic quantities remain: {}",
                self.algvars.iter().map(|k| k.to_string()).join(", ")
            ),
        }
    }
}

fn build_interpreted(c: &Classification, factory: &CellFactory) -> RhsState {
    let cells = c
        .diffvars
        .iter()
        .map(|key| {
            c.templatemap.get(key).map(|placeholder| match placeholder {
                Placeholder::Cell(cell) => cell.clone(),
                Placeholder::Slot(_) => unreachable!("cell factory produced a slot"),
            })
        })
        .collect();
    let residuals = c
        .derivlist
        .iter()
        .map(|key| c.rhsdict[key].clone())
        .collect();
    RhsState::Interpreted {
        time: factory.time(),
        cells,
        residuals,
    }
}

fn build_compiled(c: &Classification, first_live_slot: u32) -> Result<RhsState, SimulatorError> {
    let residuals: Vec<&Expr> = c.derivlist.iter().map(|key| &c.rhsdict[key]).collect();
    let live = LiveValues::collect(residuals.iter().copied(), first_live_slot);
    let raw = build_combined_function(&residuals, &live)?;
    let slots = c
        .diffvars
        .iter()
        .map(|key| {
            c.templatemap.get(key).map(|placeholder| match placeholder {
                Placeholder::Slot(slot) => slot.slot(),
                Placeholder::Cell(_) => unreachable!("slot factory produced a cell"),
            })
        })
        .collect();
    let input_len = first_live_slot as usize + live.len();
    Ok(RhsState::Compiled {
        raw,
        slots,
        live,
        scratch: RefCell::new(vec![0.0; input_len]),
    })
}

/// Writes the index value, the state elements, and the current live-scalar
/// model values into the compiled function's input buffer.
fn stage_compiled_input(
    input: &mut [f64],
    t: f64,
    states: &[f64],
    slots: &[Option<u32>],
    live: &LiveValues,
) {
    input[0] = t;
    for (slot, value) in slots.iter().zip(states) {
        if let Some(slot) = slot {
            input[*slot as usize] = *value;
        }
    }
    for (param, slot) in &live.params {
        input[*slot as usize] = param.value.get();
    }
    for (scalar, slot) in &live.scalars {
        input[*slot as usize] = scalar.value.get();
    }
}

fn display_keys(keys: &[CanonicalKey]) -> Vec<String> {
    keys.iter().map(ToString::to_string).collect()
}
