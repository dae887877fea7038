//! Derivative extraction and RHS compilation for continuously-indexed models.
//!
//! This crate takes symbolic equality equations over indexed quantities,
//! some of which are registered as derivatives with respect to one
//! continuous domain. It finds the equation defining each derivative,
//! isolates the derivative algebraically, and builds a normalized
//! right-hand-side callable
//! `f(index_value, state_vector) -> derivative_vector` for an external
//! integrator. Residuals evaluate either by tree interpretation or as native
//! code compiled with [Cranelift](https://github.com/bytecodealliance/wasmtime/tree/main/cranelift).
//!
//! # Features
//!
//! - Modeling layer with a continuous domain, discrete index sets, indexed
//!   and unindexed variables, derivatives, fixed/mutable parameters, and
//!   closure-built constraints
//! - Structural isolation of derivatives from bare, product, and sum shapes,
//!   including division and non-unit coefficients
//! - Canonical keys deduplicating indexed references across equations
//! - Interpreted and JIT-compiled evaluation backends behind one selector
//!
//! # Example
//!
//! ```rust
//! use dae_sim::{Backend, Model, Simulator};
//!
//! // dv/dt == -2*v + sin(t)
//! let mut m = Model::new("decay");
//! let t = m.continuous("t", 0.0, 10.0);
//! let v = m.var("v", &[t.dim()]);
//! let dv = m.derivative("dv", &v, &t);
//! v.set_initial(1.0);
//! {
//!     let (t, v) = (t.clone(), v.clone());
//!     m.constraint("deq", &[t.dim()], move |ix| {
//!         dv.at(ix).equals(-2.0 * v.at(ix) + t.expr().sin())
//!     });
//! }
//!
//! let sim = Simulator::new(&m, Backend::Interpreted).unwrap();
//! let y0: Vec<f64> = sim.initial_state();
//! let derivs = sim.eval(0.0, &y0).unwrap();
//! assert_eq!(derivs, vec![-2.0]);
//! ```

pub use errors::{BuilderError, SimulatorError};
pub use model::Model;
pub use simulator::{AlgebraicEquation, Backend, Simulator, Solution};

pub mod prelude {
    pub use crate::backends::vector::Vector;
    pub use crate::expr::{Equation, Expr};
    pub use crate::model::{Ix, Model};
    pub use crate::simulator::{Backend, Simulator};
    pub use crate::types::RhsFn;
}

/// Error types for the various failure modes
pub mod errors;
/// Expression tree representation and operator overloading
pub mod expr;
/// Template index and canonical keys for indexed references
pub mod key;
/// Modeling layer: domains, sets, variables, parameters, constraints
pub mod model;
/// The simulation facade and backend selector
pub mod simulator;
/// Substitution engine, template map, and backend placeholders
pub mod substitute;
/// Callable type aliases
pub mod types;

/// Structural isolation of derivatives from equality expressions
pub(crate) mod checkers;
/// Classification of constraints into derivative definitions and algebraic equations
pub(crate) mod classify;
/// JIT compilation of residuals using Cranelift
pub(crate) mod builder;
/// Functions for linking external math symbols into the JIT module
pub(crate) mod operators {
    pub(crate) mod exp;
    pub(crate) mod ln;
    pub(crate) mod sqrt;
    pub(crate) mod trigonometric;
}
/// State-vector abstractions over caller-owned vector types
pub mod backends {
    pub mod vector;
}
