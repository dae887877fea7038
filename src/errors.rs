//! Error types for the dae-sim crate.
//!
//! This module defines the error types that can occur during model
//! classification, substitution, and RHS construction. The main error types
//! are:
//!
//! - `SimulatorError`: High-level errors raised while classifying a model and
//!   building its RHS callable
//! - `BuilderError`: Errors during JIT compilation with Cranelift
//!
//! Each error type implements the standard Error trait and provides detailed
//! error messages.

use cranelift_codegen::CodegenError;
use cranelift_module::ModuleError;
use thiserror::Error;

use crate::key::CanonicalKey;
use crate::simulator::Backend;

/// Errors that can occur during JIT compilation of residual expressions.
///
/// This enum represents various failure modes in the process of converting
/// substituted residual trees into machine code using Cranelift as the JIT
/// compiler backend.
#[derive(Error, Debug)]
pub enum BuilderError {
    /// Error when the target machine architecture is not supported
    #[error("host machine is not supported: {0}")]
    HostMachineNotSupported(String),
    /// Error during Cranelift code generation
    #[error("codegen error: {0}")]
    CodegenError(CodegenError),
    /// Error in the Cranelift JIT module
    #[error("module error: {0}")]
    ModuleError(ModuleError),
    /// Error when defining the JIT function
    #[error("function error: {0}")]
    FunctionError(String),
    /// Error when declaring the JIT function
    #[error("declaration error: {0}")]
    DeclarationError(String),
}

/// Errors raised while classifying a model's equations and building its RHS
/// callable.
///
/// Classification either fully succeeds or aborts with one of these reasons;
/// no partially filled registries are ever handed back. The variants cover
/// model-structure problems (domain count, missing derivatives), solvability
/// violations (duplicate definitions, self-references), backend capability
/// gaps, and the lower-level JIT failures wrapped from [`BuilderError`].
#[derive(Error, Debug)]
pub enum SimulatorError {
    /// Error when the model declares zero or several continuous domains
    #[error("expected exactly one continuous domain, found {found}")]
    ContinuousDomainCount { found: usize },
    /// Error when a constraint is indexed by the continuous domain in more than one position
    #[error("constraint '{constraint}' is indexed by the continuous domain more than once")]
    RepeatedContinuousIndex { constraint: String },
    /// Error when the model declares no derivative variables
    #[error("model declares no derivative variables")]
    NoDerivatives,
    /// Error when two equation instances define the same derivative
    #[error("derivative '{deriv}' is defined by more than one equation")]
    DuplicateDefinition { deriv: CanonicalKey },
    /// Error when a single equation instance references several derivatives
    #[error("constraint '{constraint}' references more than one derivative")]
    MultipleDerivatives { constraint: String },
    /// Error when a residual still references the derivative it defines
    #[error("residual for derivative '{deriv}' references a derivative")]
    SelfReference { deriv: CanonicalKey },
    /// Error when the single derivative in an equation cannot be isolated algebraically
    #[error("unable to isolate the derivative in constraint '{constraint}'")]
    NotIsolatable { constraint: String },
    /// Error when algebraic equations or free indexed quantities meet a backend without algebraic support
    #[error("the {backend} backend cannot integrate algebraic systems ({detail})")]
    UnsupportedAlgebraic { backend: Backend, detail: String },
    /// Error when the backend selector string is not recognized
    #[error("unknown backend '{0}', expected 'interpreted' or 'compiled'")]
    UnknownBackend(String),
    /// Error when an intrinsic function has no equivalent in the selected backend
    #[error("the {backend} backend has no equivalent for intrinsic '{name}'")]
    UnsupportedIntrinsic {
        name: &'static str,
        backend: Backend,
    },
    /// Error when an indexed reference contains no template index position
    #[error("reference '{reference}' does not involve the continuous index")]
    MissingTemplateIndex { reference: String },
    /// Error when an indexed reference contains several template index positions
    #[error("reference '{reference}' uses the continuous index in more than one position")]
    AmbiguousTemplateIndex { reference: String },
    /// Error when the state vector length does not match the number of differential variables
    #[error("Invalid input length: expected {expected}, got {got}")]
    InvalidInputLength { expected: usize, got: usize },
    /// Error when the output buffer length does not match the number of derivatives
    #[error("Invalid output length: expected {expected}, got {got}")]
    InvalidOutputLength { expected: usize, got: usize },
    /// Error when JIT compiling the residual expressions
    #[error("Failed to build RHS function")]
    BuildFunctionError(#[from] BuilderError),
}
