//! Linking and calling the logarithm functions in JIT-compiled code.
//!
//! Covers the natural logarithm (declared under the libm name `log`) and the
//! base-10 logarithm. Each function gets the usual link/call pair with a
//! `f64 -> f64` signature.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

fn link_log_fn(module: &mut dyn Module, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Declares the external natural-logarithm function, returning the id to
/// call it with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_log(module: &mut dyn Module) -> Result<FuncId, String> {
    link_log_fn(module, "log")
}

/// Emits a call to the previously linked natural-logarithm function.
pub fn call_log(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Declares the external base-10 logarithm function, returning the id to
/// call it with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_log10(module: &mut dyn Module) -> Result<FuncId, String> {
    link_log_fn(module, "log10")
}

/// Emits a call to the previously linked base-10 logarithm function.
pub fn call_log10(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}
