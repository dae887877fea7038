//! Linking and calling the exponential function in JIT-compiled code.
//!
//! `link_exp` declares the external `exp` symbol to the Cranelift module
//! with a `f64 -> f64` signature; `call_exp` emits the call instruction
//! inside a function under construction.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

/// Declares the external exponential function, returning the id to call it
/// with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_exp(module: &mut dyn Module) -> Result<FuncId, String> {
    // exp(f64) -> f64
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function("exp", Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

/// Emits a call to the previously linked exponential function.
pub fn call_exp(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}
