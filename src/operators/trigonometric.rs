//! Linking and calling the trigonometric functions in JIT-compiled code.
//!
//! Each function gets a link/call pair: `link_*` declares the external
//! symbol to the module with a `f64 -> f64` signature, `call_*` emits the
//! call instruction inside a function under construction. Arguments are in
//! radians. The inverse trigonometric functions have no pairs here, which is
//! why the compiled backend refuses them during substitution.

use cranelift::prelude::FunctionBuilder;
use cranelift_codegen::ir::types::F64;
use cranelift_codegen::ir::{AbiParam, InstBuilder, Value};
use cranelift_module::{FuncId, Linkage, Module};

fn link_unary(module: &mut dyn Module, name: &str) -> Result<FuncId, String> {
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(F64));
    sig.returns.push(AbiParam::new(F64));

    module
        .declare_function(name, Linkage::Import, &sig)
        .map_err(|e| e.to_string())
}

fn call_unary(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    let func = module.declare_func_in_func(func_id, builder.func);
    let call = builder.ins().call(func, &[arg]);
    builder.inst_results(call)[0]
}

/// Declares the external sine function, returning the id to call it with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_sin(module: &mut dyn Module) -> Result<FuncId, String> {
    link_unary(module, "sin")
}

/// Emits a call to the previously linked sine function.
pub fn call_sin(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    call_unary(builder, module, func_id, arg)
}

/// Declares the external cosine function, returning the id to call it with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_cos(module: &mut dyn Module) -> Result<FuncId, String> {
    link_unary(module, "cos")
}

/// Emits a call to the previously linked cosine function.
pub fn call_cos(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    call_unary(builder, module, func_id, arg)
}

/// Declares the external tangent function, returning the id to call it with.
///
/// # Errors
/// Returns the module's declaration error as a string.
pub fn link_tan(module: &mut dyn Module) -> Result<FuncId, String> {
    link_unary(module, "tan")
}

/// Emits a call to the previously linked tangent function.
pub fn call_tan(
    builder: &mut FunctionBuilder,
    module: &mut dyn Module,
    func_id: FuncId,
    arg: Value,
) -> Value {
    call_unary(builder, module, func_id, arg)
}
