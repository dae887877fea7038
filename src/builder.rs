//! JIT compilation of substituted residuals into one combined native
//! function.
//!
//! All residuals compile into a single function with the signature
//! `extern "C" fn(input: *const f64, output: *mut f64)`. The input array
//! layout is fixed by slot assignment: position 0 holds the continuous-index
//! value, positions 1.. hold the substituted placeholders in discovery
//! order, and the live values (mutable parameters and unindexed variables)
//! come after those. The output array receives one value per residual, in
//! residual order.
//!
//! The finished [`JITModule`] is deliberately dropped without freeing its
//! memory, so the returned code pointer stays valid for the life of the
//! process.

use std::rc::Rc;
use std::sync::Arc;

use cranelift::prelude::*;
use cranelift_codegen::{ir::immediates::Offset32, Context};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use isa::TargetIsa;

use crate::errors::BuilderError;
use crate::expr::{Expr, Intrinsic};
use crate::model::{ParamData, ScalarData};
use crate::operators;
use crate::substitute::Placeholder;
use crate::types::RawRhsFn;

/// Mutable parameters and unindexed variables occurring in compiled
/// residuals, with the input slots assigned to them.
///
/// These cannot fold at compile time; the caller re-reads their current
/// values into the input array before every invocation.
#[derive(Clone, Debug, Default)]
pub(crate) struct LiveValues {
    pub(crate) params: Vec<(Rc<ParamData>, u32)>,
    pub(crate) scalars: Vec<(Rc<ScalarData>, u32)>,
}

impl LiveValues {
    /// Scans residuals for live leaves, assigning input slots from
    /// `first_slot` upward in discovery order. Repeated occurrences of the
    /// same component share one slot.
    pub(crate) fn collect<'a, I>(exprs: I, first_slot: u32) -> Self
    where
        I: IntoIterator<Item = &'a Expr>,
    {
        let mut live = LiveValues::default();
        let mut next = first_slot;
        for expr in exprs {
            visit_live(expr, &mut live, &mut next);
        }
        live
    }

    /// Number of live slots assigned.
    pub(crate) fn len(&self) -> usize {
        self.params.len() + self.scalars.len()
    }

    fn param_slot(&self, data: &Rc<ParamData>) -> Option<u32> {
        self.params
            .iter()
            .find(|(p, _)| Rc::ptr_eq(p, data))
            .map(|(_, slot)| *slot)
    }

    fn scalar_slot(&self, data: &Rc<ScalarData>) -> Option<u32> {
        self.scalars
            .iter()
            .find(|(s, _)| Rc::ptr_eq(s, data))
            .map(|(_, slot)| *slot)
    }
}

fn visit_live(expr: &Expr, live: &mut LiveValues, next: &mut u32) {
    match expr {
        Expr::Param(p) => {
            if p.is_mutable() && live.param_slot(&p.0).is_none() {
                live.params.push((Rc::clone(&p.0), *next));
                *next += 1;
            }
        }
        Expr::Scalar(s) => {
            if live.scalar_slot(&s.0).is_none() {
                live.scalars.push((Rc::clone(&s.0), *next));
                *next += 1;
            }
        }
        Expr::Sum(s) => {
            for (_, term) in s.terms() {
                visit_live(term, live, next);
            }
        }
        Expr::Product(p) => {
            for factor in p.numerator().iter().chain(p.denominator()) {
                visit_live(factor, live, next);
            }
        }
        Expr::Pow(base, _) => visit_live(base, live, next),
        Expr::Intrinsic(_, arg) => visit_live(arg, live, next),
        Expr::Const(_) | Expr::Indexed(_) | Expr::Index(_) | Expr::Place(_) => {}
    }
}

/// Function ids of the external math symbols, declared once per module.
struct Links {
    exp: FuncId,
    log: FuncId,
    log10: FuncId,
    sqrt: FuncId,
    sin: FuncId,
    cos: FuncId,
    tan: FuncId,
}

impl Links {
    fn declare(module: &mut JITModule) -> Result<Self, BuilderError> {
        Ok(Links {
            exp: operators::exp::link_exp(module).map_err(BuilderError::DeclarationError)?,
            log: operators::ln::link_log(module).map_err(BuilderError::DeclarationError)?,
            log10: operators::ln::link_log10(module).map_err(BuilderError::DeclarationError)?,
            sqrt: operators::sqrt::link_sqrt(module).map_err(BuilderError::DeclarationError)?,
            sin: operators::trigonometric::link_sin(module)
                .map_err(BuilderError::DeclarationError)?,
            cos: operators::trigonometric::link_cos(module)
                .map_err(BuilderError::DeclarationError)?,
            tan: operators::trigonometric::link_tan(module)
                .map_err(BuilderError::DeclarationError)?,
        })
    }
}

/// Creates an instruction-set target for the host machine.
///
/// # Errors
/// Returns [`BuilderError::HostMachineNotSupported`] if the host
/// architecture has no Cranelift backend, and a codegen error if flag
/// validation fails.
fn create_isa() -> Result<Arc<dyn TargetIsa>, BuilderError> {
    let mut flag_builder = settings::builder();

    // JITModule rejects position-independent code on every architecture;
    // libcalls resolve through the registered symbols instead of colocated
    // stubs
    flag_builder.set("use_colocated_libcalls", "false").unwrap();
    flag_builder.set("is_pic", "false").unwrap();

    let isa_builder = cranelift_native::builder()
        .map_err(|msg| BuilderError::HostMachineNotSupported(msg.to_string()))?;

    isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(BuilderError::CodegenError)
}

/// Creates a JIT module with speed optimization, debug-build verification,
/// and the external math symbols registered.
fn create_module(isa: Arc<dyn TargetIsa>) -> JITModule {
    let mut flags_builder = settings::builder();
    flags_builder.set("opt_level", "speed").unwrap();

    #[cfg(debug_assertions)]
    {
        flags_builder.set("enable_verifier", "true").unwrap();
        flags_builder.set("enable_alias_analysis", "true").unwrap();
    }
    #[cfg(not(debug_assertions))]
    {
        flags_builder.set("enable_verifier", "false").unwrap();
        flags_builder.set("enable_alias_analysis", "false").unwrap();
    }

    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());

    builder.symbol("exp", f64::exp as *const u8);
    builder.symbol("log", f64::ln as *const u8);
    builder.symbol("log10", f64::log10 as *const u8);
    builder.symbol("sqrt", f64::sqrt as *const u8);
    builder.symbol("sin", f64::sin as *const u8);
    builder.symbol("cos", f64::cos as *const u8);
    builder.symbol("tan", f64::tan as *const u8);

    JITModule::new(builder)
}

/// Compiles the residuals into one native function over the shared input
/// layout.
///
/// # Errors
/// Returns a [`BuilderError`] if the host is unsupported, a residual still
/// contains something only the interpreter can evaluate, or module
/// compilation fails.
pub(crate) fn build_combined_function(
    exprs: &[&Expr],
    live: &LiveValues,
) -> Result<RawRhsFn, BuilderError> {
    let mut builder_context = FunctionBuilderContext::new();
    let mut codegen_context = Context::new();
    let isa = create_isa()?;
    let mut module = create_module(isa);
    let links = Links::declare(&mut module)?;

    // fn(input_ptr: *const f64, output_ptr: *mut f64)
    let mut sig = module.make_signature();
    let pointer_type = module.target_config().pointer_type();
    sig.params.push(AbiParam::new(pointer_type));
    sig.params.push(AbiParam::new(pointer_type));

    let func_id = module
        .declare_function("rhs", Linkage::Export, &sig)
        .map_err(|e| BuilderError::DeclarationError(e.to_string()))?;

    codegen_context.func.signature = sig;
    let mut builder = FunctionBuilder::new(&mut codegen_context.func, &mut builder_context);

    let entry_block = builder.create_block();
    builder.append_block_params_for_function_params(entry_block);
    builder.switch_to_block(entry_block);
    builder.seal_block(entry_block);

    let input_ptr = builder.block_params(entry_block)[0];
    let output_ptr = builder.block_params(entry_block)[1];

    let mut results = Vec::with_capacity(exprs.len());
    for expr in exprs {
        results.push(codegen_expr(
            expr,
            &mut builder,
            &mut module,
            input_ptr,
            live,
            &links,
        )?);
    }

    for (i, result) in results.iter().enumerate() {
        let offset = i as i64 * 8;
        builder.ins().store(
            MemFlags::new(),
            *result,
            output_ptr,
            Offset32::new(offset as i32),
        );
    }

    builder.ins().return_(&[]);
    builder.finalize();

    module
        .define_function(func_id, &mut codegen_context)
        .map_err(|e| BuilderError::FunctionError(e.to_string()))?;
    module
        .finalize_definitions()
        .map_err(BuilderError::ModuleError)?;

    let code = module.get_finalized_function(func_id);

    // SAFETY: the function was compiled with exactly this signature, and the
    // module is dropped without free_memory, so its code mapping is never
    // reclaimed and the pointer stays valid.
    Ok(unsafe { std::mem::transmute::<*const u8, RawRhsFn>(code) })
}

fn load_slot(builder: &mut FunctionBuilder, input_ptr: Value, slot: u32) -> Value {
    let offset = slot as i64 * 8;
    builder.ins().load(
        types::F64,
        MemFlags::new(),
        input_ptr,
        Offset32::new(offset as i32),
    )
}

/// Expands an integer power into squarings and multiplies, with a final
/// reciprocal for negative exponents.
fn codegen_integer_power(builder: &mut FunctionBuilder, base: Value, exponent: i32) -> Value {
    match exponent {
        0 => builder.ins().f64const(1.0),
        1 => base,
        -1 => {
            let one = builder.ins().f64const(1.0);
            builder.ins().fdiv(one, base)
        }
        _ => {
            let mut remaining = exponent.unsigned_abs();
            let mut accumulator = base;
            while remaining & 1 == 0 {
                accumulator = builder.ins().fmul(accumulator, accumulator);
                remaining >>= 1;
            }
            let mut result = accumulator;
            remaining >>= 1;
            while remaining > 0 {
                accumulator = builder.ins().fmul(accumulator, accumulator);
                if remaining & 1 == 1 {
                    result = builder.ins().fmul(result, accumulator);
                }
                remaining >>= 1;
            }
            if exponent < 0 {
                let one = builder.ins().f64const(1.0);
                result = builder.ins().fdiv(one, result);
            }
            result
        }
    }
}

fn codegen_expr(
    expr: &Expr,
    builder: &mut FunctionBuilder,
    module: &mut JITModule,
    input_ptr: Value,
    live: &LiveValues,
    links: &Links,
) -> Result<Value, BuilderError> {
    Ok(match expr {
        Expr::Const(c) => builder.ins().f64const(*c),
        Expr::Param(p) => {
            if p.is_mutable() {
                let slot = live.param_slot(&p.0).ok_or_else(|| {
                    BuilderError::FunctionError(format!(
                        "no input slot assigned to parameter '{}'",
                        p.name()
                    ))
                })?;
                load_slot(builder, input_ptr, slot)
            } else {
                builder.ins().f64const(p.value())
            }
        }
        Expr::Scalar(s) => {
            let slot = live.scalar_slot(&s.0).ok_or_else(|| {
                BuilderError::FunctionError(format!(
                    "no input slot assigned to variable '{}'",
                    s.name()
                ))
            })?;
            load_slot(builder, input_ptr, slot)
        }
        Expr::Place(Placeholder::Slot(slot)) => load_slot(builder, input_ptr, slot.slot()),
        Expr::Place(Placeholder::Cell(cell)) => {
            return Err(BuilderError::FunctionError(format!(
                "cell placeholder '{}' reached the compiler",
                cell.name()
            )));
        }
        Expr::Indexed(r) => {
            return Err(BuilderError::FunctionError(format!(
                "unsubstituted indexed reference '{}'",
                r.name()
            )));
        }
        Expr::Index(t) => {
            return Err(BuilderError::FunctionError(format!(
                "unsubstituted index '{t}'"
            )));
        }
        Expr::Sum(s) => {
            let mut acc = builder.ins().f64const(s.constant());
            for (coef, term) in s.terms() {
                let value = codegen_expr(term, builder, module, input_ptr, live, links)?;
                if *coef == 1.0 {
                    acc = builder.ins().fadd(acc, value);
                } else if *coef == -1.0 {
                    acc = builder.ins().fsub(acc, value);
                } else {
                    let c = builder.ins().f64const(*coef);
                    let scaled = builder.ins().fmul(c, value);
                    acc = builder.ins().fadd(acc, scaled);
                }
            }
            acc
        }
        Expr::Product(p) => {
            let mut factors = p.numerator().iter();
            let mut acc = if p.coef() == 1.0 {
                match factors.next() {
                    Some(first) => codegen_expr(first, builder, module, input_ptr, live, links)?,
                    None => builder.ins().f64const(1.0),
                }
            } else {
                builder.ins().f64const(p.coef())
            };
            for factor in factors {
                let value = codegen_expr(factor, builder, module, input_ptr, live, links)?;
                acc = builder.ins().fmul(acc, value);
            }
            for factor in p.denominator() {
                let value = codegen_expr(factor, builder, module, input_ptr, live, links)?;
                acc = builder.ins().fdiv(acc, value);
            }
            acc
        }
        Expr::Pow(base, exponent) => {
            let base = codegen_expr(base, builder, module, input_ptr, live, links)?;
            codegen_integer_power(builder, base, *exponent)
        }
        Expr::Intrinsic(tag, arg) => {
            let arg = codegen_expr(arg, builder, module, input_ptr, live, links)?;
            match tag {
                Intrinsic::Sin => operators::trigonometric::call_sin(builder, module, links.sin, arg),
                Intrinsic::Cos => operators::trigonometric::call_cos(builder, module, links.cos, arg),
                Intrinsic::Tan => operators::trigonometric::call_tan(builder, module, links.tan, arg),
                Intrinsic::Exp => operators::exp::call_exp(builder, module, links.exp, arg),
                Intrinsic::Ln => operators::ln::call_log(builder, module, links.log, arg),
                Intrinsic::Log10 => operators::ln::call_log10(builder, module, links.log10, arg),
                Intrinsic::Sqrt => operators::sqrt::call_sqrt(builder, module, links.sqrt, arg),
                Intrinsic::Abs => builder.ins().fabs(arg),
                Intrinsic::Asin | Intrinsic::Acos | Intrinsic::Atan => {
                    return Err(BuilderError::FunctionError(format!(
                        "no linked symbol for intrinsic '{}'",
                        tag.name()
                    )));
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ix, Model};
    use crate::substitute::{substitute_template_refs, SlotFactory, TemplateMap};

    fn compile_one(expr: &Expr, live: &LiveValues) -> Result<RawRhsFn, BuilderError> {
        build_combined_function(&[expr], live)
    }

    #[test]
    fn test_slot_loads_and_arithmetic() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("builder");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[t.dim()]);

        let ix = Ix::T(t.template());
        // 2*v - w/4 + t
        let e = 2.0 * v.at(&[ix.clone()]) - w.at(&[ix.clone()]) / 4.0 + t.expr();
        let mut map = TemplateMap::default();
        let mut factory = SlotFactory::new("t");
        let substituted = substitute_template_refs(&e, &mut map, &mut factory)?;

        let live = LiveValues::default();
        let f = compile_one(&substituted, &live)?;

        // slot 0 = t, slot 1 = v, slot 2 = w
        let input = [0.5_f64, 3.0, 8.0];
        let mut output = [0.0_f64];
        f(input.as_ptr(), output.as_mut_ptr());
        assert_eq!(output[0], 2.0 * 3.0 - 8.0 / 4.0 + 0.5);
        Ok(())
    }

    #[test]
    fn test_live_values_load_from_trailing_slots() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("builder");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);
        let mp = m.param_mut("mp", 5.0);
        let p = m.param("p", 3.0);
        let y = m.scalar_var("y", 2.0);

        let ix = Ix::T(t.template());
        // mp*v + p*y: the fixed parameter folds, mp and y stay live
        let e = mp.expr() * v.at(&[ix]) + p.expr() * y.expr();
        let mut map = TemplateMap::default();
        let mut factory = SlotFactory::new("t");
        let substituted = substitute_template_refs(&e, &mut map, &mut factory)?;

        let live = LiveValues::collect([&substituted], factory.slots_used());
        assert_eq!(live.len(), 2);
        assert_eq!(live.params[0].1, 2);
        assert_eq!(live.scalars[0].1, 3);

        let f = compile_one(&substituted, &live)?;
        // slot 0 = t, slot 1 = v, slot 2 = mp, slot 3 = y
        let input = [0.0_f64, 4.0, 7.0, 2.0];
        let mut output = [0.0_f64];
        f(input.as_ptr(), output.as_mut_ptr());
        assert_eq!(output[0], 7.0 * 4.0 + 3.0 * 2.0);
        Ok(())
    }

    #[test]
    fn test_intrinsics_and_powers() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("builder");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);

        let ix = Ix::T(t.template());
        let exprs = [
            v.at(&[ix.clone()]).sin(),
            v.at(&[ix.clone()]).exp().ln(),
            v.at(&[ix.clone()]).pow(3),
            v.at(&[ix.clone()]).pow(-2),
            v.at(&[ix.clone()]).sqrt().abs(),
        ];
        let mut map = TemplateMap::default();
        let mut factory = SlotFactory::new("t");
        let substituted: Vec<Expr> = exprs
            .iter()
            .map(|e| substitute_template_refs(e, &mut map, &mut factory))
            .collect::<Result<_, _>>()?;

        let live = LiveValues::default();
        let refs: Vec<&Expr> = substituted.iter().collect();
        let f = build_combined_function(&refs, &live)?;

        let x = 0.7_f64;
        let input = [0.0_f64, x];
        let mut output = [0.0_f64; 5];
        f(input.as_ptr(), output.as_mut_ptr());
        assert!((output[0] - x.sin()).abs() < 1e-12);
        assert!((output[1] - x).abs() < 1e-12);
        assert!((output[2] - x.powi(3)).abs() < 1e-12);
        assert!((output[3] - x.powi(-2)).abs() < 1e-12);
        assert!((output[4] - x.sqrt()).abs() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_unsubstituted_references_are_compile_errors() {
        let mut m = Model::new("builder");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);

        let e = v.at(&[Ix::T(t.template())]);
        let live = LiveValues::default();
        let err = compile_one(&e, &live).unwrap_err();
        assert!(matches!(err, BuilderError::FunctionError(_)));
    }

    #[test]
    fn test_empty_residual_sets_compile() -> Result<(), Box<dyn std::error::Error>> {
        // models whose declared derivatives never receive definitions carry
        // zero residuals; the module must still build and finalize
        let live = LiveValues::default();
        let f = build_combined_function(&[], &live)?;

        let input = [0.0_f64];
        let mut output: [f64; 0] = [];
        f(input.as_ptr(), output.as_mut_ptr());
        Ok(())
    }
}
