//! Equation classification: sorting expanded constraint instances into
//! derivative definitions and algebraic equations.
//!
//! Every equality instance is scanned for derivative references. Instances
//! defining exactly one derivative are run through the checkers in order
//! (bare reference, product, sum; left side before right) and their isolated
//! residuals are substituted and recorded. Instances with no derivative are
//! algebraic: the compiled backend records them for inspection, the
//! interpreted backend rejects the model outright. Inequalities and
//! constraints not declared over the continuous domain never contribute.
//!
//! Ordering is deterministic: constraints in declaration order, instances in
//! ascending discrete-index order, registries in first-discovery order.

use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use itertools::Itertools;

use crate::checkers::{check_getitem, check_product, check_sum};
use crate::errors::SimulatorError;
use crate::expr::{Expr, Relation};
use crate::key::CanonicalKey;
use crate::model::{ContinuousDomain, Model, VarData, VarKind};
use crate::simulator::{AlgebraicEquation, Backend};
use crate::substitute::{substitute_template_refs, PlaceholderFactory, TemplateMap};

/// Everything classification learns about a model, in discovery order.
#[derive(Debug)]
pub(crate) struct Classification {
    /// Canonical keys of the differentiated states, aligned with
    /// `derivlist`.
    pub(crate) diffvars: Vec<CanonicalKey>,
    /// Canonical keys of the derivatives that received definitions.
    pub(crate) derivlist: Vec<CanonicalKey>,
    /// Substituted defining residual of each derivative.
    pub(crate) rhsdict: HashMap<CanonicalKey, Expr>,
    /// Keys that occur in residuals without being differentiated states.
    pub(crate) algvars: Vec<CanonicalKey>,
    /// Substituted algebraic equalities (compiled backend only).
    pub(crate) alglist: Vec<AlgebraicEquation>,
    /// Key-to-placeholder mapping shared by all substituted expressions.
    pub(crate) templatemap: TemplateMap,
    /// Per-state source data for initial values, aligned with `diffvars`.
    pub(crate) diff_sources: Vec<(Rc<VarData>, Vec<i64>)>,
}

/// The model's single continuous domain.
///
/// # Errors
/// Returns [`SimulatorError::ContinuousDomainCount`] unless exactly one
/// continuous domain is registered. This is checked before any equation is
/// looked at.
pub(crate) fn single_domain(model: &Model) -> Result<ContinuousDomain, SimulatorError> {
    let domains = model.continuous_domains();
    if domains.len() != 1 {
        return Err(SimulatorError::ContinuousDomainCount {
            found: domains.len(),
        });
    }
    Ok(domains[0].clone())
}

/// Classifies every constraint instance of the model.
///
/// Models that declare no derivative variables are rejected before any
/// constraint is read. Declared derivatives whose defining equations never
/// appear (an inequality-only model, say) leave the registries empty
/// without error.
pub(crate) fn classify(
    model: &Model,
    backend: Backend,
    factory: &mut dyn PlaceholderFactory,
) -> Result<Classification, SimulatorError> {
    if model.derivatives().is_empty() {
        return Err(SimulatorError::NoDerivatives);
    }

    let mut c = Classification {
        diffvars: Vec::new(),
        derivlist: Vec::new(),
        rhsdict: HashMap::new(),
        algvars: Vec::new(),
        alglist: Vec::new(),
        templatemap: TemplateMap::default(),
        diff_sources: Vec::new(),
    };

    for constraint in model.constraints() {
        let Some(instances) = model.expand_constraint(constraint)? else {
            continue;
        };
        for inst in instances {
            if inst.eq.relation() != Relation::Eq {
                continue;
            }

            let mut deriv_keys: Vec<CanonicalKey> = Vec::new();
            let mut walk_err: Option<SimulatorError> = None;
            for side in [inst.eq.lhs(), inst.eq.rhs()] {
                side.for_each_indexed(&mut |r| {
                    if r.is_derivative() && walk_err.is_none() {
                        match CanonicalKey::from_indexed(r) {
                            Ok(key) => {
                                if !deriv_keys.contains(&key) {
                                    deriv_keys.push(key);
                                }
                            }
                            Err(e) => walk_err = Some(e),
                        }
                    }
                });
            }
            if let Some(e) = walk_err {
                return Err(e);
            }

            match deriv_keys.len() {
                0 => match backend {
                    Backend::Interpreted => {
                        return Err(SimulatorError::UnsupportedAlgebraic {
                            backend,
                            detail: inst.label,
                        });
                    }
                    Backend::Compiled => {
                        let lhs =
                            substitute_template_refs(inst.eq.lhs(), &mut c.templatemap, factory)?;
                        let rhs =
                            substitute_template_refs(inst.eq.rhs(), &mut c.templatemap, factory)?;
                        c.alglist.push(AlgebraicEquation {
                            name: inst.label,
                            lhs,
                            rhs,
                        });
                    }
                },
                1 => {
                    let isolation = check_getitem(&inst.eq, 0)
                        .or_else(|| check_getitem(&inst.eq, 1))
                        .or_else(|| check_product(&inst.eq, 0))
                        .or_else(|| check_product(&inst.eq, 1))
                        .or_else(|| check_sum(&inst.eq, 0))
                        .or_else(|| check_sum(&inst.eq, 1));
                    let Some(isolation) = isolation else {
                        return Err(SimulatorError::NotIsolatable {
                            constraint: inst.label,
                        });
                    };

                    let dkey = CanonicalKey::from_indexed(&isolation.deriv)?;
                    if isolation.residual.contains_derivative() {
                        return Err(SimulatorError::SelfReference { deriv: dkey });
                    }
                    if c.rhsdict.contains_key(&dkey) {
                        return Err(SimulatorError::DuplicateDefinition { deriv: dkey });
                    }

                    let VarKind::Derivative { of, .. } = &isolation.deriv.var.kind else {
                        unreachable!("checker isolated a non-derivative reference")
                    };
                    let state_key = dkey.with_base(Rc::clone(&of.name));

                    let substituted = substitute_template_refs(
                        &isolation.residual,
                        &mut c.templatemap,
                        factory,
                    )?;
                    c.diffvars.push(state_key.clone());
                    c.derivlist.push(dkey.clone());
                    c.diff_sources.push((Rc::clone(of), state_key.fixed_indices()));
                    c.rhsdict.insert(dkey, substituted);
                }
                _ => {
                    return Err(SimulatorError::MultipleDerivatives {
                        constraint: inst.label,
                    });
                }
            }
        }
    }

    let diffset: HashSet<&CanonicalKey> = c.diffvars.iter().collect();
    c.algvars = c
        .templatemap
        .keys()
        .filter(|key| !diffset.contains(key))
        .cloned()
        .collect();

    if backend == Backend::Interpreted && !c.algvars.is_empty() {
        return Err(SimulatorError::UnsupportedAlgebraic {
            backend,
            detail: format!(
                "undifferentiated variables in residuals: {}",
                c.algvars.iter().map(|k| k.to_string()).join(", ")
            ),
        });
    }

    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::substitute::{CellFactory, SlotFactory};

    fn classify_interpreted(model: &Model) -> Result<Classification, SimulatorError> {
        let mut factory = CellFactory::new("t");
        classify(model, Backend::Interpreted, &mut factory)
    }

    #[test]
    fn test_single_derivative_definition() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        m.constraint("deq", &[t.dim()], move |ix| {
            dv.at(ix).equals(2.0 * v.at(ix))
        });

        let c = classify_interpreted(&m)?;
        assert_eq!(c.derivlist.len(), 1);
        assert_eq!(c.derivlist[0].to_string(), "dv[{t}]");
        assert_eq!(c.diffvars[0].to_string(), "v[{t}]");
        assert!(c.algvars.is_empty());
        assert!(c.alglist.is_empty());
        assert_eq!(c.templatemap.len(), 1);
        assert!(c.rhsdict.contains_key(&c.derivlist[0]));
        Ok(())
    }

    #[test]
    fn test_domain_count_must_be_one() {
        let mut m = Model::new("classify");
        assert!(matches!(
            single_domain(&m),
            Err(SimulatorError::ContinuousDomainCount { found: 0 })
        ));
        let _ = m.continuous("t", 0.0, 1.0);
        let _ = m.continuous("tau", 0.0, 1.0);
        assert!(matches!(
            single_domain(&m),
            Err(SimulatorError::ContinuousDomainCount { found: 2 })
        ));
    }

    #[test]
    fn test_interpreted_backend_rejects_algebraic_equations() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        {
            let (v, dv) = (v.clone(), dv.clone());
            m.constraint("deq", &[t.dim()], move |ix| dv.at(ix).equals(v.at(ix)));
        }
        m.constraint("alg", &[t.dim()], move |ix| {
            (w.at(ix) + v.at(ix)).equals(2.0)
        });

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::UnsupportedAlgebraic {
                backend: Backend::Interpreted,
                ..
            }
        ));
    }

    #[test]
    fn test_compiled_backend_records_algebraic_equations(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        {
            let (v, dv) = (v.clone(), dv.clone());
            m.constraint("deq", &[t.dim()], move |ix| dv.at(ix).equals(v.at(ix)));
        }
        m.constraint("alg", &[t.dim()], move |ix| {
            (w.at(ix) + v.at(ix)).equals(2.0)
        });

        let mut factory = SlotFactory::new("t");
        let c = classify(&m, Backend::Compiled, &mut factory)?;
        assert_eq!(c.alglist.len(), 1);
        assert_eq!(c.alglist[0].name(), "alg[{t}]");
        assert_eq!(c.algvars.len(), 1);
        assert_eq!(c.algvars[0].to_string(), "w[{t}]");
        Ok(())
    }

    #[test]
    fn test_two_derivatives_in_one_equation_are_rejected() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        let dw = m.derivative("dw", &w, &t);
        m.constraint("deq", &[t.dim()], move |ix| {
            (dv.at(ix) + dw.at(ix)).equals(v.at(ix))
        });

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::MultipleDerivatives { constraint } if constraint == "deq[{t}]"
        ));
    }

    #[test]
    fn test_duplicate_definitions_are_rejected() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        {
            let (v, dv) = (v.clone(), dv.clone());
            m.constraint("deq1", &[t.dim()], move |ix| dv.at(ix).equals(v.at(ix)));
        }
        m.constraint("deq2", &[t.dim()], move |ix| {
            dv.at(ix).equals(2.0 * v.at(ix))
        });

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::DuplicateDefinition { deriv } if deriv.to_string() == "dv[{t}]"
        ));
    }

    #[test]
    fn test_self_referential_definitions_are_rejected() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        m.constraint("deq", &[t.dim()], move |ix| {
            dv.at(ix).equals(dv.at(ix) + v.at(ix))
        });

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(err, SimulatorError::SelfReference { .. }));
    }

    #[test]
    fn test_unmatchable_shapes_are_rejected() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        m.constraint("deq", &[t.dim()], move |ix| {
            dv.at(ix).sin().equals(v.at(ix))
        });

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::NotIsolatable { constraint } if constraint == "deq[{t}]"
        ));
    }

    #[test]
    fn test_models_without_derivatives_are_rejected() {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        m.constraint("alg", &[t.dim()], move |ix| v.at(ix).le(2.0));

        let err = classify_interpreted(&m).unwrap_err();
        assert!(matches!(err, SimulatorError::NoDerivatives));
    }

    #[test]
    fn test_inequalities_are_skipped() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        {
            let v = v.clone();
            m.constraint("bound", &[t.dim()], move |ix| v.at(ix).le(10.0));
        }
        m.constraint("deq", &[t.dim()], move |ix| dv.at(ix).equals(v.at(ix)));

        let c = classify_interpreted(&m)?;
        assert_eq!(c.derivlist.len(), 1);
        Ok(())
    }

    #[test]
    fn test_inequality_only_models_classify_empty() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let v = m.var("v", &[t.dim()]);
        let dv = m.derivative("dv", &v, &t);
        {
            let v = v.clone();
            m.constraint("lower", &[t.dim()], move |ix| v.at(ix).ge(0.0));
        }
        m.constraint("upper", &[t.dim()], move |ix| dv.at(ix).le(10.0));

        let c = classify_interpreted(&m)?;
        assert!(c.diffvars.is_empty());
        assert!(c.derivlist.is_empty());
        assert!(c.rhsdict.is_empty());
        assert!(c.algvars.is_empty());
        assert!(c.alglist.is_empty());
        assert!(c.templatemap.is_empty());
        Ok(())
    }

    #[test]
    fn test_indexed_states_classify_per_instance() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("classify");
        let t = m.continuous("t", 0.0, 10.0);
        let s = m.index_set("s", &[1, 3]);
        let w = m.var("w", &[t.dim(), s.dim()]);
        let dw = m.derivative("dw", &w, &t);
        m.constraint("deq", &[t.dim(), s.dim()], move |ix| {
            dw.at(ix).equals(-1.0 * w.at(ix))
        });

        let c = classify_interpreted(&m)?;
        let derivs: Vec<String> = c.derivlist.iter().map(|k| k.to_string()).collect();
        assert_eq!(derivs, vec!["dw[{t},1]", "dw[{t},3]"]);
        let states: Vec<String> = c.diffvars.iter().map(|k| k.to_string()).collect();
        assert_eq!(states, vec!["w[{t},1]", "w[{t},3]"]);
        assert_eq!(c.diff_sources[0].1, vec![1]);
        assert_eq!(c.diff_sources[1].1, vec![3]);
        Ok(())
    }
}
