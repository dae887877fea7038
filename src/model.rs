//! Programmatic modeling layer for indexed differential-equation systems.
//!
//! A [`Model`] owns its components; the builder methods hand back cheap
//! cloneable handles ([`Var`], [`Param`], ...) that construct expression
//! leaves. Components share their data through `Rc`, so values changed
//! through a handle (mutable parameters, initial conditions) are seen by
//! every expression already built from it.
//!
//! Constraints are stored as rules. [`Model::expand_constraint`] instantiates
//! a rule once per combination of discrete index values while keeping the
//! continuous position symbolic, which is the form the classifier consumes.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::rc::Rc;

use itertools::Itertools;

use crate::errors::SimulatorError;
use crate::expr::{Equation, Expr, IndexedRef, ParamRef, ScalarRef};
use crate::key::TemplateIndex;

/// Interval of a continuous independent variable, usually time.
#[derive(Debug)]
pub(crate) struct DomainData {
    pub(crate) id: u32,
    pub(crate) name: Rc<str>,
    pub(crate) bounds: (f64, f64),
}

/// Finite ordered collection of discrete index values.
#[derive(Debug)]
pub(crate) struct SetData {
    pub(crate) name: Rc<str>,
    pub(crate) elements: Vec<i64>,
}

/// Distinguishes states from the derivative variables defined over them.
#[derive(Debug)]
pub(crate) enum VarKind {
    Plain,
    Derivative {
        of: Rc<VarData>,
        wrt: Rc<DomainData>,
    },
}

#[derive(Debug)]
pub(crate) struct VarData {
    pub(crate) name: Rc<str>,
    pub(crate) dims: Vec<Dim>,
    pub(crate) kind: VarKind,
    default_initial: Cell<f64>,
    initials: RefCell<HashMap<Vec<i64>, f64>>,
}

impl VarData {
    pub(crate) fn is_derivative(&self) -> bool {
        matches!(self.kind, VarKind::Derivative { .. })
    }

    /// Initial value of the instance with the given concrete discrete
    /// indices, falling back to the variable-wide default.
    pub(crate) fn initial_for(&self, fixed: &[i64]) -> f64 {
        self.initials
            .borrow()
            .get(fixed)
            .copied()
            .unwrap_or_else(|| self.default_initial.get())
    }
}

#[derive(Debug)]
pub(crate) struct ParamData {
    pub(crate) name: Rc<str>,
    pub(crate) value: Cell<f64>,
    pub(crate) mutable: bool,
}

#[derive(Debug)]
pub(crate) struct ScalarData {
    pub(crate) name: Rc<str>,
    pub(crate) value: Cell<f64>,
}

/// Handle to a continuous domain registered on a model.
#[derive(Clone, Debug)]
pub struct ContinuousDomain {
    pub(crate) data: Rc<DomainData>,
}

impl ContinuousDomain {
    /// Name of the domain.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// Lower and upper bounds of the domain interval.
    pub fn bounds(&self) -> (f64, f64) {
        self.data.bounds
    }

    /// A template index standing for "the current value" of this domain.
    pub fn template(&self) -> TemplateIndex {
        TemplateIndex {
            id: self.data.id,
            name: Rc::clone(&self.data.name),
        }
    }

    /// The domain's current value as an expression leaf, for equations that
    /// use the independent variable itself (e.g. forcing terms).
    pub fn expr(&self) -> Expr {
        Expr::Index(self.template())
    }

    /// This domain as a dimension of an indexed component.
    pub fn dim(&self) -> Dim {
        Dim::Continuous(self.clone())
    }
}

/// Handle to a discrete index set registered on a model.
#[derive(Clone, Debug)]
pub struct IndexSet {
    pub(crate) data: Rc<SetData>,
}

impl IndexSet {
    /// Name of the set.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The member values in declaration order.
    pub fn elements(&self) -> &[i64] {
        &self.data.elements
    }

    /// This set as a dimension of an indexed component.
    pub fn dim(&self) -> Dim {
        Dim::Discrete(self.clone())
    }
}

/// One dimension of an indexed component.
#[derive(Clone, Debug)]
pub enum Dim {
    Continuous(ContinuousDomain),
    Discrete(IndexSet),
}

/// An index argument of an indexed reference: either the symbolic template
/// position or a concrete member value.
#[derive(Clone, Debug)]
pub enum Ix {
    T(TemplateIndex),
    K(i64),
}

/// Handle to an indexed variable (plain state or derivative).
#[derive(Clone, Debug)]
pub struct Var {
    pub(crate) data: Rc<VarData>,
}

impl Var {
    /// Name of the variable.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// References the variable at the given index arguments.
    ///
    /// # Panics
    /// Panics if the number of arguments differs from the variable's number
    /// of dimensions.
    pub fn at(&self, args: &[Ix]) -> Expr {
        assert_eq!(
            args.len(),
            self.data.dims.len(),
            "variable '{}' takes {} indices, got {}",
            self.data.name,
            self.data.dims.len(),
            args.len()
        );
        Expr::Indexed(IndexedRef {
            var: Rc::clone(&self.data),
            args: args.to_vec(),
        })
    }

    /// Sets the initial value used for every instance of this variable that
    /// has no instance-specific override.
    pub fn set_initial(&self, value: f64) {
        self.data.default_initial.set(value);
    }

    /// Sets the initial value of one instance, identified by its concrete
    /// discrete indices in declaration order.
    pub fn set_initial_at(&self, fixed: &[i64], value: f64) {
        self.data
            .initials
            .borrow_mut()
            .insert(fixed.to_vec(), value);
    }
}

/// Handle to a scalar parameter.
#[derive(Clone, Debug)]
pub struct Param {
    pub(crate) data: Rc<ParamData>,
}

impl Param {
    /// Name of the parameter.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The parameter as an expression leaf.
    pub fn expr(&self) -> Expr {
        Expr::Param(ParamRef(Rc::clone(&self.data)))
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        self.data.value.get()
    }

    /// Updates the value.
    ///
    /// # Panics
    /// Panics if the parameter was registered as fixed.
    pub fn set_value(&self, value: f64) {
        assert!(
            self.data.mutable,
            "parameter '{}' is fixed; register it with param_mut to update it",
            self.data.name
        );
        self.data.value.set(value);
    }
}

/// Handle to an unindexed variable.
///
/// Unlike indexed states, an unindexed variable never becomes part of the
/// state vector; the RHS reads its current value on every evaluation.
#[derive(Clone, Debug)]
pub struct ScalarVar {
    pub(crate) data: Rc<ScalarData>,
}

impl ScalarVar {
    /// Name of the variable.
    pub fn name(&self) -> &str {
        &self.data.name
    }

    /// The variable as an expression leaf.
    pub fn expr(&self) -> Expr {
        Expr::Scalar(ScalarRef(Rc::clone(&self.data)))
    }

    /// Current value.
    pub fn value(&self) -> f64 {
        self.data.value.get()
    }

    /// Updates the value.
    pub fn set_value(&self, value: f64) {
        self.data.value.set(value);
    }
}

/// A constraint rule plus the dimensions it is declared over.
pub(crate) struct ConstraintData {
    pub(crate) name: Rc<str>,
    pub(crate) dims: Vec<Dim>,
    rule: Box<dyn Fn(&[Ix]) -> Equation>,
}

/// One expanded constraint instance: concrete discrete indices, symbolic
/// continuous position.
#[derive(Debug)]
pub(crate) struct Instance {
    pub(crate) label: String,
    pub(crate) eq: Equation,
}

/// An indexed differential-equation model under construction.
pub struct Model {
    name: String,
    domains: Vec<ContinuousDomain>,
    derivatives: Vec<Var>,
    constraints: Vec<ConstraintData>,
    names: HashSet<Rc<str>>,
    next_domain_id: u32,
}

impl Model {
    /// Creates an empty model.
    pub fn new(name: impl Into<String>) -> Self {
        Model {
            name: name.into(),
            domains: Vec::new(),
            derivatives: Vec::new(),
            constraints: Vec::new(),
            names: HashSet::new(),
            next_domain_id: 0,
        }
    }

    /// Name of the model.
    pub fn name(&self) -> &str {
        &self.name
    }

    fn register(&mut self, name: &str) -> Rc<str> {
        let name: Rc<str> = Rc::from(name);
        assert!(
            self.names.insert(Rc::clone(&name)),
            "component name '{name}' already used on model '{}'",
            self.name
        );
        name
    }

    /// Registers a continuous domain with the given interval bounds.
    ///
    /// # Panics
    /// Panics if the name is already used or the interval is empty.
    pub fn continuous(&mut self, name: &str, lo: f64, hi: f64) -> ContinuousDomain {
        assert!(lo < hi, "continuous domain '{name}' needs lo < hi");
        let name = self.register(name);
        let domain = ContinuousDomain {
            data: Rc::new(DomainData {
                id: self.next_domain_id,
                name,
                bounds: (lo, hi),
            }),
        };
        self.next_domain_id += 1;
        self.domains.push(domain.clone());
        domain
    }

    /// Registers a discrete index set with the given member values.
    pub fn index_set(&mut self, name: &str, elements: &[i64]) -> IndexSet {
        let name = self.register(name);
        IndexSet {
            data: Rc::new(SetData {
                name,
                elements: elements.to_vec(),
            }),
        }
    }

    /// Registers an indexed variable over the given dimensions.
    ///
    /// # Panics
    /// Panics if no dimension is given; use [`Model::scalar_var`] for
    /// unindexed quantities.
    pub fn var(&mut self, name: &str, dims: &[Dim]) -> Var {
        assert!(!dims.is_empty(), "variable '{name}' needs at least one dimension");
        let name = self.register(name);
        Var {
            data: Rc::new(VarData {
                name,
                dims: dims.to_vec(),
                kind: VarKind::Plain,
                default_initial: Cell::new(0.0),
                initials: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Registers the derivative of `of` with respect to `wrt`, indexed like
    /// `of`.
    ///
    /// # Panics
    /// Panics if `of` is not indexed by `wrt` or is itself a derivative.
    pub fn derivative(&mut self, name: &str, of: &Var, wrt: &ContinuousDomain) -> Var {
        assert!(
            !of.data.is_derivative(),
            "cannot differentiate derivative variable '{}'",
            of.data.name
        );
        let indexed_by_wrt = of.data.dims.iter().any(
            |dim| matches!(dim, Dim::Continuous(d) if d.data.id == wrt.data.id),
        );
        assert!(
            indexed_by_wrt,
            "variable '{}' is not indexed by domain '{}'",
            of.data.name,
            wrt.data.name
        );
        let name = self.register(name);
        let var = Var {
            data: Rc::new(VarData {
                name,
                dims: of.data.dims.clone(),
                kind: VarKind::Derivative {
                    of: Rc::clone(&of.data),
                    wrt: Rc::clone(&wrt.data),
                },
                default_initial: Cell::new(0.0),
                initials: RefCell::new(HashMap::new()),
            }),
        };
        self.derivatives.push(var.clone());
        var
    }

    /// Registers an unindexed variable with an initial value.
    pub fn scalar_var(&mut self, name: &str, value: f64) -> ScalarVar {
        let name = self.register(name);
        ScalarVar {
            data: Rc::new(ScalarData {
                name,
                value: Cell::new(value),
            }),
        }
    }

    /// Registers a fixed parameter. Its value folds into coefficients during
    /// classification.
    pub fn param(&mut self, name: &str, value: f64) -> Param {
        self.param_inner(name, value, false)
    }

    /// Registers a mutable parameter. It stays a live factor in the RHS and
    /// may be updated between evaluations.
    pub fn param_mut(&mut self, name: &str, value: f64) -> Param {
        self.param_inner(name, value, true)
    }

    fn param_inner(&mut self, name: &str, value: f64, mutable: bool) -> Param {
        let name = self.register(name);
        Param {
            data: Rc::new(ParamData {
                name,
                value: Cell::new(value),
                mutable,
            }),
        }
    }

    /// Registers a constraint rule over the given dimensions.
    ///
    /// The rule receives one index argument per dimension: the template index
    /// for the continuous position and a concrete member value for each
    /// discrete position.
    pub fn constraint<F>(&mut self, name: &str, dims: &[Dim], rule: F)
    where
        F: Fn(&[Ix]) -> Equation + 'static,
    {
        let name = self.register(name);
        self.constraints.push(ConstraintData {
            name,
            dims: dims.to_vec(),
            rule: Box::new(rule),
        });
    }

    /// The continuous domains registered so far, in declaration order.
    pub(crate) fn continuous_domains(&self) -> &[ContinuousDomain] {
        &self.domains
    }

    /// The derivative variables registered so far, in declaration order.
    pub(crate) fn derivatives(&self) -> &[Var] {
        &self.derivatives
    }

    /// The constraints registered so far, in declaration order.
    pub(crate) fn constraints(&self) -> &[ConstraintData] {
        &self.constraints
    }

    /// Expands a constraint into one instance per combination of discrete
    /// index values, with the continuous position kept symbolic.
    ///
    /// Returns `Ok(None)` for constraints not declared over a continuous
    /// domain; those never contribute equations.
    ///
    /// # Errors
    /// Returns [`SimulatorError::RepeatedContinuousIndex`] if the constraint
    /// is declared over a continuous domain in more than one position.
    pub(crate) fn expand_constraint(
        &self,
        constraint: &ConstraintData,
    ) -> Result<Option<Vec<Instance>>, SimulatorError> {
        let mut template = None;
        let mut discrete: Vec<&[i64]> = Vec::new();
        for dim in &constraint.dims {
            match dim {
                Dim::Continuous(d) => {
                    if template.is_some() {
                        return Err(SimulatorError::RepeatedContinuousIndex {
                            constraint: constraint.name.to_string(),
                        });
                    }
                    template = Some(d.template());
                }
                Dim::Discrete(s) => discrete.push(&s.data.elements),
            }
        }
        let Some(template) = template else {
            return Ok(None);
        };

        // The nullary product is one empty combination, not zero of them.
        let combos: Vec<Vec<i64>> = if discrete.is_empty() {
            vec![Vec::new()]
        } else {
            discrete
                .iter()
                .map(|els| els.iter().copied())
                .multi_cartesian_product()
                .collect()
        };

        let mut instances = Vec::with_capacity(combos.len());
        for combo in combos {
            let mut values = combo.iter();
            let mut label = format!("{}[", constraint.name);
            let args: Vec<Ix> = constraint
                .dims
                .iter()
                .enumerate()
                .map(|(i, dim)| {
                    if i > 0 {
                        label.push(',');
                    }
                    match dim {
                        Dim::Continuous(_) => {
                            let _ = write!(label, "{template}");
                            Ix::T(template.clone())
                        }
                        Dim::Discrete(_) => {
                            let v = values.next().copied().unwrap_or_default();
                            let _ = write!(label, "{v}");
                            Ix::K(v)
                        }
                    }
                })
                .collect();
            label.push(']');
            instances.push(Instance {
                label,
                eq: (constraint.rule)(&args),
            });
        }
        Ok(Some(instances))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_enumerates_discrete_combinations_in_order(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("expansion");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 3]);
        let u = m.index_set("u", &[0, 2]);
        let w = m.var("w", &[s.dim(), t.dim(), u.dim()]);
        m.constraint("c", &[s.dim(), t.dim(), u.dim()], move |ix| {
            w.at(ix).equals(0.0)
        });

        let c = &m.constraints()[0];
        let instances = m.expand_constraint(c)?.ok_or("expected instances")?;
        let labels: Vec<&str> = instances.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["c[1,{t},0]", "c[1,{t},2]", "c[3,{t},0]", "c[3,{t},2]"]
        );
        Ok(())
    }

    #[test]
    fn test_expansion_without_continuous_dimension_yields_none(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("expansion");
        let _t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let y = m.scalar_var("y", 0.0);
        m.constraint("point", &[s.dim()], move |_| y.expr().equals(1.0));

        let c = &m.constraints()[0];
        assert!(m.expand_constraint(c)?.is_none());
        Ok(())
    }

    #[test]
    fn test_expansion_rejects_repeated_continuous_dimension() {
        let mut m = Model::new("expansion");
        let t = m.continuous("t", 0.0, 1.0);
        let y = m.scalar_var("y", 0.0);
        m.constraint("twice", &[t.dim(), t.dim()], move |_| y.expr().equals(1.0));

        let c = &m.constraints()[0];
        let err = m.expand_constraint(c).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::RepeatedContinuousIndex { constraint } if constraint == "twice"
        ));
    }

    #[test]
    fn test_initial_values_fall_back_to_default() {
        let mut m = Model::new("initials");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let w = m.var("w", &[t.dim(), s.dim()]);

        w.set_initial(0.5);
        w.set_initial_at(&[2], 4.0);
        assert_eq!(w.data.initial_for(&[1]), 0.5);
        assert_eq!(w.data.initial_for(&[2]), 4.0);
    }

    #[test]
    #[should_panic(expected = "takes 2 indices")]
    fn test_reference_arity_is_checked() {
        let mut m = Model::new("arity");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let w = m.var("w", &[t.dim(), s.dim()]);
        let _ = w.at(&[Ix::T(t.template())]);
    }

    #[test]
    #[should_panic(expected = "is fixed")]
    fn test_fixed_parameters_reject_updates() {
        let mut m = Model::new("params");
        let p = m.param("p", 1.0);
        p.set_value(2.0);
    }

    #[test]
    #[should_panic(expected = "not indexed by domain")]
    fn test_derivative_requires_state_indexed_by_domain() {
        let mut m = Model::new("deriv");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let w = m.var("w", &[s.dim()]);
        let _ = m.derivative("dw", &w, &t);
    }

    #[test]
    fn test_derivative_declarations_are_recorded() {
        let mut m = Model::new("deriv");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);
        assert!(m.derivatives().is_empty());
        let _dv = m.derivative("dv", &v, &t);
        assert_eq!(m.derivatives().len(), 1);
        assert_eq!(m.derivatives()[0].name(), "dv");
    }

    #[test]
    fn test_component_names_must_be_unique() {
        let mut m = Model::new("names");
        let _ = m.scalar_var("y", 0.0);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            m.param("y", 1.0);
        }));
        assert!(result.is_err());
    }
}
