//! Substitution of indexed references with backend placeholders.
//!
//! Classification leaves residuals full of indexed references that cannot be
//! evaluated. [`substitute_template_refs`] rebuilds a residual with every
//! such reference replaced by a [`Placeholder`], recording the mapping in a
//! [`TemplateMap`] so references with equal canonical keys share one
//! placeholder.
//!
//! The placeholder flavor is the backend's choice, made through a
//! [`PlaceholderFactory`]: the interpreted backend substitutes shared
//! numeric cells that are written before each tree walk, the compiled
//! backend substitutes input-array slots that become load instructions. The
//! continuous index itself gets the reserved time placeholder (the shared
//! time cell, or slot 0) and is never entered into the map.

use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::errors::SimulatorError;
use crate::expr::{Expr, Intrinsic, ProductExpr, SumExpr};
use crate::key::CanonicalKey;
use crate::simulator::Backend;

/// Shared numeric cell standing in for one state instance (or the continuous
/// index) in an interpreted residual.
#[derive(Clone)]
pub struct CellRef {
    pub(crate) name: Rc<str>,
    pub(crate) cell: Rc<Cell<f64>>,
}

impl CellRef {
    fn new(name: Rc<str>) -> Self {
        CellRef {
            name,
            cell: Rc::new(Cell::new(0.0)),
        }
    }

    /// Display name, matching the canonical key it replaced.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current cell value.
    pub fn get(&self) -> f64 {
        self.cell.get()
    }

    /// Writes the cell value. Every expression holding this placeholder sees
    /// the update on its next evaluation.
    pub fn set(&self, value: f64) {
        self.cell.set(value);
    }
}

impl fmt::Debug for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellRef({} = {})", self.name, self.cell.get())
    }
}

/// Position in the compiled function's input array standing in for one state
/// instance (or the continuous index) in a compiled residual.
#[derive(Clone, Debug)]
pub struct SlotRef {
    pub(crate) name: Rc<str>,
    pub(crate) slot: u32,
}

impl SlotRef {
    /// Display name, matching the canonical key it replaced.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Index into the compiled function's input array.
    pub fn slot(&self) -> u32 {
        self.slot
    }
}

/// A backend-specific stand-in for an indexed reference.
#[derive(Clone, Debug)]
pub enum Placeholder {
    /// Shared numeric cell, written between tree evaluations.
    Cell(CellRef),
    /// Input-array position, loaded by compiled code.
    Slot(SlotRef),
}

impl Placeholder {
    /// Display name of the placeholder.
    pub fn name(&self) -> &str {
        match self {
            Placeholder::Cell(c) => c.name(),
            Placeholder::Slot(s) => s.name(),
        }
    }
}

/// Mapping from canonical keys to the placeholders substituted for them.
///
/// Keys iterate in first-discovery order, which fixes the state-vector and
/// algebraic-variable ordering downstream. Only keys that occur in residuals
/// are ever entered; the continuous index has a reserved placeholder outside
/// the map.
#[derive(Debug, Default)]
pub struct TemplateMap {
    entries: HashMap<CanonicalKey, Placeholder>,
    order: Vec<CanonicalKey>,
}

impl TemplateMap {
    /// The placeholder substituted for a key, if the key occurred in any
    /// residual.
    pub fn get(&self, key: &CanonicalKey) -> Option<&Placeholder> {
        self.entries.get(key)
    }

    /// Whether the key occurred in any residual.
    pub fn contains_key(&self, key: &CanonicalKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of distinct keys substituted so far.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether no key has been substituted yet.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// The substituted keys in first-discovery order.
    pub fn keys(&self) -> impl Iterator<Item = &CanonicalKey> {
        self.order.iter()
    }

    fn entry_or_create(
        &mut self,
        key: &CanonicalKey,
        factory: &mut dyn PlaceholderFactory,
    ) -> Placeholder {
        if let Some(existing) = self.entries.get(key) {
            return existing.clone();
        }
        let placeholder = factory.placeholder(key);
        self.entries.insert(key.clone(), placeholder.clone());
        self.order.push(key.clone());
        placeholder
    }
}

/// Backend hook deciding what placeholders look like and which intrinsics
/// the backend can realize.
pub(crate) trait PlaceholderFactory {
    /// A fresh placeholder for a newly discovered key.
    fn placeholder(&mut self, key: &CanonicalKey) -> Placeholder;

    /// The reserved placeholder for the continuous index itself.
    fn index_placeholder(&mut self) -> Placeholder;

    /// Whether the backend can realize an intrinsic tag.
    fn check_intrinsic(&self, tag: Intrinsic) -> Result<(), SimulatorError>;
}

/// Factory for the interpreted backend: every placeholder is a shared cell.
pub(crate) struct CellFactory {
    time: CellRef,
}

impl CellFactory {
    pub(crate) fn new(domain_name: &str) -> Self {
        CellFactory {
            time: CellRef::new(Rc::from(domain_name)),
        }
    }

    /// The shared cell holding the continuous-index value.
    pub(crate) fn time(&self) -> CellRef {
        self.time.clone()
    }
}

impl PlaceholderFactory for CellFactory {
    fn placeholder(&mut self, key: &CanonicalKey) -> Placeholder {
        Placeholder::Cell(CellRef::new(Rc::from(key.to_string())))
    }

    fn index_placeholder(&mut self) -> Placeholder {
        Placeholder::Cell(self.time.clone())
    }

    fn check_intrinsic(&self, _tag: Intrinsic) -> Result<(), SimulatorError> {
        Ok(())
    }
}

/// Factory for the compiled backend: placeholders are input-array slots.
///
/// Slot 0 is reserved for the continuous index; discovered keys take slots
/// 1, 2, ... in discovery order.
pub(crate) struct SlotFactory {
    domain_name: Rc<str>,
    next: u32,
}

impl SlotFactory {
    pub(crate) fn new(domain_name: &str) -> Self {
        SlotFactory {
            domain_name: Rc::from(domain_name),
            next: 1,
        }
    }

    /// Total number of slots handed out, including the reserved one.
    pub(crate) fn slots_used(&self) -> u32 {
        self.next
    }
}

impl PlaceholderFactory for SlotFactory {
    fn placeholder(&mut self, key: &CanonicalKey) -> Placeholder {
        let slot = self.next;
        self.next += 1;
        Placeholder::Slot(SlotRef {
            name: Rc::from(key.to_string()),
            slot,
        })
    }

    fn index_placeholder(&mut self) -> Placeholder {
        Placeholder::Slot(SlotRef {
            name: Rc::clone(&self.domain_name),
            slot: 0,
        })
    }

    fn check_intrinsic(&self, tag: Intrinsic) -> Result<(), SimulatorError> {
        match tag {
            Intrinsic::Asin | Intrinsic::Acos | Intrinsic::Atan => {
                Err(SimulatorError::UnsupportedIntrinsic {
                    name: tag.name(),
                    backend: Backend::Compiled,
                })
            }
            _ => Ok(()),
        }
    }
}

/// Rebuilds an expression with every indexed reference replaced by its
/// placeholder and the bare continuous index replaced by the reserved one.
///
/// References with equal canonical keys share a placeholder across all
/// residuals substituted against the same map.
///
/// # Errors
/// Propagates canonicalization failures and the backend's refusal of an
/// intrinsic tag.
pub(crate) fn substitute_template_refs(
    expr: &Expr,
    map: &mut TemplateMap,
    factory: &mut dyn PlaceholderFactory,
) -> Result<Expr, SimulatorError> {
    Ok(match expr {
        Expr::Indexed(r) => {
            let key = CanonicalKey::from_indexed(r)?;
            Expr::Place(map.entry_or_create(&key, factory))
        }
        Expr::Index(_) => Expr::Place(factory.index_placeholder()),
        Expr::Sum(s) => {
            let mut terms = Vec::with_capacity(s.terms.len());
            for (coef, term) in &s.terms {
                terms.push((*coef, substitute_template_refs(term, map, factory)?));
            }
            Expr::Sum(SumExpr {
                constant: s.constant,
                terms,
            })
        }
        Expr::Product(p) => {
            let mut numerator = Vec::with_capacity(p.numerator.len());
            for factor in &p.numerator {
                numerator.push(substitute_template_refs(factor, map, factory)?);
            }
            let mut denominator = Vec::with_capacity(p.denominator.len());
            for factor in &p.denominator {
                denominator.push(substitute_template_refs(factor, map, factory)?);
            }
            Expr::Product(ProductExpr {
                coef: p.coef,
                numerator,
                denominator,
            })
        }
        Expr::Pow(base, exponent) => Expr::Pow(
            Box::new(substitute_template_refs(base, map, factory)?),
            *exponent,
        ),
        Expr::Intrinsic(tag, arg) => {
            factory.check_intrinsic(*tag)?;
            Expr::Intrinsic(*tag, Box::new(substitute_template_refs(arg, map, factory)?))
        }
        Expr::Const(_) | Expr::Param(_) | Expr::Scalar(_) | Expr::Place(_) => expr.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Ix, Model};

    #[test]
    fn test_equal_keys_share_one_cell() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("subst");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);

        let ix = Ix::T(t.template());
        let e = v.at(&[ix.clone()]) * 2.0 + v.at(&[ix.clone()]) + t.expr();

        let mut map = TemplateMap::default();
        let mut factory = CellFactory::new("t");
        let substituted = substitute_template_refs(&e, &mut map, &mut factory)?;

        assert_eq!(map.len(), 1);
        let key = CanonicalKey::from_indexed(v.at(&[ix]).as_indexed().ok_or("indexed")?)?;
        let Some(Placeholder::Cell(cell)) = map.get(&key) else {
            panic!("expected a cell placeholder");
        };

        cell.set(3.0);
        factory.time().set(0.5);
        assert_eq!(substituted.numeric(), 2.0 * 3.0 + 3.0 + 0.5);
        Ok(())
    }

    #[test]
    fn test_time_placeholder_stays_out_of_the_map() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("subst");
        let t = m.continuous("t", 0.0, 1.0);

        let mut map = TemplateMap::default();
        let mut factory = CellFactory::new("t");
        let substituted = substitute_template_refs(&t.expr(), &mut map, &mut factory)?;

        assert!(map.is_empty());
        factory.time().set(2.5);
        assert_eq!(substituted.numeric(), 2.5);
        Ok(())
    }

    #[test]
    fn test_slots_are_assigned_in_discovery_order() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("subst");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[t.dim()]);

        let ix = Ix::T(t.template());
        let e = w.at(&[ix.clone()]) + v.at(&[ix.clone()]) + t.expr();

        let mut map = TemplateMap::default();
        let mut factory = SlotFactory::new("t");
        let substituted = substitute_template_refs(&e, &mut map, &mut factory)?;

        let kw = CanonicalKey::from_indexed(w.at(&[ix.clone()]).as_indexed().ok_or("indexed")?)?;
        let kv = CanonicalKey::from_indexed(v.at(&[ix]).as_indexed().ok_or("indexed")?)?;
        match (map.get(&kw), map.get(&kv)) {
            (Some(Placeholder::Slot(sw)), Some(Placeholder::Slot(sv))) => {
                assert_eq!(sw.slot(), 1);
                assert_eq!(sv.slot(), 2);
            }
            other => panic!("expected slot placeholders, got {other:?}"),
        }
        assert_eq!(factory.slots_used(), 3);

        // The bare index became the reserved slot 0.
        let mut found_zero = false;
        if let Expr::Sum(s) = &substituted {
            for (_, term) in s.terms() {
                if let Expr::Place(Placeholder::Slot(slot)) = term {
                    found_zero |= slot.slot() == 0;
                }
            }
        }
        assert!(found_zero);
        Ok(())
    }

    #[test]
    fn test_compiled_backend_refuses_inverse_trigonometry() {
        let mut m = Model::new("subst");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);

        let e = v.at(&[Ix::T(t.template())]).asin();
        let mut map = TemplateMap::default();
        let mut factory = SlotFactory::new("t");
        let err = substitute_template_refs(&e, &mut map, &mut factory).unwrap_err();
        assert!(matches!(
            err,
            SimulatorError::UnsupportedIntrinsic {
                name: "asin",
                backend: Backend::Compiled,
            }
        ));
    }
}
