//! Template indices and canonical keys for indexed references.
//!
//! A [`TemplateIndex`] stands in for "the current value of the continuous
//! index" inside a not-yet-evaluated indexed reference. A [`CanonicalKey`]
//! gives such a reference a hashable identity: the base quantity's name plus
//! its index pattern, with the template position marked symbolically and all
//! other positions holding concrete values. Two references to the same
//! quantity at the same indices always produce equal keys, no matter where or
//! how often they occur in an expression tree, which makes the key the sole
//! key type for every registry and map in this crate.

use std::fmt;
use std::rc::Rc;

use crate::errors::SimulatorError;
use crate::expr::IndexedRef;
use crate::model::Ix;

/// Placeholder for the continuous index inside symbolic references.
///
/// Carries no concrete value; equality is by the continuous domain it was
/// created from, so every template built from the same domain compares equal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateIndex {
    pub(crate) id: u32,
    pub(crate) name: Rc<str>,
}

impl TemplateIndex {
    /// Returns the name of the continuous domain this template belongs to.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for TemplateIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.name)
    }
}

/// One position of a canonical key's index pattern.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum KeySlot {
    /// The symbolic continuous-index position, displayed as `{name}`.
    Template(Rc<str>),
    /// A concrete index value.
    Fixed(i64),
}

/// Hashable identity of an indexed reference evaluated at the symbolic
/// continuous-index position.
///
/// Keys are independent of AST identity: `v.at(&[ix])` produces equal keys on
/// every call with the same index arguments. The display form matches the
/// reference notation, e.g. `w[{t},2]`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    base: Rc<str>,
    pattern: Vec<KeySlot>,
}

impl CanonicalKey {
    /// Builds the canonical key for an indexed reference.
    ///
    /// # Errors
    /// Returns [`SimulatorError::MissingTemplateIndex`] if no index position
    /// holds a template, and [`SimulatorError::AmbiguousTemplateIndex`] if
    /// more than one does.
    pub(crate) fn from_indexed(reference: &IndexedRef) -> Result<Self, SimulatorError> {
        let mut templates = 0usize;
        let pattern: Vec<KeySlot> = reference
            .args
            .iter()
            .map(|arg| match arg {
                Ix::T(t) => {
                    templates += 1;
                    KeySlot::Template(Rc::clone(&t.name))
                }
                Ix::K(v) => KeySlot::Fixed(*v),
            })
            .collect();

        let key = CanonicalKey {
            base: Rc::clone(&reference.var.name),
            pattern,
        };
        match templates {
            1 => Ok(key),
            0 => Err(SimulatorError::MissingTemplateIndex {
                reference: key.to_string(),
            }),
            _ => Err(SimulatorError::AmbiguousTemplateIndex {
                reference: key.to_string(),
            }),
        }
    }

    /// Returns the same key re-pointed at another base quantity.
    ///
    /// Used to derive the differentiated quantity's key from its derivative's
    /// key, which shares the index pattern.
    pub(crate) fn with_base(&self, base: Rc<str>) -> Self {
        CanonicalKey {
            base,
            pattern: self.pattern.clone(),
        }
    }

    /// Name of the base quantity this key refers to.
    pub fn base(&self) -> &str {
        &self.base
    }

    /// The index pattern, one slot per index position.
    pub fn pattern(&self) -> &[KeySlot] {
        &self.pattern
    }

    /// The concrete values of all non-template positions, in order.
    pub fn fixed_indices(&self) -> Vec<i64> {
        self.pattern
            .iter()
            .filter_map(|slot| match slot {
                KeySlot::Fixed(v) => Some(*v),
                KeySlot::Template(_) => None,
            })
            .collect()
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[", self.base)?;
        for (i, slot) in self.pattern.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            match slot {
                KeySlot::Template(name) => write!(f, "{{{name}}}")?,
                KeySlot::Fixed(v) => write!(f, "{v}")?,
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use std::collections::HashMap;

    #[test]
    fn test_keys_are_identity_independent() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("keys");
        let t = m.continuous("t", 0.0, 10.0);
        let s = m.index_set("s", &[1, 2, 3]);
        let w = m.var("w", &[t.dim(), s.dim()]);

        let ix = Ix::T(t.template());
        let a = w.at(&[ix.clone(), Ix::K(2)]);
        let b = w.at(&[ix.clone(), Ix::K(2)]);

        let ka = CanonicalKey::from_indexed(a.as_indexed().unwrap())?;
        let kb = CanonicalKey::from_indexed(b.as_indexed().unwrap())?;
        assert_eq!(ka, kb);

        let mut map = HashMap::new();
        map.insert(ka, 1);
        assert_eq!(map.get(&kb), Some(&1));
        Ok(())
    }

    #[test]
    fn test_key_display_matches_reference_notation() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("keys");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2, 3]);
        let v = m.var("v", &[t.dim()]);
        let w = m.var("w", &[s.dim(), t.dim(), s.dim()]);

        let ix = Ix::T(t.template());
        let kv = CanonicalKey::from_indexed(v.at(&[ix.clone()]).as_indexed().unwrap())?;
        assert_eq!(kv.to_string(), "v[{t}]");

        let kw = CanonicalKey::from_indexed(
            w.at(&[Ix::K(0), ix.clone(), Ix::K(1)]).as_indexed().unwrap(),
        )?;
        assert_eq!(kw.to_string(), "w[0,{t},1]");
        assert_eq!(kw.fixed_indices(), vec![0, 1]);
        Ok(())
    }

    #[test]
    fn test_concrete_only_reference_is_rejected() {
        let mut m = Model::new("keys");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);

        let concrete = v.at(&[Ix::K(0)]);
        let err = CanonicalKey::from_indexed(concrete.as_indexed().unwrap()).unwrap_err();
        assert!(matches!(err, SimulatorError::MissingTemplateIndex { .. }));
    }

    #[test]
    fn test_double_template_reference_is_rejected() {
        let mut m = Model::new("keys");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let w = m.var("w", &[t.dim(), s.dim()]);

        let ix = Ix::T(t.template());
        let doubled = w.at(&[ix.clone(), ix.clone()]);
        let err = CanonicalKey::from_indexed(doubled.as_indexed().unwrap()).unwrap_err();
        assert!(matches!(err, SimulatorError::AmbiguousTemplateIndex { .. }));
    }

    #[test]
    fn test_rebase_keeps_pattern() -> Result<(), Box<dyn std::error::Error>> {
        let mut m = Model::new("keys");
        let t = m.continuous("t", 0.0, 1.0);
        let s = m.index_set("s", &[1, 2]);
        let v = m.var("v", &[t.dim(), s.dim()]);
        let dv = m.derivative("dv", &v, &t);

        let ix = Ix::T(t.template());
        let kd = CanonicalKey::from_indexed(dv.at(&[ix, Ix::K(2)]).as_indexed().unwrap())?;
        let kv = kd.with_base("v".into());
        assert_eq!(kv.to_string(), "v[{t},2]");
        assert_eq!(kv.pattern(), kd.pattern());
        Ok(())
    }
}
