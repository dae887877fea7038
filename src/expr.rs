//! Expression tree representation for indexed differential-equation models.
//!
//! Expressions are immutable tagged trees built through `std::ops` operator
//! overloading on [`Expr`]. The arithmetic impls normalize as they build:
//! nested sums flatten into one [`SumExpr`] with signed terms, numeric
//! factors fold into a [`ProductExpr`]'s scalar coefficient, and a scalar
//! multiple of a single factor is absorbed as a term coefficient when it
//! enters a sum. The expression checkers rely on these invariants to isolate
//! derivative terms without searching through equivalent tree shapes.
//!
//! Leaves refer to model components through shared handles, so a parameter
//! update made through the model is visible to every expression that
//! references it.

use std::fmt;
use std::rc::Rc;

use crate::model::{Ix, ParamData, ScalarData, VarData};
use crate::substitute::Placeholder;

/// Reference to a scalar parameter (fixed or mutable) inside an expression.
#[derive(Clone, Debug)]
pub struct ParamRef(pub(crate) Rc<ParamData>);

impl ParamRef {
    /// Name of the referenced parameter.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Current value of the referenced parameter.
    pub fn value(&self) -> f64 {
        self.0.value.get()
    }

    /// Whether the parameter may change between evaluations.
    pub fn is_mutable(&self) -> bool {
        self.0.mutable
    }
}

/// Reference to an unindexed variable inside an expression.
///
/// Unindexed variables are never states; the RHS reads their current model
/// value on every evaluation.
#[derive(Clone, Debug)]
pub struct ScalarRef(pub(crate) Rc<ScalarData>);

impl ScalarRef {
    /// Name of the referenced variable.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    /// Current value of the referenced variable.
    pub fn value(&self) -> f64 {
        self.0.value.get()
    }
}

/// Reference to an indexed quantity at a tuple of index arguments, of which
/// at most one is a template index.
#[derive(Clone, Debug)]
pub struct IndexedRef {
    pub(crate) var: Rc<VarData>,
    pub(crate) args: Vec<Ix>,
}

impl IndexedRef {
    /// Name of the referenced indexed quantity.
    pub fn name(&self) -> &str {
        &self.var.name
    }

    /// Whether the referenced quantity is a derivative variable.
    pub fn is_derivative(&self) -> bool {
        self.var.is_derivative()
    }
}

/// Tags for the intrinsic functions understood by the substitution engine.
///
/// Backend support is asymmetric: the interpreted backend evaluates every
/// tag through the `f64` math methods, while the compiled backend only links
/// symbols for the tags its operator set covers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Exp,
    Ln,
    Log10,
    Sqrt,
    Abs,
}

impl Intrinsic {
    /// The conventional lowercase name of the function.
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Sin => "sin",
            Intrinsic::Cos => "cos",
            Intrinsic::Tan => "tan",
            Intrinsic::Asin => "asin",
            Intrinsic::Acos => "acos",
            Intrinsic::Atan => "atan",
            Intrinsic::Exp => "exp",
            Intrinsic::Ln => "log",
            Intrinsic::Log10 => "log10",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Abs => "abs",
        }
    }

    /// Applies the function to a value.
    pub(crate) fn apply(self, x: f64) -> f64 {
        match self {
            Intrinsic::Sin => x.sin(),
            Intrinsic::Cos => x.cos(),
            Intrinsic::Tan => x.tan(),
            Intrinsic::Asin => x.asin(),
            Intrinsic::Acos => x.acos(),
            Intrinsic::Atan => x.atan(),
            Intrinsic::Exp => x.exp(),
            Intrinsic::Ln => x.ln(),
            Intrinsic::Log10 => x.log10(),
            Intrinsic::Sqrt => x.sqrt(),
            Intrinsic::Abs => x.abs(),
        }
    }
}

impl fmt::Display for Intrinsic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A flat sum: `constant + Σ coefᵢ · termᵢ`.
///
/// Nested sums never occur; the `Add`/`Sub` impls flatten on construction.
#[derive(Clone, Debug)]
pub struct SumExpr {
    pub(crate) constant: f64,
    pub(crate) terms: Vec<(f64, Expr)>,
}

impl SumExpr {
    /// The additive numeric constant.
    pub fn constant(&self) -> f64 {
        self.constant
    }

    /// The signed terms as `(coefficient, expression)` pairs.
    pub fn terms(&self) -> &[(f64, Expr)] {
        &self.terms
    }
}

/// A flat product/quotient: `coef · Π numeratorᵢ / Π denominatorⱼ`.
///
/// Pure numeric factors never appear in the factor lists; they fold into
/// `coef` on construction.
#[derive(Clone, Debug)]
pub struct ProductExpr {
    pub(crate) coef: f64,
    pub(crate) numerator: Vec<Expr>,
    pub(crate) denominator: Vec<Expr>,
}

impl ProductExpr {
    /// The scalar coefficient.
    pub fn coef(&self) -> f64 {
        self.coef
    }

    /// The symbolic numerator factors.
    pub fn numerator(&self) -> &[Expr] {
        &self.numerator
    }

    /// The symbolic denominator factors.
    pub fn denominator(&self) -> &[Expr] {
        &self.denominator
    }
}

/// A symbolic expression over model components.
#[derive(Clone, Debug)]
pub enum Expr {
    /// Numeric constant.
    Const(f64),
    /// Scalar parameter leaf.
    Param(ParamRef),
    /// Unindexed variable leaf.
    Scalar(ScalarRef),
    /// Indexed quantity reference, subject to canonicalization.
    Indexed(IndexedRef),
    /// The bare continuous index used as a value (e.g. `t` in `v + t`).
    Index(crate::key::TemplateIndex),
    /// Flattened sum of signed terms.
    Sum(SumExpr),
    /// Flattened product/quotient with scalar coefficient.
    Product(ProductExpr),
    /// Integer power of a base expression.
    Pow(Box<Expr>, i32),
    /// Intrinsic function applied to an argument.
    Intrinsic(Intrinsic, Box<Expr>),
    /// Backend placeholder produced by the substitution engine.
    Place(Placeholder),
}

/// Comparison relation of an equation built from two expressions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Relation {
    Eq,
    Le,
    Ge,
}

/// An equation or inequality between two expressions.
///
/// Only equalities participate in classification; inequality constraints are
/// skipped silently.
#[derive(Clone, Debug)]
pub struct Equation {
    pub(crate) lhs: Expr,
    pub(crate) rhs: Expr,
    pub(crate) rel: Relation,
}

impl Equation {
    /// The left-hand side.
    pub fn lhs(&self) -> &Expr {
        &self.lhs
    }

    /// The right-hand side.
    pub fn rhs(&self) -> &Expr {
        &self.rhs
    }

    /// The comparison relation.
    pub fn relation(&self) -> Relation {
        self.rel
    }

    /// The probed side: 0 for the left, anything else for the right.
    pub(crate) fn side(&self, i: usize) -> &Expr {
        if i == 0 {
            &self.lhs
        } else {
            &self.rhs
        }
    }

    /// The side opposite the probed one.
    pub(crate) fn other(&self, i: usize) -> &Expr {
        if i == 0 {
            &self.rhs
        } else {
            &self.lhs
        }
    }
}

impl fmt::Display for Equation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rel = match self.rel {
            Relation::Eq => "==",
            Relation::Le => "<=",
            Relation::Ge => ">=",
        };
        write!(f, "{} {} {}", self.lhs, rel, self.rhs)
    }
}

impl Expr {
    /// Raises the expression to an integer power.
    ///
    /// Constant bases fold immediately; everything else becomes a `Pow` node.
    pub fn pow(self, exponent: i32) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(c.powi(exponent)),
            base => Expr::Pow(Box::new(base), exponent),
        }
    }

    /// Applies an intrinsic function tag to the expression.
    pub fn intrinsic(self, tag: Intrinsic) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(tag.apply(c)),
            arg => Expr::Intrinsic(tag, Box::new(arg)),
        }
    }

    /// Sine of the expression.
    pub fn sin(self) -> Expr {
        self.intrinsic(Intrinsic::Sin)
    }

    /// Cosine of the expression.
    pub fn cos(self) -> Expr {
        self.intrinsic(Intrinsic::Cos)
    }

    /// Tangent of the expression.
    pub fn tan(self) -> Expr {
        self.intrinsic(Intrinsic::Tan)
    }

    /// Inverse sine of the expression.
    pub fn asin(self) -> Expr {
        self.intrinsic(Intrinsic::Asin)
    }

    /// Inverse cosine of the expression.
    pub fn acos(self) -> Expr {
        self.intrinsic(Intrinsic::Acos)
    }

    /// Inverse tangent of the expression.
    pub fn atan(self) -> Expr {
        self.intrinsic(Intrinsic::Atan)
    }

    /// Natural exponential of the expression.
    pub fn exp(self) -> Expr {
        self.intrinsic(Intrinsic::Exp)
    }

    /// Natural logarithm of the expression.
    pub fn ln(self) -> Expr {
        self.intrinsic(Intrinsic::Ln)
    }

    /// Base-10 logarithm of the expression.
    pub fn log10(self) -> Expr {
        self.intrinsic(Intrinsic::Log10)
    }

    /// Square root of the expression.
    pub fn sqrt(self) -> Expr {
        self.intrinsic(Intrinsic::Sqrt)
    }

    /// Absolute value of the expression.
    pub fn abs(self) -> Expr {
        self.intrinsic(Intrinsic::Abs)
    }

    /// Builds an equality with another expression.
    pub fn equals(self, rhs: impl Into<Expr>) -> Equation {
        Equation {
            lhs: self,
            rhs: rhs.into(),
            rel: Relation::Eq,
        }
    }

    /// Builds a less-or-equal inequality with another expression.
    pub fn le(self, rhs: impl Into<Expr>) -> Equation {
        Equation {
            lhs: self,
            rhs: rhs.into(),
            rel: Relation::Le,
        }
    }

    /// Builds a greater-or-equal inequality with another expression.
    pub fn ge(self, rhs: impl Into<Expr>) -> Equation {
        Equation {
            lhs: self,
            rhs: rhs.into(),
            rel: Relation::Ge,
        }
    }

    /// The indexed reference behind this node, if it is one.
    pub(crate) fn as_indexed(&self) -> Option<&IndexedRef> {
        match self {
            Expr::Indexed(r) => Some(r),
            _ => None,
        }
    }

    /// The indexed reference behind this node if it refers to a derivative.
    pub(crate) fn as_derivative_ref(&self) -> Option<&IndexedRef> {
        self.as_indexed().filter(|r| r.is_derivative())
    }

    /// The numeric value of this node if it can be folded at classification
    /// time: constants always, parameters only while immutable.
    pub(crate) fn fixed_value(&self) -> Option<f64> {
        match self {
            Expr::Const(c) => Some(*c),
            Expr::Param(p) if !p.is_mutable() => Some(p.value()),
            _ => None,
        }
    }

    /// Visits every indexed reference in the tree, depth first.
    pub(crate) fn for_each_indexed<'a, F: FnMut(&'a IndexedRef)>(&'a self, f: &mut F) {
        match self {
            Expr::Indexed(r) => f(r),
            Expr::Sum(s) => {
                for (_, term) in &s.terms {
                    term.for_each_indexed(f);
                }
            }
            Expr::Product(p) => {
                for factor in p.numerator.iter().chain(&p.denominator) {
                    factor.for_each_indexed(f);
                }
            }
            Expr::Pow(base, _) => base.for_each_indexed(f),
            Expr::Intrinsic(_, arg) => arg.for_each_indexed(f),
            Expr::Const(_)
            | Expr::Param(_)
            | Expr::Scalar(_)
            | Expr::Index(_)
            | Expr::Place(_) => {}
        }
    }

    /// Whether any derivative reference occurs anywhere in the tree.
    pub(crate) fn contains_derivative(&self) -> bool {
        let mut found = false;
        self.for_each_indexed(&mut |r| found |= r.is_derivative());
        found
    }

    /// Evaluates a substituted tree against current placeholder, parameter,
    /// and scalar values.
    ///
    /// Only valid after substitution: indexed references, bare index leaves,
    /// and slot placeholders must no longer be present.
    pub(crate) fn numeric(&self) -> f64 {
        match self {
            Expr::Const(c) => *c,
            Expr::Param(p) => p.value(),
            Expr::Scalar(s) => s.value(),
            Expr::Place(Placeholder::Cell(cell)) => cell.get(),
            Expr::Sum(s) => {
                let mut acc = s.constant;
                for (coef, term) in &s.terms {
                    acc += coef * term.numeric();
                }
                acc
            }
            Expr::Product(p) => {
                let mut acc = p.coef;
                for factor in &p.numerator {
                    acc *= factor.numeric();
                }
                for factor in &p.denominator {
                    acc /= factor.numeric();
                }
                acc
            }
            Expr::Pow(base, exponent) => base.numeric().powi(*exponent),
            Expr::Intrinsic(tag, arg) => tag.apply(arg.numeric()),
            Expr::Indexed(r) => {
                unreachable!("indexed reference '{}' survived substitution", r.name())
            }
            Expr::Index(t) => unreachable!("bare index '{t}' survived substitution"),
            Expr::Place(Placeholder::Slot(s)) => {
                unreachable!("slot placeholder '{}' interpreted numerically", s.name())
            }
        }
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Const(value)
    }
}

/// Absorbs a scalar multiple of a single factor into a sum-term coefficient,
/// so `5*x + y` carries `x` with coefficient 5 instead of a nested product.
fn sum_term(e: Expr) -> (f64, Expr) {
    match e {
        Expr::Product(mut p) if p.numerator.len() == 1 && p.denominator.is_empty() => {
            (p.coef, p.numerator.remove(0))
        }
        other => (1.0, other),
    }
}

impl std::ops::Add for Expr {
    type Output = Expr;

    fn add(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Const(a), Expr::Const(b)) => Expr::Const(a + b),
            (Expr::Sum(mut a), Expr::Sum(b)) => {
                a.constant += b.constant;
                a.terms.extend(b.terms);
                Expr::Sum(a)
            }
            (Expr::Sum(mut a), Expr::Const(c)) | (Expr::Const(c), Expr::Sum(mut a)) => {
                a.constant += c;
                Expr::Sum(a)
            }
            (Expr::Sum(mut a), e) => {
                a.terms.push(sum_term(e));
                Expr::Sum(a)
            }
            (e, Expr::Sum(mut b)) => {
                b.terms.insert(0, sum_term(e));
                Expr::Sum(b)
            }
            (Expr::Const(c), e) | (e, Expr::Const(c)) => Expr::Sum(SumExpr {
                constant: c,
                terms: vec![sum_term(e)],
            }),
            (a, b) => Expr::Sum(SumExpr {
                constant: 0.0,
                terms: vec![sum_term(a), sum_term(b)],
            }),
        }
    }
}

impl std::ops::Neg for Expr {
    type Output = Expr;

    fn neg(self) -> Expr {
        match self {
            Expr::Const(c) => Expr::Const(-c),
            Expr::Sum(mut s) => {
                s.constant = -s.constant;
                for (coef, _) in &mut s.terms {
                    *coef = -*coef;
                }
                Expr::Sum(s)
            }
            Expr::Product(mut p) => {
                p.coef = -p.coef;
                Expr::Product(p)
            }
            e => Expr::Product(ProductExpr {
                coef: -1.0,
                numerator: vec![e],
                denominator: vec![],
            }),
        }
    }
}

impl std::ops::Sub for Expr {
    type Output = Expr;

    fn sub(self, rhs: Expr) -> Expr {
        self + (-rhs)
    }
}

impl std::ops::Mul for Expr {
    type Output = Expr;

    fn mul(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Const(a), Expr::Const(b)) => Expr::Const(a * b),
            (Expr::Const(c), Expr::Product(mut p)) | (Expr::Product(mut p), Expr::Const(c)) => {
                p.coef *= c;
                Expr::Product(p)
            }
            (Expr::Product(mut a), Expr::Product(b)) => {
                a.coef *= b.coef;
                a.numerator.extend(b.numerator);
                a.denominator.extend(b.denominator);
                Expr::Product(a)
            }
            (Expr::Product(mut p), e) => {
                p.numerator.push(e);
                Expr::Product(p)
            }
            (e, Expr::Product(mut p)) => {
                p.numerator.insert(0, e);
                Expr::Product(p)
            }
            (Expr::Const(c), e) | (e, Expr::Const(c)) => Expr::Product(ProductExpr {
                coef: c,
                numerator: vec![e],
                denominator: vec![],
            }),
            (a, b) => Expr::Product(ProductExpr {
                coef: 1.0,
                numerator: vec![a, b],
                denominator: vec![],
            }),
        }
    }
}

impl std::ops::Div for Expr {
    type Output = Expr;

    fn div(self, rhs: Expr) -> Expr {
        match (self, rhs) {
            (Expr::Const(a), Expr::Const(b)) => Expr::Const(a / b),
            (Expr::Product(mut p), Expr::Const(c)) => {
                p.coef /= c;
                Expr::Product(p)
            }
            (Expr::Product(mut a), Expr::Product(b)) => {
                a.coef /= b.coef;
                a.numerator.extend(b.denominator);
                a.denominator.extend(b.numerator);
                Expr::Product(a)
            }
            (Expr::Product(mut p), e) => {
                p.denominator.push(e);
                Expr::Product(p)
            }
            (Expr::Const(c), Expr::Product(p)) => Expr::Product(ProductExpr {
                coef: c / p.coef,
                numerator: p.denominator,
                denominator: p.numerator,
            }),
            (e, Expr::Product(p)) => {
                let mut numerator = vec![e];
                numerator.extend(p.denominator);
                Expr::Product(ProductExpr {
                    coef: 1.0 / p.coef,
                    numerator,
                    denominator: p.numerator,
                })
            }
            (Expr::Const(c), e) => Expr::Product(ProductExpr {
                coef: c,
                numerator: vec![],
                denominator: vec![e],
            }),
            (e, Expr::Const(c)) => Expr::Product(ProductExpr {
                coef: 1.0 / c,
                numerator: vec![e],
                denominator: vec![],
            }),
            (a, b) => Expr::Product(ProductExpr {
                coef: 1.0,
                numerator: vec![a],
                denominator: vec![b],
            }),
        }
    }
}

macro_rules! impl_scalar_ops {
    ($($op:ident, $method:ident);*) => {
        $(
            impl std::ops::$op<Expr> for f64 {
                type Output = Expr;
                fn $method(self, rhs: Expr) -> Expr {
                    Expr::Const(self).$method(rhs)
                }
            }
            impl std::ops::$op<f64> for Expr {
                type Output = Expr;
                fn $method(self, rhs: f64) -> Expr {
                    self.$method(Expr::Const(rhs))
                }
            }
        )*
    };
}

impl_scalar_ops!(Add, add; Sub, sub; Mul, mul; Div, div);

/// Writes a factor, parenthesizing sums so products print unambiguously.
fn fmt_factor(f: &mut fmt::Formatter<'_>, e: &Expr) -> fmt::Result {
    match e {
        Expr::Sum(_) => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Const(c) => write!(f, "{c}"),
            Expr::Param(p) => f.write_str(p.name()),
            Expr::Scalar(s) => f.write_str(s.name()),
            Expr::Indexed(r) => {
                write!(f, "{}[", r.name())?;
                for (i, arg) in r.args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    match arg {
                        Ix::T(t) => write!(f, "{t}")?,
                        Ix::K(v) => write!(f, "{v}")?,
                    }
                }
                write!(f, "]")
            }
            Expr::Index(t) => write!(f, "{t}"),
            Expr::Place(p) => f.write_str(p.name()),
            Expr::Sum(s) => {
                let mut first = true;
                if s.constant != 0.0 {
                    write!(f, "{}", s.constant)?;
                    first = false;
                }
                for (coef, term) in &s.terms {
                    if first {
                        if *coef == -1.0 {
                            write!(f, "-")?;
                        } else if *coef != 1.0 {
                            write!(f, "{coef}*")?;
                        }
                        first = false;
                    } else if *coef == 1.0 {
                        write!(f, " + ")?;
                    } else if *coef == -1.0 {
                        write!(f, " - ")?;
                    } else if *coef < 0.0 {
                        write!(f, " - {}*", -coef)?;
                    } else {
                        write!(f, " + {coef}*")?;
                    }
                    fmt_factor(f, term)?;
                }
                if first {
                    write!(f, "0")?;
                }
                Ok(())
            }
            Expr::Product(p) => {
                let mut wrote = false;
                if p.coef != 1.0 || p.numerator.is_empty() {
                    write!(f, "{}", p.coef)?;
                    wrote = true;
                }
                for factor in &p.numerator {
                    if wrote {
                        write!(f, "*")?;
                    }
                    fmt_factor(f, factor)?;
                    wrote = true;
                }
                for factor in &p.denominator {
                    write!(f, "/")?;
                    fmt_factor(f, factor)?;
                }
                Ok(())
            }
            Expr::Pow(base, exponent) => {
                match base.as_ref() {
                    Expr::Sum(_) | Expr::Product(_) | Expr::Pow(..) => write!(f, "({base})")?,
                    _ => write!(f, "{base}")?,
                }
                write!(f, "^{exponent}")
            }
            Expr::Intrinsic(tag, arg) => write!(f, "{tag}({arg})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;

    fn leaves() -> (Expr, Expr, Expr) {
        let mut m = Model::new("expr");
        let y = m.scalar_var("y", 2.0);
        let z = m.scalar_var("z", 3.0);
        let w = m.scalar_var("w", 4.0);
        (y.expr(), z.expr(), w.expr())
    }

    #[test]
    fn test_sums_flatten() {
        let (y, z, w) = leaves();
        let e = (y + z) + (Expr::Const(2.0) + w);
        match e {
            Expr::Sum(s) => {
                assert_eq!(s.constant(), 2.0);
                assert_eq!(s.terms().len(), 3);
                assert!(s.terms().iter().all(|(c, _)| *c == 1.0));
            }
            other => panic!("expected flattened sum, got {other:?}"),
        }
    }

    #[test]
    fn test_scaled_terms_absorb_into_coefficients() {
        let (y, z, _) = leaves();
        let e = 5.0 * y - z;
        match e {
            Expr::Sum(s) => {
                let coefs: Vec<f64> = s.terms().iter().map(|(c, _)| *c).collect();
                assert_eq!(coefs, vec![5.0, -1.0]);
            }
            other => panic!("expected sum, got {other:?}"),
        }
    }

    #[test]
    fn test_products_fold_numeric_factors() {
        let (y, z, _) = leaves();
        let e = 2.0 * y * 3.0 / z;
        match e {
            Expr::Product(p) => {
                assert_eq!(p.coef(), 6.0);
                assert_eq!(p.numerator().len(), 1);
                assert_eq!(p.denominator().len(), 1);
            }
            other => panic!("expected product, got {other:?}"),
        }
    }

    #[test]
    fn test_division_by_product_inverts_it() {
        let (y, z, w) = leaves();
        // y / (z * w) moves z and w into the denominator
        let e = y / (z * w);
        match e {
            Expr::Product(p) => {
                assert_eq!(p.coef(), 1.0);
                assert_eq!(p.numerator().len(), 1);
                assert_eq!(p.denominator().len(), 2);
            }
            other => panic!("expected product, got {other:?}"),
        }
    }

    #[test]
    fn test_negation_flips_signs() {
        let (y, z, _) = leaves();
        let e = -(2.0 + y - z);
        match e {
            Expr::Sum(s) => {
                assert_eq!(s.constant(), -2.0);
                let coefs: Vec<f64> = s.terms().iter().map(|(c, _)| *c).collect();
                assert_eq!(coefs, vec![-1.0, 1.0]);
            }
            other => panic!("expected sum, got {other:?}"),
        }
    }

    #[test]
    fn test_numeric_evaluation() {
        let (y, z, w) = leaves();
        // y=2, z=3, w=4
        let e = (y.clone() * z + 1.0) / w - y.pow(2);
        assert_eq!(e.numeric(), 7.0 / 4.0 - 4.0);

        let trig = Expr::Const(0.0).sin() + Expr::Const(1.0).exp().ln();
        assert!((trig.numeric() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_parameter_updates_are_visible() {
        let mut m = Model::new("expr");
        let mp = m.param_mut("mp", 5.0);
        let e = mp.expr() * 2.0;
        assert_eq!(e.numeric(), 10.0);
        mp.set_value(7.0);
        assert_eq!(e.numeric(), 14.0);
    }

    #[test]
    fn test_display() {
        let mut m = Model::new("expr");
        let t = m.continuous("t", 0.0, 1.0);
        let v = m.var("v", &[t.dim()]);
        let y = m.scalar_var("y", 0.0);

        let ix = crate::model::Ix::T(t.template());
        let e = 5.0 * v.at(&[ix]) - y.expr();
        assert_eq!(e.to_string(), "5*v[{t}] - y");

        let p = (y.expr() + 1.0).pow(2).sqrt();
        assert_eq!(p.to_string(), "sqrt((1 + y)^2)");
    }

    #[test]
    fn test_fixed_values_fold_only_for_immutable_parameters() {
        let mut m = Model::new("expr");
        let p = m.param("p", 5.0);
        let mp = m.param_mut("mp", 5.0);
        assert_eq!(p.expr().fixed_value(), Some(5.0));
        assert_eq!(mp.expr().fixed_value(), None);
        assert_eq!(Expr::Const(2.5).fixed_value(), Some(2.5));
    }
}
