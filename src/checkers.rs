//! Structural checkers that isolate a derivative from one side of an
//! equation.
//!
//! Each checker recognizes one normalized shape on the probed side: a bare
//! derivative reference, a product with the derivative among its factors, or
//! a sum with a derivative term. On a match it returns the isolated
//! reference plus the rewritten opposite side. Scalar coefficients and fixed
//! parameters fold into the residual's numeric coefficient; mutable
//! parameters stay live so later updates are honored.
//!
//! The checkers only look at direct factors and terms. A derivative buried
//! deeper (inside an intrinsic argument, a power base, or a nested factor)
//! matches nothing, and the classifier reports the equation as not
//! isolatable.

use crate::expr::{Equation, Expr, IndexedRef};

/// A successfully isolated derivative definition.
pub(crate) struct Isolation {
    /// The derivative reference that was isolated.
    pub(crate) deriv: IndexedRef,
    /// The equation rewritten as the derivative's defining expression.
    pub(crate) residual: Expr,
}

/// Matches `deriv == rhs` (or mirrored): the probed side is a bare
/// derivative reference.
pub(crate) fn check_getitem(eq: &Equation, side: usize) -> Option<Isolation> {
    let deriv = eq.side(side).as_derivative_ref()?;
    Some(Isolation {
        deriv: deriv.clone(),
        residual: eq.other(side).clone(),
    })
}

/// Divides the residual by a factor, folding it into the coefficient when
/// its value is fixed.
fn divide_out(residual: Expr, factor: &Expr) -> Expr {
    match factor.fixed_value() {
        Some(v) => residual / Expr::Const(v),
        None => residual / factor.clone(),
    }
}

/// Multiplies the residual by a factor, folding it into the coefficient when
/// its value is fixed.
fn multiply_in(residual: Expr, factor: &Expr) -> Expr {
    match factor.fixed_value() {
        Some(v) => residual * Expr::Const(v),
        None => residual * factor.clone(),
    }
}

/// Matches a product with the derivative as exactly one direct factor,
/// either in the numerator (`c·f(x)·deriv/g(x) == rhs`) or in the
/// denominator (`c·f(x)/(deriv·g(x)) == rhs`), and moves every other factor
/// across the equality.
pub(crate) fn check_product(eq: &Equation, side: usize) -> Option<Isolation> {
    let Expr::Product(p) = eq.side(side) else {
        return None;
    };
    let num_pos: Vec<usize> = p
        .numerator()
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.as_derivative_ref().map(|_| i))
        .collect();
    let den_pos: Vec<usize> = p
        .denominator()
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.as_derivative_ref().map(|_| i))
        .collect();

    match (num_pos.as_slice(), den_pos.as_slice()) {
        ([k], []) => {
            // deriv == rhs * g(x) / (c * f(x))
            let deriv = p.numerator()[*k].as_derivative_ref()?.clone();
            let mut residual = eq.other(side).clone();
            if p.coef() != 1.0 {
                residual = residual / Expr::Const(p.coef());
            }
            for (i, factor) in p.numerator().iter().enumerate() {
                if i != *k {
                    residual = divide_out(residual, factor);
                }
            }
            for factor in p.denominator() {
                residual = multiply_in(residual, factor);
            }
            Some(Isolation { deriv, residual })
        }
        ([], [k]) => {
            // deriv == c * f(x) / (rhs * g(x))
            let deriv = p.denominator()[*k].as_derivative_ref()?.clone();
            let mut residual = Expr::Const(p.coef());
            for factor in p.numerator() {
                residual = multiply_in(residual, factor);
            }
            residual = residual / eq.other(side).clone();
            for (i, factor) in p.denominator().iter().enumerate() {
                if i != *k {
                    residual = divide_out(residual, factor);
                }
            }
            Some(Isolation { deriv, residual })
        }
        _ => None,
    }
}

/// Matches a sum containing a derivative term and moves every other term
/// across the equality.
///
/// The derivative term may carry a numeric coefficient or parameter factors;
/// anything else multiplying the derivative defeats the match. The first
/// matching term wins, mirroring left-to-right reading order.
pub(crate) fn check_sum(eq: &Equation, side: usize) -> Option<Isolation> {
    let Expr::Sum(s) = eq.side(side) else {
        return None;
    };

    let mut candidate: Option<(usize, f64, IndexedRef, Vec<Expr>)> = None;
    for (i, (coef, term)) in s.terms().iter().enumerate() {
        if let Some(d) = term.as_derivative_ref() {
            candidate = Some((i, *coef, d.clone(), Vec::new()));
            break;
        }
        if let Expr::Product(p) = term {
            if !p.denominator().is_empty() {
                continue;
            }
            let mut deriv = None;
            let mut divisors = Vec::new();
            let mut clean = true;
            for factor in p.numerator() {
                if let Some(d) = factor.as_derivative_ref() {
                    if deriv.is_some() {
                        clean = false;
                        break;
                    }
                    deriv = Some(d.clone());
                } else if factor.fixed_value().is_some() || matches!(factor, Expr::Param(_)) {
                    divisors.push(factor.clone());
                } else {
                    clean = false;
                    break;
                }
            }
            if clean {
                if let Some(d) = deriv {
                    candidate = Some((i, coef * p.coef(), d, divisors));
                    break;
                }
            }
        }
    }

    let (k, dcoef, deriv, divisors) = candidate?;
    let mut residual = eq.other(side).clone();
    if s.constant() != 0.0 {
        residual = residual - Expr::Const(s.constant());
    }
    for (i, (coef, term)) in s.terms().iter().enumerate() {
        if i != k {
            residual = residual - Expr::Const(*coef) * term.clone();
        }
    }
    if dcoef != 1.0 {
        residual = residual / Expr::Const(dcoef);
    }
    for divisor in &divisors {
        residual = divide_out(residual, divisor);
    }
    Some(Isolation { deriv, residual })
}
