//! Raster algebra expressions.
//!
//! Expressions refer to layers by file stem and band (`"stem@1"`), the
//! way a raster calculator does. [`Expr`] renders in calculator syntax
//! for logging and evaluates per pixel for engines that interpret it
//! directly.

use std::fmt;
use std::ops;

use serde::Serialize;

use crate::types::NODATA;

/// A band of a layer, addressed by the layer's file stem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BandRef {
    /// File stem of the layer.
    pub layer: String,
    /// 1-based band index.
    pub band: usize,
}

impl BandRef {
    /// Band 1 of `layer`.
    #[must_use]
    pub fn first(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            band: 1,
        }
    }
}

impl fmt::Display for BandRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}@{}\"", self.layer, self.band)
    }
}

/// Per-pixel arithmetic over raster bands.
///
/// Comparisons yield `1` or `0`. A nodata operand makes the result
/// nodata, as does division by zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    /// Literal value.
    Constant(f64),
    /// Pixel of a band.
    Band(BandRef),
    /// Sum.
    Add(Box<Self>, Box<Self>),
    /// Difference.
    Sub(Box<Self>, Box<Self>),
    /// Product.
    Mul(Box<Self>, Box<Self>),
    /// Quotient.
    Div(Box<Self>, Box<Self>),
    /// `1` when the left side is greater, else `0`.
    Gt(Box<Self>, Box<Self>),
    /// `1` when the left side is less than or equal, else `0`.
    Le(Box<Self>, Box<Self>),
}

impl Expr {
    /// Reference to a band.
    #[must_use]
    pub const fn band(band: BandRef) -> Self {
        Self::Band(band)
    }

    /// `self > rhs`.
    #[must_use]
    pub fn gt(self, rhs: impl Into<Self>) -> Self {
        Self::Gt(Box::new(self), Box::new(rhs.into()))
    }

    /// `self <= rhs`.
    #[must_use]
    pub fn le(self, rhs: impl Into<Self>) -> Self {
        Self::Le(Box::new(self), Box::new(rhs.into()))
    }

    /// Bands the expression reads, sorted and de-duplicated.
    #[must_use]
    pub fn references(&self) -> Vec<&BandRef> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out.sort();
        out.dedup();
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a BandRef>) {
        match self {
            Self::Constant(_) => {}
            Self::Band(band) => out.push(band),
            Self::Add(l, r)
            | Self::Sub(l, r)
            | Self::Mul(l, r)
            | Self::Div(l, r)
            | Self::Gt(l, r)
            | Self::Le(l, r) => {
                l.collect_references(out);
                r.collect_references(out);
            }
        }
    }

    /// Evaluate at one pixel. `lookup` returns a band's value there, or
    /// `None` when the pixel is nodata. Returns `None` for nodata.
    pub fn evaluate<F>(&self, lookup: &F) -> Option<f64>
    where
        F: Fn(&BandRef) -> Option<f64>,
    {
        let value = match self {
            Self::Constant(v) => *v,
            Self::Band(band) => lookup(band)?,
            Self::Add(l, r) => l.evaluate(lookup)? + r.evaluate(lookup)?,
            Self::Sub(l, r) => l.evaluate(lookup)? - r.evaluate(lookup)?,
            Self::Mul(l, r) => l.evaluate(lookup)? * r.evaluate(lookup)?,
            Self::Div(l, r) => {
                let denominator = r.evaluate(lookup)?;
                if denominator == 0.0 {
                    return None;
                }
                l.evaluate(lookup)? / denominator
            }
            Self::Gt(l, r) => indicator(l.evaluate(lookup)? > r.evaluate(lookup)?),
            Self::Le(l, r) => indicator(l.evaluate(lookup)? <= r.evaluate(lookup)?),
        };
        value.is_finite().then_some(value)
    }

    fn fmt_operand(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if matches!(self, Self::Add(..)) {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }

    fn fmt_binary(f: &mut fmt::Formatter<'_>, l: &Self, op: &str, r: &Self) -> fmt::Result {
        f.write_str("(")?;
        l.fmt_operand(f)?;
        f.write_str(op)?;
        r.fmt_operand(f)?;
        f.write_str(")")
    }
}

const fn indicator(condition: bool) -> f64 {
    if condition { 1.0 } else { 0.0 }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Constant(v) => write!(f, "{v}"),
            Self::Band(band) => write!(f, "{band}"),
            Self::Add(l, r) => write!(f, "{l} + {r}"),
            Self::Sub(l, r) => Self::fmt_binary(f, l, "-", r),
            Self::Mul(l, r) => Self::fmt_binary(f, l, "*", r),
            Self::Div(l, r) => Self::fmt_binary(f, l, "/", r),
            Self::Gt(l, r) => Self::fmt_binary(f, l, ">", r),
            Self::Le(l, r) => Self::fmt_binary(f, l, "<=", r),
        }
    }
}

impl From<f64> for Expr {
    fn from(v: f64) -> Self {
        Self::Constant(v)
    }
}

impl From<BandRef> for Expr {
    fn from(band: BandRef) -> Self {
        Self::Band(band)
    }
}

macro_rules! binary_op {
    ($trait:ident, $method:ident, $variant:ident) => {
        impl<R: Into<Expr>> ops::$trait<R> for Expr {
            type Output = Self;

            fn $method(self, rhs: R) -> Self {
                Self::$variant(Box::new(self), Box::new(rhs.into()))
            }
        }
    };
}

binary_op!(Add, add, Add);
binary_op!(Sub, sub, Sub);
binary_op!(Mul, mul, Mul);
binary_op!(Div, div, Div);

// ───────────────────────── Pipeline recipes ──────────────────────────

/// Weighted pathway expression.
///
/// The pathway term is scaled by `suitability_index` when it is
/// positive. Each `(coefficient, pwl stem)` pair adds
/// `coefficient * pwl`.
#[must_use]
pub fn weighted_sum(pathway: &str, suitability_index: f64, terms: &[(f64, String)]) -> Expr {
    let base = Expr::band(BandRef::first(pathway));
    let base = if suitability_index > 0.0 {
        Expr::Constant(suitability_index) * base
    } else {
        base
    };
    terms.iter().fold(base, |acc, (coefficient, pwl)| {
        acc + Expr::Constant(*coefficient) * Expr::band(BandRef::first(pwl.as_str()))
    })
}

/// `index * (layer - min) / (max - min)`, or without the `index` factor
/// when it is not positive.
#[must_use]
pub fn normalization(layer: &str, min: f64, max: f64, index: f64) -> Expr {
    let scaled = (Expr::band(BandRef::first(layer)) - min) / (Expr::Constant(max) - min);
    if index > 0.0 {
        Expr::Constant(index) * scaled
    } else {
        scaled
    }
}

/// `layer > 0`.
#[must_use]
pub fn sieve_binary_mask(layer: &str) -> Expr {
    Expr::band(BandRef::first(layer)).gt(0.0)
}

/// `layer * mask`.
#[must_use]
pub fn sieve_join(layer: &str, mask: &str) -> Expr {
    Expr::band(BandRef::first(layer)) * Expr::band(BandRef::first(mask))
}

/// `NODATA * (layer <= 0) + layer * (layer > 0)`.
#[must_use]
pub fn sieve_nodata_rewrite(layer: &str) -> Expr {
    let band = || Expr::band(BandRef::first(layer));
    Expr::Constant(NODATA) * band().le(0.0) + band() * band().gt(0.0)
}
