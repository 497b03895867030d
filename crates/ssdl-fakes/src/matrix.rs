//! Tight/loose matrix method.
//!
//! A loose lepton that is prompt passes the tight selection with probability
//! `p`, a non-prompt ("fake") one with probability `f`. Per leg the observed
//! tight (T) and loose-not-tight (L) counts relate to the prompt (P) and fake
//! (F) counts as
//!
//! ```text
//! T = p P + f F
//! L = (1-p) P + (1-f) F
//! ```
//!
//! Dilepton events use the tensor product of two such systems. Inverting it
//! gives the loose-level composition; multiplying each component by its
//! tight-tight efficiency gives the contributions to the signal selection.
//!
//! All solvers reject `|p - f|` below a separation guard with
//! [`Error::SingularDecomposition`].

use serde::{Deserialize, Serialize};
use ssdl_core::{Channel, Error, Result, TightLooseCounts, TlCategory};

/// Default minimum `|p - f|` accepted by the solvers.
pub const DEFAULT_MIN_SEPARATION: f64 = 1e-6;

/// Central values of the fake (`f`) and prompt (`p`) ratios per leg.
///
/// In the mixed channel leg 1 is the muon and leg 2 the electron.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LegRatios {
    /// Fake ratio, leg 1
    pub f1: f64,
    /// Prompt ratio, leg 1
    pub p1: f64,
    /// Fake ratio, leg 2
    pub f2: f64,
    /// Prompt ratio, leg 2
    pub p2: f64,
}

impl LegRatios {
    /// Both legs share one `(f, p)` pair.
    pub fn same_flavor(f: f64, p: f64) -> Self {
        Self { f1: f, p1: p, f2: f, p2: p }
    }

    /// Muon (leg 1) and electron (leg 2) ratios.
    pub fn mixed(f_mu: f64, p_mu: f64, f_el: f64, p_el: f64) -> Self {
        Self { f1: f_mu, p1: p_mu, f2: f_el, p2: p_el }
    }

    /// Check that all ratios are probabilities and each leg is invertible.
    pub fn validate(&self, min_separation: f64) -> Result<()> {
        for (name, v) in [("f1", self.f1), ("p1", self.p1), ("f2", self.f2), ("p2", self.p2)] {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                return Err(Error::Validation(format!("{} must be in [0,1], got {}", name, v)));
            }
        }
        check_separation(self.f1, self.p1, min_separation)?;
        check_separation(self.f2, self.p2, min_separation)
    }
}

fn check_separation(f: f64, p: f64, min_separation: f64) -> Result<()> {
    if (p - f).abs() < min_separation {
        return Err(Error::SingularDecomposition { prompt: p, fake: f });
    }
    Ok(())
}

/// Prompt/fake composition of a dilepton sample.
///
/// `pf` is (leg 1 prompt, leg 2 fake) and `fp` the reverse. In same-flavor
/// channels the legs are indistinguishable, so `pf` holds both orderings and
/// `fp` is zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Composition {
    /// Both prompt
    pub pp: f64,
    /// Leg 1 prompt, leg 2 fake
    pub pf: f64,
    /// Leg 1 fake, leg 2 prompt
    pub fp: f64,
    /// Both fake
    pub ff: f64,
}

impl Composition {
    /// Sum of all components.
    pub fn total(&self) -> f64 {
        self.pp + self.pf + self.fp + self.ff
    }

    /// Components with at least one fake leg.
    pub fn fakes(&self) -> f64 {
        self.pf + self.fp + self.ff
    }

    /// Components as `[pp, pf, fp, ff]`.
    pub fn to_array(&self) -> [f64; 4] {
        [self.pp, self.pf, self.fp, self.ff]
    }
}

fn check_counts(counts: &TightLooseCounts) -> Result<()> {
    for (name, v) in [("tt", counts.tt), ("tl", counts.tl), ("lt", counts.lt), ("ll", counts.ll)] {
        if !(v.is_finite() && v >= 0.0) {
            return Err(Error::Validation(format!(
                "count {} must be finite and >= 0, got {}",
                name, v
            )));
        }
    }
    Ok(())
}

/// Loose-level composition for a same-flavor channel.
///
/// Uses `tt`, the single-tight sum `tl + lt` and `ll`. The result has `fp = 0`.
pub fn solve_same_flavor(
    f: f64,
    p: f64,
    counts: &TightLooseCounts,
    min_separation: f64,
) -> Result<Composition> {
    LegRatios::same_flavor(f, p).validate(min_separation)?;
    check_counts(counts)?;

    let ntt = counts.tt;
    let ntl = counts.single_tight();
    let nll = counts.ll;
    let c = 1.0 / ((p - f) * (p - f));

    let pp = c * ((1.0 - f) * (1.0 - f) * ntt - f * (1.0 - f) * ntl + f * f * nll);
    let pf = c
        * (-2.0 * (1.0 - p) * (1.0 - f) * ntt + (f * (1.0 - p) + p * (1.0 - f)) * ntl
            - 2.0 * f * p * nll);
    let ff = c * ((1.0 - p) * (1.0 - p) * ntt - p * (1.0 - p) * ntl + p * p * nll);

    Ok(Composition { pp, pf, fp: 0.0, ff })
}

/// Inverse coefficients of one leg, without the `1/(p - f)` factor.
///
/// Index 0 is the prompt row, 1 the fake row.
#[inline]
fn leg_inverse(tight: bool, f: f64, p: f64) -> [f64; 2] {
    if tight { [1.0 - f, -(1.0 - p)] } else { [-f, p] }
}

/// Loose-level composition for two distinguishable legs.
///
/// The 4x4 inverse is the Kronecker product of the per-leg 2x2 inverses.
pub fn solve_mixed_flavor(
    ratios: &LegRatios,
    counts: &TightLooseCounts,
    min_separation: f64,
) -> Result<Composition> {
    ratios.validate(min_separation)?;
    check_counts(counts)?;

    let d = (ratios.p1 - ratios.f1) * (ratios.p2 - ratios.f2);
    let mut out = [0.0_f64; 4];
    for cat in TlCategory::ALL {
        let n = counts.get(cat);
        let a = leg_inverse(cat.leg1_tight(), ratios.f1, ratios.p1);
        let b = leg_inverse(cat.leg2_tight(), ratios.f2, ratios.p2);
        out[0] += a[0] * b[0] * n;
        out[1] += a[0] * b[1] * n;
        out[2] += a[1] * b[0] * n;
        out[3] += a[1] * b[1] * n;
    }
    Ok(Composition { pp: out[0] / d, pf: out[1] / d, fp: out[2] / d, ff: out[3] / d })
}

/// Dispatch on the channel: closed form for same flavor, tensor inverse otherwise.
pub fn solve(
    channel: Channel,
    ratios: &LegRatios,
    counts: &TightLooseCounts,
    min_separation: f64,
) -> Result<Composition> {
    if channel.is_same_flavor() {
        solve_same_flavor(ratios.f1, ratios.p1, counts, min_separation)
    } else {
        solve_mixed_flavor(ratios, counts, min_separation)
    }
}

/// Contributions of a loose-level composition to the tight-tight selection.
pub fn tight_tight_contributions(ratios: &LegRatios, loose: &Composition) -> Composition {
    Composition {
        pp: ratios.p1 * ratios.p2 * loose.pp,
        pf: ratios.p1 * ratios.f2 * loose.pf,
        fp: ratios.f1 * ratios.p2 * loose.fp,
        ff: ratios.f1 * ratios.f2 * loose.ff,
    }
}

/// Observed category counts expected from a loose-level composition.
pub fn compose(ratios: &LegRatios, truth: &Composition) -> TightLooseCounts {
    let eff = |tight: bool, e: f64| if tight { e } else { 1.0 - e };
    let mut out = TightLooseCounts::default();
    for cat in TlCategory::ALL {
        let (t1, t2) = (cat.leg1_tight(), cat.leg2_tight());
        let n = eff(t1, ratios.p1) * eff(t2, ratios.p2) * truth.pp
            + eff(t1, ratios.p1) * eff(t2, ratios.f2) * truth.pf
            + eff(t1, ratios.f1) * eff(t2, ratios.p2) * truth.fp
            + eff(t1, ratios.f1) * eff(t2, ratios.f2) * truth.ff;
        out.fill(cat, n);
    }
    out
}

/// Tight-tight weights `[pp, pf, fp, ff]` of a single event.
///
/// Requires `p1 != f1` and `p2 != f2`; see [`checked_event_weights`].
pub fn event_weights(category: TlCategory, f1: f64, f2: f64, p1: f64, p2: f64) -> [f64; 4] {
    let a = leg_inverse(category.leg1_tight(), f1, p1);
    let b = leg_inverse(category.leg2_tight(), f2, p2);
    let d = (p1 - f1) * (p2 - f2);
    [
        p1 * p2 * a[0] * b[0] / d,
        p1 * f2 * a[0] * b[1] / d,
        f1 * p2 * a[1] * b[0] / d,
        f1 * f2 * a[1] * b[1] / d,
    ]
}

/// [`event_weights`] with the ratio checks applied.
pub fn checked_event_weights(
    category: TlCategory,
    ratios: &LegRatios,
    min_separation: f64,
) -> Result<[f64; 4]> {
    ratios.validate(min_separation)?;
    Ok(event_weights(category, ratios.f1, ratios.f2, ratios.p1, ratios.p2))
}

/// Tight-tight weight for both legs prompt.
pub fn w_pp(category: TlCategory, f1: f64, f2: f64, p1: f64, p2: f64) -> f64 {
    event_weights(category, f1, f2, p1, p2)[0]
}

/// Tight-tight weight for leg 1 prompt, leg 2 fake.
pub fn w_pf(category: TlCategory, f1: f64, f2: f64, p1: f64, p2: f64) -> f64 {
    event_weights(category, f1, f2, p1, p2)[1]
}

/// Tight-tight weight for leg 1 fake, leg 2 prompt.
pub fn w_fp(category: TlCategory, f1: f64, f2: f64, p1: f64, p2: f64) -> f64 {
    event_weights(category, f1, f2, p1, p2)[2]
}

/// Tight-tight weight for both legs fake.
pub fn w_ff(category: TlCategory, f1: f64, f2: f64, p1: f64, p2: f64) -> f64 {
    event_weights(category, f1, f2, p1, p2)[3]
}
