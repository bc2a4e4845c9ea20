//! Derivative models built from circumbinary-disk simulation tables.
//!
//! Every model answers three tabulated rates, `dlog a / dlog M`,
//! `dlog e / dlog M` and `dlog q / dlog M`, as functions of mass ratio `q`
//! and eccentricity `e`. The orbital energy and angular momentum rates follow
//! from those three through fixed closed-form relations shared by all models.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{GridError, ModelError, QueryError, TableError};
use crate::grid::{GridField2d, LinearField1d, OutOfBounds};
use crate::tables::{load_table_1d, load_table_2d, table_path, ModelTables, Table1d, Table2d};

/// Orbital quantity whose logarithmic mass derivative is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rate {
    SemiMajorAxis,
    Eccentricity,
    MassRatio,
    Energy,
    AngularMomentum,
}

impl FromStr for Rate {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "a" | "semi_major_axis" => Ok(Rate::SemiMajorAxis),
            "e" | "eccentricity" => Ok(Rate::Eccentricity),
            "q" | "mass_ratio" => Ok(Rate::MassRatio),
            "E" | "energy" => Ok(Rate::Energy),
            "J" | "angular_momentum" => Ok(Rate::AngularMomentum),
            _ => Err(QueryError::UnknownRate(s.to_string())),
        }
    }
}

/// `dlog E / dlog M` from `E = -G M mu / (2a)` with reduced mass
/// `mu = M q / (1 + q)^2`.
pub fn energy_rate(q: f64, dlog_a: f64, dlog_q: f64) -> f64 {
    2.0 - dlog_a + (1.0 - q) / (q * q + q) * dlog_q
}

/// `dlog J / dlog M` from `J = mu sqrt(G M a (1 - e^2))`.
pub fn angular_momentum_rate(q: f64, e: f64, dlog_a: f64, dlog_e: f64, dlog_q: f64) -> f64 {
    1.5 + 0.5 * dlog_a + (1.0 - q) / (q * q + q) * dlog_q - e / (1.0 - e * e) * dlog_e
}

/// Tables store `e * dlog e / dlog M`. The quotient is defined as zero for
/// `e <= 0`, so an orbit driven through circular stays there.
fn per_eccentricity(raw: f64, e: f64) -> f64 {
    if e > 0.0 {
        raw / e
    } else {
        0.0
    }
}

/// Pairs `q` and `e` elementwise, broadcasting a length-1 side.
pub fn broadcast(q: &[f64], e: &[f64]) -> Result<Vec<(f64, f64)>, QueryError> {
    let len = match (q.len(), e.len()) {
        (a, b) if a == b => a,
        (1, b) => b,
        (a, 1) => a,
        (a, b) => return Err(QueryError::ShapeMismatch { q: a, e: b }),
    };
    let pick = |values: &[f64], i: usize| if values.len() == 1 { values[0] } else { values[i] };
    Ok((0..len).map(|i| (pick(q, i), pick(e, i))).collect())
}

/// Rates of change of the binary's orbital elements per unit log mass.
///
/// Implementors supply the three tabulated rates. The energy and angular
/// momentum rates are provided and must not be overridden.
pub trait DerivativeModel: Send + Sync {
    fn name(&self) -> &str;

    /// `dlog a / dlog M`.
    fn dlog_a(&self, q: f64, e: f64) -> f64;

    /// `dlog e / dlog M`; zero for `e <= 0`.
    fn dlog_e(&self, q: f64, e: f64) -> f64;

    /// `dlog q / dlog M`.
    fn dlog_q(&self, q: f64, e: f64) -> f64;

    fn dlog_energy(&self, q: f64, e: f64) -> f64 {
        energy_rate(q, self.dlog_a(q, e), self.dlog_q(q, e))
    }

    fn dlog_angular_momentum(&self, q: f64, e: f64) -> f64 {
        angular_momentum_rate(
            q,
            e,
            self.dlog_a(q, e),
            self.dlog_e(q, e),
            self.dlog_q(q, e),
        )
    }

    fn rate(&self, rate: Rate, q: f64, e: f64) -> f64 {
        match rate {
            Rate::SemiMajorAxis => self.dlog_a(q, e),
            Rate::Eccentricity => self.dlog_e(q, e),
            Rate::MassRatio => self.dlog_q(q, e),
            Rate::Energy => self.dlog_energy(q, e),
            Rate::AngularMomentum => self.dlog_angular_momentum(q, e),
        }
    }

    /// Vectorized [`DerivativeModel::rate`]. Either side may be a single value,
    /// which is broadcast against the other.
    fn rates(&self, rate: Rate, q: &[f64], e: &[f64]) -> Result<Vec<f64>, QueryError> {
        Ok(broadcast(q, e)?
            .into_iter()
            .map(|(q, e)| self.rate(rate, q, e))
            .collect())
    }
}

/// Mass-ratio and eccentricity dependent model of Siwek et al. 2023
/// (MNRAS 518, 5059; MNRAS 522, 2707), tabulated for `q` in `[0.1, 1]` and
/// `e` in `[0, 0.8]`. Queries outside the tables take the nearest node.
#[derive(Debug, Clone)]
pub struct Siwek23 {
    adota: GridField2d,
    edot: GridField2d,
    qdot: GridField2d,
}

impl Siwek23 {
    pub const NAME: &'static str = "Siwek23";

    /// `lambda` is the secondary-to-primary accretion ratio. It is converted to
    /// `qdot = (1 + q)(lambda - q) / (1 + lambda)` on the table nodes.
    pub fn new(adota: &Table2d, edot: &Table2d, lambda: &Table2d) -> Result<Self, GridError> {
        if !adota.same_axes(edot) {
            return Err(GridError::AxisMismatch {
                left: "adota",
                right: "edot",
            });
        }
        if !adota.same_axes(lambda) {
            return Err(GridError::AxisMismatch {
                left: "adota",
                right: "lambda",
            });
        }
        let qdot = lambda.map_nodes(|q, _e, l| (1.0 + q) * (l - q) / (1.0 + l));
        Ok(Self {
            adota: adota.to_field(OutOfBounds::NearestNode)?,
            edot: edot.to_field(OutOfBounds::NearestNode)?,
            qdot: qdot.to_field(OutOfBounds::NearestNode)?,
        })
    }

    /// `dq / dlog M`, interpolated from the node-converted accretion ratio.
    pub fn qdot(&self, q: f64, e: f64) -> f64 {
        self.qdot.value(q, e)
    }
}

impl DerivativeModel for Siwek23 {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn dlog_a(&self, q: f64, e: f64) -> f64 {
        self.adota.value(q, e)
    }

    fn dlog_e(&self, q: f64, e: f64) -> f64 {
        per_eccentricity(self.edot.value(q, e), e)
    }

    fn dlog_q(&self, q: f64, e: f64) -> f64 {
        self.qdot(q, e) / q
    }
}

/// Non-fatal notice raised by models that ignore part of their input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Advisory {
    /// An equal-mass model was queried with `q != 1`; its tables were used
    /// anyway.
    MassRatioIgnored { model: &'static str, q: f64 },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::MassRatioIgnored { model, q } => {
                write!(f, "{model}: mass ratio {q} differs from 1; using equal-mass tables")
            }
        }
    }
}

/// Equal-mass (`q = 1`) models tabulated over eccentricity only. Outside
/// the sampled eccentricities the tables are extrapolated linearly.
///
/// [`EqualMass::dd21`] follows D'Orazio & Duffell 2021 (ApJ 914, L21) and
/// [`EqualMass::zrake21`] follows Zrake et al. 2021 (ApJ 909, L13).
#[derive(Debug, Clone)]
pub struct EqualMass {
    name: &'static str,
    adota: LinearField1d,
    edot: LinearField1d,
    diagnostics: bool,
}

impl EqualMass {
    pub const DD21: &'static str = "DD21";
    pub const ZRAKE21: &'static str = "Zrake21";

    pub fn new(name: &'static str, adota: &Table1d, edot: &Table1d) -> Result<Self, GridError> {
        Ok(Self {
            name,
            adota: adota.to_field(OutOfBounds::Extrapolate)?,
            edot: edot.to_field(OutOfBounds::Extrapolate)?,
            diagnostics: false,
        })
    }

    pub fn dd21(adota: &Table1d, edot: &Table1d) -> Result<Self, GridError> {
        Self::new(Self::DD21, adota, edot)
    }

    pub fn zrake21(adota: &Table1d, edot: &Table1d) -> Result<Self, GridError> {
        Self::new(Self::ZRAKE21, adota, edot)
    }

    /// Enables mass-ratio advisories. Results are unaffected.
    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.diagnostics = enabled;
        self
    }

    pub fn diagnostics(&self) -> bool {
        self.diagnostics
    }

    /// The advisory a query at `q` raises, if diagnostics are enabled.
    pub fn advisory(&self, q: f64) -> Option<Advisory> {
        if self.diagnostics && q != 1.0 {
            Some(Advisory::MassRatioIgnored {
                model: self.name,
                q,
            })
        } else {
            None
        }
    }

    fn notify(&self, q: f64) {
        if let Some(advisory) = self.advisory(q) {
            tracing::warn!(target: "spindler::advisory", model = self.name, q, "{advisory}");
        }
    }
}

impl DerivativeModel for EqualMass {
    fn name(&self) -> &str {
        self.name
    }

    fn dlog_a(&self, q: f64, e: f64) -> f64 {
        self.notify(q);
        self.adota.value(e)
    }

    fn dlog_e(&self, q: f64, e: f64) -> f64 {
        self.notify(q);
        per_eccentricity(self.edot.value(e), e)
    }

    fn dlog_q(&self, q: f64, _e: f64) -> f64 {
        self.notify(q);
        0.0
    }
}

/// Disk models known by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    Siwek23,
    Dd21,
    Zrake21,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Siwek23, ModelKind::Dd21, ModelKind::Zrake21];

    pub fn name(self) -> &'static str {
        match self {
            ModelKind::Siwek23 => Siwek23::NAME,
            ModelKind::Dd21 => EqualMass::DD21,
            ModelKind::Zrake21 => EqualMass::ZRAKE21,
        }
    }

    /// Conventional CSV file names, in the order `adota`, `edot`[, `lambda`].
    pub fn table_files(self) -> &'static [&'static str] {
        match self {
            ModelKind::Siwek23 => &["adota_siwek23.csv", "edot_siwek23.csv", "lambda_siwek23.csv"],
            ModelKind::Dd21 => &["adota_DD21.csv", "edot_DD21.csv"],
            ModelKind::Zrake21 => &["adota_zrake21.csv", "edot_zrake21.csv"],
        }
    }

    /// Reads this model's tables from `dir` using [`ModelKind::table_files`].
    pub fn load_tables(self, dir: &Path) -> Result<ModelTables, TableError> {
        let files = self.table_files();
        let path = |idx: usize| table_path(dir, files[idx]);
        match self {
            ModelKind::Siwek23 => Ok(ModelTables::General {
                adota: load_table_2d(&path(0))?,
                edot: load_table_2d(&path(1))?,
                lambda: load_table_2d(&path(2))?,
            }),
            ModelKind::Dd21 | ModelKind::Zrake21 => Ok(ModelTables::EqualMass {
                adota: load_table_1d(&path(0), "adota")?,
                edot: load_table_1d(&path(1), "edot")?,
            }),
        }
    }

    /// Builds the model. `diagnostics` only affects equal-mass models.
    pub fn build(
        self,
        tables: &ModelTables,
        diagnostics: bool,
    ) -> Result<Box<dyn DerivativeModel>, ModelError> {
        match (self, tables) {
            (ModelKind::Siwek23, ModelTables::General { adota, edot, lambda }) => {
                Ok(Box::new(Siwek23::new(adota, edot, lambda)?))
            }
            (ModelKind::Dd21, ModelTables::EqualMass { adota, edot }) => {
                Ok(Box::new(EqualMass::dd21(adota, edot)?.with_diagnostics(diagnostics)))
            }
            (ModelKind::Zrake21, ModelTables::EqualMass { adota, edot }) => Ok(Box::new(
                EqualMass::zrake21(adota, edot)?.with_diagnostics(diagnostics),
            )),
            (ModelKind::Siwek23, _) => Err(ModelError::TablesMismatch {
                model: self.name(),
                expected: "two-axis (q, e)",
            }),
            (_, _) => Err(ModelError::TablesMismatch {
                model: self.name(),
                expected: "one-axis (e)",
            }),
        }
    }

    /// Loads the tables from `dir` and builds the model in one go.
    pub fn load(self, dir: &Path, diagnostics: bool) -> anyhow::Result<Box<dyn DerivativeModel>> {
        let tables = self
            .load_tables(dir)
            .with_context(|| format!("loading {} tables from {}", self, dir.display()))?;
        let model = self
            .build(&tables, diagnostics)
            .with_context(|| format!("building {} model", self))?;
        Ok(model)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ModelError::UnknownModel(s.to_string()))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Synthetic tables reproducing the qualitative behaviour of the published
    //! simulations: eccentricity attractors at 0.5 (Siwek23), 0.39 (DD21) and
    //! 0.44 (Zrake21), and mass ratios driven towards unity.

    use super::*;

    pub fn e_samples() -> Vec<f64> {
        (0..=8).map(|i| i as f64 * 0.1).collect()
    }

    pub fn q_samples() -> Vec<f64> {
        (1..=10).map(|i| i as f64 * 0.1).collect()
    }

    fn table_2d(f: impl Fn(f64, f64) -> f64) -> Table2d {
        let q = q_samples();
        let e = e_samples();
        let values = q
            .iter()
            .flat_map(|&qi| e.iter().map(move |&ej| (qi, ej)))
            .map(|(qi, ej)| f(qi, ej))
            .collect();
        Table2d::new(q, e, values).expect("synthetic 2-D table")
    }

    pub fn siwek23_tables() -> (Table2d, Table2d, Table2d) {
        let adota = table_2d(|q, e| 0.6 - 1.5 * e + 0.2 * q);
        let edot = table_2d(|_q, e| -3.0 * (e - 0.5));
        let lambda = table_2d(|q, _e| 2.0 - q);
        (adota, edot, lambda)
    }

    /// Samples listed out of order, as produced by an unsorted loader.
    pub fn equal_mass_tables(attractor: f64) -> (Table1d, Table1d) {
        let mut e = e_samples();
        e.reverse();
        e.swap(0, 4);
        let adota = e.iter().map(|&x| 0.5 - 1.5 * x).collect();
        let edot = e.iter().map(|&x| -3.0 * (x - attractor)).collect();
        (
            Table1d::new(e.clone(), adota).expect("adota table"),
            Table1d::new(e, edot).expect("edot table"),
        )
    }

    pub fn siwek23() -> Siwek23 {
        let (adota, edot, lambda) = siwek23_tables();
        Siwek23::new(&adota, &edot, &lambda).expect("Siwek23 model")
    }

    pub fn dd21() -> EqualMass {
        let (adota, edot) = equal_mass_tables(0.39);
        EqualMass::dd21(&adota, &edot).expect("DD21 model")
    }

    pub fn zrake21() -> EqualMass {
        let (adota, edot) = equal_mass_tables(0.44);
        EqualMass::zrake21(&adota, &edot).expect("Zrake21 model")
    }
}
