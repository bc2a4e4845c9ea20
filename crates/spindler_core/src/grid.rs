//! Continuous scalar fields over rectilinear sample grids.
//!
//! Two concrete field types share the [`GridField`] evaluation interface:
//! [`LinearField1d`] (piecewise-linear over one axis) and [`GridField2d`]
//! (bilinear over two axes). Both are immutable once built and can be queried
//! from any number of threads.
//!
//! Queries outside the sampled bounding box follow an [`OutOfBounds`] policy
//! chosen at construction time.

use serde::{Deserialize, Serialize};

use crate::error::{GridError, QueryError};

/// What a field returns for points outside its closed bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfBounds {
    /// Value of the nearest grid node. For a rectilinear grid this is the node
    /// whose index is the nearest clamped index along every axis. A query
    /// exactly halfway between two nodes resolves to the lower index.
    NearestNode,
    /// Linear continuation of the boundary segment (or cell).
    Extrapolate,
}

/// Vectorized evaluation shared by 1-D and 2-D fields.
pub trait GridField: Send + Sync {
    /// Number of coordinates per query point.
    fn dimension(&self) -> usize;

    /// Field value at a single point with `dimension()` coordinates.
    fn value_at(&self, point: &[f64]) -> f64;

    /// Evaluates a flattened row-major list of points.
    fn evaluate(&self, points: &[f64]) -> Result<Vec<f64>, QueryError> {
        let dim = self.dimension();
        if points.len() % dim != 0 {
            return Err(QueryError::RaggedPoints {
                len: points.len(),
                dim,
            });
        }
        Ok(points
            .chunks_exact(dim)
            .map(|point| self.value_at(point))
            .collect())
    }
}

/// A validated, strictly increasing, finite coordinate axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    coords: Vec<f64>,
}

impl Axis {
    pub fn new(coords: Vec<f64>) -> Result<Self, GridError> {
        Self::indexed(0, coords)
    }

    pub(crate) fn indexed(axis: usize, coords: Vec<f64>) -> Result<Self, GridError> {
        if coords.is_empty() {
            return Err(GridError::EmptyAxis { axis });
        }
        for (index, value) in coords.iter().enumerate() {
            if !value.is_finite() {
                return Err(GridError::NonFiniteCoordinate { axis, index });
            }
        }
        for index in 1..coords.len() {
            let previous = coords[index - 1];
            let current = coords[index];
            if current <= previous {
                return Err(GridError::NotIncreasing {
                    axis,
                    index,
                    previous,
                    current,
                });
            }
        }
        Ok(Self { coords })
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn min(&self) -> f64 {
        self.coords[0]
    }

    pub fn max(&self) -> f64 {
        self.coords[self.coords.len() - 1]
    }

    /// True when `x` lies in the closed interval spanned by the axis.
    pub fn contains(&self, x: f64) -> bool {
        x >= self.min() && x <= self.max()
    }

    /// Index of the nearest node, clamped to the axis ends. Ties go low.
    pub fn nearest(&self, x: f64) -> usize {
        let last = self.coords.len() - 1;
        if x <= self.coords[0] {
            return 0;
        }
        if x >= self.coords[last] {
            return last;
        }
        let (lo, _) = self.bracket(x);
        if x - self.coords[lo] <= self.coords[lo + 1] - x {
            lo
        } else {
            lo + 1
        }
    }

    /// Segment `(i, w)` used to interpolate at `x`: the value is
    /// `(1 - w) * v[i] + w * v[i + 1]`. Outside the axis `w` leaves `[0, 1]`,
    /// which continues the end segment linearly. Single-node axes return
    /// `(0, 0.0)`.
    fn bracket(&self, x: f64) -> (usize, f64) {
        let n = self.coords.len();
        if n == 1 {
            return (0, 0.0);
        }
        let upper = self.coords.partition_point(|&c| c <= x);
        let lo = upper.saturating_sub(1).min(n - 2);
        let x0 = self.coords[lo];
        let x1 = self.coords[lo + 1];
        (lo, (x - x0) / (x1 - x0))
    }

    fn upper(&self, lo: usize) -> usize {
        (lo + 1).min(self.coords.len() - 1)
    }
}

/// Exact at both ends of the segment.
fn lerp(v0: f64, v1: f64, w: f64) -> f64 {
    if w == 0.0 {
        v0
    } else if w == 1.0 {
        v1
    } else {
        (1.0 - w) * v0 + w * v1
    }
}

fn check_values(values: &[f64], expected: usize) -> Result<(), GridError> {
    if values.len() != expected {
        return Err(GridError::ShapeMismatch {
            expected,
            actual: values.len(),
        });
    }
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(GridError::NonFiniteValue { index });
    }
    Ok(())
}

/// Piecewise-linear field over a single axis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinearField1d {
    axis: Axis,
    values: Vec<f64>,
    policy: OutOfBounds,
}

impl LinearField1d {
    pub fn new(coords: Vec<f64>, values: Vec<f64>, policy: OutOfBounds) -> Result<Self, GridError> {
        let axis = Axis::indexed(0, coords)?;
        check_values(&values, axis.len())?;
        Ok(Self {
            axis,
            values,
            policy,
        })
    }

    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn policy(&self) -> OutOfBounds {
        self.policy
    }

    pub fn value(&self, x: f64) -> f64 {
        if !x.is_finite() {
            return f64::NAN;
        }
        if self.policy == OutOfBounds::NearestNode && !self.axis.contains(x) {
            return self.values[self.axis.nearest(x)];
        }
        let (lo, w) = self.axis.bracket(x);
        lerp(self.values[lo], self.values[self.axis.upper(lo)], w)
    }
}

impl GridField for LinearField1d {
    fn dimension(&self) -> usize {
        1
    }

    fn value_at(&self, point: &[f64]) -> f64 {
        self.value(point[0])
    }
}

/// Bilinear field over two axes. Values are stored row-major: one row per
/// sample of the first axis, one column per sample of the second.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridField2d {
    rows: Axis,
    cols: Axis,
    values: Vec<f64>,
    policy: OutOfBounds,
}

impl GridField2d {
    pub fn new(
        rows: Vec<f64>,
        cols: Vec<f64>,
        values: Vec<f64>,
        policy: OutOfBounds,
    ) -> Result<Self, GridError> {
        let rows = Axis::indexed(0, rows)?;
        let cols = Axis::indexed(1, cols)?;
        check_values(&values, rows.len() * cols.len())?;
        Ok(Self {
            rows,
            cols,
            values,
            policy,
        })
    }

    pub fn rows(&self) -> &Axis {
        &self.rows
    }

    pub fn cols(&self) -> &Axis {
        &self.cols
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn policy(&self) -> OutOfBounds {
        self.policy
    }

    /// True when `(x, y)` lies inside the closed bounding box of the grid.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        self.rows.contains(x) && self.cols.contains(y)
    }

    fn node(&self, row: usize, col: usize) -> f64 {
        self.values[row * self.cols.len() + col]
    }

    pub fn value(&self, x: f64, y: f64) -> f64 {
        if !x.is_finite() || !y.is_finite() {
            return f64::NAN;
        }
        if self.policy == OutOfBounds::NearestNode && !self.contains(x, y) {
            return self.node(self.rows.nearest(x), self.cols.nearest(y));
        }
        let (r0, wr) = self.rows.bracket(x);
        let (c0, wc) = self.cols.bracket(y);
        let r1 = self.rows.upper(r0);
        let c1 = self.cols.upper(c0);
        let low = lerp(self.node(r0, c0), self.node(r0, c1), wc);
        let high = lerp(self.node(r1, c0), self.node(r1, c1), wc);
        lerp(low, high, wr)
    }
}

impl GridField for GridField2d {
    fn dimension(&self) -> usize {
        2
    }

    fn value_at(&self, point: &[f64]) -> f64 {
        self.value(point[0], point[1])
    }
}
