//! Serializable payload blobs carried by entities.
//!
//! These are storage shapes only; numeric or chemical interpretation belongs
//! to callers.

use serde::{Deserialize, Serialize};

/// One atom: element symbol and Cartesian position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Atom {
    pub element: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Atom {
    pub fn new(element: impl Into<String>, position: [f64; 3]) -> Self {
        Self {
            element: element.into(),
            x: position[0],
            y: position[1],
            z: position[2],
        }
    }
}

/// Ordered atom geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AtomCollection {
    atoms: Vec<Atom>,
}

impl AtomCollection {
    pub fn new(atoms: Vec<Atom>) -> Self {
        Self { atoms }
    }

    pub fn atoms(&self) -> &[Atom] {
        &self.atoms
    }

    pub fn len(&self) -> usize {
        self.atoms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }
}

impl FromIterator<Atom> for AtomCollection {
    fn from_iter<T: IntoIterator<Item = Atom>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Dense matrix in column-major order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub data: Vec<f64>,
}

impl DenseMatrix {
    /// Returns `None` when `data` does not hold `rows * cols` values.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        (rows.checked_mul(cols) == Some(data.len())).then_some(Self { rows, cols, data })
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.data.get(col * self.rows + row).copied()
    }
}

/// Sparse matrix as coordinate triplets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    pub rows: usize,
    pub cols: usize,
    pub row_idxs: Vec<usize>,
    pub col_idxs: Vec<usize>,
    pub values: Vec<f64>,
}

impl SparseMatrix {
    /// Returns `None` when the triplet arrays disagree in length or an index
    /// falls outside the shape.
    pub fn from_triplets(rows: usize, cols: usize, triplets: &[(usize, usize, f64)]) -> Option<Self> {
        if triplets.iter().any(|(row, col, _)| *row >= rows || *col >= cols) {
            return None;
        }
        Some(Self {
            rows,
            cols,
            row_idxs: triplets.iter().map(|(row, _, _)| *row).collect(),
            col_idxs: triplets.iter().map(|(_, col, _)| *col).collect(),
            values: triplets.iter().map(|(_, _, value)| *value).collect(),
        })
    }

    pub fn non_zeros(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn is_consistent(&self) -> bool {
        self.row_idxs.len() == self.values.len()
            && self.col_idxs.len() == self.values.len()
            && self.row_idxs.iter().all(|row| *row < self.rows)
            && self.col_idxs.iter().all(|col| *col < self.cols)
    }
}

/// Interpolation spline along a reaction path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectorySpline {
    pub ts_position: f64,
    pub knots: Vec<f64>,
    pub data: Vec<Vec<f64>>,
    pub elements: Vec<String>,
}
