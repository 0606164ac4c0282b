//! Dense square matrix keyed by agent index

use crate::error::{BwError, Result};

/// Row-major `n × n` matrix with bounds-checked accessors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Matrix<T> {
    size: usize,
    cells: Vec<T>,
}

impl<T: Clone> Matrix<T> {
    /// Create a matrix with every cell set to `fill`
    pub fn filled(size: usize, fill: T) -> Self {
        Self {
            size,
            cells: vec![fill; size * size],
        }
    }
}

impl<T> Matrix<T> {
    /// Build a matrix by evaluating `f(row, col)` for every cell
    ///
    /// # Errors
    ///
    /// Returns the first error produced by `f`.
    pub fn try_from_fn<F>(size: usize, mut f: F) -> Result<Self>
    where
        F: FnMut(usize, usize) -> Result<T>,
    {
        let mut cells = Vec::with_capacity(size * size);
        for row in 0..size {
            for col in 0..size {
                cells.push(f(row, col)?);
            }
        }
        Ok(Self { size, cells })
    }

    /// Side length
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Cell at `(row, col)`, `None` if out of range
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<&T> {
        self.offset(row, col).map(|i| &self.cells[i])
    }

    /// Overwrite cell `(row, col)`
    ///
    /// # Errors
    ///
    /// Returns `UnknownAgent` if either coordinate is out of range.
    pub fn set(&mut self, row: usize, col: usize, value: T) -> Result<()> {
        let i = self.offset(row, col).ok_or(BwError::UnknownAgent {
            index: row.max(col),
            count: self.size,
        })?;
        self.cells[i] = value;
        Ok(())
    }

    /// One row as a slice
    #[must_use]
    pub fn row(&self, row: usize) -> Option<&[T]> {
        (row < self.size).then(|| &self.cells[row * self.size..(row + 1) * self.size])
    }

    /// Iterate over rows
    pub fn rows(&self) -> impl Iterator<Item = &[T]> {
        // chunks(0) panics; an empty matrix has no rows anyway
        self.cells.chunks(self.size.max(1))
    }

    const fn offset(&self, row: usize, col: usize) -> Option<usize> {
        if row < self.size && col < self.size {
            Some(row * self.size + col)
        } else {
            None
        }
    }
}
