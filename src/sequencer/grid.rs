use std::sync::Arc;

use crate::error::SequencerError;
use crate::palette::{PaletteKey, PaletteTable};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellAssignment {
    pub palette_key: PaletteKey,
    pub row: usize,
}

/// Fixed rows x cols matrix of optional cell assignments.
///
/// Every stored assignment references an existing palette entry that permits
/// its row; writes that would break that are rejected before touching a cell.
#[derive(Debug, Clone)]
pub struct Grid {
    cells: Vec<Vec<Option<CellAssignment>>>,
    rows: usize,
    cols: usize,
    palette: Arc<PaletteTable>,
}

impl Grid {
    pub fn new(rows: usize, cols: usize, palette: Arc<PaletteTable>) -> Self {
        Self {
            cells: vec![vec![None; cols]; rows],
            rows,
            cols,
            palette,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn get(&self, row: usize, col: usize) -> Option<&CellAssignment> {
        self.cells
            .get(row)
            .and_then(|r| r.get(col))
            .and_then(|cell| cell.as_ref())
    }

    fn check_range(&self, row: usize, col: usize) -> Result<(), SequencerError> {
        if row < self.rows && col < self.cols {
            Ok(())
        } else {
            Err(SequencerError::OutOfRange {
                row,
                col,
                rows: self.rows,
                cols: self.cols,
            })
        }
    }

    /// Writes `key` into the cell, replacing whatever was there.
    pub fn paint(&mut self, row: usize, col: usize, key: &PaletteKey) -> Result<(), SequencerError> {
        self.check_range(row, col)?;
        let entry = self.palette.resolve(key.as_str())?;
        if !entry.allowed_rows.permits(row) {
            return Err(SequencerError::PaletteMismatch {
                key: key.clone(),
                row,
            });
        }

        self.cells[row][col] = Some(CellAssignment {
            palette_key: key.clone(),
            row,
        });
        Ok(())
    }

    pub fn erase(&mut self, row: usize, col: usize) -> Result<(), SequencerError> {
        self.check_range(row, col)?;
        self.cells[row][col] = None;
        Ok(())
    }

    pub fn clear(&mut self) {
        for row in &mut self.cells {
            for cell in row {
                *cell = None;
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cells.iter().flatten().all(Option::is_none)
    }

    /// Owned copy of the non-empty cells of `col`, in ascending row order.
    pub fn column_snapshot(&self, col: usize) -> Result<Vec<(usize, CellAssignment)>, SequencerError> {
        self.check_range(0, col)?;
        Ok(self
            .cells
            .iter()
            .enumerate()
            .filter_map(|(row, cells)| cells[col].clone().map(|cell| (row, cell)))
            .collect())
    }
}
