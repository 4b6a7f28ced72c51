//! Matrix-Market reader and writer for symmetric matrices
//!
//! Files list a single triangle. Reading mirrors every off-diagonal entry,
//! writing emits the upper triangle only.
//!
//! ```text
//! % comment lines start with '%'
//! 2 2 2
//! 1 1 2
//! 1 2 -1
//! ```

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use log::{debug, trace};

use crate::error::{MatrixError, MatrixResult};
use crate::math::{Constraints, CooMatrix, CrsMatrix};

/// Parse a listing into a COO with both triangles assembled
pub fn parse_matrix_market<R: BufRead>(reader: R) -> MatrixResult<CooMatrix> {
    let mut coo: Option<CooMatrix> = None;
    let mut skipped = 0usize;

    // Raw lines: stray non-UTF-8 bytes in comments or bad entries must not abort the read
    for (idx, line) in reader.split(b'\n').enumerate() {
        let line = line?;
        let line_no = idx + 1;
        let line = String::from_utf8_lossy(&line);
        let text = line.trim();
        if text.is_empty() || text.starts_with('%') {
            continue;
        }

        if coo.is_none() {
            coo = Some(CooMatrix::new(parse_size_line(text, line_no)?));
            continue;
        }
        let Some(matrix) = coo.as_mut() else {
            continue;
        };

        match parse_entry(text, matrix.size()) {
            Some((i, j, v)) => {
                matrix.add(i, j, v);
                if i != j {
                    matrix.add(j, i, v);
                }
            }
            None => {
                trace!("Skipping malformed entry on line {line_no}: {text:?}");
                skipped += 1;
            }
        }
    }

    let coo = coo.ok_or_else(|| MatrixError::Parse {
        line: 0,
        message: "missing size line".to_string(),
    })?;
    debug!(
        "Read {}x{} matrix with {} stored entries ({} lines skipped)",
        coo.size(),
        coo.size(),
        coo.nnz(),
        skipped
    );
    Ok(coo)
}

fn parse_size_line(text: &str, line: usize) -> MatrixResult<usize> {
    let fields: Vec<usize> = text
        .split_whitespace()
        .map(str::parse::<usize>)
        .collect::<Result<Vec<usize>, _>>()
        .map_err(|e| MatrixError::Parse {
            line,
            message: format!("bad size line {text:?}: {e}"),
        })?;

    match fields.as_slice() {
        [rows, cols, _nz] if rows == cols => Ok(*rows),
        [rows, cols, _nz] => Err(MatrixError::Parse {
            line,
            message: format!("matrix must be square, got {rows}x{cols}"),
        }),
        _ => Err(MatrixError::Parse {
            line,
            message: format!("expected `rows cols nz`, got {text:?}"),
        }),
    }
}

/// `i j v` with 1-based indices inside `1..=size`
fn parse_entry(text: &str, size: usize) -> Option<(usize, usize, f64)> {
    let mut fields = text.split_whitespace();
    let i: usize = fields.next()?.parse().ok()?;
    let j: usize = fields.next()?.parse().ok()?;
    let v: f64 = fields.next()?.parse().ok()?;
    if fields.next().is_some() || !(1..=size).contains(&i) || !(1..=size).contains(&j) {
        return None;
    }
    Some((i - 1, j - 1, v))
}

/// Read a file into the COO form
pub fn read_coo(path: impl AsRef<Path>) -> MatrixResult<CooMatrix> {
    let file = File::open(path.as_ref())?;
    parse_matrix_market(BufReader::new(file))
}

/// Read a file and freeze it into an unconstrained CRS
pub fn read_matrix_market(path: impl AsRef<Path>) -> MatrixResult<CrsMatrix> {
    let coo = read_coo(path)?;
    coo.to_crs(&Constraints::none(coo.size()))
}

/// Write the upper triangle of a COO
pub fn write_matrix_market<W: Write>(out: W, matrix: &CooMatrix) -> MatrixResult<()> {
    let upper: Vec<(usize, usize, f64)> = matrix
        .triplets()
        .filter(|&(r, c, _)| c >= r)
        .collect();
    write_upper(out, matrix.size(), &upper)
}

/// Write the upper triangle of a CRS
pub fn write_crs_matrix_market<W: Write>(out: W, matrix: &CrsMatrix) -> MatrixResult<()> {
    let offsets = matrix.row_offsets();
    let mut upper = Vec::new();
    for r in 0..matrix.dim() {
        for k in offsets[r]..offsets[r + 1] {
            let c = matrix.col_indices()[k];
            if c >= r {
                upper.push((r, c, matrix.values()[k]));
            }
        }
    }
    write_upper(out, matrix.dim(), &upper)
}

/// Write a COO to a file
pub fn save_matrix_market(path: impl AsRef<Path>, matrix: &CooMatrix) -> MatrixResult<()> {
    let file = File::create(path.as_ref())?;
    write_matrix_market(BufWriter::new(file), matrix)
}

fn write_upper<W: Write>(
    mut out: W,
    size: usize,
    entries: &[(usize, usize, f64)],
) -> MatrixResult<()> {
    writeln!(out, "% symmetric, upper triangle")?;
    writeln!(out, "{} {} {}", size, size, entries.len())?;
    for &(r, c, v) in entries {
        // {:e} round-trips every finite f64
        writeln!(out, "{} {} {:e}", r + 1, c + 1, v)?;
    }
    out.flush()?;
    Ok(())
}
