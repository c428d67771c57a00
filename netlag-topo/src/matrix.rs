//! The square matrix of target latencies between endpoints.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MatrixError {
    #[error("failed to read latency matrix from '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("row {row} has {found} entries but expected {expected}")]
    RaggedRow { row: usize, found: usize, expected: usize },
    #[error("matrix is not square: {rows} rows of {columns} entries")]
    NotSquare { rows: usize, columns: usize },
    #[error("invalid latency value '{value}' on row {row}: {source}")]
    InvalidValue {
        row: usize,
        value: String,
        #[source]
        source: std::num::ParseFloatError,
    },
}

/// Unit the matrix file expresses its values in. Internally everything is
/// kept in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeUnit {
    #[default]
    Milliseconds,
    Seconds,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid time unit '{0}', expected 'ms' or 's'")]
pub struct InvalidTimeUnit(String);

impl FromStr for TimeUnit {
    type Err = InvalidTimeUnit;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ms" => Ok(Self::Milliseconds),
            "s" => Ok(Self::Seconds),
            other => Err(InvalidTimeUnit(other.to_string())),
        }
    }
}

/// Immutable N×N matrix of pairwise target latencies in milliseconds.
///
/// `get(i, j)` is the latency from endpoint `i` to endpoint `j`; the matrix
/// may be asymmetric and the diagonal is never read.
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyMatrix {
    size: usize,
    millis: Vec<f64>,
}

impl LatencyMatrix {
    /// Parses whitespace-separated numeric rows, one per line. Blank lines
    /// and lines starting with `#` are skipped.
    pub fn parse(content: &str, unit: TimeUnit) -> Result<Self, MatrixError> {
        let mut columns = None;
        let mut millis = Vec::new();
        let mut rows = 0usize;

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let mut row_len = 0usize;
            for value in line.split_whitespace() {
                let parsed = value.parse::<f64>().map_err(|source| MatrixError::InvalidValue {
                    row: rows,
                    value: value.to_string(),
                    source,
                })?;
                millis.push(match unit {
                    TimeUnit::Milliseconds => parsed,
                    TimeUnit::Seconds => parsed * 1000.0,
                });
                row_len += 1;
            }

            match columns {
                Some(expected) if row_len != expected => {
                    return Err(MatrixError::RaggedRow { row: rows, found: row_len, expected });
                }
                Some(_) => {}
                None => columns = Some(row_len),
            }
            rows += 1;
        }

        let columns = columns.unwrap_or(0);
        if rows != columns {
            return Err(MatrixError::NotSquare { rows, columns });
        }

        Ok(Self { size: rows, millis })
    }

    /// Reads and parses a matrix file.
    pub fn load(path: impl AsRef<Path>, unit: TimeUnit) -> Result<Self, MatrixError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| MatrixError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, unit)
    }

    /// Latency from endpoint `src` to endpoint `dst`, in milliseconds.
    /// `None` when either index is out of range.
    pub fn get(&self, src: usize, dst: usize) -> Option<f64> {
        if src >= self.size || dst >= self.size {
            return None;
        }
        Some(self.millis[self.size * src + dst])
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

impl FromStr for LatencyMatrix {
    type Err = MatrixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, TimeUnit::Milliseconds)
    }
}

impl fmt::Display for LatencyMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in 0..self.size {
            for col in 0..self.size {
                if col > 0 {
                    f.write_str(" ")?;
                }
                write!(f, "{}", self.millis[self.size * row + col])?;
            }
            f.write_str("\n")?;
        }
        Ok(())
    }
}
