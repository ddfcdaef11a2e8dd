//! Stage position list (CSV, no header, one `X,Y,Z` row per tile).

use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tilescan_core::{Position, ScanResult, TileScanError};

/// Read the position list at `path`.
///
/// # Errors
///
/// - [`TileScanError::Io`] if the file cannot be opened
/// - [`TileScanError::InputFormat`] for the first malformed row
pub fn read_position_list(path: &Path) -> ScanResult<Vec<Position>> {
    let file = File::open(path)?;
    let positions = parse_positions(file)?;
    tracing::debug!(path = %path.display(), count = positions.len(), "Read position list");
    Ok(positions)
}

/// Parse comma-separated `X,Y,Z` rows in file order.
///
/// Blank lines are skipped. Every other row must hold exactly three numbers.
/// Rows in errors are physical line numbers, blank lines included.
pub fn parse_positions<R: Read>(mut reader: R) -> ScanResult<Vec<Position>> {
    let mut input = Vec::new();
    reader.read_to_end(&mut input)?;

    let mut csv = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(input.as_slice());

    let mut positions = Vec::new();
    for (i, record) in csv.records().enumerate() {
        let record = record.map_err(|e| TileScanError::InputFormat {
            row: e.position().map_or(i + 1, |p| physical_line(&input, p)),
            content: String::new(),
            reason: e.to_string(),
        })?;
        let row = record
            .position()
            .map_or(i + 1, |p| physical_line(&input, p));
        positions.push(parse_row(row, &record)?);
    }
    Ok(positions)
}

/// 1-based line of the record at `position`.
///
/// The reader's own line count skips blank lines, and its byte offset can
/// point at the blank lines in front of a record, so step over those and
/// count newlines instead.
fn physical_line(input: &[u8], position: &csv::Position) -> usize {
    let mut start = usize::try_from(position.byte()).map_or(input.len(), |b| b.min(input.len()));
    while matches!(input.get(start), Some(b'\r' | b'\n')) {
        start += 1;
    }
    input[..start].iter().filter(|&&b| b == b'\n').count() + 1
}

fn parse_row(row: usize, record: &StringRecord) -> ScanResult<Position> {
    let malformed = |reason: String| TileScanError::InputFormat {
        row,
        content: record.iter().collect::<Vec<_>>().join(","),
        reason,
    };

    if record.len() != 3 {
        return Err(malformed(format!(
            "expected 3 fields, found {}",
            record.len()
        )));
    }

    let mut xyz = [0.0f64; 3];
    for (slot, (axis, field)) in xyz.iter_mut().zip(["X", "Y", "Z"].into_iter().zip(record)) {
        *slot = field
            .parse()
            .map_err(|_| malformed(format!("{axis} value {field:?} is not a number")))?;
    }

    Ok(Position::new(xyz[0], xyz[1], xyz[2]))
}
