//! Memory-access trace reading.
//!
//! A trace is a text file with one access per line. Two formats exist:
//! 1. **Plain:** `0x<hex> R|W`, the same format the simulator's own
//!    memory-trace sink emits, so a run's output can be replayed as input.
//! 2. **CloudSuite:** `R|W,0x<hex>[,<cpu>]`; the trailing CPU field is
//!    accepted and ignored (each CPU replays its own file).
//!
//! Blank lines and lines starting with `#` are skipped.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::common::{AccessKind, SimError};

/// Trace file format selector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TraceFormat {
    /// `0x<hex> R|W` per line.
    #[default]
    Plain,
    /// `R|W,0x<hex>[,<cpu>]` per line.
    CloudSuite,
}

/// One parsed trace record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TraceRecord {
    /// Physical byte address of the access.
    pub addr: u64,
    /// Read or write.
    pub kind: AccessKind,
}

/// Streaming reader over one trace file.
pub struct TraceReader {
    lines: Box<dyn BufRead>,
    format: TraceFormat,
    line_no: usize,
}

impl std::fmt::Debug for TraceReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceReader")
            .field("format", &self.format)
            .field("line_no", &self.line_no)
            .finish_non_exhaustive()
    }
}

fn parse_addr(token: &str, line: usize) -> Result<u64, SimError> {
    let digits = token
        .strip_prefix("0x")
        .or_else(|| token.strip_prefix("0X"))
        .unwrap_or(token);
    u64::from_str_radix(digits, 16).map_err(|_| SimError::TraceParse {
        line,
        reason: format!("bad address {token:?}"),
    })
}

fn parse_kind(token: &str, line: usize) -> Result<AccessKind, SimError> {
    match token {
        "R" | "r" => Ok(AccessKind::Read),
        "W" | "w" => Ok(AccessKind::Write),
        _ => Err(SimError::TraceParse {
            line,
            reason: format!("bad access kind {token:?}"),
        }),
    }
}

impl TraceReader {
    /// Opens a trace file.
    pub fn from_path<P: AsRef<Path>>(path: P, format: TraceFormat) -> Result<Self, SimError> {
        let file = File::open(path)?;
        Ok(Self::from_reader(Box::new(BufReader::new(file)), format))
    }

    /// Wraps any buffered reader (used by tests).
    pub fn from_reader(lines: Box<dyn BufRead>, format: TraceFormat) -> Self {
        Self {
            lines,
            format,
            line_no: 0,
        }
    }

    fn parse(&self, line: &str) -> Result<TraceRecord, SimError> {
        match self.format {
            TraceFormat::Plain => {
                let mut fields = line.split_whitespace();
                let (Some(addr), Some(kind)) = (fields.next(), fields.next()) else {
                    return Err(SimError::TraceParse {
                        line: self.line_no,
                        reason: "expected `<addr> <R|W>`".into(),
                    });
                };
                Ok(TraceRecord {
                    addr: parse_addr(addr, self.line_no)?,
                    kind: parse_kind(kind, self.line_no)?,
                })
            }
            TraceFormat::CloudSuite => {
                let mut fields = line.split(',');
                let (Some(kind), Some(addr)) = (fields.next(), fields.next()) else {
                    return Err(SimError::TraceParse {
                        line: self.line_no,
                        reason: "expected `<R|W>,<addr>[,<cpu>]`".into(),
                    });
                };
                Ok(TraceRecord {
                    addr: parse_addr(addr.trim(), self.line_no)?,
                    kind: parse_kind(kind.trim(), self.line_no)?,
                })
            }
        }
    }

    /// Returns the next record, or `None` at end of trace.
    pub fn next_record(&mut self) -> Result<Option<TraceRecord>, SimError> {
        loop {
            let mut line = String::new();
            self.line_no += 1;
            if self.lines.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            return self.parse(line).map(Some);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(text: &str, format: TraceFormat) -> TraceReader {
        TraceReader::from_reader(Box::new(Cursor::new(text.to_owned())), format)
    }

    #[test]
    fn test_plain_format() {
        let mut trace = reader("# header\n0x1000 R\n\n2000 W\n", TraceFormat::Plain);
        assert_eq!(
            trace.next_record().unwrap().unwrap(),
            TraceRecord { addr: 0x1000, kind: AccessKind::Read }
        );
        assert_eq!(
            trace.next_record().unwrap().unwrap(),
            TraceRecord { addr: 0x2000, kind: AccessKind::Write }
        );
        assert!(trace.next_record().unwrap().is_none());
    }

    #[test]
    fn test_cloudsuite_format() {
        let mut trace = reader("w,0x40,3\nR,80\n", TraceFormat::CloudSuite);
        assert_eq!(
            trace.next_record().unwrap().unwrap(),
            TraceRecord { addr: 0x40, kind: AccessKind::Write }
        );
        assert_eq!(
            trace.next_record().unwrap().unwrap(),
            TraceRecord { addr: 0x80, kind: AccessKind::Read }
        );
    }

    #[test]
    fn test_parse_errors_carry_line_numbers() {
        let mut trace = reader("0x10 R\nnonsense\n", TraceFormat::Plain);
        let _ = trace.next_record().unwrap();
        match trace.next_record() {
            Err(SimError::TraceParse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {other:?}"),
        }
    }
}
