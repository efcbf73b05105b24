use core::fmt::{self, Write};

use heapless::String;
use thiserror_no_std::Error;

use crate::mma8451::Acceleration;

/// First line of every log file
pub const CSV_HEADER: &str = "timedelta_ms,Xacc,Yacc,Zacc\n";

/// Upper bound of one formatted record including the newline
///
/// `4294967295,-78.4532,-78.4532,-78.4532\n` is 39 bytes; the slack covers
/// out-of-range values from a misbehaving sensor.
pub const MAX_LINE_LEN: usize = 64;

/// One accelerometer reading relative to the start of a recording session
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccelSample {
    /// Milliseconds since the session started
    pub timedelta_ms: u32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("expected 4 fields, found {0}")]
    FieldCount(usize),
    #[error("invalid timedelta")]
    Timedelta,
    #[error("invalid acceleration value in column {0}")]
    Value(usize),
}

impl AccelSample {
    pub fn new(timedelta_ms: u32, acceleration: Acceleration) -> Self {
        Self {
            timedelta_ms,
            x: acceleration.x,
            y: acceleration.y,
            z: acceleration.z,
        }
    }

    /// Write the record as `timedelta_ms,x,y,z\n` with four decimals
    pub fn write_csv<W: Write>(&self, out: &mut W) -> fmt::Result {
        writeln!(
            out,
            "{},{:.4},{:.4},{:.4}",
            self.timedelta_ms, self.x, self.y, self.z
        )
    }

    pub fn to_csv_line(&self) -> Result<String<MAX_LINE_LEN>, fmt::Error> {
        let mut line = String::new();
        self.write_csv(&mut line)?;
        Ok(line)
    }
}

/// Split a log row into `[timedelta_ms, x, y, z]`
///
/// Tolerates CRLF and whitespace around fields. Fractional milliseconds
/// are accepted so that edited or resampled files load.
pub fn parse_row(line: &str) -> Result<[f64; 4], ParseError> {
    let mut values = [0.0f64; 4];
    let mut count = 0;

    for field in line.trim().split(',') {
        if let Some(value) = values.get_mut(count) {
            let field = field.trim();
            *value = field.parse().map_err(|_| match count {
                0 => ParseError::Timedelta,
                n => ParseError::Value(n),
            })?;
        }
        count += 1;
    }
    if count != values.len() {
        return Err(ParseError::FieldCount(count));
    }
    if !values[0].is_finite() || values[0] < 0.0 {
        return Err(ParseError::Timedelta);
    }
    Ok(values)
}

/// True when `line` is the log header (ignoring line endings)
pub fn is_header(line: &str) -> bool {
    line.trim() == CSV_HEADER.trim_end()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_four_decimals() {
        let sample = AccelSample {
            timedelta_ms: 20,
            x: 0.12344,
            y: -0.0456,
            z: 9.80665,
        };
        // 9.80665f32 is stored just above 9.80665
        assert_eq!(sample.to_csv_line().unwrap(), "20,0.1234,-0.0456,9.8067\n");
    }

    #[test]
    fn worst_case_line_fits() {
        let sample = AccelSample {
            timedelta_ms: u32::MAX,
            x: -78.4532,
            y: -78.4532,
            z: -78.4532,
        };
        let line = sample.to_csv_line().unwrap();
        assert!(line.len() < MAX_LINE_LEN);
    }

    #[test]
    fn parses_with_crlf_and_spaces() {
        let row = parse_row(" 40, 0.5000,-1.2500 ,9.8100\r\n").unwrap();
        assert_eq!(row, [40.0, 0.5, -1.25, 9.81]);
    }

    #[test]
    fn fractional_timedelta_is_kept() {
        assert_eq!(parse_row("12.5,0,0,1").unwrap()[0], 12.5);
    }

    #[test]
    fn written_lines_parse_back() {
        let sample = AccelSample {
            timedelta_ms: 1_000,
            x: -0.5,
            y: 0.25,
            z: 9.75,
        };
        let row = parse_row(&sample.to_csv_line().unwrap()).unwrap();
        assert_eq!(row, [1000.0, -0.5, 0.25, 9.75]);
    }

    #[test]
    fn rejects_bad_rows() {
        assert_eq!(parse_row("1,2,3"), Err(ParseError::FieldCount(3)));
        assert_eq!(parse_row("1,2,3,4,5"), Err(ParseError::FieldCount(5)));
        assert_eq!(parse_row("-1,0,0,0"), Err(ParseError::Timedelta));
        assert_eq!(parse_row("x,0,0,0"), Err(ParseError::Timedelta));
        assert_eq!(parse_row("1,0,abc,0"), Err(ParseError::Value(2)));
    }

    #[test]
    fn header_detection() {
        assert!(is_header("timedelta_ms,Xacc,Yacc,Zacc\r\n"));
        assert!(!is_header("0,0.0,0.0,0.0"));
    }
}
