//! FITS image writer
//!
//! Writes a single primary HDU holding 16-bit unsigned pixels, stored the FITS
//! way as signed big-endian integers with `BZERO = 32768`. Header and data are
//! each padded to whole 2880-byte blocks.
//!
//! ```text
//! SIMPLE   = T
//! BITPIX   = 16
//! NAXIS1   = width, NAXIS2 = height
//! EXPTIME  / EXPOSURE   seconds actually exposed
//! XBINNING / YBINNING
//! IMAGETYP = 'Light Frame' | 'Dark Frame'
//! DATE     = UTC time the file was written
//! ```

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::ResultSink;
use crate::error::{AppResult, CoreError};
use crate::exposure::ExposureResult;

const BLOCK: usize = 2880;
const CARD: usize = 80;
const BZERO: u16 = 32768;
/// Value columns 11-30 of a fixed-format card
const FIXED_FORMAT_WIDTH: usize = 20;

enum Value {
    Logical(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

fn card(keyword: &str, value: Value, comment: &str) -> String {
    let value = match value {
        Value::Logical(v) => format!("{:>20}", if v { "T" } else { "F" }),
        Value::Int(v) => format!("{:>20}", v),
        Value::Float(v) => {
            let mut text = v.to_string();
            if !text.contains('.') {
                text.push_str(".0");
            }
            if text.len() > FIXED_FORMAT_WIDTH {
                text = format!("{:.12E}", v);
            }
            format!("{:>20}", text)
        }
        Value::Text(v) => format!("'{:<8}'", v.replace('\'', "''")),
    };

    let mut line = format!("{:<8}= {}", keyword, value);
    if !comment.is_empty() {
        line.push_str(" / ");
        line.push_str(comment);
    }
    line.truncate(CARD);
    format!("{:<width$}", line, width = CARD)
}

fn pad(len: usize) -> usize {
    (BLOCK - len % BLOCK) % BLOCK
}

fn check_dimensions(result: &ExposureResult) -> AppResult<()> {
    let expected = (result.width as usize) * (result.height as usize);
    if result.element_count() != expected {
        return Err(CoreError::Sink(format!(
            "buffer holds {} pixels but image is {} x {}",
            result.element_count(),
            result.width,
            result.height
        )));
    }
    Ok(())
}

/// Serialize `result` as a FITS file into `out`.
pub fn write_fits<W: Write>(
    out: &mut W,
    result: &ExposureResult,
    written_at: DateTime<Utc>,
) -> AppResult<()> {
    check_dimensions(result)?;

    let cards = [
        card("SIMPLE", Value::Logical(true), "conforms to FITS standard"),
        card("BITPIX", Value::Int(16), "array data type"),
        card("NAXIS", Value::Int(2), "number of array dimensions"),
        card("NAXIS1", Value::Int(result.width.into()), ""),
        card("NAXIS2", Value::Int(result.height.into()), ""),
        card("BZERO", Value::Int(BZERO.into()), "offset data range to that of unsigned short"),
        card("BSCALE", Value::Int(1), "default scaling factor"),
        card(
            "EXPTIME",
            Value::Float(result.exposure_duration),
            "Total exposure time (s)",
        ),
        card(
            "EXPOSURE",
            Value::Float(result.exposure_duration),
            "Total exposure time (s)",
        ),
        card("XBINNING", Value::Int(result.bin_x.into()), "Binning factor in width"),
        card("YBINNING", Value::Int(result.bin_y.into()), "Binning factor in height"),
        card(
            "IMAGETYP",
            Value::Text(result.frame_type.to_string()),
            "Type of image",
        ),
        card(
            "DATE",
            Value::Text(written_at.format("%Y-%m-%dT%H:%M:%S").to_string()),
            "UTC date the file was written",
        ),
    ];

    let mut header = String::with_capacity(BLOCK);
    for c in &cards {
        header.push_str(c);
    }
    header.push_str(&format!("{:<width$}", "END", width = CARD));
    header.push_str(&" ".repeat(pad(header.len())));
    out.write_all(header.as_bytes())?;

    let mut data = Vec::with_capacity(result.element_count() * 2);
    for &pixel in &result.buffer {
        data.extend_from_slice(&(pixel ^ BZERO).to_be_bytes());
    }
    data.resize(data.len() + pad(data.len()), 0);
    out.write_all(&data)?;
    out.flush()?;
    Ok(())
}

/// Writes each exposure to a new FITS file at a fixed path.
///
/// Refuses to overwrite an existing file. A failed write removes the partial
/// file so the same path can be used again.
#[derive(Debug, Clone)]
pub struct FitsSink {
    path: PathBuf,
}

impl FitsSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultSink for FitsSink {
    fn persist(&mut self, result: ExposureResult) -> AppResult<()> {
        check_dimensions(&result)?;

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let mut out = BufWriter::new(file);
        let written = write_fits(&mut out, &result, Utc::now());
        drop(out);

        if let Err(err) = written {
            if let Err(remove_err) = std::fs::remove_file(&self.path) {
                warn!(
                    path = %self.path.display(),
                    error = %remove_err,
                    "could not remove partial FITS file"
                );
            }
            return Err(err);
        }
        info!(path = %self.path.display(), "exposure written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::FrameType;
    use chrono::TimeZone;

    fn result(width: u32, height: u32) -> ExposureResult {
        ExposureResult {
            buffer: (0..width * height).map(|v| v as u16).collect(),
            width,
            height,
            exposure_duration: 2.0,
            bin_x: 2,
            bin_y: 2,
            frame_type: FrameType::Dark,
        }
    }

    fn header_cards(bytes: &[u8]) -> Vec<String> {
        bytes[..BLOCK]
            .chunks(CARD)
            .map(|c| String::from_utf8_lossy(c).into_owned())
            .collect()
    }

    #[test]
    fn test_card_layout() {
        let c = card("BITPIX", Value::Int(16), "");
        assert_eq!(c.len(), CARD);
        assert_eq!(&c[..10], "BITPIX  = ");
        assert_eq!(c[10..30].trim(), "16");

        let t = card("IMAGETYP", Value::Text("Dark Frame".into()), "");
        assert!(t.starts_with("IMAGETYP= 'Dark Frame'"));
    }

    #[test]
    fn test_fits_layout() {
        let written_at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut bytes = Vec::new();
        write_fits(&mut bytes, &result(4, 3), written_at).unwrap();

        assert_eq!(bytes.len(), 2 * BLOCK);
        let cards = header_cards(&bytes);
        assert!(cards[0].starts_with("SIMPLE  =                    T"));
        assert!(cards.iter().any(|c| c.starts_with("NAXIS1  =                    4")));
        assert!(cards.iter().any(|c| c.starts_with("EXPTIME =                  2.0")));
        assert!(cards.iter().any(|c| c.starts_with("XBINNING=                    2")));
        assert!(cards.iter().any(|c| c.starts_with("IMAGETYP= 'Dark Frame'")));
        assert!(cards.iter().any(|c| c.contains("'2024-03-01T12:00:00'")));
        assert!(cards.iter().any(|c| c.trim_end() == "END"));

        // pixel 1 is stored as 1 - 32768
        let second = i16::from_be_bytes([bytes[BLOCK + 2], bytes[BLOCK + 3]]);
        assert_eq!(i32::from(second), 1 - 32768);
    }

    #[test]
    fn test_large_float_fits_value_field() {
        let c = card("EXPTIME", Value::Float(1.0e300), "");
        assert_eq!(c.len(), CARD);
        let value = c[10..30].trim();
        assert_eq!(value.parse::<f64>().unwrap(), 1.0e300);
        assert!(value.contains('E'));

        let small = card("EXPTIME", Value::Float(0.25), "");
        assert_eq!(small[10..30].trim(), "0.25");
    }

    #[test]
    fn test_failed_persist_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.fits");
        let mut bad = result(4, 3);
        bad.buffer.pop();

        let mut sink = FitsSink::new(&path);
        let err = sink.persist(bad).unwrap_err();
        assert!(matches!(err, CoreError::Sink(_)));
        assert!(!path.exists());

        sink.persist(result(4, 3)).unwrap();
        assert_eq!(std::fs::metadata(&path).unwrap().len() as usize, 2 * BLOCK);
    }

    #[test]
    fn test_mismatched_buffer_is_rejected() {
        let mut bad = result(4, 3);
        bad.buffer.pop();

        let err = write_fits(&mut Vec::new(), &bad, Utc::now()).unwrap_err();
        assert!(matches!(err, CoreError::Sink(_)));
    }
}
