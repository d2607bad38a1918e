//! PCD (Point Cloud Data) codec for `x y z` float clouds.
//!
//! Only the subset written by this crate is read back: three f32 fields,
//! `ascii` or `binary` payload.

use crate::cloud::PointCloud;
use crate::error::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::io::{self, BufRead, Read, Write};

/// Bytes per point in the binary payload.
const POINT_BYTES: usize = std::mem::size_of::<[f32; 3]>();

/// PCD payload encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PcdEncoding {
    Ascii,
    #[default]
    Binary,
}

impl PcdEncoding {
    pub fn tag(&self) -> &'static str {
        match self {
            PcdEncoding::Ascii => "ascii",
            PcdEncoding::Binary => "binary",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "ascii" => Some(PcdEncoding::Ascii),
            "binary" => Some(PcdEncoding::Binary),
            _ => None,
        }
    }
}

impl std::str::FromStr for PcdEncoding {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_tag(s).ok_or_else(|| ScanError::InvalidConfig(format!("unknown PCD encoding '{}'", s)))
    }
}

/// Write the finite points of `cloud`. Returns the number of points written.
pub fn write_pcd<W: Write>(mut writer: W, cloud: &PointCloud, encoding: PcdEncoding) -> Result<usize> {
    let points = cloud.finite_points();
    let n = points.len();

    write!(
        writer,
        "VERSION 0.7\n\
         FIELDS x y z\n\
         SIZE 4 4 4\n\
         TYPE F F F\n\
         COUNT 1 1 1\n\
         WIDTH {n}\n\
         HEIGHT 1\n\
         VIEWPOINT 0 0 0 1 0 0 0\n\
         POINTS {n}\n\
         DATA {}\n",
        encoding.tag()
    )?;

    match encoding {
        PcdEncoding::Ascii => {
            for [x, y, z] in &points {
                writeln!(writer, "{} {} {}", x, y, z)?;
            }
        }
        PcdEncoding::Binary => {
            writer.write_all(bytemuck::cast_slice(&points))?;
        }
    }
    writer.flush()?;
    Ok(n)
}

/// Read a PCD stream into a flat point list.
pub fn read_pcd<R: BufRead>(mut reader: R) -> Result<Vec<[f32; 3]>> {
    let mut count: Option<usize> = None;
    let encoding;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).map_err(text_error)? == 0 {
            return Err(ScanError::Format("unexpected end of header".to_string()));
        }
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("POINTS") => {
                let value = parts.next().unwrap_or_default();
                count = Some(
                    value
                        .parse()
                        .map_err(|_| ScanError::Format(format!("bad POINTS value '{}'", value)))?,
                );
            }
            Some("DATA") => {
                let tag = parts.next().unwrap_or_default();
                encoding = PcdEncoding::from_tag(tag)
                    .ok_or_else(|| ScanError::Format(format!("unsupported DATA '{}'", tag)))?;
                break;
            }
            _ => {}
        }
    }

    let n = count.ok_or_else(|| ScanError::Format("missing POINTS".to_string()))?;
    match encoding {
        PcdEncoding::Ascii => read_ascii(reader, n),
        PcdEncoding::Binary => read_binary(reader, n),
    }
}

fn read_ascii<R: BufRead>(mut reader: R, n: usize) -> Result<Vec<[f32; 3]>> {
    let mut text = String::new();
    reader.read_to_string(&mut text).map_err(text_error)?;

    let mut values = text.split_whitespace().map(|token| {
        token
            .parse::<f32>()
            .map_err(|_| ScanError::Format(format!("bad value '{}'", token)))
    });

    // The header count is untrusted; grow as points arrive.
    let mut points = Vec::new();
    for i in 0..n {
        let mut point = [0.0f32; 3];
        for v in &mut point {
            *v = values
                .next()
                .ok_or_else(|| ScanError::Format(format!("truncated data at point {} of {}", i, n)))??;
        }
        points.push(point);
    }
    Ok(points)
}

fn read_binary<R: Read>(reader: R, n: usize) -> Result<Vec<[f32; 3]>> {
    let bytes = n
        .checked_mul(POINT_BYTES)
        .ok_or_else(|| ScanError::Format(format!("POINTS {} is out of range", n)))?;

    let mut payload = Vec::new();
    reader.take(bytes as u64).read_to_end(&mut payload)?;
    if payload.len() != bytes {
        return Err(ScanError::Format(format!(
            "truncated binary data ({} of {} bytes)",
            payload.len(),
            bytes
        )));
    }
    Ok(payload
        .chunks_exact(POINT_BYTES)
        .map(bytemuck::pod_read_unaligned::<[f32; 3]>)
        .collect())
}

/// Non-UTF-8 text is malformed input, not an I/O failure.
fn text_error(e: io::Error) -> ScanError {
    match e.kind() {
        io::ErrorKind::InvalidData => ScanError::Format(format!("invalid text: {}", e)),
        _ => ScanError::Io(e),
    }
}
