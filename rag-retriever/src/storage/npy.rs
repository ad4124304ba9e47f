//! Minimal NumPy `.npy` codec for 2-D little-endian `float32` arrays.
//!
//! Files are written as format version 1.0 so that `numpy.load` reads them
//! directly. Versions 2.0 and 3.0 are accepted on read; they only differ in
//! the width of the header length field.

use super::EmbeddingMatrix;
use regex::Regex;
use std::sync::LazyLock;

const MAGIC: &[u8; 6] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

static DESCR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]descr['"]\s*:\s*['"]([^'"]*)['"]"#).expect("valid descr regex")
});
static FORTRAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]fortran_order['"]\s*:\s*(True|False)"#).expect("valid fortran regex")
});
static SHAPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"['"]shape['"]\s*:\s*\(([^)]*)\)"#).expect("valid shape regex")
});

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NpyError {
    #[error("not an .npy file (bad magic)")]
    BadMagic,
    #[error("unsupported .npy version {major}.{minor}")]
    UnsupportedVersion { major: u8, minor: u8 },
    #[error("truncated .npy header")]
    Truncated,
    #[error("malformed .npy header: {0}")]
    BadHeader(String),
    #[error("unsupported dtype {0:?}, expected '<f4'")]
    UnsupportedDtype(String),
    #[error("Fortran-ordered arrays are not supported")]
    FortranOrder,
    #[error("expected a 2-D array, got shape ({0})")]
    BadShape(String),
    #[error("data section has {actual} bytes, shape requires {expected}")]
    DataLength { expected: usize, actual: usize },
}

/// Serialize `matrix` as a version 1.0 `.npy` file.
pub fn encode(matrix: &EmbeddingMatrix) -> Vec<u8> {
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({}, {}), }}",
        matrix.rows(),
        matrix.dimension()
    );
    // magic + version + u16 length + header + '\n' must be a multiple of 64
    let unpadded = MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (HEADER_ALIGN - unpadded % HEADER_ALIGN) % HEADER_ALIGN;
    header.extend(std::iter::repeat_n(' ', padding));
    header.push('\n');

    let mut out = Vec::with_capacity(10 + header.len() + matrix.as_slice().len() * 4);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(header.len() as u16).to_le_bytes());
    out.extend_from_slice(header.as_bytes());
    for value in matrix.as_slice() {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Parse a `.npy` file holding a 2-D `<f4` C-ordered array.
pub fn decode(bytes: &[u8]) -> Result<EmbeddingMatrix, NpyError> {
    if bytes.len() < MAGIC.len() + 2 || &bytes[..MAGIC.len()] != MAGIC {
        return Err(NpyError::BadMagic);
    }
    let (major, minor) = (bytes[6], bytes[7]);
    let (header_len, header_start) = match major {
        1 => {
            let raw = bytes.get(8..10).ok_or(NpyError::Truncated)?;
            (u16::from_le_bytes([raw[0], raw[1]]) as usize, 10)
        }
        2 | 3 => {
            let raw = bytes.get(8..12).ok_or(NpyError::Truncated)?;
            (
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize,
                12,
            )
        }
        _ => return Err(NpyError::UnsupportedVersion { major, minor }),
    };
    let header_end = header_start + header_len;
    let header_bytes = bytes
        .get(header_start..header_end)
        .ok_or(NpyError::Truncated)?;
    let header = std::str::from_utf8(header_bytes)
        .map_err(|_| NpyError::BadHeader("header is not text".to_string()))?;

    let (rows, dimension) = parse_header(header)?;

    let data = &bytes[header_end..];
    let expected = rows
        .checked_mul(dimension)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| NpyError::BadShape(format!("{rows}, {dimension}")))?;
    if data.len() != expected {
        return Err(NpyError::DataLength {
            expected,
            actual: data.len(),
        });
    }

    let values = data
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    EmbeddingMatrix::from_flat(rows, dimension, values)
        .map_err(|e| NpyError::BadShape(e.to_string()))
}

fn parse_header(header: &str) -> Result<(usize, usize), NpyError> {
    let descr = DESCR_RE
        .captures(header)
        .map(|c| c[1].to_string())
        .ok_or_else(|| NpyError::BadHeader("missing 'descr'".to_string()))?;
    if descr != "<f4" {
        return Err(NpyError::UnsupportedDtype(descr));
    }

    let fortran = FORTRAN_RE
        .captures(header)
        .map(|c| &c[1] == "True")
        .ok_or_else(|| NpyError::BadHeader("missing 'fortran_order'".to_string()))?;
    if fortran {
        return Err(NpyError::FortranOrder);
    }

    let shape = SHAPE_RE
        .captures(header)
        .map(|c| c[1].to_string())
        .ok_or_else(|| NpyError::BadHeader("missing 'shape'".to_string()))?;
    let dims = shape
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| d.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| NpyError::BadShape(shape.clone()))?;
    match dims.as_slice() {
        [rows, dimension] => Ok((*rows, *dimension)),
        _ => Err(NpyError::BadShape(shape)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(vec![
            vec![0.5, -1.25, 3.0],
            vec![f32::MIN_POSITIVE, 0.0, -0.0],
        ])
        .unwrap()
    }

    #[test]
    fn test_header_layout_matches_numpy() {
        let bytes = encode(&sample());
        assert_eq!(&bytes[..6], MAGIC);
        assert_eq!(&bytes[6..8], &[1, 0]);

        let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
        assert_eq!((10 + header_len) % 64, 0);
        let header = std::str::from_utf8(&bytes[10..10 + header_len]).unwrap();
        assert!(header.starts_with("{'descr': '<f4', 'fortran_order': False, 'shape': (2, 3), }"));
        assert!(header.ends_with('\n'));
        assert_eq!(bytes.len(), 10 + header_len + 2 * 3 * 4);
    }

    #[test]
    fn test_decode_preserves_bits() {
        let matrix = sample();
        let decoded = decode(&encode(&matrix)).unwrap();
        assert_eq!(decoded.rows(), 2);
        assert_eq!(decoded.dimension(), 3);
        let bits = |m: &EmbeddingMatrix| {
            m.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        };
        assert_eq!(bits(&decoded), bits(&matrix));
    }

    #[test]
    fn test_decode_version_2_header() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (1, 2), }\n";
        let mut bytes = MAGIC.to_vec();
        bytes.extend_from_slice(&[2, 0]);
        bytes.extend_from_slice(&(header.len() as u32).to_le_bytes());
        bytes.extend_from_slice(header.as_bytes());
        bytes.extend_from_slice(&1.0f32.to_le_bytes());
        bytes.extend_from_slice(&2.0f32.to_le_bytes());

        let matrix = decode(&bytes).unwrap();
        assert_eq!(matrix.as_slice(), &[1.0, 2.0]);
    }

    #[test]
    fn test_rejects_bad_magic() {
        assert_eq!(decode(b"PK\x03\x04 not numpy").unwrap_err(), NpyError::BadMagic);
        assert_eq!(decode(b"").unwrap_err(), NpyError::BadMagic);
    }

    #[test]
    fn test_rejects_other_dtypes_and_layouts() {
        let mut wide = encode(&sample());
        let pos = wide.windows(3).position(|w| w == b"<f4").unwrap();
        wide[pos + 2] = b'8';
        assert!(matches!(decode(&wide), Err(NpyError::UnsupportedDtype(d)) if d == "<f8"));

        let mut fortran = encode(&sample());
        let pos = fortran.windows(5).position(|w| w == b"False").unwrap();
        fortran.splice(pos..pos + 5, b"True ".iter().copied());
        assert_eq!(decode(&fortran).unwrap_err(), NpyError::FortranOrder);
    }

    #[test]
    fn test_rejects_truncated_data() {
        let mut bytes = encode(&sample());
        bytes.truncate(bytes.len() - 1);
        assert_eq!(
            decode(&bytes).unwrap_err(),
            NpyError::DataLength {
                expected: 24,
                actual: 23
            }
        );
    }

    #[test]
    fn test_rejects_one_dimensional_shape() {
        let header = "{'descr': '<f4', 'fortran_order': False, 'shape': (4,), }";
        assert_eq!(
            parse_header(header),
            Err(NpyError::BadShape("4,".to_string()))
        );
    }
}
