//! NPY / NPZ loader for voice embeddings.
//!
//! Predefined voices ship as one `voices.npz` archive (one member per voice)
//! and can be overridden by single `<name>.npy` files.  Only the subset of the
//! NumPy format the exported embeddings use is supported:
//!   - NPY format version 1.0 and 2.0
//!   - `float32` dtype (`<f4`, `=f4`, `|f4`, `>f4`)
//!   - C-contiguous (row-major) layout
//!   - Any rank; embeddings are `[frames, dim]` or `[1, frames, dim]`
//!
//! NPZ files are ZIP archives whose members are `.npy` files.  Each member
//! name without its `.npy` extension is the voice name.

use anyhow::{bail, Context, Result};
use std::{collections::BTreeMap, io::Read, path::Path};
use zip::ZipArchive;

const MAGIC: &[u8] = b"\x93NUMPY";

// ─────────────────────────────────────────────────────────────────────────────
// NPY header
// ─────────────────────────────────────────────────────────────────────────────

/// The fields of an NPY header dict that matter for float32 embeddings.
#[derive(Debug, PartialEq)]
struct NpyHeader {
    shape: Vec<usize>,
    big_endian: bool,
    /// Offset of the first data byte.
    data_start: usize,
}

impl NpyHeader {
    fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 10 || !data.starts_with(MAGIC) {
            bail!("Not a valid NPY file (bad magic)");
        }

        // Header length is a u16 in v1 and a u32 from v2 on, little-endian.
        let (dict_len, dict_start) = match data[6] {
            1 => (u16::from_le_bytes([data[8], data[9]]) as usize, 10),
            2 | 3 if data.len() >= 12 => {
                (u32::from_le_bytes([data[8], data[9], data[10], data[11]]) as usize, 12)
            }
            2 | 3 => bail!("NPY header truncated"),
            major => bail!("Unsupported NPY version {}.{}", major, data[7]),
        };
        let data_start = dict_start + dict_len;
        let dict = data
            .get(dict_start..data_start)
            .context("NPY file truncated in header")?;
        let dict = std::str::from_utf8(dict).context("NPY header is not valid UTF-8")?;

        let descr = dict_value(dict, "descr").context("NPY header missing 'descr'")?;
        let big_endian = match descr {
            "<f4" | "=f4" | "|f4" => false,
            ">f4" => true,
            other => bail!("Unsupported dtype '{}', only float32 is supported", other),
        };

        if dict_value(dict, "fortran_order").is_some_and(|v| v.eq_ignore_ascii_case("true")) {
            bail!("Fortran-order arrays are not supported");
        }

        let shape = dict_value(dict, "shape").context("NPY header missing 'shape'")?;
        let shape = parse_shape(shape)?;

        Ok(Self { shape, big_endian, data_start })
    }
}

/// Value of `key` in a Python-literal dict such as
/// `{'descr': '<f4', 'fortran_order': False, 'shape': (3, 4), }`.
///
/// Quoted strings come back without quotes, tuples with their parentheses,
/// bare words trimmed.
fn dict_value<'a>(dict: &'a str, key: &str) -> Option<&'a str> {
    let at = [format!("'{}':", key), format!("\"{}\":", key)]
        .iter()
        .find_map(|k| dict.find(k.as_str()).map(|p| p + k.len()))?;
    let rest = dict[at..].trim_start();

    match rest.chars().next()? {
        '(' => rest.find(')').map(|end| &rest[..=end]),
        q @ ('\'' | '"') => {
            let inner = &rest[1..];
            inner.find(q).map(|end| &inner[..end])
        }
        _ => {
            let end = rest.find([',', '}']).unwrap_or(rest.len());
            Some(rest[..end].trim())
        }
    }
}

/// Parse a Python shape tuple: `(256, 512, )`, `(100,)` or `()`.
fn parse_shape(tuple: &str) -> Result<Vec<usize>> {
    tuple
        .trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse::<usize>().with_context(|| format!("Bad shape dim: '{}'", dim)))
        .collect()
}

/// Parse a raw `.npy` byte buffer and return the shape together with the f32
/// data as a flat `Vec<f32>`.
pub fn parse_npy(data: &[u8]) -> Result<(Vec<usize>, Vec<f32>)> {
    let header = NpyHeader::parse(data)?;
    let count: usize = header.shape.iter().product();
    let needed = count * 4;

    let payload = &data[header.data_start..];
    if payload.len() < needed {
        bail!(
            "NPY data section too short: expected {} bytes, got {}",
            needed,
            payload.len()
        );
    }

    let decode = if header.big_endian { f32::from_be_bytes } else { f32::from_le_bytes };
    let values = payload[..needed]
        .chunks_exact(4)
        .map(|b| decode([b[0], b[1], b[2], b[3]]))
        .collect();

    Ok((header.shape, values))
}

// ─────────────────────────────────────────────────────────────────────────────
// Arrays and archives
// ─────────────────────────────────────────────────────────────────────────────

/// A loaded array: shape + flat f32 data in row-major (C) order.
#[derive(Debug, Clone, PartialEq)]
pub struct NpyArray {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl NpyArray {
    /// Embedding width (last dimension).
    pub fn dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1).max(1)
    }

    /// Number of embedding frames: every leading dimension folded together.
    pub fn frames(&self) -> usize {
        self.data.len() / self.dim()
    }
}

/// Load a single `.npy` file.
pub fn load_npy(path: &Path) -> Result<NpyArray> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Cannot open NPY file: {}", path.display()))?;
    let (shape, data) = parse_npy(&bytes)
        .with_context(|| format!("Failed to parse NPY file: {}", path.display()))?;
    Ok(NpyArray { shape, data })
}

/// Load an NPZ file and return all arrays indexed by name (`.npy` extension
/// stripped), in name order.
pub fn load_npz(path: &Path) -> Result<BTreeMap<String, NpyArray>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Cannot open NPZ file: {}", path.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("Cannot open ZIP archive: {}", path.display()))?;

    let mut arrays = BTreeMap::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).context("Failed to read ZIP entry")?;
        let name = entry
            .name()
            .trim_end_matches(".npy")
            .to_string();

        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf).context("Failed to read NPY entry")?;

        let (shape, data) = parse_npy(&buf)
            .with_context(|| format!("Failed to parse NPY entry '{}'", name))?;

        arrays.insert(name, NpyArray { shape, data });
    }

    Ok(arrays)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
