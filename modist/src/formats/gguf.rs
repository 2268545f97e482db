//! GGUF header parsing (metadata only, never tensor bodies).
//!
//! The GGUF container starts with a magic/version prelude, a metadata
//! key-value table, and tensor descriptors. Everything needed for the model
//! config — architecture, parameter count, quantization — lives there.
//! Parsing is best-effort: callers treat any error as "no metadata".

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, Read, Seek};
use std::path::Path;

use crate::Result;

use super::humanize_count;

const MAGIC: &[u8; 4] = b"GGUF";

/// Upper bound on a single key or string value (1 MiB).
const MAX_STRING: u64 = 1024 * 1024;
/// Upper bound on metadata entries and tensors.
const MAX_COUNT: u64 = 1 << 20;
/// Upper bound on array lengths (vocabularies are large but bounded).
const MAX_ARRAY: u64 = 1 << 24;

/// Metadata extracted from a GGUF header.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct GgufMetadata {
    /// `general.architecture`, if present.
    pub architecture: String,
    /// Human-readable parameter count.
    pub parameters: String,
    /// Quantization label derived from `general.file_type`.
    pub quantization: String,
    /// Scalar header entries, stringified. Arrays are omitted.
    pub metadata: BTreeMap<String, String>,
}

/// Parses the header of the GGUF file at `path`.
pub fn read_metadata(path: &Path) -> Result<GgufMetadata> {
    let file = fs::File::open(path)?;
    let mut r = BufReader::new(file);

    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(invalid("not a GGUF file").into());
    }
    let version = read_u32(&mut r)?;
    if !(1..=3).contains(&version) {
        return Err(invalid(format!("unsupported GGUF version {version}")).into());
    }
    let tensor_count = read_u64(&mut r)?;
    let kv_count = read_u64(&mut r)?;
    if tensor_count > MAX_COUNT || kv_count > MAX_COUNT {
        return Err(invalid("implausible GGUF header counts").into());
    }

    let mut out = GgufMetadata::default();
    let mut file_type: Option<u32> = None;
    let mut kv_param_count: Option<u64> = None;

    for _ in 0..kv_count {
        let key = read_string(&mut r)?;
        let value_type = read_u32(&mut r)?;
        match read_value(&mut r, value_type)? {
            Some(value) => {
                if key == "general.architecture" {
                    out.architecture = value.clone();
                }
                if key == "general.file_type" {
                    file_type = value.parse().ok();
                }
                if key == "general.parameter_count" {
                    kv_param_count = value.parse().ok();
                }
                out.metadata.insert(key, value);
            }
            None => {} // array entry, consumed and skipped
        }
    }

    let parameters = match kv_param_count {
        Some(n) => n,
        None => sum_tensor_dims(&mut r, tensor_count)?,
    };
    if parameters > 0 {
        out.parameters = humanize_count(parameters);
    }
    if let Some(ft) = file_type {
        out.quantization = file_type_label(ft).to_owned();
    }
    Ok(out)
}

/// Sums dimension products over the tensor descriptor table.
fn sum_tensor_dims(r: &mut (impl Read + Seek), tensor_count: u64) -> Result<u64> {
    let mut total: u64 = 0;
    for _ in 0..tensor_count {
        skip_string(r)?; // tensor name
        let n_dims = read_u32(r)?;
        if n_dims > 8 {
            return Err(invalid("implausible tensor rank").into());
        }
        let mut elems: u64 = 1;
        for _ in 0..n_dims {
            elems = elems.saturating_mul(read_u64(r)?);
        }
        total = total.saturating_add(elems);
        read_u32(r)?; // tensor type
        read_u64(r)?; // data offset
    }
    Ok(total)
}

/// Reads one metadata value; arrays are consumed and reported as `None`.
fn read_value(r: &mut (impl Read + Seek), value_type: u32) -> Result<Option<String>> {
    let value = match value_type {
        0 => read_bytes_as::<1>(r)?[0].to_string(),
        1 => (read_bytes_as::<1>(r)?[0] as i8).to_string(),
        2 => u16::from_le_bytes(read_bytes_as::<2>(r)?).to_string(),
        3 => i16::from_le_bytes(read_bytes_as::<2>(r)?).to_string(),
        4 => read_u32(r)?.to_string(),
        5 => i32::from_le_bytes(read_bytes_as::<4>(r)?).to_string(),
        6 => f32::from_le_bytes(read_bytes_as::<4>(r)?).to_string(),
        7 => (read_bytes_as::<1>(r)?[0] != 0).to_string(),
        8 => read_string(r)?,
        9 => {
            skip_array(r)?;
            return Ok(None);
        }
        10 => read_u64(r)?.to_string(),
        11 => i64::from_le_bytes(read_bytes_as::<8>(r)?).to_string(),
        12 => f64::from_le_bytes(read_bytes_as::<8>(r)?).to_string(),
        other => return Err(invalid(format!("unknown GGUF value type {other}")).into()),
    };
    Ok(Some(value))
}

/// Consumes an array value without materializing it.
fn skip_array(r: &mut (impl Read + Seek)) -> Result<()> {
    let elem_type = read_u32(r)?;
    let count = read_u64(r)?;
    if count > MAX_ARRAY {
        return Err(invalid("implausible GGUF array length").into());
    }
    let fixed = match elem_type {
        0 | 1 | 7 => Some(1u64),
        2 | 3 => Some(2),
        4 | 5 | 6 => Some(4),
        10 | 11 | 12 => Some(8),
        8 => None,
        9 => {
            // Nested arrays are not produced by known writers.
            for _ in 0..count {
                skip_array(r)?;
            }
            return Ok(());
        }
        other => return Err(invalid(format!("unknown GGUF array element type {other}")).into()),
    };
    match fixed {
        Some(width) => skip_bytes(r, count.saturating_mul(width))?,
        None => {
            for _ in 0..count {
                skip_string(r)?;
            }
        }
    }
    Ok(())
}

fn read_string(r: &mut impl Read) -> Result<String> {
    let len = read_u64(r)?;
    if len > MAX_STRING {
        return Err(invalid("implausible GGUF string length").into());
    }
    let mut buf = vec![0u8; len as usize];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|_| invalid("GGUF string is not UTF-8").into())
}

fn skip_string(r: &mut (impl Read + Seek)) -> Result<()> {
    let len = read_u64(r)?;
    if len > MAX_STRING {
        return Err(invalid("implausible GGUF string length").into());
    }
    skip_bytes(r, len)
}

fn skip_bytes(r: &mut (impl Read + Seek), n: u64) -> Result<()> {
    let n = i64::try_from(n).map_err(|_| invalid("length overflow"))?;
    r.seek(io::SeekFrom::Current(n))?;
    Ok(())
}

fn read_u32(r: &mut impl Read) -> Result<u32> {
    Ok(u32::from_le_bytes(read_bytes_as::<4>(r)?))
}

fn read_u64(r: &mut impl Read) -> Result<u64> {
    Ok(u64::from_le_bytes(read_bytes_as::<8>(r)?))
}

fn read_bytes_as<const N: usize>(r: &mut impl Read) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

/// Maps `general.file_type` onto a quantization label.
fn file_type_label(file_type: u32) -> &'static str {
    match file_type {
        0 => "F32",
        1 => "F16",
        2 => "Q4_0",
        3 => "Q4_1",
        7 => "Q8_0",
        8 => "Q5_0",
        9 => "Q5_1",
        10 => "Q2_K",
        11 => "Q3_K_S",
        12 => "Q3_K_M",
        13 => "Q3_K_L",
        14 => "Q4_K_S",
        15 => "Q4_K_M",
        16 => "Q5_K_S",
        17 => "Q5_K_M",
        18 => "Q6_K",
        19 => "IQ2_XXS",
        20 => "IQ2_XS",
        24 => "IQ1_S",
        25 => "IQ4_NL",
        30 => "IQ4_XS",
        32 => "BF16",
        _ => "unknown",
    }
}
