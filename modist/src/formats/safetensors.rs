//! Safetensors header inspection (no tensor bodies).
//!
//! A safetensors file opens with an 8-byte little-endian header length
//! followed by a JSON object mapping tensor names to dtype/shape/offsets.
//! Only that header is read, capped at 100 MiB.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::Result;

use super::humanize_count;

/// Hard cap on the JSON header size.
const MAX_HEADER: u64 = 100 * 1024 * 1024;

/// Per-tensor entry in the safetensors header.
#[derive(Debug, Clone, Deserialize)]
#[non_exhaustive]
pub struct TensorInfo {
    /// Element type (e.g. `F16`, `BF16`, `F32`, `I8`).
    pub dtype: String,
    /// Tensor shape.
    pub shape: Vec<u64>,
    /// Byte range of the tensor body.
    pub data_offsets: (u64, u64),
}

/// Metadata derived from one or more safetensors headers.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct SafetensorsMetadata {
    /// Human-readable total parameter count.
    pub parameters: String,
    /// Uniform dtype, `mixed`, or `unknown`.
    pub quantization: String,
    /// Stringified summary entries.
    pub metadata: BTreeMap<String, String>,
}

/// Parses one safetensors header.
pub fn read_header(path: &Path) -> Result<BTreeMap<String, TensorInfo>> {
    let file = fs::File::open(path)?;
    let mut r = BufReader::new(file);

    let mut len_bytes = [0u8; 8];
    r.read_exact(&mut len_bytes)?;
    let header_len = u64::from_le_bytes(len_bytes);
    if header_len > MAX_HEADER {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("safetensors header of {header_len} bytes exceeds the 100 MiB cap"),
        )
        .into());
    }

    let mut header = vec![0u8; header_len as usize];
    r.read_exact(&mut header)?;

    // The header may carry a "__metadata__" string map; drop it and keep
    // tensor entries only.
    let raw: BTreeMap<String, serde_json::Value> = serde_json::from_slice(&header)?;
    let mut tensors = BTreeMap::new();
    for (name, value) in raw {
        if name == "__metadata__" {
            continue;
        }
        let info: TensorInfo = serde_json::from_value(value)?;
        tensors.insert(name, info);
    }
    Ok(tensors)
}

/// Derives config metadata from a set of safetensors files.
pub fn read_metadata(paths: &[impl AsRef<Path>]) -> Result<SafetensorsMetadata> {
    let mut parameters: u64 = 0;
    let mut dtypes: Vec<String> = Vec::new();
    let mut tensor_count: u64 = 0;

    for path in paths {
        let tensors = read_header(path.as_ref())?;
        for info in tensors.values() {
            let elems = info.shape.iter().product::<u64>();
            parameters = parameters.saturating_add(elems);
            if !dtypes.contains(&info.dtype) {
                dtypes.push(info.dtype.clone());
            }
            tensor_count += 1;
        }
    }

    let quantization = match dtypes.len() {
        0 => "unknown".to_owned(),
        1 => dtypes.remove(0),
        _ => "mixed".to_owned(),
    };

    let mut metadata = BTreeMap::new();
    metadata.insert("tensor_count".to_owned(), tensor_count.to_string());
    metadata.insert("parameter_count".to_owned(), parameters.to_string());

    Ok(SafetensorsMetadata {
        parameters: if parameters > 0 {
            humanize_count(parameters)
        } else {
            String::new()
        },
        quantization,
        metadata,
    })
}
