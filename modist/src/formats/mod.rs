//! Best-effort weight-file metadata extraction.
//!
//! Only headers are read, never tensor bodies. Extraction failures are
//! logged and leave the descriptive config fields empty; packaging always
//! proceeds.

pub mod gguf;
pub mod safetensors;

/// Renders a raw count with a metric suffix (`361.82 M`, `7.25 B`).
pub(crate) fn humanize_count(count: u64) -> String {
    humanize(count, 1000.0, &["", " K", " M", " B", " T"])
}

/// Renders a byte count with a binary-ish decimal suffix (`4.13 GB`).
pub(crate) fn humanize_bytes(bytes: u64) -> String {
    humanize(bytes, 1000.0, &[" B", " KB", " MB", " GB", " TB"])
}

fn humanize(value: u64, step: f64, suffixes: &[&str]) -> String {
    let mut v = value as f64;
    let mut idx = 0;
    while v >= step && idx + 1 < suffixes.len() {
        v /= step;
        idx += 1;
    }
    if idx == 0 {
        format!("{value}{}", suffixes[0])
    } else {
        format!("{v:.2}{}", suffixes[idx])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn humanize_counts() {
        assert_eq!(humanize_count(42), "42");
        assert_eq!(humanize_count(361_820_000), "361.82 M");
        assert_eq!(humanize_count(7_250_000_000), "7.25 B");
    }

    #[test]
    fn humanize_byte_sizes() {
        assert_eq!(humanize_bytes(999), "999 B");
        assert_eq!(humanize_bytes(4_130_000_000), "4.13 GB");
    }
}
