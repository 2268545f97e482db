//! Packaging helpers: shard discovery, dir-tars, safetensors directories.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use crate::{Error, Result};

/// Temp files produced by a packaging step, removed on cleanup or drop.
#[derive(Debug, Default)]
pub struct TempFiles {
    paths: Vec<PathBuf>,
    cleaned: bool,
}

impl TempFiles {
    /// The produced temp file paths, in input order.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Removes every temp file. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.cleaned {
            return;
        }
        self.cleaned = true;
        for path in &self.paths {
            if let Err(e) = fs::remove_file(path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to remove temp tar");
                }
            }
        }
    }
}

impl Drop for TempFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Splits `model-00002-of-00005.gguf` into `("model", 2, 5, "gguf")`.
///
/// The index and total are exactly five digits; anything else is not a
/// shard name.
pub fn parse_shard_name(file_name: &str) -> Option<(&str, u32, u32, &str)> {
    let (stem, ext) = file_name.rsplit_once('.')?;
    let (head, total) = stem.rsplit_once("-of-")?;
    let (prefix, index) = head.rsplit_once('-')?;
    if index.len() != 5 || total.len() != 5 {
        return None;
    }
    if !index.bytes().all(|b| b.is_ascii_digit()) || !total.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: u32 = index.parse().ok()?;
    let total: u32 = total.parse().ok()?;
    Some((prefix, index, total, ext))
}

/// Renders the canonical shard file name for `index` of `total`.
pub fn shard_name(prefix: &str, index: u32, total: u32, ext: &str) -> String {
    format!("{prefix}-{index:05}-of-{total:05}.{ext}")
}

/// Expands a shard path into the full ordered shard set.
///
/// A non-shard file name yields just that path. Every expected sibling
/// `1..=total` must exist, or the set is incomplete.
pub fn discover_shards(path: &Path) -> Result<Vec<PathBuf>> {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(vec![path.to_path_buf()]);
    };
    let Some((prefix, _, total, ext)) = parse_shard_name(file_name) else {
        return Ok(vec![path.to_path_buf()]);
    };

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut shards = Vec::with_capacity(total as usize);
    for index in 1..=total {
        let name = shard_name(prefix, index, total, ext);
        let shard = dir.join(&name);
        if !shard.is_file() {
            return Err(Error::IncompleteShardSet(name));
        }
        shards.push(shard);
    }
    Ok(shards)
}

/// Tars subdirectories of `base`, one temp tar per input.
///
/// Inputs are relative paths that must stay within `base`; symlinked
/// directories are refused and symlinks inside the walk are skipped.
/// Entry names are POSIX paths relative to the parent of each input
/// directory, so an input `config` produces `config/...` entries.
pub fn process_dirs(base: &Path, dirs: &[impl AsRef<Path>]) -> Result<TempFiles> {
    let mut out = TempFiles::default();
    for dir in dirs {
        let rel = dir.as_ref();
        validate_subpath(base, rel)?;
        let resolved = base.join(rel);

        let meta = fs::symlink_metadata(&resolved)?;
        if meta.file_type().is_symlink() {
            out.cleanup();
            return Err(Error::SymlinkedDirectory(resolved));
        }
        if !meta.is_dir() {
            out.cleanup();
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a directory", resolved.display()),
            )
            .into());
        }

        let root = resolved.parent().unwrap_or(base);
        match tar_directory(&resolved, root) {
            Ok(path) => out.paths.push(path),
            Err(e) => {
                out.cleanup();
                return Err(e);
            }
        }
    }
    Ok(out)
}

/// Rejects absolute inputs and any relative path that escapes `base`.
///
/// The check is lexical: `..` and `../x` and `a/../../b` escape, while a
/// name that merely begins with dots (`..data`) does not.
fn validate_subpath(base: &Path, rel: &Path) -> Result<()> {
    let escape = || Error::PathEscape {
        path: rel.to_path_buf(),
        root: base.to_path_buf(),
    };

    if rel.is_absolute() {
        return Err(escape());
    }
    let mut depth: i64 = 0;
    for component in rel.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => {
                depth -= 1;
                if depth < 0 {
                    return Err(escape());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(escape()),
        }
    }
    if depth == 0 {
        // Inputs like "." or "a/.." name the base itself, not a subdirectory.
        return Err(escape());
    }
    Ok(())
}

/// Walks `dir` and writes regular files and directories into a temp tar.
fn tar_directory(dir: &Path, root: &Path) -> Result<PathBuf> {
    let tmp = tempfile::Builder::new()
        .prefix("modist-dirtar-")
        .suffix(".tar")
        .tempfile()?;
    let (file, tmp_path) = tmp.keep().map_err(|e| e.error)?;

    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_symlink() {
            continue;
        }
        let name = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "walk left the tar root"))?;
        if entry.file_type().is_dir() {
            builder.append_dir(name, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), name)?;
        }
    }
    builder.into_inner()?.flush()?;
    Ok(tmp_path)
}

/// Top-level scan of a safetensors directory.
///
/// Returns `.safetensors` files and config files (`*.json` plus
/// `merges.txt`), both sorted lexicographically. No recursion.
pub fn scan_safetensors_dir(dir: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut weights = Vec::new();
    let mut configs = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".safetensors") {
            weights.push(path);
        } else if lower.ends_with(".json") || name == "merges.txt" {
            configs.push(path);
        }
    }

    if weights.is_empty() {
        return Err(Error::NoSafetensorsFiles(dir.to_path_buf()));
    }
    weights.sort();
    configs.sort();
    Ok((weights, configs))
}

/// Tars config files into a temp tar keyed by basename only.
pub fn pack_config_files(files: &[PathBuf]) -> Result<TempFiles> {
    let tmp = tempfile::Builder::new()
        .prefix("modist-config-")
        .suffix(".tar")
        .tempfile()?;
    let (file, tmp_path) = tmp.keep().map_err(|e| e.error)?;

    let mut builder = tar::Builder::new(BufWriter::new(file));
    builder.follow_symlinks(false);
    for path in files {
        let name = path
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "config file has no name"))?;
        builder.append_path_with_name(path, Path::new(name))?;
    }
    builder.into_inner()?.flush()?;

    Ok(TempFiles {
        paths: vec![tmp_path],
        cleaned: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shard_name_round_trip() {
        let name = shard_name("model", 2, 5, "gguf");
        assert_eq!(name, "model-00002-of-00005.gguf");
        assert_eq!(parse_shard_name(&name), Some(("model", 2, 5, "gguf")));
    }

    #[test]
    fn shard_name_rejects_wrong_widths() {
        assert_eq!(parse_shard_name("m-001-of-003.gguf"), None);
        assert_eq!(parse_shard_name("m-000001-of-000003.gguf"), None);
        assert_eq!(parse_shard_name("m-abcde-of-00003.gguf"), None);
        assert_eq!(parse_shard_name("model.gguf"), None);
    }

    #[test]
    fn discovers_full_shard_set_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for i in 1..=3 {
            fs::write(dir.path().join(shard_name("m", i, 3, "gguf")), b"x").unwrap();
        }
        let shards = discover_shards(&dir.path().join("m-00002-of-00003.gguf")).unwrap();
        let names: Vec<_> = shards
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(
            names,
            vec![
                "m-00001-of-00003.gguf",
                "m-00002-of-00003.gguf",
                "m-00003-of-00003.gguf"
            ]
        );
    }

    #[test]
    fn missing_shard_is_incomplete() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(shard_name("m", 1, 3, "safetensors")), b"x").unwrap();
        fs::write(dir.path().join(shard_name("m", 3, 3, "safetensors")), b"x").unwrap();
        let err = discover_shards(&dir.path().join("m-00001-of-00003.safetensors")).unwrap_err();
        assert!(matches!(err, Error::IncompleteShardSet(name) if name.contains("00002")));
    }

    #[test]
    fn non_shard_name_is_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.gguf");
        fs::write(&path, b"x").unwrap();
        assert_eq!(discover_shards(&path).unwrap(), vec![path]);
    }

    #[test]
    fn dir_tar_rejects_escapes_and_absolute() {
        let base = tempfile::tempdir().unwrap();
        for bad in ["..", "../x", "a/../../b"] {
            let err = process_dirs(base.path(), &[bad]).unwrap_err();
            assert!(matches!(err, Error::PathEscape { .. }), "{bad} accepted");
        }
        let err = process_dirs(base.path(), &["/etc"]).unwrap_err();
        assert!(matches!(err, Error::PathEscape { .. }));
    }

    #[test]
    fn dir_tar_allows_dot_dot_prefixed_names() {
        let base = tempfile::tempdir().unwrap();
        let data = base.path().join("..data");
        fs::create_dir(&data).unwrap();
        fs::write(data.join("f"), b"1").unwrap();

        let mut tars = process_dirs(base.path(), &["..data"]).unwrap();
        assert_eq!(tars.paths().len(), 1);
        tars.cleanup();
    }

    #[cfg(unix)]
    #[test]
    fn dir_tar_rejects_symlinked_directory() {
        let base = tempfile::tempdir().unwrap();
        let real = base.path().join("real");
        fs::create_dir(&real).unwrap();
        std::os::unix::fs::symlink(&real, base.path().join("link")).unwrap();

        let err = process_dirs(base.path(), &["link"]).unwrap_err();
        assert!(matches!(err, Error::SymlinkedDirectory(_)));
    }

    #[cfg(unix)]
    #[test]
    fn dir_tar_skips_symlinks_in_walk() {
        let base = tempfile::tempdir().unwrap();
        let cfg = base.path().join("config");
        fs::create_dir(&cfg).unwrap();
        fs::write(cfg.join("a.json"), b"{}").unwrap();
        std::os::unix::fs::symlink("/etc/passwd", cfg.join("evil")).unwrap();

        let mut tars = process_dirs(base.path(), &["config"]).unwrap();
        let names = tar_entry_names(&tars.paths()[0]);
        assert!(names.contains(&"config/a.json".to_owned()));
        assert!(!names.iter().any(|n| n.contains("evil")));
        tars.cleanup();
    }

    #[test]
    fn dir_tar_names_are_rooted_at_input_parent() {
        let base = tempfile::tempdir().unwrap();
        let nested = base.path().join("a").join("b");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("f.txt"), b"x").unwrap();

        let mut tars = process_dirs(base.path(), &[PathBuf::from("a").join("b")]).unwrap();
        let names = tar_entry_names(&tars.paths()[0]);
        assert!(names.contains(&"b/f.txt".to_owned()), "names: {names:?}");
        tars.cleanup();
    }

    #[test]
    fn cleanup_is_idempotent() {
        let base = tempfile::tempdir().unwrap();
        let cfg = base.path().join("c");
        fs::create_dir(&cfg).unwrap();
        fs::write(cfg.join("f"), b"x").unwrap();

        let mut tars = process_dirs(base.path(), &["c"]).unwrap();
        let path = tars.paths()[0].clone();
        assert!(path.exists());
        tars.cleanup();
        assert!(!path.exists());
        tars.cleanup();
    }

    #[test]
    fn safetensors_scan_splits_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.safetensors"), b"x").unwrap();
        fs::write(dir.path().join("a.SAFETENSORS"), b"x").unwrap();
        fs::write(dir.path().join("tokenizer.json"), b"{}").unwrap();
        fs::write(dir.path().join("merges.txt"), b"").unwrap();
        fs::write(dir.path().join("README.md"), b"").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub").join("c.safetensors"), b"x").unwrap();

        let (weights, configs) = scan_safetensors_dir(dir.path()).unwrap();
        let weight_names: Vec<_> = weights
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        // Top level only; sorted.
        assert_eq!(weight_names, vec!["a.SAFETENSORS", "b.safetensors"]);
        let config_names: Vec<_> = configs
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_owned())
            .collect();
        assert_eq!(config_names, vec!["merges.txt", "tokenizer.json"]);
    }

    #[test]
    fn safetensors_scan_requires_weights() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.json"), b"{}").unwrap();
        let err = scan_safetensors_dir(dir.path()).unwrap_err();
        assert!(matches!(err, Error::NoSafetensorsFiles(_)));
    }

    #[test]
    fn config_tar_entries_are_basenames() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("deep");
        fs::create_dir(&sub).unwrap();
        let cfg = sub.join("tokenizer.json");
        fs::write(&cfg, b"{}").unwrap();

        let mut tars = pack_config_files(std::slice::from_ref(&cfg)).unwrap();
        let names = tar_entry_names(&tars.paths()[0]);
        assert_eq!(names, vec!["tokenizer.json"]);
        tars.cleanup();
    }

    fn tar_entry_names(path: &Path) -> Vec<String> {
        let mut archive = tar::Archive::new(fs::File::open(path).unwrap());
        archive
            .entries()
            .unwrap()
            .map(|e| {
                e.unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_end_matches('/')
                    .to_owned()
            })
            .collect()
    }
}
