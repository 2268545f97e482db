//! Runtime bundles: artifacts materialized on disk for the inference engine.
//!
//! A bundle directory holds weight files under stable names
//! (`model.gguf` or `model-00001-of-00003.gguf`, likewise for
//! safetensors), an optional `model.mmproj`, an optional `template.jinja`,
//! files extracted from the config archive, and a `config.json` copy of
//! the artifact's config section. Blobs are hardlinked where the
//! filesystem allows and copied otherwise.

use std::fs;
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

use crate::artifact::Artifact;
use crate::packaging::shard_name;
use crate::{Error, Format, Layer, ModelConfig, Result};

const SINGLE_GGUF: &str = "model.gguf";
const SINGLE_SAFETENSORS: &str = "model.safetensors";
const MMPROJ_FILE: &str = "model.mmproj";
const TEMPLATE_FILE: &str = "template.jinja";
const CONFIG_FILE: &str = "config.json";

/// A materialized model directory.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct Bundle {
    root: PathBuf,
    format: Format,
    /// Weight file names relative to the root, in shard order.
    weight_files: Vec<String>,
    mmproj: Option<String>,
    template: Option<String>,
    config: ModelConfig,
}

impl Bundle {
    /// The bundle directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Weight format of the bundle.
    pub fn format(&self) -> Format {
        self.format
    }

    /// Absolute weight file paths in shard order.
    pub fn weight_paths(&self) -> Vec<PathBuf> {
        self.weight_files.iter().map(|f| self.root.join(f)).collect()
    }

    /// Absolute multimodal projector path, if present.
    pub fn mmproj_path(&self) -> Option<PathBuf> {
        self.mmproj.as_ref().map(|f| self.root.join(f))
    }

    /// Absolute chat template path, if present.
    pub fn template_path(&self) -> Option<PathBuf> {
        self.template.as_ref().map(|f| self.root.join(f))
    }

    /// The config section copied into the bundle.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }
}

/// Materializes `artifact` into `target_dir`.
pub fn unpack(target_dir: &Path, artifact: &dyn Artifact) -> Result<Bundle> {
    fs::create_dir_all(target_dir)?;

    let gguf = artifact.gguf_layers()?;
    let safetensors = artifact.safetensors_layers()?;
    let (format, weights) = if !gguf.is_empty() {
        (Format::Gguf, gguf)
    } else if !safetensors.is_empty() {
        (Format::Safetensors, safetensors)
    } else {
        return Err(Error::NoSupportedWeights);
    };

    let ext = match format {
        Format::Gguf => "gguf",
        Format::Safetensors => "safetensors",
    };
    let single = match format {
        Format::Gguf => SINGLE_GGUF,
        Format::Safetensors => SINGLE_SAFETENSORS,
    };

    let mut weight_files = Vec::with_capacity(weights.len());
    if weights.len() == 1 {
        materialize(weights[0].as_ref(), &target_dir.join(single))?;
        weight_files.push(single.to_owned());
    } else {
        let total = weights.len() as u32;
        for (i, layer) in weights.iter().enumerate() {
            let name = shard_name("model", i as u32 + 1, total, ext);
            materialize(layer.as_ref(), &target_dir.join(&name))?;
            weight_files.push(name);
        }
    }

    let mut mmproj = None;
    if let Some(layer) = artifact.mmproj_layer()? {
        materialize(layer.as_ref(), &target_dir.join(MMPROJ_FILE))?;
        mmproj = Some(MMPROJ_FILE.to_owned());
    }
    let mut template = None;
    if let Some(layer) = artifact.chat_template_layer()? {
        materialize(layer.as_ref(), &target_dir.join(TEMPLATE_FILE))?;
        template = Some(TEMPLATE_FILE.to_owned());
    }
    if let Some(layer) = artifact.config_archive_layer()? {
        extract_archive(layer.open()?, target_dir)?;
    }

    let config = artifact.config_file()?.config;
    fs::write(
        target_dir.join(CONFIG_FILE),
        serde_json::to_vec_pretty(&config)?,
    )?;

    Ok(Bundle {
        root: target_dir.to_path_buf(),
        format,
        weight_files,
        mmproj,
        template,
        config,
    })
}

/// Hardlinks a layer's backing file to `dst`, copying when linking is not
/// possible (cross-device, or no local file at all).
fn materialize(layer: &dyn Layer, dst: &Path) -> Result<()> {
    if dst.exists() {
        fs::remove_file(dst)?;
    }
    if let Some(src) = layer.source_path() {
        match fs::hard_link(src, dst) {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(src = %src.display(), dst = %dst.display(), error = %e,
                    "hardlink failed, copying");
                fs::copy(src, dst)?;
                return Ok(());
            }
        }
    }
    let mut reader = layer.open()?;
    let mut file = fs::File::create(dst)?;
    io::copy(&mut reader, &mut file)?;
    Ok(())
}

/// Extracts a config archive into the bundle directory, safely.
///
/// Entries that would land outside `target_dir` are rejected; symlinks and
/// device nodes are skipped; directories and regular files are written
/// with the header's mode.
fn extract_archive(reader: Box<dyn Read + Send>, target_dir: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);

    for entry in archive.entries()? {
        let mut entry = entry?;
        let rel = entry.path()?.into_owned();
        if !is_safe_entry_path(&rel) {
            return Err(Error::PathEscape {
                path: rel,
                root: target_dir.to_path_buf(),
            });
        }
        let dest = target_dir.join(&rel);

        use tar::EntryType;
        match entry.header().entry_type() {
            EntryType::Directory => {
                fs::create_dir_all(&dest)?;
            }
            EntryType::Regular => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                entry.unpack(&dest)?;
            }
            // Links and device nodes have no place in a model bundle.
            other => {
                tracing::debug!(entry = %rel.display(), kind = ?other, "skipping tar entry");
            }
        }
    }
    Ok(())
}

/// Lexical safety check for archive entry paths.
fn is_safe_entry_path(path: &Path) -> bool {
    if path.as_os_str().is_empty() {
        return false;
    }
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Reparses a bundle directory produced by [`unpack`].
pub fn parse(root: &Path) -> Result<Bundle> {
    let meta = fs::metadata(root)?;
    if !meta.is_dir() {
        return Err(io::Error::new(
            io::ErrorKind::NotADirectory,
            format!("{} is not a directory", root.display()),
        )
        .into());
    }

    let mut ggufs = Vec::new();
    let mut safetensors = Vec::new();
    let mut mmprojs = Vec::new();
    let mut templates = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if name.ends_with(".gguf") {
            ggufs.push(name);
        } else if name.ends_with(".safetensors") {
            safetensors.push(name);
        } else if name.ends_with(".mmproj") {
            mmprojs.push(name);
        } else if name.ends_with(".jinja") {
            templates.push(name);
        }
    }

    let (format, mut weight_files) = if !ggufs.is_empty() {
        (Format::Gguf, ggufs)
    } else if !safetensors.is_empty() {
        (Format::Safetensors, safetensors)
    } else {
        return Err(Error::NoSupportedWeights);
    };
    weight_files.sort();

    if mmprojs.len() > 1 {
        return Err(invalid(format!("multiple mmproj files: {mmprojs:?}")));
    }
    if templates.len() > 1 {
        return Err(invalid(format!("multiple template files: {templates:?}")));
    }

    let config_data = fs::read(root.join(CONFIG_FILE))?;
    let config: ModelConfig = serde_json::from_slice(&config_data)?;

    Ok(Bundle {
        root: root.to_path_buf(),
        format,
        weight_files,
        mmproj: mmprojs.pop(),
        template: templates.pop(),
        config,
    })
}

fn invalid(msg: String) -> Error {
    io::Error::new(io::ErrorKind::InvalidData, msg).into()
}
