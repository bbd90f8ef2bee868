use std::path::{Path, PathBuf};

use anyhow::Context as _;
use tracing::info;

use crate::cli::{ModelsAction, ModelsArgs};
use crate::config::AppConfig;

/// A GGUF file found in the models directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEntry {
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
}

pub async fn execute(args: ModelsArgs, mut cfg: AppConfig) -> anyhow::Result<()> {
    let dir = args.dir.unwrap_or_else(|| cfg.models_dir());

    match args.action {
        ModelsAction::List => {
            let entries = scan(&dir)?;
            if entries.is_empty() {
                println!("No GGUF models found in {}", dir.display());
                return Ok(());
            }

            println!("{:<48} {:<10}", "Name", "Size");
            println!("{}", "-".repeat(66));
            for entry in &entries {
                let active = if cfg.model.as_deref() == Some(entry.path.as_path()) {
                    "(default)"
                } else {
                    ""
                };
                println!("{:<48} {:<10} {active}", entry.name, human_size(entry.size));
            }
            println!("\n{} model(s) in {}", entries.len(), dir.display());
        }
        ModelsAction::Rm { name } => {
            let path = remove(&dir, &name)?;
            println!("Deleted {}", path.display());

            if cfg.model.as_deref() == Some(path.as_path()) {
                cfg.model = None;
                cfg.save()?;
                info!("Cleared the default model");
            }
        }
    }
    Ok(())
}

/// GGUF files directly inside `dir`, sorted by name. A missing directory
/// has no models.
pub fn scan(dir: &Path) -> anyhow::Result<Vec<ModelEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    if !dir.is_dir() {
        anyhow::bail!("{} is not a directory", dir.display());
    }

    let mut entries = Vec::new();
    for item in std::fs::read_dir(dir).with_context(|| format!("reading {}", dir.display()))? {
        let item = item?;
        let path = item.path();
        let is_gguf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("gguf"));
        let meta = item.metadata()?;
        if !is_gguf || !meta.is_file() {
            continue;
        }
        entries.push(ModelEntry {
            name: item.file_name().to_string_lossy().into_owned(),
            path,
            size: meta.len(),
        });
    }
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

/// Delete `name` from `dir`. Only plain GGUF file names are accepted.
pub fn remove(dir: &Path, name: &str) -> anyhow::Result<PathBuf> {
    let entry = scan(dir)?
        .into_iter()
        .find(|e| e.name == name)
        .with_context(|| format!("No model named '{name}' in {}", dir.display()))?;
    std::fs::remove_file(&entry.path).with_context(|| format!("deleting {}", entry.path.display()))?;
    Ok(entry.path)
}

fn human_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB"];
    let mut size = bytes as f64;
    for &unit in UNITS {
        if size < 1024.0 {
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{size:.1} TiB")
}
