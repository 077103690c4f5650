use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::WalkDir;

use crate::config::Config;
use crate::models::CorpusFile;

/// Scan the corpus directory for tabular source files.
///
/// Returns one [`CorpusFile`] per match, sorted by file name so ingestion
/// order is deterministic across runs.
pub fn scan_corpus(config: &Config) -> Result<Vec<CorpusFile>> {
    let root = &config.corpus.dir;
    if !root.exists() {
        bail!("Corpus directory does not exist: {}", root.display());
    }

    let include_set = build_globset(&config.corpus.include_globs)?;

    let mut files = Vec::new();

    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().to_string();

        if !include_set.is_match(&rel_str) {
            continue;
        }

        let metadata = std::fs::metadata(path)?;
        let modified = metadata
            .modified()
            .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
            .duration_since(std::time::SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        files.push(CorpusFile {
            file_name: rel_str,
            path: path.to_path_buf(),
            modified,
        });
    }

    files.sort_by(|a, b| a.file_name.cmp(&b.file_name));

    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
