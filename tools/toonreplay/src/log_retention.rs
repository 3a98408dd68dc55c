use crate::errors::ReplayError;
use std::fs;
use std::path::{Path, PathBuf};

/// Deletes the oldest `*.jsonl` files in `dir` until their combined size fits
/// `budget_bytes`. Other files in the directory are neither counted nor touched.
pub fn enforce_total_budget(dir: &Path, budget_bytes: u64) -> Result<Vec<PathBuf>, ReplayError> {
    let mut logs = fs::read_dir(dir)
        .map_err(|e| ReplayError::Io(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_activity_log(path))
        .filter_map(|path| {
            let meta = fs::metadata(&path).ok()?;
            Some((meta.modified().ok(), meta.len(), path))
        })
        .collect::<Vec<_>>();

    logs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut total = logs.iter().map(|(_, len, _)| *len).sum::<u64>();
    let mut deleted = Vec::new();
    for (_, len, path) in logs {
        if total <= budget_bytes {
            break;
        }
        fs::remove_file(&path).map_err(|e| ReplayError::Io(e.to_string()))?;
        total = total.saturating_sub(len);
        deleted.push(path);
    }

    Ok(deleted)
}

fn is_activity_log(path: &Path) -> bool {
    path.extension().and_then(|ext| ext.to_str()) == Some("jsonl")
}
