//! Reading declared policy documents from disk.

use crate::error::Result;
use crate::policy::{POLICY_PARSE_ERROR, Severity, SourceDocument, ValidationIssue};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const POLICY_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Documents read from a policy directory. Files that are not valid YAML or
/// JSON never reach the model, so they are reported here as parse errors.
#[derive(Debug, Default)]
pub struct LoadedDocuments {
    pub documents: Vec<SourceDocument>,
    pub unreadable: Vec<ValidationIssue>,
}

fn is_policy_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'));
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    !hidden && extension.is_some_and(|e| POLICY_EXTENSIONS.contains(&e.as_str()))
}

/// Collect policy files under `path` (or `path` itself) in sorted path order.
pub fn policy_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry?;
        if entry.file_type().is_file() && is_policy_file(entry.path()) {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn decode(path: &Path, contents: &str) -> std::result::Result<Value, String> {
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    if is_json {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    }
}

/// Read every policy document under `path`.
pub fn load(path: &Path) -> Result<LoadedDocuments> {
    let mut loaded = LoadedDocuments::default();

    for file in policy_files(path)? {
        let source = file.display().to_string();
        let contents = fs::read_to_string(&file)?;
        match decode(&file, &contents) {
            Ok(document) => loaded.documents.push(SourceDocument { source, document }),
            Err(reason) => {
                tracing::warn!(source = %source, error = %reason, "unreadable policy file");
                loaded.unreadable.push(ValidationIssue::new(
                    Severity::Critical,
                    POLICY_PARSE_ERROR,
                    source.clone(),
                    format!("{}: {}", source, reason),
                ));
            }
        }
    }

    tracing::debug!(
        path = %path.display(),
        documents = loaded.documents.len(),
        unreadable = loaded.unreadable.len(),
        "policy documents loaded"
    );
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_walks_in_sorted_order_and_filters_extensions() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("b.yaml"), "name: b").unwrap();
        fs::write(dir.path().join("a.json"), r#"{"name": "a"}"#).unwrap();
        fs::write(dir.path().join("nested/c.yml"), "name: c").unwrap();
        fs::write(dir.path().join("notes.md"), "# not a policy").unwrap();
        fs::write(dir.path().join(".hidden.yaml"), "name: hidden").unwrap();

        let loaded = load(dir.path()).unwrap();
        let names: Vec<_> = loaded
            .documents
            .iter()
            .map(|d| d.document["name"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        assert!(loaded.unreadable.is_empty());
    }

    #[test]
    fn test_syntax_error_is_reported_not_fatal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("broken.json"), "{ not json").unwrap();
        fs::write(dir.path().join("ok.yaml"), "name: ok").unwrap();

        let loaded = load(dir.path()).unwrap();
        assert_eq!(loaded.documents.len(), 1);
        assert_eq!(loaded.unreadable.len(), 1);
        assert_eq!(loaded.unreadable[0].code, POLICY_PARSE_ERROR);
        assert_eq!(loaded.unreadable[0].severity, Severity::Critical);
    }

    #[test]
    fn test_single_file_path() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("only.yml");
        fs::write(&file, "name: only").unwrap();
        assert_eq!(policy_files(&file).unwrap(), vec![file]);
    }
}
