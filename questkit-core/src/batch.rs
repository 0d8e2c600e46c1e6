//! File enumeration and per-file loading for the batch tools.

use log::{info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::script::Script;
use crate::{parse_script, ParseOptions, QuestError, Result};

/// A file the batch could not process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchFailure {
    pub path: String,
    pub error: String,
}

/// A loaded script with its source text.
#[derive(Debug, Clone)]
pub struct ScriptFile {
    pub path: PathBuf,
    pub source: String,
    pub script: Script,
}

impl ScriptFile {
    pub fn name(&self) -> String {
        self.path.display().to_string()
    }
}

fn has_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
}

/// Expand files and directories into script paths, sorted by path.
/// Files named directly are kept whatever their extension.
pub fn collect_scripts(inputs: &[PathBuf], extensions: &[String]) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for input in inputs {
        if input.is_file() {
            out.push(input.clone());
            continue;
        }
        if !input.is_dir() {
            return Err(QuestError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} does not exist", input.display()),
            )));
        }
        for entry in WalkDir::new(input).sort_by_file_name() {
            let entry = entry.map_err(|e| QuestError::Io(e.into()))?;
            if entry.file_type().is_file() && has_extension(entry.path(), extensions) {
                out.push(entry.into_path());
            }
        }
    }
    out.sort();
    out.dedup();
    info!("{} script file(s) to process", out.len());
    Ok(out)
}

/// Read and parse each file; failures are recorded and the batch goes on.
pub fn load_scripts(paths: &[PathBuf], options: &ParseOptions) -> (Vec<ScriptFile>, Vec<BatchFailure>) {
    let mut loaded = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        let result = fs::read_to_string(path)
            .map_err(QuestError::from)
            .and_then(|source| Ok((parse_script(&source, options)?, source)));
        match result {
            Ok((script, source)) => loaded.push(ScriptFile {
                path: path.clone(),
                source,
                script,
            }),
            Err(err) => {
                warn!("{}: {err}", path.display());
                failures.push(BatchFailure {
                    path: path.display().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
    (loaded, failures)
}

/// Read each file as text; unreadable files become failures.
pub fn read_sources(paths: &[PathBuf]) -> (Vec<(PathBuf, String)>, Vec<BatchFailure>) {
    let mut loaded = Vec::new();
    let mut failures = Vec::new();
    for path in paths {
        match fs::read_to_string(path) {
            Ok(text) => loaded.push((path.clone(), text)),
            Err(err) => {
                warn!("{}: {err}", path.display());
                failures.push(BatchFailure {
                    path: path.display().to_string(),
                    error: err.to_string(),
                });
            }
        }
    }
    (loaded, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("questkit-batch-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(dir.join("sub")).unwrap();
        dir
    }

    #[test]
    fn directories_are_walked_in_path_order() {
        let dir = scratch("walk");
        for name in ["b.evs", "a.evs", "sub/c.evs", "notes.md"] {
            fs::write(dir.join(name), "END\n").unwrap();
        }
        let exts = vec!["evs".to_string()];
        let files = collect_scripts(&[dir.clone()], &exts).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(&dir).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, ["a.evs", "b.evs", "sub/c.evs"]);
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn bad_files_do_not_stop_the_batch() {
        let dir = scratch("load");
        fs::write(dir.join("good.evs"), "WAIT 1\nEND\n").unwrap();
        fs::write(dir.join("bad.evs"), "\"unterminated\n").unwrap();
        let paths = vec![dir.join("bad.evs"), dir.join("good.evs"), dir.join("missing.evs")];
        let (loaded, failures) = load_scripts(&paths, &ParseOptions::default());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].script.command_count(), 2);
        assert_eq!(failures.len(), 2);
        assert!(failures[0].error.contains("unterminated string"));
        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn missing_input_is_an_error() {
        let missing = std::env::temp_dir().join("questkit-no-such-dir-xyz");
        assert!(collect_scripts(&[missing], &["evs".to_string()]).is_err());
    }
}
