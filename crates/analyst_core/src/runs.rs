//! Run persistence: one directory per chat session, holding the artifacts
//! each turn produced (generated code, chart specs, outcomes) plus a
//! manifest the host can enumerate.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analyst::TurnOutcome;

#[derive(Debug, Clone)]
pub struct RunInfo {
    pub id: String,
    pub dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Manifest {
    pub artifacts: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub r#type: String, // e.g. "code", "chart_spec", "outcome"
    pub path: String,   // relative path under the run dir
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

pub fn default_runs_root() -> Result<PathBuf> {
    if let Ok(custom) = std::env::var("ALDER_RUNS_DIR") {
        let root = PathBuf::from(custom);
        fs_err::create_dir_all(&root)?;
        return Ok(root);
    }
    let dirs = directories::ProjectDirs::from("com", "Alder", "Alder")
        .ok_or_else(|| anyhow::anyhow!("project directories unavailable"))?;
    let root = dirs.data_dir().join("runs");
    fs_err::create_dir_all(&root)?;
    Ok(root)
}

pub fn create_new_run(base: Option<&Path>) -> Result<RunInfo> {
    let root = match base {
        Some(b) => b.to_path_buf(),
        None => default_runs_root()?,
    };
    let id = Uuid::new_v4().to_string();
    let dir = root.join(&id);
    fs_err::create_dir_all(&dir)?;
    let manifest_path = dir.join("manifest.json");
    fs_err::write(&manifest_path, serde_json::to_vec_pretty(&Manifest::default())?)?;
    Ok(RunInfo { id, dir })
}

pub fn append_manifest(run_dir: &Path, entry: ManifestEntry) -> Result<()> {
    let path = run_dir.join("manifest.json");
    let mut manifest: Manifest = if path.exists() {
        serde_json::from_slice(&fs_err::read(&path)?).unwrap_or_default()
    } else {
        Manifest::default()
    };
    manifest.artifacts.push(entry);
    fs_err::write(&path, serde_json::to_vec_pretty(&manifest)?)?;
    Ok(())
}

/// Persist whatever one turn produced. Returns the relative paths written.
pub fn save_turn_artifacts(
    run_dir: &Path,
    turn_index: usize,
    outcome: &TurnOutcome,
) -> Result<Vec<String>> {
    let mut written = Vec::new();

    if let Some(code) = &outcome.code {
        let name = format!("turn-{turn_index:03}.code.txt");
        fs_err::write(run_dir.join(&name), code.as_bytes())?;
        append_manifest(
            run_dir,
            ManifestEntry {
                r#type: "code".to_string(),
                path: name.clone(),
                title: Some("generated code".to_string()),
            },
        )?;
        written.push(name);
    }

    if let Some(chart) = &outcome.chart {
        let name = format!("turn-{turn_index:03}.chart.json");
        fs_err::write(run_dir.join(&name), serde_json::to_vec_pretty(chart)?)?;
        append_manifest(
            run_dir,
            ManifestEntry {
                r#type: "chart_spec".to_string(),
                path: name.clone(),
                title: outcome.chart.as_ref().and_then(|c| c.title.clone()),
            },
        )?;
        written.push(name);
    }

    let name = format!("turn-{turn_index:03}.outcome.json");
    fs_err::write(run_dir.join(&name), serde_json::to_vec_pretty(outcome)?)?;
    append_manifest(
        run_dir,
        ManifestEntry {
            r#type: "outcome".to_string(),
            path: name.clone(),
            title: None,
        },
    )?;
    written.push(name);

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_run_gets_an_empty_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let run = create_new_run(Some(tmp.path())).unwrap();
        assert!(run.dir.join("manifest.json").exists());
        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(run.dir.join("manifest.json")).unwrap())
                .unwrap();
        assert!(manifest.artifacts.is_empty());
    }

    #[test]
    fn turn_artifacts_land_in_the_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let run = create_new_run(Some(tmp.path())).unwrap();
        let outcome = TurnOutcome {
            code: Some("result = 1".to_string()),
            answer: "1".to_string(),
            ..TurnOutcome::default()
        };
        let written = save_turn_artifacts(&run.dir, 0, &outcome).unwrap();
        assert_eq!(written.len(), 2); // code + outcome
        let manifest: Manifest =
            serde_json::from_slice(&std::fs::read(run.dir.join("manifest.json")).unwrap())
                .unwrap();
        assert_eq!(manifest.artifacts.len(), 2);
        assert_eq!(manifest.artifacts[0].r#type, "code");
    }
}
