//! Published model artifacts.
//!
//! One JSON file per published model under the models directory. Writers
//! never touch the final path directly: content goes to a unique temp
//! file first and is renamed onto the final name, so readers only ever
//! observe complete files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::model_definition;
use crate::services::schema::ModelSchema;

/// On-disk artifact structure for a published model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub id: String,
    pub name: String,
    #[serde(rename = "tableName")]
    pub table_name: Option<String>,
    #[serde(rename = "ownerField")]
    pub owner_field: Option<String>,
    pub version: i32,
    #[serde(rename = "publishedAt")]
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "isSystem")]
    pub is_system: bool,
    pub definition: ModelSchema,
}

impl ModelArtifact {
    pub fn from_definition(def: &model_definition::Model, schema: &ModelSchema) -> Self {
        Self {
            id: def.id.clone(),
            name: def.name.clone(),
            table_name: def.table_name.clone(),
            owner_field: def.owner_field.clone(),
            version: def.version,
            published_at: def.published_at,
            is_system: def.is_system,
            definition: schema.clone(),
        }
    }

    /// Route segment for the dynamic fabric
    pub fn route_segment(&self) -> String {
        self.table_name
            .as_deref()
            .unwrap_or(&self.name)
            .to_lowercase()
    }
}

/// Artifact file name: the model name with whitespace replaced by `_`
pub fn file_name(model_name: &str) -> String {
    let sanitized: String = model_name
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .collect();
    format!("{}.json", sanitized)
}

pub fn final_path(dir: &Path, model_name: &str) -> PathBuf {
    dir.join(file_name(model_name))
}

/// Write the artifact to a unique temp path next to its final location.
/// The caller renames it onto the final path once its transaction has
/// committed, or removes it on abort.
pub fn write_temp(dir: &Path, artifact: &ModelArtifact) -> Result<PathBuf> {
    fs::create_dir_all(dir)?;

    let token: u64 = rand::thread_rng().gen();
    let temp_path = dir.join(format!(
        "{}.{:016x}.tmp",
        file_name(&artifact.name),
        token
    ));

    let body = serde_json::to_string_pretty(artifact)?;

    let result = (|| -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)?;
        file.write_all(body.as_bytes())?;
        file.sync_all()?;
        Ok(())
    })();

    if let Err(e) = result {
        let _ = fs::remove_file(&temp_path);
        return Err(AppError::Io(e));
    }

    Ok(temp_path)
}

/// Atomically replace the final artifact with the prepared temp file
pub fn promote(temp_path: &Path, final_path: &Path) -> std::io::Result<()> {
    fs::rename(temp_path, final_path)
}

/// Remove a temp file that will not be promoted
pub fn discard_temp(temp_path: &Path) {
    let _ = fs::remove_file(temp_path);
}

/// Best-effort removal of a model's artifact
pub fn remove(dir: &Path, model_name: &str) {
    let path = final_path(dir, model_name);
    if let Err(e) = fs::remove_file(&path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!("Failed to remove artifact {}: {}", path.display(), e);
        }
    }
}

/// Parse one artifact file. Returns `None` for files without a
/// top-level `name` — those are not artifacts and are skipped; any
/// other parse failure is an error the caller must not ignore.
pub fn load(path: &Path) -> Result<Option<ModelArtifact>> {
    let body = fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&body)?;
    if value.get("name").and_then(serde_json::Value::as_str).is_none() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

/// All artifact files currently in the directory, sorted for stable
/// route-building order. Temp files are ignored.
pub fn enumerate(dir: &Path) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let Ok(entries) = fs::read_dir(dir) else {
        return paths;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();
    paths
}
