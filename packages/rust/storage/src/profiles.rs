//! Workflow profiles stored as pretty JSON, one file per profile.

use std::path::{Path, PathBuf};

use chrono::Utc;
use luna_shared::{BUILTIN_PROFILES, LunaError, Result, Workflow};

/// Directory of `<name>.json` profile files.
#[derive(Debug, Clone)]
pub struct ProfileStore {
    dir: PathBuf,
}

impl ProfileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }

    /// Names of all available profiles (stored and built-in), sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = BUILTIN_PROFILES.iter().map(|s| s.to_string()).collect();

        if self.dir.is_dir() {
            let entries = std::fs::read_dir(&self.dir).map_err(|e| LunaError::io(&self.dir, e))?;
            for entry in entries.flatten() {
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }

        names.sort();
        names.dedup();
        Ok(names)
    }

    pub fn exists(&self, name: &str) -> bool {
        Workflow::is_builtin_name(name) || self.path_for(name).is_file()
    }

    /// Load a profile. A built-in profile without a stored file is written
    /// out first so the user can edit it.
    pub fn load(&self, name: &str) -> Result<Workflow> {
        Workflow::validate_name(name)?;
        let path = self.path_for(name);

        if !path.is_file() {
            let Some(mut builtin) = Workflow::builtin(name) else {
                return Err(LunaError::config(format!("profile '{name}' not found")));
            };
            tracing::debug!(profile = name, "materializing built-in profile");
            self.write(&mut builtin)?;
            return Ok(builtin);
        }

        let content = std::fs::read_to_string(&path).map_err(|e| LunaError::io(&path, e))?;
        let mut workflow: Workflow = serde_json::from_str(&content).map_err(|e| {
            LunaError::config(format!("failed to parse profile {}: {e}", path.display()))
        })?;
        workflow.renumber();
        Ok(workflow)
    }

    /// Store a profile, bumping `updated_at`.
    pub fn save(&self, workflow: &mut Workflow) -> Result<PathBuf> {
        Workflow::validate_name(&workflow.name)?;
        workflow.updated_at = Utc::now();
        self.write(workflow)
    }

    fn write(&self, workflow: &mut Workflow) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).map_err(|e| LunaError::io(&self.dir, e))?;
        workflow.renumber();

        let path = self.path_for(&workflow.name);
        let json = serde_json::to_string_pretty(workflow)
            .map_err(|e| LunaError::config(format!("failed to serialize profile: {e}")))?;
        std::fs::write(&path, json).map_err(|e| LunaError::io(&path, e))?;
        tracing::info!(profile = %workflow.name, path = %path.display(), "profile saved");
        Ok(path)
    }

    /// Delete a stored profile. Built-in profiles are protected.
    pub fn delete(&self, name: &str) -> Result<()> {
        if Workflow::is_builtin_name(name) {
            return Err(LunaError::validation(format!(
                "'{name}' is a built-in profile and cannot be deleted"
            )));
        }
        Workflow::validate_name(name)?;

        let path = self.path_for(name);
        if !path.is_file() {
            return Err(LunaError::config(format!("profile '{name}' not found")));
        }
        std::fs::remove_file(&path).map_err(|e| LunaError::io(&path, e))?;
        tracing::info!(profile = name, "profile deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use luna_shared::ToolId;
    use uuid::Uuid;

    fn test_profiles() -> ProfileStore {
        ProfileStore::new(std::env::temp_dir().join(format!("luna_profiles_{}", Uuid::now_v7())))
    }

    #[test]
    fn builtins_are_listed_without_files() {
        let store = test_profiles();
        assert_eq!(store.list().unwrap(), vec!["deep", "default", "quick"]);
        assert!(store.exists("quick"));
        assert!(!store.exists("custom"));
    }

    #[test]
    fn builtin_is_materialized_on_load() {
        let store = test_profiles();
        let quick = store.load("quick").unwrap();
        assert_eq!(quick.stages.len(), 3);
        assert!(store.dir().join("quick.json").is_file());
    }

    #[test]
    fn save_load_and_delete() {
        let store = test_profiles();
        let mut wf = Workflow::new("web-only", "probe and brute");
        wf.push_tool(ToolId::Httpx, None);
        wf.push_tool(ToolId::Ffuf, None);
        let created = wf.updated_at;
        store.save(&mut wf).unwrap();
        assert!(wf.updated_at >= created);

        let loaded = store.load("web-only").unwrap();
        assert_eq!(loaded.description, "probe and brute");
        assert_eq!(loaded.stages, wf.stages);
        assert!(store.list().unwrap().contains(&"web-only".to_string()));

        store.delete("web-only").unwrap();
        assert!(!store.exists("web-only"));
        assert!(matches!(
            store.delete("web-only"),
            Err(LunaError::Config { .. })
        ));
    }

    #[test]
    fn load_renumbers_stages() {
        let store = test_profiles();
        std::fs::create_dir_all(store.dir()).unwrap();
        let mut wf = Workflow::new("manual", "");
        wf.push_tool(ToolId::Puzzle, None);
        wf.push_tool(ToolId::Httpx, None);
        wf.stages[0].order = 7;
        wf.stages[1].order = 7;
        std::fs::write(
            store.dir().join("manual.json"),
            serde_json::to_string(&wf).unwrap(),
        )
        .unwrap();

        let loaded = store.load("manual").unwrap();
        let orders: Vec<usize> = loaded.stages.iter().map(|s| s.order).collect();
        assert_eq!(orders, vec![1, 2]);
    }

    #[test]
    fn builtins_cannot_be_deleted() {
        let store = test_profiles();
        store.load("default").unwrap();
        assert!(matches!(
            store.delete("default"),
            Err(LunaError::Validation { .. })
        ));
        assert!(store.exists("default"));
    }

    #[test]
    fn unknown_profile_is_config_error() {
        let store = test_profiles();
        assert!(matches!(store.load("nope"), Err(LunaError::Config { .. })));
        assert!(store.load("../escape").is_err());
    }
}
