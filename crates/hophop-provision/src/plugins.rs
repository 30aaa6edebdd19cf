use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use hophop_core::proto::{PluginDescriptor, PluginFileKind};
use hophop_utils::ProjectPaths;

use crate::errors::ProvisionError;

/// Mirrors `scripts` into `plugins`: the destination is wiped first, then
/// every file and subdirectory is copied. Returns the number of files copied.
pub fn sync_plugins(scripts: &Path, plugins: &Path) -> Result<usize, ProvisionError> {
    if plugins.exists() {
        fs::remove_dir_all(plugins)?;
    }
    fs::create_dir_all(plugins)?;
    if !scripts.exists() {
        return Ok(0);
    }

    let mut copied = 0;
    for entry in WalkDir::new(scripts).min_depth(1) {
        let entry = entry.map_err(|err| ProvisionError::Invalid(format!("walk {}: {err}", scripts.display())))?;
        let rel = entry
            .path()
            .strip_prefix(scripts)
            .map_err(|err| ProvisionError::Invalid(err.to_string()))?;
        let target = plugins.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Plugin files on disk: sources live in the scripts dir, the live copies
/// the framework loads live in its plugins dir, and config, data and lang
/// files sit in the framework's own directories.
#[derive(Debug, Clone)]
pub struct PluginStore {
    scripts_dir: PathBuf,
    plugins_dir: PathBuf,
    configs_dir: PathBuf,
    data_dir: PathBuf,
    lang_dir: PathBuf,
}

impl PluginStore {
    pub fn new(paths: &ProjectPaths) -> Self {
        Self {
            scripts_dir: paths.scripts_dir.clone(),
            plugins_dir: paths.plugins_dir(),
            configs_dir: paths.plugin_configs_dir(),
            data_dir: paths.plugin_data_dir(),
            lang_dir: paths.plugin_lang_dir(),
        }
    }

    pub fn list(&self) -> Result<Vec<PluginDescriptor>, ProvisionError> {
        let mut names = BTreeSet::new();
        for dir in [&self.scripts_dir, &self.plugins_dir] {
            names.extend(code_stems(dir)?);
        }
        Ok(names
            .into_iter()
            .map(|name| PluginDescriptor {
                active: self.live_code(&name).exists(),
                has_config: self.json_path(&self.configs_dir, &name).exists(),
                has_data: self.json_path(&self.data_dir, &name).exists(),
                has_lang: self.json_path(&self.lang_dir, &name).exists(),
                name,
            })
            .collect())
    }

    /// Missing files read as their placeholder.
    pub fn read(&self, name: &str, kind: PluginFileKind) -> Result<String, ProvisionError> {
        let path = self.read_path(validate_name(name)?, kind);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(content),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(kind.placeholder().to_string())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Writes one plugin file. JSON kinds must parse. Code goes to the
    /// scripts dir and, when the plugin is active, to the live copy too.
    pub fn write(&self, name: &str, kind: PluginFileKind, content: &str) -> Result<(), ProvisionError> {
        let name = validate_name(name)?;
        if kind != PluginFileKind::Code {
            serde_json::from_str::<serde_json::Value>(content)?;
        }
        let mut targets = vec![self.write_path(name, kind)];
        if kind == PluginFileKind::Code && self.live_code(name).exists() {
            targets.push(self.live_code(name));
        }
        for path in targets {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content)?;
        }
        Ok(())
    }

    /// Stores an uploaded `.cs` file in the scripts dir and returns the
    /// plugin name.
    pub fn upload(&self, file_name: &str, bytes: &[u8]) -> Result<String, ProvisionError> {
        let base = Path::new(file_name)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let Some(stem) = base.strip_suffix(".cs") else {
            return Err(ProvisionError::InvalidName(format!("{file_name} is not a .cs file")));
        };
        let name = validate_name(stem)?;
        fs::create_dir_all(&self.scripts_dir)?;
        fs::write(self.source_code(name), bytes)?;
        Ok(name.to_string())
    }

    /// Copies the source into the live dir or removes the live copy. Returns
    /// the resulting active flag.
    pub fn toggle(&self, name: &str, activate: bool) -> Result<bool, ProvisionError> {
        let name = validate_name(name)?;
        let live = self.live_code(name);
        if activate {
            let source = self.source_code(name);
            if !source.exists() {
                return Err(ProvisionError::NotFound(format!("plugin source {name}.cs")));
            }
            fs::create_dir_all(&self.plugins_dir)?;
            fs::copy(source, live)?;
            Ok(true)
        } else {
            if live.exists() {
                fs::remove_file(live)?;
            }
            Ok(false)
        }
    }

    /// Removes the code file from both dirs; config, data and lang stay.
    pub fn delete(&self, name: &str) -> Result<(), ProvisionError> {
        let name = validate_name(name)?;
        let mut removed = false;
        for path in [self.source_code(name), self.live_code(name)] {
            if path.exists() {
                fs::remove_file(path)?;
                removed = true;
            }
        }
        if removed {
            Ok(())
        } else {
            Err(ProvisionError::NotFound(format!("plugin {name}")))
        }
    }

    fn source_code(&self, name: &str) -> PathBuf {
        self.scripts_dir.join(format!("{name}.cs"))
    }

    fn live_code(&self, name: &str) -> PathBuf {
        self.plugins_dir.join(format!("{name}.cs"))
    }

    fn json_path(&self, dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.json"))
    }

    fn read_path(&self, name: &str, kind: PluginFileKind) -> PathBuf {
        match kind {
            PluginFileKind::Code => {
                let source = self.source_code(name);
                if source.exists() {
                    source
                } else {
                    self.live_code(name)
                }
            }
            other => self.write_path(name, other),
        }
    }

    fn write_path(&self, name: &str, kind: PluginFileKind) -> PathBuf {
        match kind {
            PluginFileKind::Code => self.source_code(name),
            PluginFileKind::Config => self.json_path(&self.configs_dir, name),
            PluginFileKind::Data => self.json_path(&self.data_dir, name),
            PluginFileKind::Lang => self.json_path(&self.lang_dir, name),
        }
    }
}

/// Plugin names become file names, so only `[A-Za-z0-9_.-]` is accepted and
/// path-like names are refused.
pub fn validate_name(name: &str) -> Result<&str, ProvisionError> {
    let trimmed = name.trim();
    let valid = !trimmed.is_empty()
        && trimmed.len() <= 128
        && !trimmed.starts_with('.')
        && trimmed
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(trimmed)
    } else {
        Err(ProvisionError::InvalidName(name.to_string()))
    }
}

fn code_stems(dir: &Path) -> Result<Vec<String>, ProvisionError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };
    let mut out = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("cs") {
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                out.push(stem.to_string());
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_temp_dir(prefix: &str) -> PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("hophop-plugins-{prefix}-{nanos}"))
    }

    fn seeded(prefix: &str) -> (ProjectPaths, PluginStore) {
        let paths = ProjectPaths::new(unique_temp_dir(prefix));
        fs::create_dir_all(&paths.scripts_dir).expect("scripts");
        fs::write(paths.scripts_dir.join("build.cs"), "class Build {}").expect("seed");
        fs::write(paths.scripts_dir.join("keybinds.cs"), "class Keybinds {}").expect("seed");
        fs::write(paths.scripts_dir.join("README.md"), "not a plugin").expect("seed");
        let store = PluginStore::new(&paths);
        (paths, store)
    }

    #[test]
    fn sync_is_idempotent_and_drops_stale_files() {
        let (paths, _) = seeded("sync");
        let live = paths.plugins_dir();
        fs::create_dir_all(&live).expect("live");
        fs::write(live.join("stale.cs"), "old").expect("stale");
        fs::create_dir_all(paths.scripts_dir.join("shared")).expect("subdir");
        fs::write(paths.scripts_dir.join("shared/util.cs"), "util").expect("nested");

        let first = sync_plugins(&paths.scripts_dir, &live).expect("first sync");
        let second = sync_plugins(&paths.scripts_dir, &live).expect("second sync");

        assert_eq!(first, 4);
        assert_eq!(first, second);
        assert!(!live.join("stale.cs").exists());
        assert!(live.join("shared/util.cs").exists());
        assert_eq!(fs::read_to_string(live.join("build.cs")).expect("copy"), "class Build {}");
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn listing_reflects_filesystem_probes() {
        let (paths, store) = seeded("list");
        store.toggle("build", true).expect("activate");
        store
            .write("build", PluginFileKind::Config, r#"{"Enabled": true}"#)
            .expect("config");

        let plugins = store.list().expect("list");
        let names: Vec<&str> = plugins.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["build", "keybinds"]);
        assert!(plugins[0].active && plugins[0].has_config && !plugins[0].has_data);
        assert!(!plugins[1].active && !plugins[1].has_config);
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn activating_without_source_creates_nothing() {
        let (paths, store) = seeded("toggle");
        let err = store.toggle("ghost", true).expect_err("missing source");

        assert!(matches!(err, ProvisionError::NotFound(_)));
        assert!(!paths.plugins_dir().join("ghost.cs").exists());

        assert!(!store.toggle("keybinds", false).expect("deactivate idle plugin"));
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn missing_files_read_as_placeholders() {
        let (paths, store) = seeded("read");
        assert_eq!(store.read("ghost", PluginFileKind::Code).expect("code"), "");
        assert_eq!(store.read("build", PluginFileKind::Lang).expect("lang"), "{}");
        assert_eq!(
            store.read("build", PluginFileKind::Code).expect("code"),
            "class Build {}"
        );
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn code_edits_reach_the_live_copy_of_active_plugins() {
        let (paths, store) = seeded("write");
        store.toggle("build", true).expect("activate");
        store
            .write("build", PluginFileKind::Code, "class Build2 {}")
            .expect("write");

        assert_eq!(
            fs::read_to_string(paths.plugins_dir().join("build.cs")).expect("live"),
            "class Build2 {}"
        );
        assert!(store.write("build", PluginFileKind::Data, "{not json").is_err());
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn upload_and_delete() {
        let (paths, store) = seeded("upload");
        assert_eq!(store.upload("fill_box.cs", b"class FillBox {}").expect("upload"), "fill_box");
        assert!(store.upload("evil.sh", b"rm -rf").is_err());
        assert!(store.upload("../escape.cs", b"x").is_ok_and(|name| name == "escape"));

        store.toggle("fill_box", true).expect("activate");
        store.delete("fill_box").expect("delete");
        assert!(!paths.scripts_dir.join("fill_box.cs").exists());
        assert!(!paths.plugins_dir().join("fill_box.cs").exists());
        assert!(matches!(store.delete("fill_box"), Err(ProvisionError::NotFound(_))));
        let _ = fs::remove_dir_all(&paths.root);
    }

    #[test]
    fn names_cannot_escape_their_directory() {
        assert!(validate_name("build").is_ok());
        assert!(validate_name("My_Plugin-2").is_ok());
        for bad in ["", "../etc", "a/b", ".hidden", "semi;colon"] {
            assert!(validate_name(bad).is_err(), "{bad}");
        }
    }
}
