use std::fs;
use std::path::{Path, PathBuf};

use bevy::log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::components::SceneObject;
use crate::error::{SparError, SparResult};

pub const MANIFEST_FILE: &str = "project_config.json";
pub const SCENES_DIR: &str = "scenes";

#[derive(Serialize, Deserialize, Default, Clone, Debug)]
pub(crate) struct ProjectManifest {
    #[serde(default)]
    pub scenes: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub global_script: Option<String>,
}

/// The scene currently loaded for editing.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActiveScene {
    pub name: String,
    pub objects: Vec<SceneObject>,
}

#[derive(Debug)]
pub struct Project {
    root: PathBuf,
    manifest: ProjectManifest,
    active: Option<ActiveScene>,
}

impl Project {
    /// Opens the project rooted at `root`, creating nothing on disk. A missing
    /// manifest yields an empty project; otherwise the first listed scene is
    /// selected.
    pub fn open(root: impl Into<PathBuf>) -> SparResult<Self> {
        let root = root.into();
        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = match fs::read_to_string(&manifest_path) {
            Ok(contents) => serde_json::from_str::<ProjectManifest>(&contents)
                .map_err(|e| SparError::json(&manifest_path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ProjectManifest::default(),
            Err(e) => return Err(SparError::io(&manifest_path, e)),
        };
        let mut project = Self {
            root,
            manifest,
            active: None,
        };
        // The first scene that loads becomes active; broken ones stay listed.
        let names: Vec<String> = project.manifest.scenes.keys().cloned().collect();
        for name in names {
            match project.select_scene(&name) {
                Ok(()) => break,
                Err(e) => warn!("[Spar scene] Skipping scene '{}' on open: {}", name, e),
            }
        }
        info!(
            "[Spar scene] Opened project {} ({} scenes)",
            project.root.display(),
            project.manifest.scenes.len()
        );
        Ok(project)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.manifest.scenes.keys().cloned().collect()
    }

    pub fn global_script(&self) -> Option<&str> {
        self.manifest.global_script.as_deref()
    }

    pub fn active(&self) -> Option<&ActiveScene> {
        self.active.as_ref()
    }

    pub fn active_name(&self) -> Option<&str> {
        self.active.as_ref().map(|scene| scene.name.as_str())
    }

    /// Objects of the active scene; empty when no scene is selected.
    pub fn objects(&self) -> &[SceneObject] {
        self.active
            .as_ref()
            .map(|scene| scene.objects.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn objects_mut(&mut self) -> SparResult<&mut Vec<SceneObject>> {
        self.active
            .as_mut()
            .map(|scene| &mut scene.objects)
            .ok_or(SparError::NoScene)
    }

    pub fn object(&self, name: &str) -> Option<&SceneObject> {
        self.objects().iter().find(|obj| obj.name == name)
    }

    /// Value copy of the active scene, handed to the simulation runtime.
    pub fn snapshot(&self) -> Vec<SceneObject> {
        self.objects().to_vec()
    }

    /// Creates an empty scene, persists it immediately and makes it active.
    pub fn create_scene(&mut self, name: &str) -> SparResult<()> {
        let name = name.trim();
        validate_scene_name(name)?;
        if self.manifest.scenes.contains_key(name) {
            return Err(SparError::DuplicateScene(name.to_string()));
        }
        self.stash_active();
        self.manifest
            .scenes
            .insert(name.to_string(), serde_json::Value::Array(Vec::new()));
        self.active = Some(ActiveScene {
            name: name.to_string(),
            objects: Vec::new(),
        });
        info!("[Spar scene] Created scene '{}'", name);
        self.save()
    }

    /// Loads a listed scene from its file and makes it active. The previous
    /// active scene is kept unchanged if the file cannot be read.
    pub fn select_scene(&mut self, name: &str) -> SparResult<()> {
        validate_scene_name(name)?;
        if !self.manifest.scenes.contains_key(name) {
            return Err(SparError::UnknownScene(name.to_string()));
        }
        let path = self.scene_path(name);
        let objects = match fs::read_to_string(&path) {
            Ok(contents) => serde_json::from_str::<Vec<SceneObject>>(&contents)
                .map_err(|e| SparError::json(&path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "[Spar scene] Scene file {} missing, starting empty",
                    path.display()
                );
                Vec::new()
            }
            Err(e) => return Err(SparError::io(&path, e)),
        };
        self.stash_active();
        self.active = Some(ActiveScene {
            name: name.to_string(),
            objects,
        });
        Ok(())
    }

    pub fn set_global_script(&mut self, relative: Option<String>) -> SparResult<()> {
        self.manifest.global_script = relative;
        self.save_manifest()
    }

    /// Writes the active scene file and the manifest.
    pub fn save(&mut self) -> SparResult<()> {
        if let Some(active) = &self.active {
            let path = self.scene_path(&active.name);
            let json = serde_json::to_string_pretty(&active.objects)
                .map_err(|e| SparError::json(&path, e))?;
            write_atomic(&path, json.as_bytes())?;
        }
        self.save_manifest()
    }

    fn save_manifest(&mut self) -> SparResult<()> {
        self.stash_active();
        let path = self.root.join(MANIFEST_FILE);
        let json =
            serde_json::to_string_pretty(&self.manifest).map_err(|e| SparError::json(&path, e))?;
        write_atomic(&path, json.as_bytes())
    }

    /// Mirrors the active objects into the manifest's scene map.
    fn stash_active(&mut self) {
        if let Some(active) = &self.active {
            match serde_json::to_value(&active.objects) {
                Ok(value) => {
                    self.manifest.scenes.insert(active.name.clone(), value);
                }
                Err(e) => warn!("[Spar scene] Could not mirror '{}': {}", active.name, e),
            }
        }
    }

    fn scene_path(&self, name: &str) -> PathBuf {
        self.root.join(SCENES_DIR).join(format!("{name}.json"))
    }
}

fn validate_scene_name(name: &str) -> SparResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\', ':'])
        || name.chars().any(char::is_control);
    if bad {
        Err(SparError::InvalidName(name.to_string()))
    } else {
        Ok(())
    }
}

/// Writes through a sibling temp file and a rename, so a failed write never
/// truncates the previous contents.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> SparResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| SparError::io(parent, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| SparError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        SparError::io(path, e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    fn three_level_scene() -> Vec<SceneObject> {
        let mut sprite = SceneObject::sprite("Sprite", Some("assets/ship.png".into()))
            .at(-4.5, 12.25)
            .with_parent("Child");
        sprite.rotation = 45.0;
        sprite.scale_x = 2.0;
        sprite.scale_y = 0.5;
        sprite.opacity = Some(0.3);
        sprite.script = Some("scripts/spin.lua".into());
        vec![
            SceneObject::empty("Root").at(1.0, 2.0),
            SceneObject::empty("Child").at(3.0, 4.0).with_parent("Root"),
            sprite,
            SceneObject::empty("Other").at(0.0, 0.0),
        ]
    }

    #[test]
    fn missing_manifest_opens_empty() {
        let tmp = TempProject::new("open_empty");
        let project = Project::open(tmp.path()).expect("open");
        assert!(project.scene_names().is_empty());
        assert!(project.active().is_none());
        assert!(project.objects().is_empty());
    }

    #[test]
    fn create_scene_persists_empty_list_and_rejects_duplicates() {
        let tmp = TempProject::new("create_scene");
        let mut project = Project::open(tmp.path()).expect("open");
        project.create_scene("Level1").expect("create");
        let file = fs::read_to_string(tmp.path().join("scenes/Level1.json")).expect("scene file");
        let parsed: Vec<SceneObject> = serde_json::from_str(&file).expect("parse");
        assert!(parsed.is_empty());

        let err = project.create_scene("Level1").expect_err("duplicate");
        assert!(matches!(err, SparError::DuplicateScene(_)));
        assert!(err.is_validation());
        assert_eq!(project.scene_names(), vec!["Level1".to_string()]);
    }

    #[test]
    fn invalid_scene_names_are_rejected() {
        let tmp = TempProject::new("bad_names");
        let mut project = Project::open(tmp.path()).expect("open");
        for name in ["", "  ", "a/b", "..", "c\\d"] {
            assert!(matches!(
                project.create_scene(name),
                Err(SparError::InvalidName(_))
            ));
        }
        assert!(project.scene_names().is_empty());
    }

    #[test]
    fn save_then_load_round_trips_every_field() {
        let tmp = TempProject::new("round_trip");
        let original = three_level_scene();
        {
            let mut project = Project::open(tmp.path()).expect("open");
            project.create_scene("Main").expect("create");
            *project.objects_mut().expect("active") = original.clone();
            project.save().expect("save");
        }
        let reopened = Project::open(tmp.path()).expect("reopen");
        assert_eq!(reopened.active_name(), Some("Main"));
        assert_eq!(reopened.objects(), original.as_slice());
    }

    #[test]
    fn switching_scenes_keeps_both_in_manifest() {
        let tmp = TempProject::new("switch");
        let mut project = Project::open(tmp.path()).expect("open");
        project.create_scene("A").expect("create A");
        project
            .objects_mut()
            .expect("active")
            .push(SceneObject::empty("OnlyInA"));
        project.save().expect("save");
        project.create_scene("B").expect("create B");
        assert!(project.objects().is_empty());

        project.select_scene("A").expect("select A");
        assert_eq!(project.objects().len(), 1);

        let manifest: serde_json::Value = serde_json::from_str(
            &fs::read_to_string(tmp.path().join(MANIFEST_FILE)).expect("manifest"),
        )
        .expect("parse manifest");
        assert_eq!(manifest["scenes"]["A"][0]["name"], "OnlyInA");
        assert!(manifest["scenes"]["B"].as_array().expect("B array").is_empty());
        assert!(manifest["global_script"].is_null());
    }

    #[test]
    fn manifest_order_picks_first_scene() {
        let tmp = TempProject::new("manifest_order");
        tmp.write(
            MANIFEST_FILE,
            r#"{"scenes": {"Zeta": [], "Alpha": []}, "global_script": "scripts/game.lua"}"#,
        );
        tmp.write("scenes/Zeta.json", r#"[{"type":"EmptyObject","name":"Z","x":1,"y":2}]"#);
        let project = Project::open(tmp.path()).expect("open");
        assert_eq!(project.active_name(), Some("Zeta"));
        assert_eq!(project.global_script(), Some("scripts/game.lua"));
        assert_eq!(project.objects()[0].name, "Z");
    }

    #[test]
    fn missing_scene_file_loads_empty_and_unknown_scene_errors() {
        let tmp = TempProject::new("missing_scene_file");
        tmp.write(MANIFEST_FILE, r#"{"scenes": {"Ghost": []}}"#);
        let mut project = Project::open(tmp.path()).expect("open");
        assert_eq!(project.active_name(), Some("Ghost"));
        assert!(project.objects().is_empty());
        assert!(matches!(
            project.select_scene("Nope"),
            Err(SparError::UnknownScene(_))
        ));
        assert_eq!(project.active_name(), Some("Ghost"));
    }

    #[test]
    fn unreadable_scene_keeps_previous_active() {
        let tmp = TempProject::new("corrupt_scene");
        tmp.write(MANIFEST_FILE, r#"{"scenes": {"Good": [], "Bad": []}}"#);
        tmp.write("scenes/Good.json", r#"[{"type":"EmptyObject","name":"G","x":0,"y":0}]"#);
        tmp.write("scenes/Bad.json", "not json");
        let mut project = Project::open(tmp.path()).expect("open");
        assert!(matches!(
            project.select_scene("Bad"),
            Err(SparError::Json { .. })
        ));
        assert_eq!(project.active_name(), Some("Good"));
        assert_eq!(project.objects()[0].name, "G");
    }

    #[test]
    fn corrupt_first_scene_does_not_block_open() {
        let tmp = TempProject::new("corrupt_first");
        tmp.write(MANIFEST_FILE, r#"{"scenes": {"Bad": [], "Good": []}}"#);
        tmp.write("scenes/Bad.json", "not json");
        tmp.write("scenes/Good.json", r#"[{"type":"EmptyObject","name":"G","x":0,"y":0}]"#);
        let project = Project::open(tmp.path()).expect("open");
        assert_eq!(project.active_name(), Some("Good"));
        assert_eq!(project.scene_names(), vec!["Bad".to_string(), "Good".to_string()]);

        tmp.write(MANIFEST_FILE, r#"{"scenes": {"Bad": []}}"#);
        let project = Project::open(tmp.path()).expect("open with nothing loadable");
        assert_eq!(project.active_name(), None);
    }

    #[test]
    fn manifest_names_cannot_escape_the_scenes_dir() {
        let tmp = TempProject::new("escape_name");
        tmp.write(MANIFEST_FILE, r#"{"scenes": {"../escape": [], "Good": []}}"#);
        tmp.write("escape.json", r#"[{"type":"EmptyObject","name":"Outside","x":0,"y":0}]"#);
        let mut project = Project::open(tmp.path()).expect("open");
        assert_eq!(project.active_name(), Some("Good"));
        assert!(matches!(
            project.select_scene("../escape"),
            Err(SparError::InvalidName(_))
        ));
        assert_eq!(project.active_name(), Some("Good"));
    }

    #[test]
    fn global_script_is_written_to_manifest() {
        let tmp = TempProject::new("global_script");
        let mut project = Project::open(tmp.path()).expect("open");
        project
            .set_global_script(Some("scripts/game.rhai".into()))
            .expect("set global");
        let reopened = Project::open(tmp.path()).expect("reopen");
        assert_eq!(reopened.global_script(), Some("scripts/game.rhai"));
    }

    #[test]
    fn atomic_write_leaves_no_temp_file() {
        let tmp = TempProject::new("atomic");
        let target = tmp.path().join("nested/out.json");
        write_atomic(&target, b"[1]").expect("write");
        write_atomic(&target, b"[2]").expect("overwrite");
        assert_eq!(fs::read_to_string(&target).expect("read"), "[2]");
        assert!(!tmp.path().join("nested/out.json.tmp").exists());
    }
}
