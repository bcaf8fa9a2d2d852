use std::collections::HashMap;
use std::path::{Component, Path};
use std::sync::Arc;

use bevy::log::{info, warn};
use image::RgbaImage;

use crate::canvas::{transform_sprite, SpriteParams};
use crate::error::{SparError, SparResult};

pub const ASSETS_DIR: &str = "assets";
pub const SCRIPTS_DIR: &str = "scripts";

/// Copies `external` into `<root>/assets/` and returns `assets/<file name>`.
/// Importing a file that already lives there is a no-op copy.
pub fn import_asset(root: &Path, external: &Path) -> SparResult<String> {
    copy_into(root, ASSETS_DIR, external)
}

/// Scripts already inside the project are referenced where they are; others
/// are copied into `<root>/scripts/`.
pub fn import_script(root: &Path, external: &Path) -> SparResult<String> {
    if let Some(relative) = relative_to_root(root, external) {
        return Ok(relative);
    }
    copy_into(root, SCRIPTS_DIR, external)
}

fn copy_into(root: &Path, dir: &str, external: &Path) -> SparResult<String> {
    let file_name = external
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            SparError::io(
                external,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"),
            )
        })?;
    let target_dir = root.join(dir);
    std::fs::create_dir_all(&target_dir).map_err(|e| SparError::io(&target_dir, e))?;
    let target = target_dir.join(file_name);
    if !same_file(external, &target) {
        std::fs::copy(external, &target).map_err(|e| SparError::io(external, e))?;
        info!("[Spar assets] Imported {} -> {}/{}", external.display(), dir, file_name);
    }
    Ok(format!("{dir}/{file_name}"))
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Forward-slash path of `path` relative to `root`, if it lies inside it.
pub fn relative_to_root(root: &Path, path: &Path) -> Option<String> {
    let root = root.canonicalize().ok()?;
    let path = path.canonicalize().ok()?;
    let rel = path.strip_prefix(&root).ok()?;
    let parts: Vec<&str> = rel
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<_>>()?;
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Rendered copies kept per sprite path. Animated parameters produce a new
/// key every frame, so older copies are evicted least recently used first.
pub const MAX_DERIVED_PER_PATH: usize = 8;

/// Decoded sources keyed by project-relative path, plus rendered copies keyed
/// by path and the parameters they were built with. Sources are never
/// modified; a failed decode is remembered until the path is forgotten.
#[derive(Default)]
pub struct SpriteCache {
    sources: HashMap<String, Option<Arc<RgbaImage>>>,
    // Per path, oldest use first.
    derived: HashMap<String, Vec<([u32; 4], Arc<RgbaImage>)>>,
}

impl SpriteCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoded source for `relative` under `root`, or `None` if it is missing
    /// or unreadable.
    pub fn source(&mut self, root: &Path, relative: &str) -> Option<Arc<RgbaImage>> {
        self.sources
            .entry(relative.to_string())
            .or_insert_with(|| match image::open(root.join(relative)) {
                Ok(img) => Some(Arc::new(img.to_rgba8())),
                Err(e) => {
                    warn!("[Spar assets] Cannot load sprite '{}': {}", relative, e);
                    None
                }
            })
            .clone()
    }

    /// Rendered copy of `relative` for `params`. `None` when the source is
    /// unavailable or the parameters are not drawable.
    pub fn rendered(
        &mut self,
        root: &Path,
        relative: &str,
        params: &SpriteParams,
    ) -> Option<Arc<RgbaImage>> {
        if !params.is_drawable() {
            return None;
        }
        let source = self.source(root, relative)?;
        if params.is_identity() {
            return Some(source);
        }
        let key = params.key();
        let entries = self.derived.entry(relative.to_string()).or_default();
        if let Some(index) = entries.iter().position(|(k, _)| *k == key) {
            let hit = entries.remove(index);
            let image = hit.1.clone();
            entries.push(hit);
            return Some(image);
        }
        let built = Arc::new(transform_sprite(&source, params)?);
        if entries.len() >= MAX_DERIVED_PER_PATH {
            entries.remove(0);
        }
        entries.push((key, built.clone()));
        Some(built)
    }

    /// Drops every rendered copy of `relative`, keeping the decoded source.
    pub fn invalidate(&mut self, relative: &str) {
        self.derived.remove(relative);
    }

    /// Drops both levels for `relative`, e.g. after the file changed on disk.
    pub fn forget(&mut self, relative: &str) {
        self.sources.remove(relative);
        self.invalidate(relative);
    }

    pub fn clear_derived(&mut self) {
        self.derived.clear();
    }

    pub fn clear(&mut self) {
        self.sources.clear();
        self.derived.clear();
    }

    pub fn derived_len(&self) -> usize {
        self.derived.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    #[test]
    fn import_copies_into_assets() {
        let outside = TempProject::new("assets_src");
        let tmp = TempProject::new("assets_dst");
        let src = outside.write_png("hero.png", 4, 4, [255, 0, 0, 255]);
        let rel = import_asset(tmp.path(), &src).expect("import");
        assert_eq!(rel, "assets/hero.png");
        assert!(tmp.path().join("assets/hero.png").exists());
        // Re-importing the project copy is harmless.
        let again = import_asset(tmp.path(), &tmp.path().join("assets/hero.png")).expect("reimport");
        assert_eq!(again, rel);
    }

    #[test]
    fn import_missing_file_is_io_error() {
        let tmp = TempProject::new("assets_missing");
        let err = import_asset(tmp.path(), &tmp.path().join("nope.png")).unwrap_err();
        assert!(matches!(err, SparError::Io { .. }));
    }

    #[test]
    fn scripts_inside_root_are_not_copied() {
        let tmp = TempProject::new("assets_script");
        let inside = tmp.write("logic/move.lua", "function update(o) end");
        assert_eq!(import_script(tmp.path(), &inside).expect("inside"), "logic/move.lua");

        let outside = TempProject::new("assets_script_src");
        let ext = outside.write("spin.rhai", "fn update(o) { o }");
        assert_eq!(import_script(tmp.path(), &ext).expect("outside"), "scripts/spin.rhai");
    }

    #[test]
    fn cache_rebuilds_when_params_change_and_on_invalidate() {
        let tmp = TempProject::new("assets_cache");
        tmp.write_png("assets/box.png", 8, 8, [0, 255, 0, 255]);
        let mut cache = SpriteCache::new();
        let half = SpriteParams {
            opacity: 0.5,
            ..SpriteParams::IDENTITY
        };
        let a = cache.rendered(tmp.path(), "assets/box.png", &half).expect("render");
        let b = cache.rendered(tmp.path(), "assets/box.png", &half).expect("render");
        assert!(Arc::ptr_eq(&a, &b));

        let wide = SpriteParams {
            scale_x: 2.0,
            ..half
        };
        let c = cache.rendered(tmp.path(), "assets/box.png", &wide).expect("render");
        assert_eq!(c.dimensions(), (16, 8));
        assert_eq!(cache.derived_len(), 2);

        cache.invalidate("assets/box.png");
        assert_eq!(cache.derived_len(), 0);
        let d = cache.rendered(tmp.path(), "assets/box.png", &half).expect("render");
        assert!(!Arc::ptr_eq(&a, &d));
    }

    #[test]
    fn spinning_sprite_keeps_derived_cache_bounded() {
        let tmp = TempProject::new("assets_spin");
        tmp.write_png("assets/spin.png", 8, 8, [0, 0, 255, 255]);
        let mut cache = SpriteCache::new();
        let mut params = SpriteParams::IDENTITY;
        for _ in 0..600 {
            params.rotation += 0.5;
            cache.rendered(tmp.path(), "assets/spin.png", &params).expect("render");
        }
        assert_eq!(cache.derived_len(), MAX_DERIVED_PER_PATH);

        // A recent entry survives the churn, an evicted one is rebuilt.
        let recent = cache.rendered(tmp.path(), "assets/spin.png", &params).expect("render");
        let again = cache.rendered(tmp.path(), "assets/spin.png", &params).expect("render");
        assert!(Arc::ptr_eq(&recent, &again));
        assert_eq!(cache.derived_len(), MAX_DERIVED_PER_PATH);
    }

    #[test]
    fn oversized_params_render_nothing() {
        let tmp = TempProject::new("assets_huge");
        tmp.write_png("assets/big.png", 256, 256, [9, 9, 9, 255]);
        let mut cache = SpriteCache::new();
        let huge = SpriteParams {
            scale_x: 1000.0,
            scale_y: 1000.0,
            ..SpriteParams::IDENTITY
        };
        assert!(cache.rendered(tmp.path(), "assets/big.png", &huge).is_none());
        assert_eq!(cache.derived_len(), 0);
    }

    #[test]
    fn missing_source_is_remembered_until_forgotten() {
        let tmp = TempProject::new("assets_forget");
        let mut cache = SpriteCache::new();
        assert!(cache.source(tmp.path(), "assets/late.png").is_none());
        tmp.write_png("assets/late.png", 2, 2, [1, 2, 3, 255]);
        assert!(cache.source(tmp.path(), "assets/late.png").is_none());
        cache.forget("assets/late.png");
        assert!(cache.source(tmp.path(), "assets/late.png").is_some());
    }
}
