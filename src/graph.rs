use std::collections::HashSet;
use std::path::Path;

use bevy::log::info;
use bevy::math::Vec2;

use crate::assets;
use crate::components::{ObjectKind, SceneObject, DUPLICATE_OFFSET};
use crate::error::{SparError, SparResult};
use crate::scene::Project;
use crate::transform::SceneIndex;

/// Click radius, in world units, used to pick objects in the edit view.
pub const PICK_RADIUS: f32 = 30.0;

/// `base` if free, otherwise the first free `base_1`, `base_2`, ...
pub fn unique_name(objects: &[SceneObject], base: &str) -> String {
    let taken: HashSet<&str> = objects.iter().map(|obj| obj.name.as_str()).collect();
    if !taken.contains(base) {
        return base.to_string();
    }
    let mut counter = 1u32;
    loop {
        let candidate = format!("{base}_{counter}");
        if !taken.contains(candidate.as_str()) {
            return candidate;
        }
        counter += 1;
    }
}

impl Project {
    /// Appends a new object of `kind` and returns its disambiguated name.
    pub fn create_object(&mut self, kind: ObjectKind, sprite: Option<String>) -> SparResult<String> {
        let objects = self.objects_mut()?;
        let name = unique_name(objects, kind.base_name());
        let obj = match kind {
            ObjectKind::Empty => SceneObject::empty(name.clone()),
            ObjectKind::Sprite => SceneObject::sprite(name.clone(), sprite),
        };
        objects.push(obj);
        info!("[Spar scene] Created {:?} '{}'", kind, name);
        self.save()?;
        Ok(name)
    }

    pub fn create_empty(&mut self) -> SparResult<String> {
        self.create_object(ObjectKind::Empty, None)
    }

    /// Copies `image` into the project's assets and creates a sprite for it.
    /// Nothing is created if the copy fails.
    pub fn create_sprite(&mut self, image: &Path) -> SparResult<String> {
        self.objects_mut()?;
        let relative = assets::import_asset(self.root(), image)?;
        self.create_object(ObjectKind::Sprite, Some(relative))
    }

    /// Removes `name` and all of its transitive children. Unknown names are a
    /// successful no-op.
    pub fn delete_object(&mut self, name: &str) -> SparResult<()> {
        let doomed: HashSet<usize> = {
            let index = SceneIndex::build(self.objects());
            let Some(target) = index.position(name) else {
                return Ok(());
            };
            let mut doomed: HashSet<usize> = index.descendants(name).into_iter().collect();
            doomed.insert(target);
            doomed
        };
        let objects = self.objects_mut()?;
        let mut i = 0usize;
        objects.retain(|_| {
            let keep = !doomed.contains(&i);
            i += 1;
            keep
        });
        info!(
            "[Spar scene] Deleted '{}' and {} descendants",
            name,
            doomed.len() - 1
        );
        self.save()
    }

    /// Copies `name` (without its children) under a fresh name, offset so the
    /// copy is visible next to the original.
    pub fn duplicate_object(&mut self, name: &str) -> SparResult<String> {
        let objects = self.objects_mut()?;
        let source = objects
            .iter()
            .find(|obj| obj.name == name)
            .cloned()
            .ok_or_else(|| SparError::UnknownObject(name.to_string()))?;
        let mut copy = source;
        copy.name = unique_name(objects, name);
        copy.x += DUPLICATE_OFFSET.0;
        copy.y += DUPLICATE_OFFSET.1;
        let new_name = copy.name.clone();
        objects.push(copy);
        self.save()?;
        Ok(new_name)
    }

    /// Sets or clears `child`'s parent. Rejected without any change when the
    /// parent is unknown or the assignment would make `child` its own
    /// ancestor.
    pub fn set_parent(&mut self, child: &str, parent: Option<&str>) -> SparResult<()> {
        {
            let index = SceneIndex::build(self.objects());
            if index.get(child).is_none() {
                return Err(SparError::UnknownObject(child.to_string()));
            }
            if let Some(parent) = parent {
                if index.get(parent).is_none() {
                    return Err(SparError::UnknownObject(parent.to_string()));
                }
                if index.is_ancestor_or_self(child, parent) {
                    return Err(SparError::ParentCycle {
                        child: child.to_string(),
                        parent: parent.to_string(),
                    });
                }
            }
        }
        let parent = parent.map(str::to_string);
        self.update_object(child, |obj| obj.parent = parent)
    }

    pub fn clear_parent(&mut self, child: &str) -> SparResult<()> {
        self.set_parent(child, None)
    }

    /// Renames an object and re-points children that referenced the old name.
    pub fn rename_object(&mut self, old: &str, new: &str) -> SparResult<()> {
        let new = new.trim();
        if new.is_empty() {
            return Err(SparError::InvalidName(new.to_string()));
        }
        if self.object(old).is_none() {
            return Err(SparError::UnknownObject(old.to_string()));
        }
        if old == new {
            return Ok(());
        }
        if self.object(new).is_some() {
            return Err(SparError::DuplicateName(new.to_string()));
        }
        for obj in self.objects_mut()?.iter_mut() {
            if obj.name == old {
                obj.name = new.to_string();
            } else if obj.parent.as_deref() == Some(old) {
                obj.parent = Some(new.to_string());
            }
        }
        self.save()
    }

    pub fn set_position(&mut self, name: &str, x: f32, y: f32) -> SparResult<()> {
        self.update_object(name, |obj| {
            obj.x = x;
            obj.y = y;
        })
    }

    pub fn set_rotation(&mut self, name: &str, degrees: f32) -> SparResult<()> {
        self.update_object(name, |obj| obj.rotation = degrees)
    }

    pub fn set_scale(&mut self, name: &str, scale_x: f32, scale_y: f32) -> SparResult<()> {
        self.update_object(name, |obj| {
            obj.scale_x = scale_x;
            obj.scale_y = scale_y;
        })
    }

    pub fn set_opacity(&mut self, name: &str, opacity: f32) -> SparResult<()> {
        self.require_sprite(name)?;
        self.update_object(name, |obj| obj.opacity = Some(opacity.clamp(0.0, 1.0)))
    }

    pub fn set_sprite_path(&mut self, name: &str, relative: Option<String>) -> SparResult<()> {
        self.require_sprite(name)?;
        self.update_object(name, |obj| obj.sprite = relative)
    }

    /// Imports `image` and rebinds `name` to it. The object is untouched if the
    /// copy fails.
    pub fn set_sprite_from_file(&mut self, name: &str, image: &Path) -> SparResult<String> {
        self.require_sprite(name)?;
        let relative = assets::import_asset(self.root(), image)?;
        self.set_sprite_path(name, Some(relative.clone()))?;
        Ok(relative)
    }

    pub fn set_script(&mut self, name: &str, relative: Option<String>) -> SparResult<()> {
        self.update_object(name, |obj| obj.script = relative)
    }

    /// Nearest object whose world position lies within [`PICK_RADIUS`].
    pub fn hit_test(&self, world: Vec2) -> Option<String> {
        let index = SceneIndex::build(self.objects());
        self.objects()
            .iter()
            .map(|obj| (obj, index.world_position(obj).distance(world)))
            .filter(|(_, dist)| *dist < PICK_RADIUS)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(obj, _)| obj.name.clone())
    }

    /// Moves `name` so its world position lands on `world`, converting back
    /// into its parent's local space.
    pub fn drag_to(&mut self, name: &str, world: Vec2) -> SparResult<()> {
        let local = {
            let index = SceneIndex::build(self.objects());
            let obj = index
                .get(name)
                .ok_or_else(|| SparError::UnknownObject(name.to_string()))?;
            let parent_world = obj
                .parent
                .as_deref()
                .and_then(|p| index.get(p))
                .map(|p| index.world_position(p))
                .unwrap_or(Vec2::ZERO);
            world - parent_world
        };
        self.set_position(name, local.x, local.y)
    }

    /// `(depth, name)` rows: roots first, each followed by its subtree.
    pub fn hierarchy(&self) -> Vec<(usize, String)> {
        let index = SceneIndex::build(self.objects());
        let mut rows = Vec::with_capacity(self.objects().len());
        index.walk_depth_first(|i, depth| rows.push((depth, self.objects()[i].name.clone())));
        rows
    }

    fn require_sprite(&self, name: &str) -> SparResult<()> {
        match self.object(name) {
            None => Err(SparError::UnknownObject(name.to_string())),
            Some(obj) if !obj.kind.is_sprite() => Err(SparError::NotASprite(name.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn update_object(&mut self, name: &str, f: impl FnOnce(&mut SceneObject)) -> SparResult<()> {
        let obj = self
            .objects_mut()?
            .iter_mut()
            .find(|obj| obj.name == name)
            .ok_or_else(|| SparError::UnknownObject(name.to_string()))?;
        f(obj);
        self.save()
    }
}

/// Two-step parenting: mark a designate, then the next selected object
/// becomes its child. The designate is cleared whatever the outcome.
#[derive(Default, Debug, Clone)]
pub struct Parenting {
    designate: Option<String>,
}

impl Parenting {
    pub fn designate(&mut self, parent: impl Into<String>) {
        self.designate = Some(parent.into());
    }

    pub fn pending(&self) -> Option<&str> {
        self.designate.as_deref()
    }

    pub fn cancel(&mut self) {
        self.designate = None;
    }

    /// Completes a pending designation with `selected` as the child. Returns
    /// `None` when nothing was pending.
    pub fn complete(&mut self, project: &mut Project, selected: &str) -> Option<SparResult<()>> {
        let parent = self.designate.take()?;
        Some(project.set_parent(selected, Some(&parent)))
    }
}
