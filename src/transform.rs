use std::collections::{HashMap, HashSet};

use bevy::math::Vec2;

use crate::components::SceneObject;

/// Name → index and name → children adjacency, rebuilt on demand from an
/// object list. Borrowing the list keeps the index read-only by construction.
pub struct SceneIndex<'a> {
    objects: &'a [SceneObject],
    by_name: HashMap<&'a str, usize>,
    children: HashMap<&'a str, Vec<usize>>,
    roots: Vec<usize>,
}

impl<'a> SceneIndex<'a> {
    pub fn build(objects: &'a [SceneObject]) -> Self {
        let by_name: HashMap<&str, usize> = objects
            .iter()
            .enumerate()
            .map(|(i, obj)| (obj.name.as_str(), i))
            .collect();
        let mut children: HashMap<&str, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (i, obj) in objects.iter().enumerate() {
            match obj.parent.as_deref() {
                Some(parent) if parent != obj.name && by_name.contains_key(parent) => {
                    children.entry(parent).or_default().push(i);
                }
                // Dangling or self references degrade to roots.
                _ => roots.push(i),
            }
        }
        Self {
            objects,
            by_name,
            children,
            roots,
        }
    }

    pub fn get(&self, name: &str) -> Option<&'a SceneObject> {
        self.by_name.get(name).map(|&i| &self.objects[i])
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.by_name.get(name).copied()
    }

    /// Roots in insertion order, including objects whose parent is missing.
    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn children(&self, name: &str) -> &[usize] {
        self.children.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Resolves the world position, treating a missing parent as no parent.
    /// A corrupted cyclic chain stops at the first repeated ancestor.
    pub fn world_position(&self, obj: &SceneObject) -> Vec2 {
        let mut pos = Vec2::new(obj.x, obj.y);
        let mut seen: HashSet<&str> = HashSet::new();
        seen.insert(obj.name.as_str());
        let mut current = obj;
        while let Some(parent) = current
            .parent
            .as_deref()
            .and_then(|name| self.get(name))
        {
            if !seen.insert(parent.name.as_str()) {
                break;
            }
            pos += Vec2::new(parent.x, parent.y);
            current = parent;
        }
        pos
    }

    /// Whether `ancestor` appears on `name`'s parent chain (or is `name`).
    pub fn is_ancestor_or_self(&self, ancestor: &str, name: &str) -> bool {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut current = Some(name);
        while let Some(cur) = current {
            if cur == ancestor {
                return true;
            }
            if !seen.insert(cur) {
                return false;
            }
            current = self.get(cur).and_then(|obj| obj.parent.as_deref());
        }
        false
    }

    /// All transitive children of `name`, post-order (deepest first), so a
    /// caller removing them in order never leaves a child without a parent.
    pub fn descendants(&self, name: &str) -> Vec<usize> {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        self.collect_descendants(name, &mut out, &mut visited);
        out
    }

    fn collect_descendants(&self, name: &str, out: &mut Vec<usize>, visited: &mut HashSet<usize>) {
        for &child in self.children(name) {
            if !visited.insert(child) {
                continue;
            }
            self.collect_descendants(&self.objects[child].name, out, visited);
            out.push(child);
        }
    }

    /// Depth-first pre-order walk: every root, each followed by its subtree.
    pub fn walk_depth_first(&self, mut visit: impl FnMut(usize, usize)) {
        let mut visited = HashSet::new();
        for &root in &self.roots {
            self.walk_from(root, 0, &mut visit, &mut visited);
        }
    }

    fn walk_from(
        &self,
        index: usize,
        depth: usize,
        visit: &mut impl FnMut(usize, usize),
        visited: &mut HashSet<usize>,
    ) {
        if !visited.insert(index) {
            return;
        }
        visit(index, depth);
        for &child in self.children(&self.objects[index].name) {
            self.walk_from(child, depth + 1, visit, visited);
        }
    }
}

/// World position of `obj` within `objects`.
pub fn resolve_world_position(objects: &[SceneObject], obj: &SceneObject) -> Vec2 {
    SceneIndex::build(objects).world_position(obj)
}

/// Whether making `parent` the parent of `child` would put `child` on its own
/// ancestor chain. Self-parenting counts as a cycle.
pub fn would_create_cycle(objects: &[SceneObject], child: &str, parent: &str) -> bool {
    SceneIndex::build(objects).is_ancestor_or_self(child, parent)
}
