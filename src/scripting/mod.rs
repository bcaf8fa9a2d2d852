pub mod host;
pub mod lua_vm;
pub mod rhai_vm;

use std::collections::VecDeque;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{SparError, SparResult};

pub use host::ScriptHost;

pub const MAX_SCRIPT_ERRORS: usize = 100;
/// Consecutive failing calls after which a script gets no more hooks.
pub const MAX_SCRIPT_ERROR_STREAK: u32 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Hook {
    Init,
    Update,
}

impl Hook {
    pub fn name(self) -> &'static str {
        match self {
            Hook::Init => "init",
            Hook::Update => "update",
        }
    }
}

/// A loaded script. Either hook may be missing; callers check first.
///
/// `call` returns the new value of the first argument when the script
/// changed it (by returning a value, or for Lua also by mutating the table
/// in place), `None` when it left it alone.
pub trait ScriptBackend {
    fn has_hook(&self, hook: Hook) -> bool;
    fn call(
        &mut self,
        hook: Hook,
        args: Vec<serde_json::Value>,
    ) -> SparResult<Option<serde_json::Value>>;
}

/// Reads and evaluates the script at `root/relative`, picking the
/// interpreter from the file extension.
pub fn load_script(root: &Path, relative: &str) -> SparResult<Box<dyn ScriptBackend>> {
    let path = root.join(relative);
    let source = std::fs::read_to_string(&path).map_err(|e| SparError::io(&path, e))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("lua") => Ok(Box::new(lua_vm::LuaScript::load(relative, &source)?)),
        Some("rhai") => Ok(Box::new(rhai_vm::RhaiScript::load(relative, &source)?)),
        _ => Err(SparError::Script(format!(
            "'{relative}' is not a .lua or .rhai script"
        ))),
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ScriptError {
    pub script: String,
    pub object: Option<String>,
    pub message: String,
    pub frame: u64,
}

/// Most recent script failures, oldest dropped first.
#[derive(Default, Debug, Clone)]
pub struct ScriptErrors {
    entries: VecDeque<ScriptError>,
    total: u64,
}

impl ScriptErrors {
    pub fn push(&mut self, entry: ScriptError) {
        self.total += 1;
        self.entries.push_back(entry);
        while self.entries.len() > MAX_SCRIPT_ERRORS {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &ScriptError> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every error ever pushed, including those already dropped.
    pub fn total(&self) -> u64 {
        self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    #[test]
    fn error_history_is_bounded() {
        let mut errors = ScriptErrors::default();
        for frame in 0..150 {
            errors.push(ScriptError {
                script: "scripts/a.lua".into(),
                object: None,
                message: "boom".into(),
                frame,
            });
        }
        assert_eq!(errors.len(), MAX_SCRIPT_ERRORS);
        assert_eq!(errors.total(), 150);
        assert_eq!(errors.entries().next().map(|e| e.frame), Some(50));
    }

    #[test]
    fn load_picks_backend_by_extension() {
        let tmp = TempProject::new("script_ext");
        tmp.write("scripts/a.lua", "function update(o) end");
        tmp.write("scripts/b.rhai", "fn init(objects) { objects }");
        tmp.write("scripts/c.py", "def update(o): pass");

        let lua = load_script(tmp.path(), "scripts/a.lua").expect("lua");
        assert!(lua.has_hook(Hook::Update));
        assert!(!lua.has_hook(Hook::Init));

        let rhai = load_script(tmp.path(), "scripts/b.rhai").expect("rhai");
        assert!(rhai.has_hook(Hook::Init));
        assert!(!rhai.has_hook(Hook::Update));

        assert!(matches!(
            load_script(tmp.path(), "scripts/c.py"),
            Err(SparError::Script(_))
        ));
        assert!(matches!(
            load_script(tmp.path(), "scripts/missing.lua"),
            Err(SparError::Io { .. })
        ));
    }
}
