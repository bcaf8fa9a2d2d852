use std::path::Path;

use bevy::log::{error, info, warn};

use crate::components::SceneObject;
use crate::error::SparError;
use crate::input::{events_to_json, InputEvent};
use crate::scripting::{
    load_script, Hook, ScriptBackend, ScriptError, ScriptErrors, MAX_SCRIPT_ERROR_STREAK,
};

struct ScriptSlot {
    path: String,
    /// Bound object for per-object scripts, `None` for the global script.
    owner: Option<String>,
    backend: Box<dyn ScriptBackend>,
    streak: u32,
    disabled: bool,
}

/// Every script of one simulation run. Each hook call is isolated: a failing
/// call is logged and recorded, and a script that keeps failing is disabled,
/// but nothing here ever aborts the caller.
pub struct ScriptHost {
    global: Option<ScriptSlot>,
    objects: Vec<ScriptSlot>,
    errors: ScriptErrors,
    frame: u64,
}

impl ScriptHost {
    /// Loads the global script and every object-bound script once. Scripts
    /// that fail to load are recorded and receive no hooks.
    pub fn load(root: &Path, global_script: Option<&str>, objects: &[SceneObject]) -> Self {
        let mut host = Self {
            global: None,
            objects: Vec::new(),
            errors: ScriptErrors::default(),
            frame: 0,
        };
        if let Some(path) = global_script {
            host.global = host.load_slot(root, path, None);
        }
        for obj in objects {
            if let Some(path) = obj.script.as_deref() {
                if let Some(slot) = host.load_slot(root, path, Some(obj.name.clone())) {
                    host.objects.push(slot);
                }
            }
        }
        info!(
            "[Spar scripts] Loaded {} object script(s){}",
            host.objects.len(),
            if host.global.is_some() { " and a global script" } else { "" }
        );
        host
    }

    fn load_slot(&mut self, root: &Path, path: &str, owner: Option<String>) -> Option<ScriptSlot> {
        match load_script(root, path) {
            Ok(backend) => Some(ScriptSlot {
                path: path.to_string(),
                owner,
                backend,
                streak: 0,
                disabled: false,
            }),
            Err(e) => {
                if matches!(e, SparError::Io { .. }) {
                    warn!("[Spar scripts] Skipping missing script '{}': {}", path, e);
                }
                self.record(path, owner, e.to_string());
                None
            }
        }
    }

    pub fn errors(&self) -> &ScriptErrors {
        &self.errors
    }

    pub fn into_errors(self) -> ScriptErrors {
        self.errors
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Global `init(objects)`, then per-object `init(object)` in scene order.
    pub fn run_init(&mut self, objects: &mut Vec<SceneObject>) {
        self.call_global(Hook::Init, objects);
        for i in 0..self.objects.len() {
            self.call_object(i, Hook::Init, objects, None);
        }
    }

    /// One frame: global `update(objects)`, then every per-object
    /// `update(object, events)`.
    pub fn run_update(&mut self, objects: &mut Vec<SceneObject>, events: &[InputEvent]) {
        self.call_global(Hook::Update, objects);
        let events = events_to_json(events);
        for i in 0..self.objects.len() {
            self.call_object(i, Hook::Update, objects, Some(&events));
        }
        self.frame += 1;
    }

    fn call_global(&mut self, hook: Hook, objects: &mut Vec<SceneObject>) {
        let Some(slot) = self.global.as_mut() else {
            return;
        };
        if slot.disabled || !slot.backend.has_hook(hook) {
            return;
        }
        let arg = match serde_json::to_value(&*objects) {
            Ok(arg) => arg,
            Err(e) => {
                error!("[Spar scripts] Cannot pass objects to global script: {}", e);
                return;
            }
        };
        let outcome = slot.backend.call(hook, vec![arg]).and_then(|ret| match ret {
            Some(value) => serde_json::from_value::<Vec<SceneObject>>(value)
                .map(Some)
                .map_err(|e| SparError::Script(format!("{} returned invalid objects: {e}", hook.name()))),
            None => Ok(None),
        });
        match outcome {
            Ok(Some(mut updated)) => {
                updated.iter_mut().for_each(SceneObject::enforce_variant);
                *objects = updated;
                slot.streak = 0;
            }
            Ok(None) => slot.streak = 0,
            Err(e) => self.fail_global(hook, e.to_string()),
        }
    }

    fn call_object(
        &mut self,
        index: usize,
        hook: Hook,
        objects: &mut [SceneObject],
        events: Option<&serde_json::Value>,
    ) {
        let slot = &mut self.objects[index];
        if slot.disabled || !slot.backend.has_hook(hook) {
            return;
        }
        let Some(owner) = slot.owner.clone() else {
            return;
        };
        // The object may have been removed by the global script.
        let Some(obj) = objects.iter_mut().find(|o| o.name == owner) else {
            return;
        };
        let mut args = match serde_json::to_value(&*obj) {
            Ok(arg) => vec![arg],
            Err(e) => {
                error!("[Spar scripts] Cannot pass '{}' to its script: {}", owner, e);
                return;
            }
        };
        if let Some(events) = events {
            args.push(events.clone());
        }
        let outcome = slot.backend.call(hook, args).and_then(|ret| match ret {
            Some(value) => serde_json::from_value::<SceneObject>(value)
                .map(Some)
                .map_err(|e| SparError::Script(format!("{} returned an invalid object: {e}", hook.name()))),
            None => Ok(None),
        });
        match outcome {
            Ok(Some(mut updated)) => {
                updated.name = owner;
                updated.enforce_variant();
                *obj = updated;
                slot.streak = 0;
            }
            Ok(None) => slot.streak = 0,
            Err(e) => self.fail_object(index, hook, e.to_string()),
        }
    }

    fn fail_global(&mut self, hook: Hook, message: String) {
        let Some(slot) = self.global.as_mut() else {
            return;
        };
        slot.streak += 1;
        let path = slot.path.clone();
        let disable = slot.streak >= MAX_SCRIPT_ERROR_STREAK;
        slot.disabled = disable;
        error!("[Spar scripts] Global {} failed: {}", hook.name(), message);
        if disable {
            warn!("[Spar scripts] Disabling global script '{}' after repeated errors", path);
        }
        self.record(&path, None, message);
    }

    fn fail_object(&mut self, index: usize, hook: Hook, message: String) {
        let slot = &mut self.objects[index];
        slot.streak += 1;
        let path = slot.path.clone();
        let owner = slot.owner.clone();
        let disable = slot.streak >= MAX_SCRIPT_ERROR_STREAK;
        slot.disabled = disable;
        let who = owner.as_deref().unwrap_or("?");
        error!("[Spar scripts] {} of '{}' failed: {}", hook.name(), who, message);
        if disable {
            warn!("[Spar scripts] Disabling script '{}' on '{}' after repeated errors", path, who);
        }
        self.record(&path, owner, message);
    }

    fn record(&mut self, script: &str, object: Option<String>, message: String) {
        self.errors.push(ScriptError {
            script: script.to_string(),
            object,
            message,
            frame: self.frame,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    #[test]
    fn global_and_object_hooks_run_in_order() {
        let tmp = TempProject::new("host_order");
        tmp.write(
            "scripts/global.lua",
            "function init(objects) for _, o in ipairs(objects) do o.y = 1 end end\n\
             function update(objects) objects[1].x = objects[1].x + 1 end",
        );
        tmp.write(
            "scripts/hero.rhai",
            "fn update(obj, events) { obj.rotation = obj.x; obj }",
        );
        let mut objects = vec![{
            let mut hero = SceneObject::empty("Hero").at(0.0, 0.0);
            hero.script = Some("scripts/hero.rhai".into());
            hero
        }];
        let mut host = ScriptHost::load(tmp.path(), Some("scripts/global.lua"), &objects);
        host.run_init(&mut objects);
        assert_eq!(objects[0].y, 1.0);
        host.run_update(&mut objects, &[]);
        host.run_update(&mut objects, &[]);
        assert_eq!(objects[0].x, 2.0);
        assert_eq!(objects[0].rotation, 2.0);
        assert_eq!(host.frame(), 2);
        assert!(host.errors().is_empty());
    }

    #[test]
    fn object_scripts_cannot_rename_their_object() {
        let tmp = TempProject::new("host_pin");
        tmp.write("scripts/r.lua", "function update(o) o.name = 'Other' o.x = 9 end");
        let mut obj = SceneObject::empty("Mine");
        obj.script = Some("scripts/r.lua".into());
        let mut objects = vec![obj];
        let mut host = ScriptHost::load(tmp.path(), None, &objects);
        host.run_update(&mut objects, &[]);
        assert_eq!(objects[0].name, "Mine");
        assert_eq!(objects[0].x, 9.0);
    }

    #[test]
    fn failing_script_is_isolated_then_disabled() {
        let tmp = TempProject::new("host_isolate");
        tmp.write("scripts/bad.lua", "function update(o) error('always') end");
        tmp.write("scripts/good.lua", "function update(o) o.x = o.x + 1 end");
        let mut bad = SceneObject::empty("Bad");
        bad.script = Some("scripts/bad.lua".into());
        let mut good = SceneObject::empty("Good").at(0.0, 0.0);
        good.script = Some("scripts/good.lua".into());
        let mut missing = SceneObject::empty("Missing");
        missing.script = Some("scripts/nowhere.lua".into());
        let mut objects = vec![bad, good, missing];

        let mut host = ScriptHost::load(tmp.path(), None, &objects);
        assert_eq!(host.errors().len(), 1);
        for _ in 0..20 {
            host.run_update(&mut objects, &[]);
        }
        assert_eq!(objects[1].x, 20.0);
        assert_eq!(host.errors().len(), 1 + MAX_SCRIPT_ERROR_STREAK as usize);
    }

    #[test]
    fn success_resets_the_error_streak() {
        let tmp = TempProject::new("host_streak");
        tmp.write(
            "scripts/flaky.lua",
            "n = 0\nfunction update(objects) n = n + 1 if n % 2 == 0 then error('even') end end",
        );
        let mut objects = vec![SceneObject::empty("A")];
        let mut host = ScriptHost::load(tmp.path(), Some("scripts/flaky.lua"), &objects);
        for _ in 0..40 {
            host.run_update(&mut objects, &[]);
        }
        assert_eq!(host.errors().total(), 20);
    }
}
