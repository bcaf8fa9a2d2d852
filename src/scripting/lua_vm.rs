use mlua::{Function, Lua, LuaSerdeExt, MultiValue, SerializeOptions, Value};

use crate::error::{SparError, SparResult};
use crate::scripting::{Hook, ScriptBackend};

/// A Lua script in its own interpreter state.
pub struct LuaScript {
    lua: Lua,
    init: Option<Function>,
    update: Option<Function>,
}

fn lua_err(name: &str, e: mlua::Error) -> SparError {
    SparError::Script(format!("{name}: {e}"))
}

impl LuaScript {
    /// Runs the chunk once and captures whichever hooks it defines globally.
    pub fn load(name: &str, source: &str) -> SparResult<Self> {
        let lua = Lua::new();
        lua.load(source)
            .set_name(name)
            .exec()
            .map_err(|e| lua_err(name, e))?;
        let globals = lua.globals();
        let init = globals
            .get::<Option<Function>>("init")
            .map_err(|e| lua_err(name, e))?;
        let update = globals
            .get::<Option<Function>>("update")
            .map_err(|e| lua_err(name, e))?;
        Ok(Self { lua, init, update })
    }

    fn to_lua(&self, value: &serde_json::Value) -> mlua::Result<Value> {
        let options = SerializeOptions::new()
            .serialize_none_to_null(false)
            .serialize_unit_to_null(false);
        self.lua.to_value_with(value, options)
    }
}

impl ScriptBackend for LuaScript {
    fn has_hook(&self, hook: Hook) -> bool {
        match hook {
            Hook::Init => self.init.is_some(),
            Hook::Update => self.update.is_some(),
        }
    }

    fn call(
        &mut self,
        hook: Hook,
        args: Vec<serde_json::Value>,
    ) -> SparResult<Option<serde_json::Value>> {
        let func = match hook {
            Hook::Init => self.init.clone(),
            Hook::Update => self.update.clone(),
        };
        let Some(func) = func else {
            return Ok(None);
        };
        let name = hook.name();
        let values = args
            .iter()
            .map(|arg| self.to_lua(arg))
            .collect::<mlua::Result<Vec<Value>>>()
            .map_err(|e| lua_err(name, e))?;
        let first = values.first().cloned();
        let ret: Value = func
            .call(MultiValue::from_iter(values))
            .map_err(|e| lua_err(name, e))?;

        // A returned value wins; otherwise read back the (possibly mutated)
        // first table argument.
        let result = match (ret, first) {
            (Value::Nil, Some(table @ Value::Table(_))) => table,
            (Value::Nil, _) => return Ok(None),
            (ret, _) => ret,
        };
        self.lua
            .from_value::<serde_json::Value>(result)
            .map(Some)
            .map_err(|e| lua_err(name, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn in_place_mutation_is_read_back() {
        let mut script = LuaScript::load(
            "move.lua",
            "function update(obj, events) obj.x = obj.x + #events end",
        )
        .expect("load");
        let out = script
            .call(
                Hook::Update,
                vec![json!({"name": "A", "x": 1.0}), json!([{"type": "quit"}, {"type": "quit"}])],
            )
            .expect("call")
            .expect("value");
        assert_eq!(out["x"].as_f64(), Some(3.0));
        assert_eq!(out["name"], "A");
    }

    #[test]
    fn returned_value_replaces_argument() {
        let mut script = LuaScript::load(
            "swap.lua",
            "function init(objects) return { objects[2], objects[1] } end",
        )
        .expect("load");
        let out = script
            .call(Hook::Init, vec![json!([{"name": "A"}, {"name": "B"}])])
            .expect("call")
            .expect("value");
        assert_eq!(out[0]["name"], "B");
        assert_eq!(out[1]["name"], "A");
    }

    #[test]
    fn missing_hook_and_runtime_error() {
        let mut script =
            LuaScript::load("bad.lua", "function update(o) error('nope') end").expect("load");
        assert!(!script.has_hook(Hook::Init));
        assert_eq!(script.call(Hook::Init, vec![json!({})]).expect("no hook"), None);
        let err = script.call(Hook::Update, vec![json!({})]).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn syntax_error_fails_load() {
        assert!(LuaScript::load("broken.lua", "function update(").is_err());
    }

    #[test]
    fn scripts_do_not_share_state() {
        let mut a = LuaScript::load("a.lua", "counter = 0 function update(o) counter = counter + 1 o.n = counter end")
            .expect("a");
        let mut b = LuaScript::load("b.lua", "function update(o) o.n = counter end").expect("b");
        a.call(Hook::Update, vec![json!({})]).expect("a1");
        let out = b.call(Hook::Update, vec![json!({"n": 7})]).expect("b1").expect("value");
        assert!(out.get("n").is_none());
    }
}
