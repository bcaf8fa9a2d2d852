use std::collections::HashMap;

use rhai::{CallFnOptions, Dynamic, Engine, Map, Scope, AST, FLOAT, INT};

use crate::error::{SparError, SparResult};
use crate::scripting::{Hook, ScriptBackend};

const MAX_CALL_LEVELS: usize = 64;

/// A Rhai script with its own engine and top-level scope.
///
/// Rhai passes maps by value, so a hook communicates changes by returning
/// the new value; returning `()` leaves the argument as it was.
pub struct RhaiScript {
    name: String,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    arity: HashMap<&'static str, usize>,
}

impl RhaiScript {
    pub fn load(name: &str, source: &str) -> SparResult<Self> {
        let mut engine = Engine::new();
        engine.set_max_call_levels(MAX_CALL_LEVELS);
        let ast = engine
            .compile(source)
            .map_err(|e| SparError::Script(format!("{name}: {e}")))?;
        let mut scope = Scope::new();
        engine
            .run_ast_with_scope(&mut scope, &ast)
            .map_err(|e| SparError::Script(format!("{name}: {e}")))?;

        let mut arity = HashMap::new();
        for hook in [Hook::Init, Hook::Update] {
            if let Some(f) = ast.iter_functions().find(|f| f.name == hook.name()) {
                arity.insert(hook.name(), f.params.len());
            }
        }
        Ok(Self {
            name: name.to_string(),
            engine,
            ast,
            scope,
            arity,
        })
    }
}

impl ScriptBackend for RhaiScript {
    fn has_hook(&self, hook: Hook) -> bool {
        self.arity.contains_key(hook.name())
    }

    fn call(
        &mut self,
        hook: Hook,
        args: Vec<serde_json::Value>,
    ) -> SparResult<Option<serde_json::Value>> {
        let Some(&arity) = self.arity.get(hook.name()) else {
            return Ok(None);
        };
        // `fn update(obj)` is as valid as `fn update(obj, events)`.
        let args: Vec<Dynamic> = args.iter().take(arity).map(json_to_dynamic).collect();
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true);
        let ret = self
            .engine
            .call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, hook.name(), args)
            .map_err(|e| SparError::Script(format!("{}: {}: {e}", self.name, hook.name())))?;
        if ret.is_unit() {
            return Ok(None);
        }
        Ok(Some(dynamic_to_json(&ret)))
    }
}

/// Object fields become map entries; integral JSON numbers stay `INT` so
/// scripts can index arrays with them.
pub(crate) fn json_to_dynamic(value: &serde_json::Value) -> Dynamic {
    use serde_json::Value as Json;
    match value {
        Json::Null => Dynamic::UNIT,
        Json::Bool(b) => Dynamic::from_bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Dynamic::from_int(i as INT),
            None => Dynamic::from_float(n.as_f64().unwrap_or_default() as FLOAT),
        },
        Json::String(text) => Dynamic::from(text.clone()),
        Json::Array(items) => Dynamic::from_array(items.iter().map(json_to_dynamic).collect()),
        Json::Object(fields) => Dynamic::from_map(
            fields
                .iter()
                .map(|(key, field)| (key.as_str().into(), json_to_dynamic(field)))
                .collect::<Map>(),
        ),
    }
}

/// Inverse of [`json_to_dynamic`]. Values with no JSON form (functions,
/// custom types) become `null`.
pub(crate) fn dynamic_to_json(value: &Dynamic) -> serde_json::Value {
    use serde_json::Value as Json;
    if let Ok(b) = value.as_bool() {
        Json::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Json::from(i)
    } else if let Ok(f) = value.as_float() {
        Json::from(f)
    } else if let Ok(text) = value.clone().into_string() {
        Json::String(text)
    } else if let Ok(items) = value.clone().into_array() {
        Json::Array(items.iter().map(dynamic_to_json).collect())
    } else if let Some(fields) = value.clone().try_cast::<Map>() {
        Json::Object(
            fields
                .iter()
                .map(|(key, field)| (key.to_string(), dynamic_to_json(field)))
                .collect(),
        )
    } else {
        Json::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn returned_map_replaces_argument() {
        let mut script = RhaiScript::load(
            "spin.rhai",
            "fn update(obj, events) { obj.rotation += 90.0; obj.seen = events.len(); obj }",
        )
        .expect("load");
        let out = script
            .call(
                Hook::Update,
                vec![json!({"name": "A", "rotation": 0.0}), json!([{"type": "key_down", "key": "a"}])],
            )
            .expect("call")
            .expect("value");
        assert_eq!(out["rotation"].as_f64(), Some(90.0));
        assert_eq!(out["seen"], 1);
    }

    #[test]
    fn unit_return_means_unchanged_and_extra_args_are_dropped() {
        let mut script = RhaiScript::load("noop.rhai", "fn update(obj) { obj.x = 5; }").expect("load");
        assert_eq!(
            script
                .call(Hook::Update, vec![json!({"x": 1.0}), json!([])])
                .expect("call"),
            None
        );
    }

    #[test]
    fn runtime_error_is_reported() {
        let mut script = RhaiScript::load("bad.rhai", r#"fn init(objects) { throw "kaput"; }"#).expect("load");
        let err = script.call(Hook::Init, vec![json!([])]).unwrap_err();
        assert!(err.to_string().contains("kaput"));
    }

    #[test]
    fn parse_error_fails_load() {
        assert!(RhaiScript::load("broken.rhai", "fn update(").is_err());
    }
}
