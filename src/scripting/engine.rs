use rhai::{Dynamic, Engine, FnPtr, FuncArgs, Scope, AST};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::error::ScriptError;

/// The script sandbox.
///
/// Owns a rhai [`Engine`], the global [`Scope`] every evaluation shares, and
/// the function library accumulated from everything evaluated so far, which
/// is what callbacks are resolved against when they are invoked later.
///
/// Nothing here is `Send`: an instance lives and dies on one thread.
pub struct ScriptEngine {
    engine: Engine,
    scope: Scope<'static>,
    lib: AST,
}

impl ScriptEngine {
    pub fn new(config: &EngineConfig) -> Self {
        let mut engine = Engine::new();

        engine.set_max_operations(config.max_operations);
        engine.set_max_call_levels(config.max_call_levels);
        engine.set_max_expr_depths(config.max_expr_depth, config.max_expr_depth);
        engine.set_max_string_size(config.max_string_size);

        engine.on_print(|text| info!(target: "script", "{}", text));
        engine.on_debug(|text, source, pos| match source {
            Some(source) => debug!(target: "script", "{} @ {} {}", text, source, pos),
            None => debug!(target: "script", "{} @ {}", text, pos),
        });

        Self {
            engine,
            scope: Scope::new(),
            lib: AST::empty(),
        }
    }

    /// Access to the underlying engine for registering host types and
    /// functions.
    pub fn engine_mut(&mut self) -> &mut Engine {
        &mut self.engine
    }

    /// Bind `value` to the global `name`, replacing any previous variable.
    pub fn bind(&mut self, name: &str, value: Dynamic) -> Result<(), ScriptError> {
        if self.scope.is_constant(name) == Some(true) {
            return Err(ScriptError::ConstantBinding(name.to_string()));
        }

        self.scope.set_value(name.to_string(), value);
        Ok(())
    }

    /// Compile and run `source` against the global scope.
    ///
    /// Functions declared by earlier evaluations stay callable, and the
    /// functions declared here (closures included) are kept so callbacks
    /// registered by this source can be invoked after it returns.
    pub fn evaluate(&mut self, source: &str) -> Result<Dynamic, ScriptError> {
        let ast = self
            .engine
            .compile_with_scope(&self.scope, source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;

        let ast = self.lib.merge(&ast);
        self.lib = ast.clone_functions_only();

        self.engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &ast)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }

    /// Convert a host value into a sandbox value.
    pub fn to_sandbox_value<T: Serialize>(&self, value: &T) -> Result<Dynamic, ScriptError> {
        rhai::serde::to_dynamic(value).map_err(|e| ScriptError::Conversion(e.to_string()))
    }

    /// Invoke a script callable.
    pub fn call(&self, callback: &FnPtr, args: impl FuncArgs) -> Result<Dynamic, ScriptError> {
        callback
            .call::<Dynamic>(&self.engine, &self.lib, args)
            .map_err(|e| ScriptError::Runtime(e.to_string()))
    }

    /// Convert a sandbox value into something that can leave this thread.
    ///
    /// Values with no data representation (function pointers, host types)
    /// come back as their display string.
    pub fn to_host_value(value: Dynamic) -> serde_json::Value {
        let value = value.flatten();

        if value.is_unit() {
            return serde_json::Value::Null;
        }

        rhai::serde::from_dynamic::<serde_json::Value>(&value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()))
    }
}
