//! [`InterpretationEngine`] backed by the rhai scripting language.
//!
//! A plugin's entry file is compiled and run as a script. The resulting
//! value is exposed to the loader as follows:
//!
//! - an object map: every entry holding a function pointer is a method,
//!   called without a bound `this`;
//! - unit (a script that only defines functions): the script's public
//!   functions are the methods;
//! - anything else: a value with no methods.
//!
//! `import` statements resolve against `<resolution_root>/src`, where the
//! dependency preparer consolidates vendored modules.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ::rhai::module_resolvers::FileModuleResolver;
use ::rhai::{AST, CallFnOptions, Dynamic, Engine, FnAccess, FnPtr, Scope};
use tracing::debug;

use crate::engine::{EngineSession, InterpretationEngine, Method, PluginObject, PluginValue};
use crate::error::{PluginError, PluginResult};

/// Rhai interpretation engine.
#[derive(Debug, Clone, Default)]
pub struct RhaiEngine {
    max_operations: u64,
}

impl RhaiEngine {
    /// Create an engine with no operation limit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the number of operations a single evaluation may run. `0` removes
    /// the cap.
    #[must_use]
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.max_operations = max_operations;
        self
    }

    fn build(&self, resolution_root: &Path) -> Engine {
        let mut engine = Engine::new();
        engine.set_module_resolver(FileModuleResolver::new_with_path(
            resolution_root.join("src"),
        ));
        if self.max_operations > 0 {
            engine.set_max_operations(self.max_operations);
        }
        engine
    }
}

impl InterpretationEngine for RhaiEngine {
    fn session(&self, resolution_root: &Path) -> PluginResult<Box<dyn EngineSession>> {
        debug!(root = %resolution_root.display(), "opening rhai session");
        Ok(Box::new(RhaiSession {
            engine: Arc::new(self.build(resolution_root)),
            scope: Scope::new(),
            ast: None,
            entry: None,
        }))
    }
}

/// Call options for invoking a script function after the entry file ran.
///
/// The top-level statements already executed in `evaluate_path` and must
/// not run again.
fn without_top_level() -> CallFnOptions<'static> {
    CallFnOptions::new().eval_ast(false).rewind_scope(true)
}

struct RhaiSession {
    engine: Arc<Engine>,
    scope: Scope<'static>,
    ast: Option<Arc<AST>>,
    entry: Option<PathBuf>,
}

impl RhaiSession {
    fn eval_error(&self, path: Option<&Path>, message: impl fmt::Display) -> PluginError {
        PluginError::Evaluation {
            plugin: path
                .or(self.entry.as_deref())
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            message: message.to_string(),
        }
    }
}

impl EngineSession for RhaiSession {
    fn evaluate_path(&mut self, path: &Path) -> PluginResult<PluginValue> {
        let ast = self
            .engine
            .compile_file(path.to_path_buf())
            .map_err(|e| self.eval_error(Some(path), e))?;
        let value = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut self.scope, &ast)
            .map_err(|e| self.eval_error(Some(path), e))?;

        let ast = Arc::new(ast);
        self.ast = Some(Arc::clone(&ast));
        self.entry = Some(path.to_path_buf());
        Ok(RhaiObject::wrap(Arc::clone(&self.engine), ast, value))
    }

    fn evaluate_symbol(&mut self, name: &str) -> PluginResult<PluginValue> {
        let Some(ast) = self.ast.clone() else {
            return Err(self.eval_error(None, "no source evaluated before symbol lookup"));
        };

        if let Some(value) = self.scope.get_value::<Dynamic>(name) {
            return Ok(RhaiObject::wrap(Arc::clone(&self.engine), ast, value));
        }

        let is_zero_arg_fn = ast
            .iter_functions()
            .any(|f| f.name == name && f.params.is_empty());
        if !is_zero_arg_fn {
            return Err(self.eval_error(None, format!("symbol `{name}` is not defined")));
        }

        let value = self
            .engine
            .call_fn_with_options::<Dynamic>(
                without_top_level(),
                &mut self.scope,
                &ast,
                name,
                (),
            )
            .map_err(|e| self.eval_error(None, e))?;
        Ok(RhaiObject::wrap(Arc::clone(&self.engine), ast, value))
    }
}

/// A rhai value exposed as a plugin object.
struct RhaiObject {
    engine: Arc<Engine>,
    ast: Arc<AST>,
    type_name: String,
    members: Members,
}

enum Members {
    /// Function pointers held by an object map.
    Map(BTreeMap<String, FnPtr>),
    /// Public functions of the evaluated script.
    Script,
    None,
}

impl RhaiObject {
    fn wrap(engine: Arc<Engine>, ast: Arc<AST>, value: Dynamic) -> PluginValue {
        let type_name = value.type_name().to_owned();
        let members = if value.is_unit() {
            Members::Script
        } else if let Some(map) = value.try_cast::<::rhai::Map>() {
            Members::Map(
                map.into_iter()
                    .filter_map(|(key, v)| v.try_cast::<FnPtr>().map(|f| (key.to_string(), f)))
                    .collect(),
            )
        } else {
            Members::None
        };

        Arc::new(Self {
            engine,
            ast,
            type_name,
            members,
        })
    }

    /// Declared parameter count of a script function, if it is one.
    fn script_arity(&self, name: &str) -> Option<usize> {
        self.ast
            .iter_functions()
            .find(|f| f.name == name)
            .map(|f| f.params.len())
    }

    fn invocation_error(&self, method: &str, message: impl fmt::Display) -> PluginError {
        PluginError::Invocation {
            type_name: self.type_name.clone(),
            method: method.to_owned(),
            message: message.to_string(),
        }
    }
}

impl fmt::Debug for RhaiObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiObject")
            .field("type_name", &self.type_name)
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

impl PluginObject for RhaiObject {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn methods(&self) -> Vec<Method> {
        match &self.members {
            Members::Map(entries) => entries
                .iter()
                .map(|(name, ptr)| Method {
                    name: name.clone(),
                    arity: self
                        .script_arity(ptr.fn_name())
                        .map(|n| n.saturating_sub(ptr.curry().len())),
                })
                .collect(),
            Members::Script => self
                .ast
                .iter_functions()
                .filter(|f| matches!(f.access, FnAccess::Public) && !f.name.starts_with("anon$"))
                .map(|f| Method::new(f.name, f.params.len()))
                .collect(),
            Members::None => Vec::new(),
        }
    }

    fn invoke(
        &self,
        method: &str,
        args: Vec<serde_json::Value>,
    ) -> PluginResult<serde_json::Value> {
        let args = args
            .iter()
            .map(::rhai::serde::to_dynamic)
            .collect::<Result<Vec<Dynamic>, _>>()
            .map_err(|e| self.invocation_error(method, e))?;

        let result = match &self.members {
            Members::Map(entries) => {
                let ptr = entries
                    .get(method)
                    .ok_or_else(|| self.invocation_error(method, "no such method"))?;
                ptr.call::<Dynamic>(&self.engine, &self.ast, args)
            },
            Members::Script => {
                if self.script_arity(method).is_none() {
                    return Err(self.invocation_error(method, "no such method"));
                }
                let mut scope = Scope::new();
                self.engine.call_fn_with_options::<Dynamic>(
                    without_top_level(),
                    &mut scope,
                    &self.ast,
                    method,
                    args,
                )
            },
            Members::None => return Err(self.invocation_error(method, "value has no methods")),
        }
        .map_err(|e| self.invocation_error(method, e))?;

        ::rhai::serde::from_dynamic::<serde_json::Value>(&result)
            .map_err(|e| self.invocation_error(method, e))
    }
}
