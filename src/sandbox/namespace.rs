// src/sandbox/namespace.rs — Persistent variable namespace for one sandbox

use std::collections::HashMap;

use rhai::{Dynamic, Scope, AST};

use super::value::Value;

/// Mutable name-to-value mapping that survives across executions.
///
/// Owned by exactly one sandbox. Host-provided bindings are pushed as
/// constants; everything a script binds is an ordinary variable. Script
/// functions (`fn name() {}`) persist alongside the variables.
#[derive(Debug)]
pub struct Namespace {
    scope: Scope<'static>,
    functions: AST,
}

impl Default for Namespace {
    fn default() -> Self {
        Self {
            scope: Scope::new(),
            functions: AST::empty(),
        }
    }
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a host value that scripts may read but not reassign.
    pub fn bind_constant(&mut self, name: &str, value: Dynamic) {
        self.scope.push_constant_dynamic(name.to_string(), value);
    }

    /// Bind or overwrite an ordinary variable.
    pub fn set(&mut self, name: &str, value: Value) {
        self.scope.set_or_push(name.to_string(), value.to_dynamic());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scope.contains(name)
    }

    /// Current value of `name`; the most recent binding wins when shadowed.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.scope
            .get_value::<Dynamic>(name)
            .map(|d| Value::from_dynamic(&d))
    }

    /// Rendered, non-empty text of `name`, if bound.
    pub fn text(&self, name: &str) -> Option<String> {
        self.get(name)
            .filter(|v| !v.is_empty())
            .map(|v| v.render())
    }

    /// Names of script-owned variables, in binding order, without duplicates.
    pub fn variable_names(&self) -> Vec<String> {
        // iter_raw yields the newest binding first
        let entries: Vec<_> = self.scope.iter_raw().collect();
        let mut names: Vec<String> = Vec::new();
        for (name, is_constant, _) in entries.into_iter().rev() {
            if !is_constant && !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        names
    }

    pub fn len(&self) -> usize {
        self.scope.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scope.is_empty()
    }

    /// Values of all script-owned variables (the newest binding wins).
    pub fn snapshot(&self) -> HashMap<String, Value> {
        let mut snapshot = HashMap::new();
        for (name, is_constant, value) in self.scope.iter_raw() {
            if !is_constant {
                snapshot
                    .entry(name.to_string())
                    .or_insert_with(|| Value::from_dynamic(value));
            }
        }
        snapshot
    }

    /// Variables that are new or hold a different value than in `before`.
    pub fn changed_since(&self, before: &HashMap<String, Value>) -> Vec<String> {
        let after = self.snapshot();
        self.variable_names()
            .into_iter()
            .filter(|name| before.get(name) != after.get(name))
            .collect()
    }

    /// Names of script-defined functions.
    pub fn function_names(&self) -> Vec<String> {
        self.functions
            .iter_functions()
            .map(|f| f.name.to_string())
            .collect()
    }

    pub(crate) fn scope(&self) -> &Scope<'static> {
        &self.scope
    }

    pub(crate) fn scope_mut(&mut self) -> &mut Scope<'static> {
        &mut self.scope
    }

    /// Prepend previously defined functions to a freshly compiled fragment.
    pub(crate) fn with_functions(&self, ast: &AST) -> AST {
        self.functions.merge(ast)
    }

    /// Keep the functions `ast` defines for later fragments.
    pub(crate) fn remember_functions(&mut self, ast: &AST) {
        self.functions = self.functions.merge(&ast.clone_functions_only());
    }
}
