//! Binds positional and keyword call arguments to named parameters.
//!
//! Rust has no runtime introspection of a closure's parameter names, so
//! [`FunctionSignature`] is built explicitly by the caller (see
//! [`FunctionSignature::new`]) rather than recovered from a function value.
//! Once built, it validates and assigns call arguments into
//! [`NamedArguments`], a type-erased, ordered bag of values that flows
//! through the splitter, partition generator, and worker task boundary
//! without the engine ever needing to know the user function's concrete
//! argument types.
//!
//! Values are stored as `Arc<dyn Any + Send + Sync>` rather than
//! `Box<dyn Any + Send + Sync>`, which is what lets [`NamedArguments::merge`]
//! and the backend's preload step share the non-partitioned arguments across
//! every worker at zero copy cost, instead of cloning the underlying values
//! on every partition.

use crate::error::EngineError;
use anyhow::{Result, bail};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// A type-erased, reference-counted argument value.
pub type Value = Arc<dyn Any + Send + Sync>;

/// The kinds of parameters a [`FunctionSignature`] can declare.
///
/// `PositionalOnly` exists only so construction can reject it -- the engine
/// does not support positional-only parameters and rejects them with a
/// descriptive error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    PositionalOnly,
    PositionalOrNamed,
    NamedOnly,
    VarPositional,
    VarNamed,
}

/// A single declared parameter of the target function.
#[derive(Clone, Debug)]
pub struct Parameter {
    pub name: String,
    pub kind: ParameterKind,
    pub has_default: bool,
}

impl Parameter {
    pub fn positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::PositionalOrNamed,
            has_default: false,
        }
    }

    pub fn named_only(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::NamedOnly,
            has_default: false,
        }
    }

    pub fn var_positional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::VarPositional,
            has_default: false,
        }
    }

    pub fn var_named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: ParameterKind::VarNamed,
            has_default: false,
        }
    }

    #[must_use]
    pub fn with_default(mut self) -> Self {
        self.has_default = true;
        self
    }
}

/// The ordered parameter list of a user function, plus variadic flags.
#[derive(Debug)]
pub struct FunctionSignature {
    params: Vec<Parameter>,
    has_var_positional: bool,
    has_var_named: bool,
}

impl FunctionSignature {
    /// Builds a signature from its declared parameters.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Configuration`] if any parameter is
    /// `PositionalOnly`, or if more than one `VarPositional`/`VarNamed`
    /// parameter is declared.
    pub fn new(params: Vec<Parameter>) -> Result<Self> {
        if params
            .iter()
            .any(|p| p.kind == ParameterKind::PositionalOnly)
        {
            bail!(EngineError::Configuration(
                "positional-only parameters are not supported".into()
            ));
        }

        let var_positional_count = params
            .iter()
            .filter(|p| p.kind == ParameterKind::VarPositional)
            .count();
        let var_named_count = params
            .iter()
            .filter(|p| p.kind == ParameterKind::VarNamed)
            .count();

        if var_positional_count > 1 || var_named_count > 1 {
            bail!(EngineError::Configuration(
                "a function signature may declare at most one variadic-positional and one \
                 variadic-named parameter"
                    .into()
            ));
        }

        Ok(Self {
            has_var_positional: var_positional_count == 1,
            has_var_named: var_named_count == 1,
            params,
        })
    }

    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    pub fn has_var_positional(&self) -> bool {
        self.has_var_positional
    }

    pub fn has_var_named(&self) -> bool {
        self.has_var_named
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    /// Assigns positional and keyword call values into a fresh
    /// [`NamedArguments`], filling defaults, rejecting positional/named
    /// collisions, and collecting variadics.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidInput`] for a missing required argument or too
    /// many positional arguments with no variadic-positional parameter;
    /// [`EngineError::Configuration`] for a name supplied both positionally
    /// and by keyword, or an unknown keyword argument with no
    /// variadic-named parameter.
    pub fn assign(
        self: &Arc<Self>,
        positional: Vec<Value>,
        mut named: HashMap<String, Value>,
    ) -> Result<NamedArguments> {
        let mut positional_iter = positional.into_iter();
        let mut out = NamedArguments::empty(Arc::clone(self));

        for param in self
            .params
            .iter()
            .filter(|p| matches!(p.kind, ParameterKind::PositionalOrNamed | ParameterKind::NamedOnly))
        {
            match param.kind {
                ParameterKind::PositionalOrNamed => {
                    if let Some(v) = positional_iter.next() {
                        if named.remove(&param.name).is_some() {
                            bail!(EngineError::Configuration(format!(
                                "`{}` was given both positionally and by name",
                                param.name
                            )));
                        }
                        out.values.insert(param.name.clone(), v);
                    } else if let Some(v) = named.remove(&param.name) {
                        out.values.insert(param.name.clone(), v);
                    } else if !param.has_default {
                        bail!(EngineError::InvalidInput(format!(
                            "missing required argument `{}`",
                            param.name
                        )));
                    }
                }
                ParameterKind::NamedOnly => {
                    if let Some(v) = named.remove(&param.name) {
                        out.values.insert(param.name.clone(), v);
                    } else if !param.has_default {
                        bail!(EngineError::InvalidInput(format!(
                            "missing required named-only argument `{}`",
                            param.name
                        )));
                    }
                }
                _ => unreachable!("filtered above"),
            }
        }

        let remaining_positional: Vec<Value> = positional_iter.collect();
        if !remaining_positional.is_empty() {
            if !self.has_var_positional {
                bail!(EngineError::InvalidInput(
                    "too many positional arguments".into()
                ));
            }
            out.var_positional = remaining_positional;
        }

        if !named.is_empty() {
            if !self.has_var_named {
                let mut unknown: Vec<_> = named.keys().cloned().collect();
                unknown.sort();
                bail!(EngineError::Configuration(format!(
                    "unknown keyword argument(s): {}",
                    unknown.join(", ")
                )));
            }
            out.var_named = named;
        }

        Ok(out)
    }
}

/// An ordered, type-erased bag of call arguments.
///
/// `NamedArguments` is the payload that flows between the splitter, the
/// partition generator, the backend's preload step, and the worker task. It
/// is cheap to clone (every stored value is an `Arc`) and cheap to merge (no
/// value is ever deep-copied).
#[derive(Clone)]
pub struct NamedArguments {
    signature: Arc<FunctionSignature>,
    values: HashMap<String, Value>,
    var_positional: Vec<Value>,
    var_named: HashMap<String, Value>,
}

impl NamedArguments {
    /// An empty bag bound to `signature`; used as the starting point by
    /// splitters and partition generators building partial argument sets.
    pub fn empty(signature: Arc<FunctionSignature>) -> Self {
        Self {
            signature,
            values: HashMap::new(),
            var_positional: Vec::new(),
            var_named: HashMap::new(),
        }
    }

    pub fn signature(&self) -> &Arc<FunctionSignature> {
        &self.signature
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.var_positional.is_empty() && self.var_named.is_empty()
    }

    /// Inserts a typed value under `name`.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] if `name` is not a declared parameter of
    /// the bound signature -- every name in the mapping must be a declared
    /// parameter unless it belongs to the variadic tail.
    pub fn insert<T: Send + Sync + 'static>(&mut self, name: impl Into<String>, value: T) -> Result<()> {
        self.insert_raw(name, Arc::new(value))
    }

    pub fn insert_raw(&mut self, name: impl Into<String>, value: Value) -> Result<()> {
        let name = name.into();
        if !self.signature.is_declared(&name) {
            bail!(EngineError::Configuration(format!(
                "`{name}` is not a declared parameter of the target function"
            )));
        }
        self.values.insert(name, value);
        Ok(())
    }

    pub fn remove_raw(&mut self, name: &str) -> Option<Value> {
        self.values.remove(name)
    }

    pub fn get<T: 'static>(&self, name: &str) -> Option<&T> {
        self.values.get(name)?.downcast_ref::<T>()
    }

    pub fn push_var_positional(&mut self, value: Value) {
        self.var_positional.push(value);
    }

    pub fn insert_var_named(&mut self, name: impl Into<String>, value: Value) {
        self.var_named.insert(name.into(), value);
    }

    pub fn var_positional(&self) -> &[Value] {
        &self.var_positional
    }

    /// Disjoint union of `self` and `other`. Used to recombine the
    /// non-partitioned arguments with a partition's payload before invoking
    /// the user function.
    ///
    /// # Errors
    ///
    /// [`EngineError::Configuration`] if the two bags were built from
    /// different signatures, share a named value, both carry variadic
    /// positional values, or share a variadic-named key.
    pub fn merge(mut self, other: NamedArguments) -> Result<NamedArguments> {
        if !Arc::ptr_eq(&self.signature, &other.signature) {
            bail!(EngineError::Configuration(
                "cannot merge arguments bound to different signatures".into()
            ));
        }

        for (name, value) in other.values {
            if self.values.insert(name.clone(), value).is_some() {
                bail!(EngineError::Configuration(format!(
                    "`{name}` is supplied by both sides of a merge"
                )));
            }
        }

        if !self.var_positional.is_empty() && !other.var_positional.is_empty() {
            bail!(EngineError::Configuration(
                "both sides of a merge supplied variadic positional values".into()
            ));
        }
        if self.var_positional.is_empty() {
            self.var_positional = other.var_positional;
        }

        for (name, value) in other.var_named {
            if self.var_named.insert(name.clone(), value).is_some() {
                bail!(EngineError::Configuration(format!(
                    "variadic keyword argument `{name}` is supplied by both sides of a merge"
                )));
            }
        }

        Ok(self)
    }

    /// Splits the bag back into positional and keyword call form, respecting
    /// the bound signature's declared parameter order.
    ///
    /// A `PositionalOrNamed` parameter that has no value here (an unset
    /// default) opens a gap: every value after it can no longer be emitted
    /// positionally, since a positional list has no way to skip a slot. Once
    /// a gap is seen, the rest of the present `PositionalOrNamed` values are
    /// emitted by name instead, so re-assigning the split output rebinds each
    /// value to the parameter it actually came from.
    pub fn as_call_args(&self) -> (Vec<Value>, HashMap<String, Value>) {
        let mut positional = Vec::new();
        let mut keyword = HashMap::new();
        let mut seen_gap = false;

        for param in &self.signature.params {
            match param.kind {
                ParameterKind::PositionalOrNamed => {
                    if let Some(v) = self.values.get(&param.name) {
                        if seen_gap {
                            keyword.insert(param.name.clone(), Arc::clone(v));
                        } else {
                            positional.push(Arc::clone(v));
                        }
                    } else {
                        seen_gap = true;
                    }
                }
                ParameterKind::NamedOnly => {
                    if let Some(v) = self.values.get(&param.name) {
                        keyword.insert(param.name.clone(), Arc::clone(v));
                    }
                }
                ParameterKind::PositionalOnly
                | ParameterKind::VarPositional
                | ParameterKind::VarNamed => {}
            }
        }

        positional.extend(self.var_positional.iter().cloned());
        keyword.extend(self.var_named.iter().map(|(k, v)| (k.clone(), Arc::clone(v))));

        (positional, keyword)
    }
}
