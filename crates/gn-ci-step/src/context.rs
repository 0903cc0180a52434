//! Scoped execution context
//!
//! A `Context` is a partial update applied for the duration of a block via
//! `Steps::with_context`. Unset fields inherit from the enclosing context;
//! env entries are merged over the enclosing env.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::failure::FailureKind;

/// Context fields in effect for a step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Effective {
    pub cwd: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub infra: bool,
    pub attribution: FailureKind,
}

impl Effective {
    /// The failure kind a step in this context is attributed to.
    /// Infra contexts always win.
    pub fn failure_kind(&self) -> FailureKind {
        if self.infra {
            FailureKind::Infra
        } else {
            self.attribution
        }
    }

    pub fn apply(&self, update: &Context) -> Self {
        let mut next = self.clone();
        if let Some(ref cwd) = update.cwd {
            next.cwd = Some(cwd.clone());
        }
        for (key, value) in &update.env {
            next.env.insert(key.clone(), value.clone());
        }
        if let Some(infra) = update.infra {
            next.infra = infra;
        }
        if let Some(kind) = update.attribution {
            next.attribution = kind;
        }
        next
    }
}

/// Partial context update
#[derive(Debug, Clone, Default)]
pub struct Context {
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    infra: Option<bool>,
    attribution: Option<FailureKind>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Mark steps as infrastructure steps
    pub fn infra(mut self, infra: bool) -> Self {
        self.infra = Some(infra);
        self
    }

    /// Attribute non-infra failures to `kind`
    pub fn attribute_to(mut self, kind: FailureKind) -> Self {
        self.attribution = Some(kind);
        self
    }
}
