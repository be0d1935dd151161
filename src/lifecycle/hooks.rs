//! Post-start hooks.
//!
//! # Responsibilities
//! - Register named hooks that run once the server begins serving
//! - Honour a set of disabled hook names
//! - Hand each hook a shutdown receiver for its background work
//!
//! # Design Decisions
//! - Names are unique; a duplicate registration is an error
//! - Hooks run in name order, each exactly once
//! - A failing hook aborts the run; background tasks already spawned keep running

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use thiserror::Error;
use tokio::sync::broadcast;

use crate::lifecycle::Shutdown;

/// Passed to every hook.
pub struct PostStartHookContext {
    /// Fires when the process begins shutting down.
    pub shutdown: broadcast::Receiver<()>,
}

#[derive(Debug, Error)]
pub enum HookError {
    #[error("post-start hook {0:?} is already registered")]
    Duplicate(String),

    #[error("post-start hook {name:?} failed: {reason}")]
    Failed { name: String, reason: String },
}

type HookFn = Box<dyn FnOnce(PostStartHookContext) -> Result<(), HookError> + Send>;

/// Named hooks to run after the server starts serving.
#[derive(Default)]
pub struct PostStartHooks {
    hooks: BTreeMap<String, HookFn>,
    disabled: BTreeSet<String>,
}

impl fmt::Debug for PostStartHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostStartHooks")
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("disabled", &self.disabled)
            .finish()
    }
}

impl PostStartHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&mut self, name: impl Into<String>, hook: F) -> Result<(), HookError>
    where
        F: FnOnce(PostStartHookContext) -> Result<(), HookError> + Send + 'static,
    {
        let name = name.into();
        if self.hooks.contains_key(&name) {
            return Err(HookError::Duplicate(name));
        }
        self.hooks.insert(name, Box::new(hook));
        Ok(())
    }

    /// Prevent a hook with this name from running.
    pub fn disable(&mut self, name: impl Into<String>) {
        self.disabled.insert(name.into());
    }

    pub fn disabled(&self) -> &BTreeSet<String> {
        &self.disabled
    }

    pub fn names(&self) -> Vec<String> {
        self.hooks.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every enabled hook. Returns the names that ran.
    pub fn run_all(self, shutdown: &Shutdown) -> Result<Vec<String>, HookError> {
        let mut ran = Vec::new();
        for (name, hook) in self.hooks {
            if self.disabled.contains(&name) {
                tracing::info!(hook = %name, "Skipping disabled post-start hook");
                continue;
            }
            tracing::debug!(hook = %name, "Running post-start hook");
            hook(PostStartHookContext {
                shutdown: shutdown.subscribe(),
            })?;
            ran.push(name);
        }
        Ok(ran)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn runs_enabled_hooks_in_name_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut hooks = PostStartHooks::new();
        for name in ["b-second", "a-first", "c-disabled"] {
            let seen = seen.clone();
            hooks
                .add(name, move |_| {
                    seen.lock().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }
        hooks.disable("c-disabled");

        let ran = hooks.run_all(&Shutdown::new()).unwrap();
        assert_eq!(ran, vec!["a-first", "b-second"]);
        assert_eq!(*seen.lock().unwrap(), vec!["a-first", "b-second"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let mut hooks = PostStartHooks::new();
        hooks.add("sync", |_| Ok(())).unwrap();
        assert!(matches!(hooks.add("sync", |_| Ok(())), Err(HookError::Duplicate(_))));
    }

    #[test]
    fn failing_hook_stops_the_run() {
        let mut hooks = PostStartHooks::new();
        hooks
            .add("a", |_| {
                Err(HookError::Failed {
                    name: "a".into(),
                    reason: "boom".into(),
                })
            })
            .unwrap();
        hooks.add("b", |_| Ok(())).unwrap();

        let err = hooks.run_all(&Shutdown::new()).unwrap_err();
        assert_eq!(err.to_string(), "post-start hook \"a\" failed: boom");
    }
}
