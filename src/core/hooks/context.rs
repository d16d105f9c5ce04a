//! Named, reentrant activation scopes for hook listeners.
//!
//! Entering a context pushes its name on a stack. Listeners registered while it
//! is the innermost context are tagged with its current activation. When the
//! last nested `exit` brings the depth back to zero the activation ends and its
//! listeners drop out of dispatch; the next `enter` starts a new activation.

use std::collections::HashMap;

use crate::error::{Error, Result};

use super::HookRegistry;

/// Context used for listeners contributed by discovered plugins.
pub const PLUGINS: &str = "plugins";

/// One activation of a named context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope {
    pub name: String,
    pub epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct Activation {
    depth: usize,
    epoch: u64,
}

#[derive(Debug, Default)]
pub struct ContextStack {
    stack: Vec<String>,
    active: HashMap<String, Activation>,
    next_epoch: u64,
}

impl ContextStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enter(&mut self, name: &str) -> Scope {
        self.stack.push(name.to_string());

        let next_epoch = &mut self.next_epoch;
        let activation = self.active.entry(name.to_string()).or_insert_with(|| {
            *next_epoch += 1;
            Activation {
                depth: 0,
                epoch: *next_epoch,
            }
        });
        activation.depth += 1;

        Scope {
            name: name.to_string(),
            epoch: activation.epoch,
        }
    }

    /// Pop `name` off the stack. Returns the finished activation when this was
    /// the outermost exit for that name.
    pub fn exit(&mut self, name: &str) -> Result<Option<Scope>> {
        match self.stack.last() {
            Some(top) if top == name => {}
            other => {
                return Err(Error::context_stack_corruption(name, other.cloned()));
            }
        }
        self.stack.pop();

        let Some(activation) = self.active.get_mut(name) else {
            return Err(Error::context_stack_corruption(name, None));
        };
        activation.depth -= 1;
        if activation.depth > 0 {
            return Ok(None);
        }

        let epoch = activation.epoch;
        self.active.remove(name);
        Ok(Some(Scope {
            name: name.to_string(),
            epoch,
        }))
    }

    /// The innermost entered context.
    pub fn current(&self) -> Option<Scope> {
        let name = self.stack.last()?;
        self.scope_of(name)
    }

    pub fn scope_of(&self, name: &str) -> Option<Scope> {
        self.active.get(name).map(|a| Scope {
            name: name.to_string(),
            epoch: a.epoch,
        })
    }

    pub fn is_active(&self, scope: &Scope) -> bool {
        self.active
            .get(&scope.name)
            .is_some_and(|a| a.epoch == scope.epoch)
    }

    pub fn depth(&self, name: &str) -> usize {
        self.active.get(name).map(|a| a.depth).unwrap_or(0)
    }

    /// Entered names, outermost first.
    pub fn names(&self) -> Vec<String> {
        self.stack.clone()
    }
}

/// Exits its context when dropped, including during unwinding.
///
/// Prefer [`ContextGuard::close`] where the caller can report a corrupted stack;
/// a failed exit during drop is only logged.
#[must_use = "the context exits as soon as the guard is dropped"]
pub struct ContextGuard<'h> {
    hooks: &'h HookRegistry,
    name: String,
    open: bool,
}

impl<'h> ContextGuard<'h> {
    pub(super) fn new(hooks: &'h HookRegistry, name: &str) -> Self {
        Self {
            hooks,
            name: name.to_string(),
            open: true,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn close(mut self) -> Result<()> {
        self.open = false;
        self.hooks.exit(&self.name)
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        if !self.open {
            return;
        }
        if let Err(err) = self.hooks.exit(&self.name) {
            tracing::warn!(context = %self.name, error = %err, "context guard failed to exit");
        }
    }
}
