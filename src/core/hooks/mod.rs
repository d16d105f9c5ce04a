//! Hook kernel: named extension points that plugins attach behavior to.
//!
//! Two kinds of points exist. [`Action`] points are notifications: every
//! active listener runs, and failures are collected into one aggregate error
//! after all of them had their turn. [`Filter`] points fold a value through
//! their listeners in order.
//!
//! Listener order is priority ascending, then registration order. Activation
//! is decided at dispatch time from the [`ContextStack`]: a listener owned by a
//! context that is no longer entered never runs again.

pub mod catalog;
pub mod context;
pub mod points;

use serde::Serialize;
use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use crate::error::{Error, ListenerFailure, Result};

pub use context::{ContextGuard, ContextStack, Scope};
pub use points::{priority, Action, Filter, HookKind};

use points::Signature;

type ActionFn<A> = dyn Fn(&HookRegistry, &A) -> Result<()>;
type FilterFn<V, A> = dyn Fn(&HookRegistry, V, &A) -> Result<V>;

struct ActionListener<A>(Box<ActionFn<A>>);
struct FilterListener<V, A>(Box<FilterFn<V, A>>);

struct ListenerEntry {
    priority: i32,
    owner: Option<Scope>,
    callback: Rc<dyn Any>,
}

struct PointEntry {
    signature: Signature,
    listeners: Vec<ListenerEntry>,
}

/// Which context a new listener belongs to.
#[derive(Debug, Clone, Copy)]
enum Owner<'a> {
    Innermost,
    Named(&'a str),
}

#[derive(Debug, Clone, Serialize)]
pub struct PointSummary {
    pub name: String,
    pub kind: HookKind,
    pub payload: String,
    pub active_listeners: usize,
    pub registered_listeners: usize,
}

/// Process-wide hook state, constructed once at startup and passed around.
///
/// Single-threaded by construction: interior mutability is `RefCell`, so the
/// registry is neither `Send` nor `Sync`.
pub struct HookRegistry {
    points: RefCell<BTreeMap<String, PointEntry>>,
    contexts: RefCell<ContextStack>,
    implicit_filters: bool,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            points: RefCell::new(BTreeMap::new()),
            contexts: RefCell::new(ContextStack::new()),
            implicit_filters: false,
        }
    }

    /// Treat `apply` on an undeclared filter as the identity instead of an error.
    pub fn implicit_filters(mut self, enabled: bool) -> Self {
        self.implicit_filters = enabled;
        self
    }

    // === Declaration ===

    pub fn declare_action<A: 'static>(&self, point: &Action<A>) -> Result<()> {
        self.declare(point.name(), point.signature())
    }

    pub fn declare_filter<V: 'static, A: 'static>(&self, point: &Filter<V, A>) -> Result<()> {
        self.declare(point.name(), point.signature())
    }

    pub fn is_declared(&self, name: &str) -> bool {
        self.points.borrow().contains_key(name)
    }

    fn declare(&self, name: &str, signature: Signature) -> Result<()> {
        let mut points = self.points.borrow_mut();
        if let Some(existing) = points.get(name) {
            return check_signature(name, &existing.signature, &signature);
        }
        tracing::debug!(point = name, kind = signature.kind.as_str(), "declared hook point");
        points.insert(
            name.to_string(),
            PointEntry {
                signature,
                listeners: Vec::new(),
            },
        );
        Ok(())
    }

    // === Registration ===

    pub fn add_action<A, F>(&self, point: &Action<A>, priority: i32, listener: F) -> Result<()>
    where
        A: 'static,
        F: Fn(&HookRegistry, &A) -> Result<()> + 'static,
    {
        self.register(
            point.name(),
            point.signature(),
            priority,
            Owner::Innermost,
            Rc::new(ActionListener::<A>(Box::new(listener))),
        )
    }

    /// Register a listener owned by `context`, which must currently be entered.
    pub fn add_action_in<A, F>(
        &self,
        point: &Action<A>,
        priority: i32,
        context: &str,
        listener: F,
    ) -> Result<()>
    where
        A: 'static,
        F: Fn(&HookRegistry, &A) -> Result<()> + 'static,
    {
        self.register(
            point.name(),
            point.signature(),
            priority,
            Owner::Named(context),
            Rc::new(ActionListener::<A>(Box::new(listener))),
        )
    }

    pub fn add_filter<V, A, F>(&self, point: &Filter<V, A>, priority: i32, listener: F) -> Result<()>
    where
        V: 'static,
        A: 'static,
        F: Fn(&HookRegistry, V, &A) -> Result<V> + 'static,
    {
        self.register(
            point.name(),
            point.signature(),
            priority,
            Owner::Innermost,
            Rc::new(FilterListener::<V, A>(Box::new(listener))),
        )
    }

    pub fn add_filter_in<V, A, F>(
        &self,
        point: &Filter<V, A>,
        priority: i32,
        context: &str,
        listener: F,
    ) -> Result<()>
    where
        V: 'static,
        A: 'static,
        F: Fn(&HookRegistry, V, &A) -> Result<V> + 'static,
    {
        self.register(
            point.name(),
            point.signature(),
            priority,
            Owner::Named(context),
            Rc::new(FilterListener::<V, A>(Box::new(listener))),
        )
    }

    fn register(
        &self,
        name: &str,
        signature: Signature,
        priority: i32,
        owner: Owner<'_>,
        callback: Rc<dyn Any>,
    ) -> Result<()> {
        let owner = {
            let contexts = self.contexts.borrow();
            match owner {
                Owner::Innermost => contexts.current(),
                Owner::Named(context) => Some(
                    contexts
                        .scope_of(context)
                        .ok_or_else(|| Error::context_not_active(context))?,
                ),
            }
        };

        self.declare(name, signature)?;

        let mut points = self.points.borrow_mut();
        let entry = points
            .get_mut(name)
            .ok_or_else(|| Error::hook_unknown_point(name))?;

        // Stable: a new listener goes after every listener of equal priority.
        let position = entry
            .listeners
            .partition_point(|existing| existing.priority <= priority);

        tracing::debug!(
            point = name,
            priority,
            context = owner.as_ref().map(|s| s.name.as_str()).unwrap_or("-"),
            "registered hook listener"
        );

        entry.listeners.insert(
            position,
            ListenerEntry {
                priority,
                owner,
                callback,
            },
        );
        Ok(())
    }

    // === Dispatch ===

    /// Run every active listener of `point`. Later listeners still run when an
    /// earlier one fails; all failures come back as one aggregate error.
    pub fn notify<A: 'static>(&self, point: &Action<A>, args: &A) -> Result<()> {
        let signature = point.signature();
        if !self.is_declared(point.name()) {
            return self.declare(point.name(), signature);
        }

        let listeners = self.active_listeners(point.name(), &signature)?;
        tracing::debug!(point = point.name(), listeners = listeners.len(), "notify");

        let mut failures = Vec::new();
        for (index, (priority, callback)) in listeners.into_iter().enumerate() {
            let listener = downcast::<ActionListener<A>>(point.name(), &signature, callback)?;
            if let Err(err) = (listener.0)(self, args) {
                tracing::debug!(point = point.name(), index, error = %err, "listener failed");
                failures.push(ListenerFailure {
                    index,
                    priority,
                    code: err.code.as_str().to_string(),
                    message: err.message.clone(),
                    details: err.details.clone(),
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::hook_listener_failed(point.name(), failures))
        }
    }

    /// Fold `value` through every active listener of `point`.
    pub fn apply<V: 'static, A: 'static>(&self, point: &Filter<V, A>, value: V, args: &A) -> Result<V> {
        let signature = point.signature();
        if !self.is_declared(point.name()) {
            if self.implicit_filters {
                self.declare(point.name(), signature)?;
                return Ok(value);
            }
            return Err(Error::hook_unknown_point(point.name()));
        }

        let listeners = self.active_listeners(point.name(), &signature)?;
        tracing::debug!(point = point.name(), listeners = listeners.len(), "apply");

        let mut value = value;
        for (_, callback) in listeners {
            let listener = downcast::<FilterListener<V, A>>(point.name(), &signature, callback)?;
            value = (listener.0)(self, value, args)?;
        }
        Ok(value)
    }

    /// Snapshot of the listeners that may run right now, in dispatch order.
    /// No borrow is held while listeners execute, so they may register more.
    fn active_listeners(
        &self,
        name: &str,
        signature: &Signature,
    ) -> Result<Vec<(i32, Rc<dyn Any>)>> {
        let points = self.points.borrow();
        let contexts = self.contexts.borrow();
        let entry = points
            .get(name)
            .ok_or_else(|| Error::hook_unknown_point(name))?;
        check_signature(name, &entry.signature, signature)?;

        Ok(entry
            .listeners
            .iter()
            .filter(|l| l.owner.as_ref().map_or(true, |scope| contexts.is_active(scope)))
            .map(|l| (l.priority, Rc::clone(&l.callback)))
            .collect())
    }

    // === Contexts ===

    pub fn enter(&self, name: &str) -> ContextGuard<'_> {
        let scope = self.contexts.borrow_mut().enter(name);
        tracing::debug!(context = name, epoch = scope.epoch, "entered context");
        ContextGuard::new(self, name)
    }

    /// Leave `name`, which must be the innermost context. Once its depth
    /// reaches zero, the listeners it owned are dropped.
    pub fn exit(&self, name: &str) -> Result<()> {
        let finished = self.contexts.borrow_mut().exit(name)?;
        let Some(scope) = finished else {
            tracing::debug!(context = name, "left nested context");
            return Ok(());
        };

        let mut removed = 0;
        for entry in self.points.borrow_mut().values_mut() {
            let before = entry.listeners.len();
            entry
                .listeners
                .retain(|l| l.owner.as_ref() != Some(&scope));
            removed += before - entry.listeners.len();
        }
        tracing::debug!(context = name, epoch = scope.epoch, removed, "exited context");
        Ok(())
    }

    /// Run `f` with `name` entered, then exit it on every path.
    pub fn with_context<T>(&self, name: &str, f: impl FnOnce(&HookRegistry) -> Result<T>) -> Result<T> {
        let guard = self.enter(name);
        let result = f(self);
        let closed = guard.close();
        let value = result?;
        closed?;
        Ok(value)
    }

    pub fn active_contexts(&self) -> Vec<String> {
        self.contexts.borrow().names()
    }

    pub fn context_depth(&self, name: &str) -> usize {
        self.contexts.borrow().depth(name)
    }

    // === Introspection ===

    pub fn points(&self) -> Vec<PointSummary> {
        let points = self.points.borrow();
        let contexts = self.contexts.borrow();
        points
            .iter()
            .map(|(name, entry)| PointSummary {
                name: name.clone(),
                kind: entry.signature.kind,
                payload: entry.signature.payload_name.to_string(),
                active_listeners: entry
                    .listeners
                    .iter()
                    .filter(|l| l.owner.as_ref().map_or(true, |s| contexts.is_active(s)))
                    .count(),
                registered_listeners: entry.listeners.len(),
            })
            .collect()
    }
}

fn check_signature(name: &str, declared: &Signature, requested: &Signature) -> Result<()> {
    if declared.matches(requested) {
        Ok(())
    } else {
        Err(Error::hook_unknown_kind(
            name,
            declared.describe(),
            requested.describe(),
        ))
    }
}

fn downcast<T: 'static>(name: &str, signature: &Signature, callback: Rc<dyn Any>) -> Result<Rc<T>> {
    callback.downcast::<T>().map_err(|_| {
        Error::hook_unknown_kind(name, "a different listener type", signature.describe())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const PING: Action<u32> = Action::new("test:ping");
    const WORDS: Filter<Vec<String>, String> = Filter::new("test:words");

    fn recorder() -> Rc<RefCell<Vec<String>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn notify_runs_in_priority_then_registration_order() {
        let hooks = HookRegistry::new();
        let log = recorder();

        for (label, prio) in [("a", 10), ("b", 5), ("c", 10), ("d", 50), ("e", 5)] {
            let log = Rc::clone(&log);
            hooks
                .add_action(&PING, prio, move |_, _| {
                    log.borrow_mut().push(label.to_string());
                    Ok(())
                })
                .unwrap();
        }

        hooks.notify(&PING, &1).unwrap();
        hooks.notify(&PING, &2).unwrap();
        assert_eq!(
            *log.borrow(),
            vec!["b", "e", "a", "c", "d", "b", "e", "a", "c", "d"]
        );
    }

    #[test]
    fn notify_collects_failures_and_keeps_going() {
        let hooks = HookRegistry::new();
        let log = recorder();

        hooks
            .add_action(&PING, priority::DEFAULT, |_, _| {
                Err(Error::internal_unexpected("first"))
            })
            .unwrap();
        {
            let log = Rc::clone(&log);
            hooks
                .add_action(&PING, priority::DEFAULT, move |_, n| {
                    log.borrow_mut().push(format!("ran {}", n));
                    Ok(())
                })
                .unwrap();
        }
        hooks
            .add_action(&PING, priority::LOW, |_, _| {
                Err(Error::internal_unexpected("third"))
            })
            .unwrap();

        let err = hooks.notify(&PING, &7).unwrap_err();
        assert_eq!(err.code.as_str(), "hook.listener_failed");
        assert_eq!(*log.borrow(), vec!["ran 7"]);
        let failures = err.details["failures"].as_array().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0]["index"], 0);
        assert_eq!(failures[1]["index"], 2);
    }

    #[test]
    fn notify_on_undeclared_point_is_a_noop() {
        let hooks = HookRegistry::new();
        hooks.notify(&PING, &1).unwrap();
        assert!(hooks.is_declared("test:ping"));
    }

    #[test]
    fn apply_folds_in_order_with_extra_args() {
        let hooks = HookRegistry::new();
        hooks
            .add_filter(&WORDS, priority::DEFAULT, |_, mut words, suffix| {
                words.push(format!("second{}", suffix));
                Ok(words)
            })
            .unwrap();
        hooks
            .add_filter(&WORDS, priority::HIGH, |_, mut words, suffix| {
                words.push(format!("first{}", suffix));
                Ok(words)
            })
            .unwrap();

        let out = hooks
            .apply(&WORDS, vec!["seed".to_string()], &"!".to_string())
            .unwrap();
        assert_eq!(out, vec!["seed", "first!", "second!"]);
    }

    #[test]
    fn apply_with_no_listeners_is_identity() {
        let hooks = HookRegistry::new();
        hooks.declare_filter(&WORDS).unwrap();
        let input = vec!["x".to_string(), "y".to_string()];
        assert_eq!(hooks.apply(&WORDS, input.clone(), &String::new()).unwrap(), input);
    }

    #[test]
    fn apply_on_undeclared_point_fails_unless_implicit() {
        let strict = HookRegistry::new();
        let err = strict.apply(&WORDS, Vec::new(), &String::new()).unwrap_err();
        assert_eq!(err.code.as_str(), "hook.unknown_point");

        let lenient = HookRegistry::new().implicit_filters(true);
        assert!(lenient.apply(&WORDS, Vec::new(), &String::new()).unwrap().is_empty());
    }

    #[test]
    fn apply_stops_at_first_failing_listener() {
        let hooks = HookRegistry::new();
        hooks
            .add_filter(&WORDS, priority::HIGH, |_, _, _| {
                Err(Error::internal_unexpected("boom"))
            })
            .unwrap();
        hooks
            .add_filter(&WORDS, priority::LOW, |_, _, _| panic!("must not run"))
            .unwrap();
        assert!(hooks.apply(&WORDS, Vec::new(), &String::new()).is_err());
    }

    #[test]
    fn mismatched_kind_is_rejected_at_registration() {
        let hooks = HookRegistry::new();
        hooks.declare_action(&PING).unwrap();

        let as_filter: Filter<u32, ()> = Filter::new("test:ping");
        let err = hooks
            .add_filter(&as_filter, priority::DEFAULT, |_, v, _| Ok(v))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "hook.unknown_kind");

        let other_payload: Action<String> = Action::new("test:ping");
        let err = hooks
            .add_action(&other_payload, priority::DEFAULT, |_, _| Ok(()))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "hook.unknown_kind");
    }

    #[test]
    fn listeners_die_with_their_context() {
        let hooks = HookRegistry::new();
        let log = recorder();

        let guard = hooks.enter("scoped");
        {
            let log = Rc::clone(&log);
            hooks
                .add_action(&PING, priority::DEFAULT, move |_, _| {
                    log.borrow_mut().push("scoped".to_string());
                    Ok(())
                })
                .unwrap();
        }
        hooks.notify(&PING, &0).unwrap();
        guard.close().unwrap();
        hooks.notify(&PING, &0).unwrap();

        // Re-entering does not bring the old listener back.
        let _again = hooks.enter("scoped");
        hooks.notify(&PING, &0).unwrap();
        assert_eq!(*log.borrow(), vec!["scoped"]);
    }

    #[test]
    fn reentrant_context_deactivates_on_outermost_exit() {
        let hooks = HookRegistry::new();
        let log = recorder();

        hooks.enter("x").close().ok();
        let outer = hooks.enter("x");
        let inner = hooks.enter("x");
        {
            let log = Rc::clone(&log);
            hooks
                .add_action(&PING, priority::DEFAULT, move |_, _| {
                    log.borrow_mut().push("hit".to_string());
                    Ok(())
                })
                .unwrap();
        }
        inner.close().unwrap();
        hooks.notify(&PING, &0).unwrap();
        assert_eq!(log.borrow().len(), 1);

        outer.close().unwrap();
        hooks.notify(&PING, &0).unwrap();
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn explicit_owner_must_be_entered() {
        let hooks = HookRegistry::new();
        let err = hooks
            .add_action_in(&PING, priority::DEFAULT, "missing", |_, _| Ok(()))
            .unwrap_err();
        assert_eq!(err.code.as_str(), "hook.context_stack_corruption");

        let _outer = hooks.enter("outer");
        let inner = hooks.enter("inner");
        hooks
            .add_action_in(&PING, priority::DEFAULT, "outer", |_, _| Ok(()))
            .unwrap();
        inner.close().unwrap();
        let summary = hooks
            .points()
            .into_iter()
            .find(|p| p.name == "test:ping")
            .unwrap();
        assert_eq!(summary.active_listeners, 1);
    }

    #[test]
    fn listener_may_register_during_dispatch() {
        let hooks = HookRegistry::new();
        let log = recorder();
        {
            let log = Rc::clone(&log);
            hooks
                .add_action(&PING, priority::DEFAULT, move |hooks, _| {
                    let log = Rc::clone(&log);
                    hooks.add_action(&PING, priority::LOW, move |_, _| {
                        log.borrow_mut().push("late".to_string());
                        Ok(())
                    })
                })
                .unwrap();
        }
        hooks.notify(&PING, &0).unwrap();
        assert!(log.borrow().is_empty());
        hooks.notify(&PING, &0).unwrap();
        assert_eq!(*log.borrow(), vec!["late"]);
    }

    #[test]
    fn with_context_exits_on_error() {
        let hooks = HookRegistry::new();
        let result: Result<()> = hooks.with_context("job", |_| {
            Err(Error::internal_unexpected("inside"))
        });
        assert!(result.is_err());
        assert!(hooks.active_contexts().is_empty());
    }

    #[test]
    fn dropped_guard_exits() {
        let hooks = HookRegistry::new();
        {
            let _guard = hooks.enter("tmp");
            assert_eq!(hooks.context_depth("tmp"), 1);
        }
        assert_eq!(hooks.context_depth("tmp"), 0);
    }
}
