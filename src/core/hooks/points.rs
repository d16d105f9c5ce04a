//! Typed hook point handles.
//!
//! A hook point is identified by a stable name, but callers never pass bare
//! strings to the registry: they pass an [`Action`] or [`Filter`] handle whose
//! type parameters fix the payload. The registry records the signature of the
//! first declaration and rejects later registrations that disagree.

use serde::Serialize;
use std::any::TypeId;
use std::marker::PhantomData;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookKind {
    /// Fire-and-forget notification; listener return values are discarded.
    Notify,
    /// Value pipeline; each listener receives the previous listener's output.
    Transform,
}

impl HookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookKind::Notify => "notify",
            HookKind::Transform => "transform",
        }
    }
}

/// Listener priorities. Lower runs first.
pub mod priority {
    pub const HIGH: i32 = 5;
    pub const DEFAULT: i32 = 10;
    pub const LOW: i32 = 50;
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Signature {
    pub kind: HookKind,
    pub payload: TypeId,
    pub payload_name: &'static str,
}

impl Signature {
    pub fn matches(&self, other: &Signature) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }

    pub fn describe(&self) -> String {
        format!("{} <{}>", self.kind.as_str(), self.payload_name)
    }
}

/// Handle for a NOTIFY point whose listeners receive `&A`.
pub struct Action<A> {
    name: &'static str,
    _payload: PhantomData<fn(&A)>,
}

impl<A: 'static> Action<A> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn signature(&self) -> Signature {
        Signature {
            kind: HookKind::Notify,
            payload: TypeId::of::<A>(),
            payload_name: std::any::type_name::<A>(),
        }
    }
}

/// Handle for a TRANSFORM point folding a `V`, with extra context `&A`.
pub struct Filter<V, A = ()> {
    name: &'static str,
    _payload: PhantomData<fn(V, &A) -> V>,
}

impl<V: 'static, A: 'static> Filter<V, A> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _payload: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn signature(&self) -> Signature {
        Signature {
            kind: HookKind::Transform,
            payload: TypeId::of::<(V, A)>(),
            payload_name: std::any::type_name::<(V, A)>(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_different_kind_does_not_match() {
        let notify = Action::<String>::new("x").signature();
        let transform = Filter::<String, ()>::new("x").signature();
        assert!(!notify.matches(&transform));
    }

    #[test]
    fn same_kind_different_payload_does_not_match() {
        let a = Action::<String>::new("x").signature();
        let b = Action::<u32>::new("x").signature();
        assert!(!a.matches(&b));
        assert!(a.matches(&Action::<String>::new("y").signature()));
    }
}
