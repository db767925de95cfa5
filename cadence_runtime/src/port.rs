//! Ports: typed carriers of at most one value per logical instant.
//!
//! A port holds a `(tag, value)` pair and is *present* exactly when its
//! tag equals the current tag. Input and output ports propagate set
//! values to downstream receivers; caller and callee ports carry the
//! synchronous RPC mechanism instead and never enter the event queue.

use std::{any::TypeId, marker::PhantomData, sync::Arc};

use crate::{ComponentMeta, PortKey, ReactionKey, ReactorData, Tag};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortKind {
    Input,
    Output,
    Caller,
    Callee,
}

/// Input marker for typed port keys.
#[derive(Debug, Clone, Copy)]
pub struct Input;

/// Output marker for typed port keys.
#[derive(Debug, Clone, Copy)]
pub struct Output;

pub trait PortTag: Copy + Clone + std::fmt::Debug {
    const KIND: PortKind;
}

impl PortTag for Input {
    const KIND: PortKind = PortKind::Input;
}

impl PortTag for Output {
    const KIND: PortKind = PortKind::Output;
}

/// State specific to a callee port: its single bound procedure, the tail
/// of the caller dependency chain, and the in-flight return value.
#[derive(Debug, Default)]
pub(crate) struct CalleeState {
    pub(crate) procedure: Option<ReactionKey>,
    pub(crate) last_caller: Option<ReactionKey>,
    pub(crate) ret: Option<Arc<dyn ReactorData>>,
}

/// State specific to a caller port: the callee it invokes.
#[derive(Debug, Default)]
pub(crate) struct CallerState {
    pub(crate) remote: Option<PortKey>,
}

#[derive(Debug)]
pub(crate) enum PortRole {
    Input,
    Output,
    Callee(CalleeState),
    Caller(CallerState),
}

impl PortRole {
    pub(crate) fn kind(&self) -> PortKind {
        match self {
            PortRole::Input => PortKind::Input,
            PortRole::Output => PortKind::Output,
            PortRole::Callee(_) => PortKind::Callee,
            PortRole::Caller(_) => PortKind::Caller,
        }
    }
}

pub struct Port {
    pub(crate) meta: ComponentMeta,
    pub(crate) role: PortRole,
    /// The value set at `tag`, shared with any receivers it was
    /// propagated to.
    pub(crate) value: Option<Arc<dyn ReactorData>>,
    pub(crate) tag: Option<Tag>,
    /// Carried value type, checked on typed access and connection.
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
    /// Return value type for caller/callee ports.
    pub(crate) ret_type_id: Option<TypeId>,
    /// Downstream ports receiving propagated values.
    pub(crate) receivers: Vec<PortKey>,
    /// Reactions staged when this port becomes present.
    pub(crate) triggers: Vec<ReactionKey>,
    /// Upstream writer; at most one.
    pub(crate) source: Option<PortKey>,
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Port")
            .field("name", &self.meta.name)
            .field("kind", &self.role.kind())
            .field("type", &self.type_name)
            .field("tag", &self.tag)
            .finish()
    }
}

impl std::fmt::Display for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Port<{ty}>(\"{name}\")",
            ty = self.type_name,
            name = self.meta.name
        )
    }
}

impl Port {
    pub(crate) fn new<T: ReactorData>(meta: ComponentMeta, role: PortRole) -> Self {
        Self {
            meta,
            role,
            value: None,
            tag: None,
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            ret_type_id: None,
            receivers: Vec::new(),
            triggers: Vec::new(),
            source: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> PortKind {
        self.role.kind()
    }

    /// True iff the port was set at the given tag.
    pub fn is_present(&self, current: Tag) -> bool {
        self.tag == Some(current)
    }

    pub(crate) fn callee(&self) -> Option<&CalleeState> {
        match &self.role {
            PortRole::Callee(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn callee_mut(&mut self) -> Option<&mut CalleeState> {
        match &mut self.role {
            PortRole::Callee(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn caller(&self) -> Option<&CallerState> {
        match &self.role {
            PortRole::Caller(state) => Some(state),
            _ => None,
        }
    }

    pub(crate) fn caller_mut(&mut self) -> Option<&mut CallerState> {
        match &mut self.role {
            PortRole::Caller(state) => Some(state),
            _ => None,
        }
    }
}

/// A typed handle to an input or output port.
#[derive(Debug)]
pub struct TypedPortKey<T: ReactorData, Q: PortTag>(PortKey, PhantomData<(fn() -> T, Q)>);

impl<T: ReactorData, Q: PortTag> Copy for TypedPortKey<T, Q> {}

impl<T: ReactorData, Q: PortTag> Clone for TypedPortKey<T, Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ReactorData, Q: PortTag> TypedPortKey<T, Q> {
    pub(crate) fn new(key: PortKey) -> Self {
        Self(key, PhantomData)
    }

    pub fn key(&self) -> PortKey {
        self.0
    }
}

impl<T: ReactorData, Q: PortTag> From<TypedPortKey<T, Q>> for PortKey {
    fn from(typed: TypedPortKey<T, Q>) -> Self {
        typed.0
    }
}

/// A typed handle to a caller port invoking a callee with argument `A`
/// and return value `R`.
#[derive(Debug)]
pub struct CallerPortKey<A: ReactorData, R: ReactorData>(PortKey, PhantomData<fn(A) -> R>);

impl<A: ReactorData, R: ReactorData> Copy for CallerPortKey<A, R> {}

impl<A: ReactorData, R: ReactorData> Clone for CallerPortKey<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: ReactorData, R: ReactorData> CallerPortKey<A, R> {
    pub(crate) fn new(key: PortKey) -> Self {
        Self(key, PhantomData)
    }

    pub fn key(&self) -> PortKey {
        self.0
    }
}

impl<A: ReactorData, R: ReactorData> From<CallerPortKey<A, R>> for PortKey {
    fn from(typed: CallerPortKey<A, R>) -> Self {
        typed.0
    }
}

/// A typed handle to a callee port.
#[derive(Debug)]
pub struct CalleePortKey<A: ReactorData, R: ReactorData>(PortKey, PhantomData<fn(A) -> R>);

impl<A: ReactorData, R: ReactorData> Copy for CalleePortKey<A, R> {}

impl<A: ReactorData, R: ReactorData> Clone for CalleePortKey<A, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<A: ReactorData, R: ReactorData> CalleePortKey<A, R> {
    pub(crate) fn new(key: PortKey) -> Self {
        Self(key, PhantomData)
    }

    pub fn key(&self) -> PortKey {
        self.0
    }
}

impl<A: ReactorData, R: ReactorData> From<CalleePortKey<A, R>> for PortKey {
    fn from(typed: CalleePortKey<A, R>) -> Self {
        typed.0
    }
}

/// A fixed-width array of single ports with an aggregate view:
/// present-if-any, and member access by index.
#[derive(Debug)]
pub struct MultiPort {
    pub(crate) meta: ComponentMeta,
    pub(crate) kind: PortKind,
    pub(crate) ports: Vec<PortKey>,
}

impl MultiPort {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> PortKind {
        self.kind
    }

    pub fn width(&self) -> usize {
        self.ports.len()
    }

    pub fn port(&self, idx: usize) -> Option<PortKey> {
        self.ports.get(idx).copied()
    }

    pub fn ports(&self) -> &[PortKey] {
        &self.ports
    }
}

/// A typed handle to a multiport.
#[derive(Debug)]
pub struct TypedMultiPortKey<T: ReactorData, Q: PortTag>(
    crate::MultiPortKey,
    PhantomData<(fn() -> T, Q)>,
);

impl<T: ReactorData, Q: PortTag> Copy for TypedMultiPortKey<T, Q> {}

impl<T: ReactorData, Q: PortTag> Clone for TypedMultiPortKey<T, Q> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ReactorData, Q: PortTag> TypedMultiPortKey<T, Q> {
    pub(crate) fn new(key: crate::MultiPortKey) -> Self {
        Self(key, PhantomData)
    }

    pub fn key(&self) -> crate::MultiPortKey {
        self.0
    }
}

impl<T: ReactorData, Q: PortTag> From<TypedMultiPortKey<T, Q>> for crate::MultiPortKey {
    fn from(typed: TypedMultiPortKey<T, Q>) -> Self {
        typed.0
    }
}
