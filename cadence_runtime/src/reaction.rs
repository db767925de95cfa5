//! Reactions, mutations, and procedures: the executable units of a
//! reactor, with their declared triggers and argument lists.

use std::sync::Arc;

use crate::{
    ActionKey, CalleePortKey, ComponentMeta, MultiPortKey, MutationCtx, PortKey, PortTag,
    PrioritySetElement, ReactionCtx, ReactionError, ReactionKey, ReactorData, TimeValue, TimerKey,
    TypedActionKey, TypedMultiPortKey, TypedPortKey,
};

/// Function type for reaction bodies and late handlers.
pub type ReactionFn = dyn Fn(&mut ReactionCtx<'_>) -> Result<(), ReactionError> + Send + Sync;

/// Function type for mutation bodies, which may alter the topology.
pub type MutationFn = dyn Fn(&mut MutationCtx<'_>) -> Result<(), ReactionError> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    Reaction,
    /// Runs before any reaction of the same reactor; may alter topology.
    Mutation,
    /// Bound to a callee port; invoked synchronously by callers.
    Procedure,
}

/// A trigger declaration for a reaction: the entity whose presence stages
/// the reaction. `Startup` and `Shutdown` resolve to the owning reactor's
/// built-in actions.
#[derive(Debug, Clone, Copy)]
pub enum Trigger {
    Port(PortKey),
    MultiPort(MultiPortKey),
    Action(ActionKey),
    Timer(TimerKey),
    Startup,
    Shutdown,
}

impl<T: ReactorData, Q: PortTag> From<TypedPortKey<T, Q>> for Trigger {
    fn from(port: TypedPortKey<T, Q>) -> Self {
        Trigger::Port(port.into())
    }
}

impl<T: ReactorData, Q: PortTag> From<TypedMultiPortKey<T, Q>> for Trigger {
    fn from(multiport: TypedMultiPortKey<T, Q>) -> Self {
        Trigger::MultiPort(multiport.into())
    }
}

impl<T: ReactorData> From<TypedActionKey<T>> for Trigger {
    fn from(action: TypedActionKey<T>) -> Self {
        Trigger::Action(action.into())
    }
}

impl<A: ReactorData, R: ReactorData> From<CalleePortKey<A, R>> for Trigger {
    fn from(callee: CalleePortKey<A, R>) -> Self {
        Trigger::Port(callee.into())
    }
}

impl From<TimerKey> for Trigger {
    fn from(timer: TimerKey) -> Self {
        Trigger::Timer(timer)
    }
}

/// A resolved trigger, after `Startup`/`Shutdown` have been replaced by
/// the reactor's built-in actions and multiports by their members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TriggerRef {
    Port(PortKey),
    Action(ActionKey),
    Timer(TimerKey),
}

/// An argument declaration: the view of a component a reaction body may
/// use through its sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg {
    /// Read a port's current value.
    Read(PortKey),
    /// Read any member of a multiport.
    ReadMulti(MultiPortKey),
    /// Write a port (and propagate to its receivers).
    Write(PortKey),
    /// Write any member of a multiport.
    WriteMulti(MultiPortKey),
    /// Schedule an action.
    Sched(ActionKey),
    /// Invoke a remote procedure through a caller port.
    Caller(PortKey),
    /// Accept invocations on a callee port (procedures only).
    Callee(PortKey),
}

impl Arg {
    pub fn read<T: ReactorData, Q: PortTag>(port: TypedPortKey<T, Q>) -> Self {
        Arg::Read(port.into())
    }

    pub fn read_multi<T: ReactorData, Q: PortTag>(multiport: TypedMultiPortKey<T, Q>) -> Self {
        Arg::ReadMulti(multiport.into())
    }

    pub fn write<T: ReactorData, Q: PortTag>(port: TypedPortKey<T, Q>) -> Self {
        Arg::Write(port.into())
    }

    pub fn write_multi<T: ReactorData, Q: PortTag>(multiport: TypedMultiPortKey<T, Q>) -> Self {
        Arg::WriteMulti(multiport.into())
    }

    pub fn sched<T: ReactorData>(action: TypedActionKey<T>) -> Self {
        Arg::Sched(action.into())
    }

    pub fn caller<A: ReactorData, R: ReactorData>(caller: crate::CallerPortKey<A, R>) -> Self {
        Arg::Caller(caller.into())
    }

    pub fn callee<A: ReactorData, R: ReactorData>(callee: CalleePortKey<A, R>) -> Self {
        Arg::Callee(callee.into())
    }
}

#[derive(Clone)]
pub(crate) enum ReactionBody {
    Reaction(Arc<ReactionFn>),
    Mutation(Arc<MutationFn>),
}

impl std::fmt::Debug for ReactionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReactionBody::Reaction(_) => write!(f, "ReactionBody::Reaction"),
            ReactionBody::Mutation(_) => write!(f, "ReactionBody::Mutation"),
        }
    }
}

/// A soft deadline on reaction dispatch. When the current tag plus
/// `delay` lies behind physical time at dispatch, the late handler runs
/// instead of the reaction body.
pub struct Deadline {
    pub(crate) delay: TimeValue,
    pub(crate) late: Option<Arc<ReactionFn>>,
}

impl std::fmt::Debug for Deadline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deadline")
            .field("delay", &self.delay)
            .field("late", &self.late.is_some())
            .finish()
    }
}

#[derive(Debug)]
pub struct Reaction {
    pub(crate) meta: ComponentMeta,
    pub(crate) kind: ReactionKind,
    pub(crate) triggers: Vec<TriggerRef>,
    pub(crate) args: Vec<Arg>,
    pub(crate) body: ReactionBody,
    pub(crate) deadline: Option<Deadline>,
    /// Assigned by the precedence analyzer; total order over all
    /// reactions in the hierarchy.
    pub(crate) priority: u64,
    pub(crate) active: bool,
    /// True iff some trigger is a startup action or a zero-offset timer.
    pub(crate) triggered_immediately: bool,
}

impl Reaction {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn kind(&self) -> ReactionKind {
        self.kind
    }

    pub fn priority(&self) -> u64 {
        self.priority
    }
}

/// A reaction staged for execution at the current tag. Duplicates (same
/// reaction) collapse to a single entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagedReaction {
    pub(crate) key: ReactionKey,
    pub(crate) priority: u64,
}

impl PrioritySetElement for StagedReaction {
    fn has_priority_over(&self, other: &Self) -> bool {
        self.priority < other.priority
    }

    fn update_if_duplicate_of(&mut self, incoming: &mut Self) -> bool {
        self.key == incoming.key
    }
}
