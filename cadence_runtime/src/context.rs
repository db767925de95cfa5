//! Sandboxes handed to executing reactions and mutations.
//!
//! A [`ReactionCtx`] exposes the declared argument views of one reaction
//! plus the time and stop-request utilities; a [`MutationCtx`] adds the
//! topology-altering operations. Everything a body does through its
//! sandbox is collected and applied by the main loop after the body
//! returns, keeping staging and event-queue updates in one place.

use std::sync::Arc;

use crate::{
    ActionClass, ActionKey, Arg, CalleePortKey, CallerPortKey, Env, MultiPortKey, PortKey,
    ReactionBody, ReactionError, ReactionKey, ReactorData, ReactorKey, RuntimeError,
    StagedReaction, Tag, TaggedEvent, TimeValue, TimerKey, TriggerKey, TriggerRef, TypedActionKey,
    TypedPortKey,
};

/// Effects accumulated while a reaction body runs, applied by the main
/// loop afterwards.
#[derive(Debug, Default)]
pub(crate) struct TriggerRes {
    /// Reactions staged by ports becoming present.
    pub(crate) staged: Vec<StagedReaction>,
    /// Events scheduled on actions.
    pub(crate) scheduled: Vec<TaggedEvent>,
    /// A stop was requested.
    pub(crate) stop_requested: bool,
    /// An error stop was requested with this message.
    pub(crate) error_stop: Option<String>,
    /// Reactors marked for end-of-step deletion.
    pub(crate) deleted: Vec<ReactorKey>,
}

impl TriggerRes {
    fn absorb(&mut self, other: TriggerRes) {
        self.staged.extend(other.staged);
        self.scheduled.extend(other.scheduled);
        self.stop_requested |= other.stop_requested;
        if self.error_stop.is_none() {
            self.error_stop = other.error_stop;
        }
        self.deleted.extend(other.deleted);
    }
}

/// Sandbox passed to reaction bodies and late handlers.
pub struct ReactionCtx<'env> {
    pub(crate) env: &'env mut Env,
    pub(crate) reaction: ReactionKey,
    pub(crate) reactor: ReactorKey,
    pub(crate) tag: Tag,
    pub(crate) start: TimeValue,
    pub(crate) trigger_res: TriggerRes,
}

impl<'env> ReactionCtx<'env> {
    pub(crate) fn new(
        env: &'env mut Env,
        reaction: ReactionKey,
        tag: Tag,
        start: TimeValue,
    ) -> Self {
        let reactor = env
            .reactions
            .get(reaction)
            .map(|r| r.meta.container)
            .unwrap_or_default();
        Self {
            env,
            reaction,
            reactor,
            tag,
            start,
            trigger_res: TriggerRes::default(),
        }
    }

    // ------------------------------------------------------------------
    // Declared-argument checks
    // ------------------------------------------------------------------

    fn multiport_member(&self, multiport: MultiPortKey, port: PortKey) -> bool {
        self.env
            .multiports
            .get(multiport)
            .is_some_and(|m| m.ports.contains(&port))
    }

    fn has_read_access(&self, port: PortKey) -> bool {
        let Some(reaction) = self.env.reactions.get(self.reaction) else {
            return false;
        };
        reaction.triggers.contains(&TriggerRef::Port(port))
            || reaction.args.iter().any(|arg| match *arg {
                Arg::Read(p) => p == port,
                Arg::ReadMulti(m) => self.multiport_member(m, port),
                _ => false,
            })
    }

    fn has_write_access(&self, port: PortKey) -> bool {
        let Some(reaction) = self.env.reactions.get(self.reaction) else {
            return false;
        };
        reaction.args.iter().any(|arg| match *arg {
            Arg::Write(p) => p == port,
            Arg::WriteMulti(m) => self.multiport_member(m, port),
            _ => false,
        })
    }

    fn has_arg(&self, wanted: Arg) -> bool {
        self.env
            .reactions
            .get(self.reaction)
            .is_some_and(|r| r.args.contains(&wanted))
    }

    fn undeclared(&self, id: PortKey, usage: &'static str) -> RuntimeError {
        RuntimeError::UndeclaredArgument {
            port: self.env.fqn(crate::ComponentId::Port(id)),
            usage,
        }
    }

    // ------------------------------------------------------------------
    // Ports
    // ------------------------------------------------------------------

    /// The value of a declared (triggered or read) port, if present at
    /// the current tag.
    pub fn get<T: ReactorData + Clone>(
        &self,
        port: impl Into<PortKey>,
    ) -> Result<Option<T>, RuntimeError> {
        let key = port.into();
        if !self.has_read_access(key) {
            return Err(self.undeclared(key, "a trigger or read"));
        }
        let port = self
            .env
            .ports
            .get(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        if !port.is_present(self.tag) {
            return Ok(None);
        }
        match &port.value {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or(RuntimeError::TypeMismatch {
                    found: port.type_name,
                    wanted: std::any::type_name::<T>(),
                }),
        }
    }

    /// True iff the port carries a value at the current tag.
    pub fn is_present(&self, port: impl Into<PortKey>) -> bool {
        self.env
            .ports
            .get(port.into())
            .is_some_and(|p| p.is_present(self.tag))
    }

    /// Set a declared effect port, propagating the value to all its
    /// receivers and staging their reactions.
    pub fn set<T: ReactorData>(
        &mut self,
        port: impl Into<PortKey>,
        value: T,
    ) -> Result<(), RuntimeError> {
        let key = port.into();
        if !self.has_write_access(key) {
            return Err(self.undeclared(key, "an effect"));
        }
        let entry = self
            .env
            .ports
            .get(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        if entry.type_id != std::any::TypeId::of::<T>() {
            return Err(RuntimeError::TypeMismatch {
                found: entry.type_name,
                wanted: std::any::type_name::<T>(),
            });
        }
        self.env.propagate(
            key,
            Some(Arc::new(value) as Arc<dyn ReactorData>),
            self.tag,
            &mut self.trigger_res.staged,
        );
        Ok(())
    }

    /// The width of a multiport.
    pub fn width(&self, multiport: impl Into<MultiPortKey>) -> Result<usize, RuntimeError> {
        self.env
            .multiports
            .get(multiport.into())
            .map(|m| m.width())
            .ok_or(RuntimeError::KeyNotFound { kind: "multiport" })
    }

    /// The value of one member of a declared multiport.
    pub fn get_at<T: ReactorData + Clone>(
        &self,
        multiport: impl Into<MultiPortKey>,
        idx: usize,
    ) -> Result<Option<T>, RuntimeError> {
        let member = self
            .env
            .multiports
            .get(multiport.into())
            .and_then(|m| m.port(idx))
            .ok_or(RuntimeError::KeyNotFound { kind: "multiport member" })?;
        self.get(member)
    }

    /// Set one member of a declared multiport.
    pub fn set_at<T: ReactorData>(
        &mut self,
        multiport: impl Into<MultiPortKey>,
        idx: usize,
        value: T,
    ) -> Result<(), RuntimeError> {
        let member = self
            .env
            .multiports
            .get(multiport.into())
            .and_then(|m| m.port(idx))
            .ok_or(RuntimeError::KeyNotFound { kind: "multiport member" })?;
        self.set(member, value)
    }

    /// True iff any member of the multiport is present at the current
    /// tag.
    pub fn any_present(&self, multiport: impl Into<MultiPortKey>) -> bool {
        self.env
            .multiports
            .get(multiport.into())
            .is_some_and(|m| m.ports.iter().any(|&p| self.is_present(p)))
    }

    // ------------------------------------------------------------------
    // Actions and timers
    // ------------------------------------------------------------------

    /// The value delivered with a triggering action, if present.
    pub fn get_action<T: ReactorData + Clone>(
        &self,
        action: TypedActionKey<T>,
    ) -> Result<Option<T>, RuntimeError> {
        let key: ActionKey = action.into();
        let declared = self
            .env
            .reactions
            .get(self.reaction)
            .is_some_and(|r| {
                r.triggers.contains(&TriggerRef::Action(key)) || r.args.contains(&Arg::Sched(key))
            });
        if !declared {
            return Err(RuntimeError::UndeclaredArgument {
                port: self.env.fqn(crate::ComponentId::Action(key)),
                usage: "a trigger or schedulable",
            });
        }
        let action = self
            .env
            .actions
            .get(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "action" })?;
        if !action.is_present(self.tag) {
            return Ok(None);
        }
        match &action.value {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<T>()
                .cloned()
                .map(Some)
                .ok_or(RuntimeError::TypeMismatch {
                    found: action.type_name,
                    wanted: std::any::type_name::<T>(),
                }),
        }
    }

    /// True iff the action was delivered at the current tag.
    pub fn is_action_present(&self, action: impl Into<ActionKey>) -> bool {
        self.env
            .actions
            .get(action.into())
            .is_some_and(|a| a.is_present(self.tag))
    }

    /// True iff the timer fired at the current tag.
    pub fn is_timer_present(&self, timer: TimerKey) -> bool {
        self.env
            .timers
            .get(timer)
            .is_some_and(|t| t.is_present(self.tag))
    }

    /// Schedule a declared action with an extra delay and an optional
    /// value. Logical actions land at least one microstep later; physical
    /// actions are anchored to the wall clock.
    pub fn schedule<T: ReactorData>(
        &mut self,
        action: TypedActionKey<T>,
        delay: TimeValue,
        value: Option<T>,
    ) -> Result<(), RuntimeError> {
        let key: ActionKey = action.into();
        if !self.has_arg(Arg::Sched(key)) {
            return Err(RuntimeError::UndeclaredArgument {
                port: self.env.fqn(crate::ComponentId::Action(key)),
                usage: "schedulable",
            });
        }
        let entry = self
            .env
            .actions
            .get(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "action" })?;
        if entry.type_id != std::any::TypeId::of::<T>() {
            return Err(RuntimeError::TypeMismatch {
                found: entry.type_name,
                wanted: std::any::type_name::<T>(),
            });
        }

        let total_delay = entry.min_delay.saturating_add(delay);
        let tag = match entry.class {
            ActionClass::Logical => self.tag.later(total_delay).microsteps_later(1),
            ActionClass::Physical => Tag::new(TimeValue::now(), 0).later(total_delay),
            ActionClass::Startup | ActionClass::Shutdown => {
                return Err(RuntimeError::KeyRefused {
                    what: entry.name().to_owned(),
                    reason: "startup and shutdown actions are scheduled by the runtime",
                })
            }
        };
        tracing::trace!(action = %entry, tag = %tag, "Scheduling action");
        self.trigger_res.scheduled.push(TaggedEvent::new(
            TriggerKey::Action(key),
            tag,
            value.map(|v| Arc::new(v) as Arc<dyn ReactorData>),
        ));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Synchronous RPC
    // ------------------------------------------------------------------

    /// Invoke the procedure bound to the callee connected to `caller`,
    /// passing `arg`, and return its return value. The procedure runs to
    /// completion within this call; nothing is queued.
    pub fn call<A: ReactorData, R: ReactorData + Clone>(
        &mut self,
        caller: CallerPortKey<A, R>,
        arg: A,
    ) -> Result<Option<R>, RuntimeError> {
        let caller_key: PortKey = caller.into();
        if !self.has_arg(Arg::Caller(caller_key)) {
            return Err(self.undeclared(caller_key, "a caller"));
        }
        let callee_key = self
            .env
            .ports
            .get(caller_key)
            .and_then(|p| p.caller())
            .and_then(|c| c.remote)
            .ok_or_else(|| RuntimeError::UnboundCaller(self.env.fqn(crate::ComponentId::Port(caller_key))))?;

        let (procedure, procedure_name) = {
            let callee = &self.env.ports[callee_key];
            let procedure = callee
                .callee()
                .and_then(|c| c.procedure)
                .ok_or_else(|| RuntimeError::UnboundCaller(self.env.fqn(crate::ComponentId::Port(callee_key))))?;
            (procedure, self.env.reactions[procedure].name().to_owned())
        };

        {
            let callee = &mut self.env.ports[callee_key];
            callee.value = Some(Arc::new(arg) as Arc<dyn ReactorData>);
            callee.tag = Some(self.tag);
            if let Some(state) = callee.callee_mut() {
                state.ret = None;
            }
        }

        let body = match &self.env.reactions[procedure].body {
            ReactionBody::Reaction(body) => body.clone(),
            ReactionBody::Mutation(_) => unreachable!("procedures are never mutations"),
        };
        let mut inner = ReactionCtx::new(self.env, procedure, self.tag, self.start);
        let outcome = body(&mut inner);
        let inner_res = std::mem::take(&mut inner.trigger_res);
        self.trigger_res.absorb(inner_res);
        outcome.map_err(|source| RuntimeError::ReactionFailure {
            reaction: procedure_name,
            source,
        })?;

        let ret = self.env.ports[callee_key]
            .callee_mut()
            .and_then(|state| state.ret.take());
        match ret {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<R>()
                .cloned()
                .map(Some)
                .ok_or(RuntimeError::TypeMismatch {
                    found: "opaque return value",
                    wanted: std::any::type_name::<R>(),
                }),
        }
    }

    /// The argument of the current invocation, from within a procedure.
    pub fn call_argument<A: ReactorData + Clone, R: ReactorData>(
        &self,
        callee: CalleePortKey<A, R>,
    ) -> Result<Option<A>, RuntimeError> {
        let key: PortKey = callee.into();
        if !self.has_arg(Arg::Callee(key)) {
            return Err(self.undeclared(key, "a callee"));
        }
        let port = self
            .env
            .ports
            .get(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        if !port.is_present(self.tag) {
            return Ok(None);
        }
        match &port.value {
            None => Ok(None),
            Some(value) => value
                .downcast_ref::<A>()
                .cloned()
                .map(Some)
                .ok_or(RuntimeError::TypeMismatch {
                    found: port.type_name,
                    wanted: std::any::type_name::<A>(),
                }),
        }
    }

    /// Set the return value of the current invocation, from within a
    /// procedure.
    pub fn set_return<A: ReactorData, R: ReactorData>(
        &mut self,
        callee: CalleePortKey<A, R>,
        value: R,
    ) -> Result<(), RuntimeError> {
        let key: PortKey = callee.into();
        if !self.has_arg(Arg::Callee(key)) {
            return Err(self.undeclared(key, "a callee"));
        }
        let port = self
            .env
            .ports
            .get_mut(key)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        if let Some(state) = port.callee_mut() {
            state.ret = Some(Arc::new(value) as Arc<dyn ReactorData>);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Time and lifecycle utilities
    // ------------------------------------------------------------------

    /// The current tag, frozen for the duration of the reaction.
    pub fn get_tag(&self) -> Tag {
        self.tag
    }

    pub fn get_microstep(&self) -> u32 {
        self.tag.microstep()
    }

    /// The current logical time.
    pub fn get_logical_time(&self) -> TimeValue {
        self.tag.time()
    }

    pub fn get_physical_time(&self) -> TimeValue {
        TimeValue::now()
    }

    pub fn get_start_time(&self) -> TimeValue {
        self.start
    }

    /// Logical time elapsed since the start of execution.
    pub fn get_elapsed_logical_time(&self) -> TimeValue {
        self.tag.time().saturating_sub(self.start)
    }

    /// Physical time elapsed since the start of execution.
    pub fn get_elapsed_physical_time(&self) -> TimeValue {
        TimeValue::now().saturating_sub(self.start)
    }

    /// The reactor owning the executing reaction.
    pub fn get_reactor(&self) -> ReactorKey {
        self.reactor
    }

    /// The bank index of the owning reactor, if it is a bank member.
    pub fn get_bank_index(&self) -> Option<usize> {
        self.env
            .reactors
            .get(self.reactor)
            .and_then(|r| r.bank_info.as_ref())
            .map(|info| info.idx)
    }

    /// Request a clean shutdown one microstep after the current tag.
    pub fn request_stop(&mut self) {
        self.trigger_res.stop_requested = true;
    }

    /// Request a shutdown and record an error; the failure callback runs
    /// after the current tag completes.
    pub fn request_error_stop(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::error!(reaction = ?self.reaction, "{msg}");
        self.trigger_res.stop_requested = true;
        if self.trigger_res.error_stop.is_none() {
            self.trigger_res.error_stop = Some(msg);
        }
    }

    /// Record an error without stopping execution.
    pub fn report_error(&self, msg: impl Into<String>) {
        tracing::error!(reaction = ?self.reaction, "{}", msg.into());
    }
}

/// Sandbox passed to mutation bodies: everything a reaction can do, plus
/// runtime topology alteration.
pub struct MutationCtx<'env> {
    pub(crate) inner: ReactionCtx<'env>,
}

impl<'env> std::ops::Deref for MutationCtx<'env> {
    type Target = ReactionCtx<'env>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl std::ops::DerefMut for MutationCtx<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}

impl<'env> MutationCtx<'env> {
    pub(crate) fn new(inner: ReactionCtx<'env>) -> Self {
        Self { inner }
    }

    /// Connect two ports at runtime. The connection is checked against
    /// the causality interfaces; a value present on the source at the
    /// current tag propagates immediately.
    pub fn connect(
        &mut self,
        src: impl Into<PortKey>,
        dst: impl Into<PortKey>,
    ) -> Result<(), RuntimeError> {
        let ctx = &mut self.inner;
        ctx.env.connect_with(
            src.into(),
            dst.into(),
            Some((ctx.tag, &mut ctx.trigger_res.staged)),
        )
    }

    /// Bind a caller port to a callee port at runtime.
    pub fn connect_call(
        &mut self,
        caller: impl Into<PortKey>,
        callee: impl Into<PortKey>,
    ) -> Result<(), RuntimeError> {
        self.inner.env.connect_call(caller, callee)
    }

    /// Mark a reactor for removal at the end of the current step.
    pub fn delete(&mut self, reactor: ReactorKey) {
        self.inner.trigger_res.deleted.push(reactor);
    }

    /// Create a reactor at runtime. Its startup event is scheduled one
    /// microstep after the current tag.
    pub fn new_reactor(
        &mut self,
        parent: ReactorKey,
        name: &str,
    ) -> Result<ReactorKey, RuntimeError> {
        let key = self.inner.env.add_reactor(parent, name)?;
        let startup = self.inner.env.reactors[key].startup;
        self.inner.trigger_res.scheduled.push(TaggedEvent::new(
            TriggerKey::Action(startup),
            self.inner.tag.microsteps_later(1),
            None,
        ));
        Ok(key)
    }

    /// Create a timer at runtime; its first firing is computed relative
    /// to the current tag.
    pub fn new_timer(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        offset: TimeValue,
        period: TimeValue,
    ) -> Result<TimerKey, RuntimeError> {
        let key = self.inner.env.add_timer(reactor, name, offset, period)?;
        let first = if offset.is_zero() {
            self.inner.tag.microsteps_later(1)
        } else {
            self.inner.tag.later(offset)
        };
        self.inner
            .trigger_res
            .scheduled
            .push(TaggedEvent::new(TriggerKey::Timer(key), first, None));
        Ok(key)
    }

    /// Create an input port at runtime.
    pub fn new_input<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<TypedPortKey<T, crate::Input>, RuntimeError> {
        self.inner.env.add_input::<T>(reactor, name)
    }

    /// Create an output port at runtime.
    pub fn new_output<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<TypedPortKey<T, crate::Output>, RuntimeError> {
        self.inner.env.add_output::<T>(reactor, name)
    }

    /// Create a logical action at runtime.
    pub fn new_action<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        min_delay: TimeValue,
    ) -> Result<TypedActionKey<T>, RuntimeError> {
        self.inner.env.add_action::<T>(reactor, name, min_delay)
    }

    /// Start building a reaction of a (possibly newly created) reactor.
    pub fn new_reaction(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        body: impl Fn(&mut ReactionCtx<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    ) -> crate::ReactionBuilder<'_> {
        self.inner.env.add_reaction(reactor, name, body)
    }
}
