//! `Env` stores the live topology of a reactor hierarchy and offers the
//! assembly API: creating reactors, ports, actions, timers, reactions,
//! and connections, both before execution and from within mutations.

use std::{any::TypeId, collections::HashSet, sync::Arc};

use cadence_core::keys::TokenSource;
use itertools::Itertools;
use slotmap::{Key, SlotMap};

use crate::{
    Action, ActionClass, ActionKey, Arg, BankInfo, CalleePortKey, CallerPortKey, ComponentId,
    ComponentMeta, DepNode, DependencyGraph, Input, MultiPort, MultiPortKey, MutationCtx,
    Output, Port, PortKey, PortKind, PortRole, PortTag, ReactionBody, ReactionCtx, ReactionError,
    ReactionKey, ReactionKind, Reactor, ReactorData, ReactorKey, RuntimeError, StagedReaction,
    Tag, TimeValue, Timer, TimerKey, Token, Trigger, TriggerKey, TriggerRef, TypedActionKey,
    TypedMultiPortKey, TypedPortKey, PRIORITY_SPACING,
};

pub struct Env {
    pub(crate) reactors: SlotMap<ReactorKey, Reactor>,
    pub(crate) ports: SlotMap<PortKey, Port>,
    pub(crate) multiports: SlotMap<MultiPortKey, MultiPort>,
    pub(crate) actions: SlotMap<ActionKey, Action>,
    pub(crate) timers: SlotMap<TimerKey, Timer>,
    pub(crate) reactions: SlotMap<ReactionKey, crate::Reaction>,
    /// The top-level reactor; its own container.
    pub(crate) top: ReactorKey,
    tokens: TokenSource,
    /// True while the main loop is executing; connections made at runtime
    /// are checked against the causality interfaces.
    pub(crate) running: bool,
    /// Set whenever the dependency graph changed; priorities are
    /// reassigned before the next tag is processed.
    pub(crate) graph_dirty: bool,
}

impl std::fmt::Debug for Env {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Env")
            .field("reactors", &self.reactors.len())
            .field("ports", &self.ports.len())
            .field("actions", &self.actions.len())
            .field("timers", &self.timers.len())
            .field("reactions", &self.reactions.len())
            .field("running", &self.running)
            .finish()
    }
}

impl Env {
    /// Create an environment with an empty top-level reactor of the given
    /// name.
    pub fn new(top_name: &str) -> Self {
        let mut env = Self {
            reactors: SlotMap::with_key(),
            ports: SlotMap::with_key(),
            multiports: SlotMap::with_key(),
            actions: SlotMap::with_key(),
            timers: SlotMap::with_key(),
            reactions: SlotMap::with_key(),
            top: ReactorKey::null(),
            tokens: TokenSource::new(),
            running: false,
            graph_dirty: true,
        };
        env.top = env
            .create_reactor(None, top_name, None)
            .expect("creating the top-level reactor cannot fail");
        env
    }

    /// The top-level reactor.
    pub fn top(&self) -> ReactorKey {
        self.top
    }

    pub fn reactor(&self, key: ReactorKey) -> Option<&Reactor> {
        self.reactors.get(key)
    }

    pub fn port(&self, key: impl Into<PortKey>) -> Option<&Port> {
        self.ports.get(key.into())
    }

    pub fn multiport(&self, key: impl Into<MultiPortKey>) -> Option<&MultiPort> {
        self.multiports.get(key.into())
    }

    pub fn action(&self, key: impl Into<ActionKey>) -> Option<&Action> {
        self.actions.get(key.into())
    }

    pub fn timer(&self, key: TimerKey) -> Option<&Timer> {
        self.timers.get(key)
    }

    pub fn reaction(&self, key: ReactionKey) -> Option<&crate::Reaction> {
        self.reactions.get(key)
    }

    /// Find a reactor by its (non-qualified) name.
    pub fn find_reactor_by_name(&self, name: &str) -> Option<ReactorKey> {
        self.reactors
            .iter()
            .find(|(_, reactor)| reactor.name() == name)
            .map(|(key, _)| key)
    }

    // ------------------------------------------------------------------
    // Assembly
    // ------------------------------------------------------------------

    fn mint(&mut self) -> Token {
        self.tokens.mint()
    }

    pub(crate) fn create_reactor(
        &mut self,
        parent: Option<ReactorKey>,
        name: &str,
        bank_info: Option<BankInfo>,
    ) -> Result<ReactorKey, RuntimeError> {
        if let Some(parent) = parent {
            if !self.reactors.contains_key(parent) {
                return Err(RuntimeError::KeyNotFound { kind: "reactor" });
            }
        }
        let token = self.mint();
        let key = self.reactors.insert_with_key(|key| {
            let meta = ComponentMeta::new(name, parent.unwrap_or(key), token);
            Reactor::new(meta, bank_info, ActionKey::null(), ActionKey::null())
        });

        let startup = self.create_builtin_action(key, "startup", ActionClass::Startup)?;
        let shutdown = self.create_builtin_action(key, "shutdown", ActionClass::Shutdown)?;
        let reactor = &mut self.reactors[key];
        reactor.startup = startup;
        reactor.shutdown = shutdown;

        if let Some(parent) = parent {
            self.reactors[parent].register(ComponentId::Reactor(key), token, name)?;
            self.reactors[parent].children.push(key);
        }
        Ok(key)
    }

    /// Add a child reactor under `parent`.
    pub fn add_reactor(
        &mut self,
        parent: ReactorKey,
        name: &str,
    ) -> Result<ReactorKey, RuntimeError> {
        self.create_reactor(Some(parent), name, None)
    }

    /// Add a bank: `total` identically-built reactors sharing a name,
    /// distinguished by their bank index.
    pub fn add_bank(
        &mut self,
        parent: ReactorKey,
        name: &str,
        total: usize,
        mut build: impl FnMut(&mut Env, ReactorKey, usize) -> Result<(), RuntimeError>,
    ) -> Result<Vec<ReactorKey>, RuntimeError> {
        let mut members = Vec::with_capacity(total);
        for idx in 0..total {
            let key = self.create_reactor(Some(parent), name, Some(BankInfo { idx, total }))?;
            build(self, key, idx)?;
            members.push(key);
        }
        Ok(members)
    }

    fn create_builtin_action(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        class: ActionClass,
    ) -> Result<ActionKey, RuntimeError> {
        let token = self.mint();
        let meta = ComponentMeta::new(name, reactor, token);
        let key = self
            .actions
            .insert(Action::new::<()>(meta, class, TimeValue::ZERO));
        self.reactors[reactor].register(ComponentId::Action(key), token, name)?;
        Ok(key)
    }

    fn create_port<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        role: PortRole,
        ret_type_id: Option<TypeId>,
    ) -> Result<PortKey, RuntimeError> {
        if !self.reactors.contains_key(reactor) {
            return Err(RuntimeError::KeyNotFound { kind: "reactor" });
        }
        let token = self.mint();
        let meta = ComponentMeta::new(name, reactor, token);
        let mut port = Port::new::<T>(meta, role);
        port.ret_type_id = ret_type_id;
        let key = self.ports.insert(port);
        self.reactors[reactor].register(ComponentId::Port(key), token, name)?;
        Ok(key)
    }

    /// Add an input port to a reactor.
    pub fn add_input<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<TypedPortKey<T, Input>, RuntimeError> {
        self.create_port::<T>(reactor, name, PortRole::Input, None)
            .map(TypedPortKey::new)
    }

    /// Add an output port to a reactor.
    pub fn add_output<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<TypedPortKey<T, Output>, RuntimeError> {
        self.create_port::<T>(reactor, name, PortRole::Output, None)
            .map(TypedPortKey::new)
    }

    fn create_multiport<T: ReactorData, Q: PortTag>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        width: usize,
    ) -> Result<TypedMultiPortKey<T, Q>, RuntimeError> {
        let role = || match Q::KIND {
            PortKind::Input => PortRole::Input,
            _ => PortRole::Output,
        };
        let mut members = Vec::with_capacity(width);
        for idx in 0..width {
            let member_name = format!("{name}[{idx}]");
            members.push(self.create_port::<T>(reactor, &member_name, role(), None)?);
        }
        let token = self.mint();
        let meta = ComponentMeta::new(name, reactor, token);
        let key = self.multiports.insert(MultiPort {
            meta,
            kind: Q::KIND,
            ports: members,
        });
        self.reactors[reactor].register(ComponentId::MultiPort(key), token, name)?;
        Ok(TypedMultiPortKey::new(key))
    }

    /// Add a fixed-width multiport of input ports.
    pub fn add_multiport_input<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        width: usize,
    ) -> Result<TypedMultiPortKey<T, Input>, RuntimeError> {
        self.create_multiport::<T, Input>(reactor, name, width)
    }

    /// Add a fixed-width multiport of output ports.
    pub fn add_multiport_output<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        width: usize,
    ) -> Result<TypedMultiPortKey<T, Output>, RuntimeError> {
        self.create_multiport::<T, Output>(reactor, name, width)
    }

    /// Add a caller port invoking remote procedures with argument `A` and
    /// return value `R`.
    pub fn add_caller<A: ReactorData, R: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<CallerPortKey<A, R>, RuntimeError> {
        self.create_port::<A>(
            reactor,
            name,
            PortRole::Caller(Default::default()),
            Some(TypeId::of::<R>()),
        )
        .map(CallerPortKey::new)
    }

    /// Add a callee port accepting invocations with argument `A` and
    /// return value `R`.
    pub fn add_callee<A: ReactorData, R: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
    ) -> Result<CalleePortKey<A, R>, RuntimeError> {
        self.create_port::<A>(
            reactor,
            name,
            PortRole::Callee(Default::default()),
            Some(TypeId::of::<R>()),
        )
        .map(CalleePortKey::new)
    }

    fn create_action<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        class: ActionClass,
        min_delay: TimeValue,
    ) -> Result<TypedActionKey<T>, RuntimeError> {
        if !self.reactors.contains_key(reactor) {
            return Err(RuntimeError::KeyNotFound { kind: "reactor" });
        }
        let token = self.mint();
        let meta = ComponentMeta::new(name, reactor, token);
        let key = self.actions.insert(Action::new::<T>(meta, class, min_delay));
        self.reactors[reactor].register(ComponentId::Action(key), token, name)?;
        Ok(TypedActionKey::new(key))
    }

    /// Add a logical action.
    pub fn add_action<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        min_delay: TimeValue,
    ) -> Result<TypedActionKey<T>, RuntimeError> {
        self.create_action::<T>(reactor, name, ActionClass::Logical, min_delay)
    }

    /// Add a physical action, schedulable from outside the main loop.
    pub fn add_physical_action<T: ReactorData>(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        min_delay: TimeValue,
    ) -> Result<TypedActionKey<T>, RuntimeError> {
        self.create_action::<T>(reactor, name, ActionClass::Physical, min_delay)
    }

    /// Add a timer firing at `start + offset` and every `period` after.
    pub fn add_timer(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        offset: TimeValue,
        period: TimeValue,
    ) -> Result<TimerKey, RuntimeError> {
        if !self.reactors.contains_key(reactor) {
            return Err(RuntimeError::KeyNotFound { kind: "reactor" });
        }
        let token = self.mint();
        let meta = ComponentMeta::new(name, reactor, token);
        let key = self.timers.insert(Timer::new(meta, offset, period));
        self.reactors[reactor].register(ComponentId::Timer(key), token, name)?;
        Ok(key)
    }

    /// Start building a reaction of `reactor`. Triggers and arguments are
    /// declared on the returned builder; `finish` registers the reaction.
    pub fn add_reaction(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        body: impl Fn(&mut ReactionCtx<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    ) -> ReactionBuilder<'_> {
        ReactionBuilder {
            env: self,
            reactor,
            name: name.to_owned(),
            kind: ReactionKind::Reaction,
            body: ReactionBody::Reaction(Arc::new(body)),
            triggers: Vec::new(),
            args: Vec::new(),
            deadline_delay: None,
            late: None,
        }
    }

    /// Start building a mutation of `reactor`. Mutations run before any
    /// reaction of the same reactor and may alter the topology.
    pub fn add_mutation(
        &mut self,
        reactor: ReactorKey,
        name: &str,
        body: impl Fn(&mut MutationCtx<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    ) -> ReactionBuilder<'_> {
        ReactionBuilder {
            env: self,
            reactor,
            name: name.to_owned(),
            kind: ReactionKind::Mutation,
            body: ReactionBody::Mutation(Arc::new(body)),
            triggers: Vec::new(),
            args: Vec::new(),
            deadline_delay: None,
            late: None,
        }
    }

    // ------------------------------------------------------------------
    // Capabilities
    // ------------------------------------------------------------------

    fn component_access(&self, id: ComponentId) -> Option<(ReactorKey, &str)> {
        match id {
            ComponentId::Reactor(key) => {
                let r = self.reactors.get(key)?;
                Some((r.meta.container, r.name()))
            }
            ComponentId::Port(key) => {
                let p = self.ports.get(key)?;
                Some((p.meta.container, p.name()))
            }
            ComponentId::MultiPort(key) => {
                let m = self.multiports.get(key)?;
                Some((m.meta.container, m.name()))
            }
            ComponentId::Action(key) => {
                let a = self.actions.get(key)?;
                Some((a.meta.container, a.name()))
            }
            ComponentId::Timer(key) => {
                let t = self.timers.get(key)?;
                Some((t.meta.container, t.name()))
            }
            ComponentId::Reaction(key) => {
                let r = self.reactions.get(key)?;
                Some((r.meta.container, r.name()))
            }
        }
    }

    /// Grant `requester` the capability token for `id` out of the
    /// containing reactor's key chain, subject to the hierarchy rules: a
    /// reactor holds the keys of its own components, may obtain its
    /// children's port keys (one level, never more), and never an action
    /// or timer key across the hierarchy.
    pub(crate) fn grant_key(
        &self,
        requester: ReactorKey,
        id: ComponentId,
    ) -> Result<Token, RuntimeError> {
        let (container, name) = self
            .component_access(id)
            .ok_or(RuntimeError::KeyNotFound { kind: "component" })?;
        let chained = |reactor: ReactorKey| {
            self.reactors[reactor]
                .token_for(id)
                .ok_or(RuntimeError::KeyRefused {
                    what: name.to_owned(),
                    reason: "component is not registered in the key chain",
                })
        };
        if container == requester {
            return chained(container);
        }
        let delegable = matches!(id, ComponentId::Port(_) | ComponentId::MultiPort(_));
        if delegable {
            let child_container = self
                .reactors
                .get(container)
                .map(|r| r.meta.container)
                .ok_or(RuntimeError::KeyNotFound { kind: "reactor" })?;
            if child_container == requester {
                return chained(container);
            }
            return Err(RuntimeError::KeyRefused {
                what: name.to_owned(),
                reason: "ports may be delegated across at most one hierarchy level",
            });
        }
        Err(RuntimeError::KeyRefused {
            what: name.to_owned(),
            reason: "actions and timers are never granted across the hierarchy",
        })
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// True if `connect(src, dst)` would be accepted.
    pub fn can_connect(&self, src: impl Into<PortKey>, dst: impl Into<PortKey>) -> bool {
        self.check_connection(src.into(), dst.into()).is_ok()
    }

    /// Connect two data ports. See [`Env::can_connect`] for the scope
    /// rules; while running, the connection is additionally checked for
    /// cycles and zero-delay feedback.
    pub fn connect(
        &mut self,
        src: impl Into<PortKey>,
        dst: impl Into<PortKey>,
    ) -> Result<(), RuntimeError> {
        self.connect_with(src.into(), dst.into(), None)
    }

    pub(crate) fn connect_with(
        &mut self,
        src: PortKey,
        dst: PortKey,
        runtime: Option<(Tag, &mut Vec<StagedReaction>)>,
    ) -> Result<(), RuntimeError> {
        let acting = self.check_connection(src, dst)?;

        self.ports[src].receivers.push(dst);
        self.ports[dst].source = Some(src);
        let reactor = &mut self.reactors[acting];
        reactor.dependencies.add_edge(DepNode::Port(dst), DepNode::Port(src));
        reactor.causality.add_edge(dst, src);
        self.graph_dirty = true;

        // A value already present on the source at the current tag is
        // propagated through the new connection.
        if let Some((tag, staged)) = runtime {
            if self.ports[src].is_present(tag) {
                let value = self.ports[src].value.clone();
                self.propagate(dst, value, tag, staged);
            }
        }
        Ok(())
    }

    fn connection_refused(
        &self,
        src: PortKey,
        dst: PortKey,
        reason: impl Into<String>,
    ) -> RuntimeError {
        RuntimeError::IllegalConnection {
            src: self.fqn(ComponentId::Port(src)),
            dst: self.fqn(ComponentId::Port(dst)),
            reason: reason.into(),
        }
    }

    /// Validate a prospective connection and resolve the reactor in whose
    /// scope it is made.
    pub(crate) fn check_connection(
        &self,
        src: PortKey,
        dst: PortKey,
    ) -> Result<ReactorKey, RuntimeError> {
        let src_port = self
            .ports
            .get(src)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        let dst_port = self
            .ports
            .get(dst)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;

        if src == dst {
            return Err(self.connection_refused(src, dst, "self-loop"));
        }
        if src_port.type_id != dst_port.type_id {
            return Err(self.connection_refused(
                src,
                dst,
                format!(
                    "type mismatch: {} vs {}",
                    src_port.type_name, dst_port.type_name
                ),
            ));
        }
        if dst_port.source.is_some() {
            return Err(self.connection_refused(
                src,
                dst,
                "destination already has an upstream source",
            ));
        }

        let src_owner = src_port.meta.container;
        let dst_owner = dst_port.meta.container;
        let acting = match (src_port.kind(), dst_port.kind()) {
            // Between siblings of the same container.
            (PortKind::Output, PortKind::Input) => {
                let src_parent = self.reactors[src_owner].meta.container;
                let dst_parent = self.reactors[dst_owner].meta.container;
                if src_parent != dst_parent {
                    return Err(self.connection_refused(
                        src,
                        dst,
                        "output-to-input connections must stay between siblings",
                    ));
                }
                src_parent
            }
            // Forwarding a grandchild's output to a child's output.
            (PortKind::Output, PortKind::Output) => {
                if self.reactors[src_owner].meta.container != dst_owner {
                    return Err(self.connection_refused(
                        src,
                        dst,
                        "output-to-output connections must forward from grandchild to child",
                    ));
                }
                dst_owner
            }
            // Forwarding a child's input to a grandchild's input.
            (PortKind::Input, PortKind::Input) => {
                if self.reactors[dst_owner].meta.container != src_owner {
                    return Err(self.connection_refused(
                        src,
                        dst,
                        "input-to-input connections must forward from child to grandchild",
                    ));
                }
                src_owner
            }
            (PortKind::Input, PortKind::Output) => {
                return Err(self.connection_refused(src, dst, "input cannot drive an output"));
            }
            _ => {
                return Err(self.connection_refused(
                    src,
                    dst,
                    "caller and callee ports are connected with connect_call",
                ));
            }
        };

        if self.running {
            self.check_runtime_connection(acting, src, dst)?;
        }
        Ok(acting)
    }

    /// Checks applied only while the engine is running: the tentative
    /// graph must stay acyclic, and the connection must not introduce new
    /// zero-delay port reachability between the acting reactor's own
    /// outputs and inputs.
    fn check_runtime_connection(
        &self,
        acting: ReactorKey,
        src: PortKey,
        dst: PortKey,
    ) -> Result<(), RuntimeError> {
        let reactor = &self.reactors[acting];

        let mut tentative = reactor.dependencies.clone();
        let mut port_graph = reactor.causality.clone();
        for &child in &reactor.children {
            let interface = self.reactors[child].causality_interface();
            port_graph.merge(interface);
            for (down, up) in interface.edges() {
                tentative.add_edge(DepNode::Port(down), DepNode::Port(up));
            }
        }

        tentative.add_edge(DepNode::Port(dst), DepNode::Port(src));
        if tentative.has_cycle() {
            return Err(self.connection_refused(src, dst, "connection would form a cycle"));
        }

        let own_outputs: Vec<PortKey> = self.own_ports_of_kind(acting, PortKind::Output);
        let own_inputs: Vec<PortKey> = self.own_ports_of_kind(acting, PortKind::Input);

        let mut with_edge = port_graph.clone();
        with_edge.add_edge(dst, src);
        for &output in &own_outputs {
            for &input in &own_inputs {
                if !port_reachable(&port_graph, output, input)
                    && port_reachable(&with_edge, output, input)
                {
                    return Err(self.connection_refused(
                        src,
                        dst,
                        "connection would close a zero-delay feedback path",
                    ));
                }
            }
        }
        Ok(())
    }

    fn own_ports_of_kind(&self, reactor: ReactorKey, kind: PortKind) -> Vec<PortKey> {
        self.ports
            .iter()
            .filter(|(_, port)| port.meta.container == reactor && port.kind() == kind)
            .map(|(key, _)| key)
            .collect()
    }

    /// Bind a caller port to a callee port, splicing the caller's
    /// reactions into the callee's dependency chain.
    pub fn connect_call(
        &mut self,
        caller: impl Into<PortKey>,
        callee: impl Into<PortKey>,
    ) -> Result<(), RuntimeError> {
        let caller: PortKey = caller.into();
        let callee: PortKey = callee.into();
        let caller_port = self
            .ports
            .get(caller)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;
        let callee_port = self
            .ports
            .get(callee)
            .ok_or(RuntimeError::KeyNotFound { kind: "port" })?;

        if caller_port.kind() != PortKind::Caller || callee_port.kind() != PortKind::Callee {
            return Err(self.connection_refused(caller, callee, "expected a caller and a callee"));
        }
        if caller_port.type_id != callee_port.type_id
            || caller_port.ret_type_id != callee_port.ret_type_id
        {
            return Err(self.connection_refused(caller, callee, "RPC signature mismatch"));
        }
        if caller_port.caller().and_then(|c| c.remote).is_some() {
            return Err(self.connection_refused(caller, callee, "caller is already bound"));
        }

        let caller_owner = caller_port.meta.container;
        let callee_owner = callee_port.meta.container;
        let caller_parent = self.reactors[caller_owner].meta.container;
        let callee_parent = self.reactors[callee_owner].meta.container;
        if caller_parent != callee_parent {
            return Err(self.connection_refused(
                caller,
                callee,
                "caller and callee must belong to siblings",
            ));
        }

        let mut last_caller = match callee_port.callee().and_then(|c| c.last_caller) {
            Some(last) => last,
            None => {
                return Err(self.connection_refused(
                    caller,
                    callee,
                    "callee has no bound procedure",
                ))
            }
        };

        // Serialize the new caller's reactions after every earlier caller
        // (and the procedure itself), in declaration order.
        let calling_reactions: Vec<ReactionKey> = self.reactors[caller_owner]
            .reactions
            .iter()
            .copied()
            .filter(|&r| self.reactions[r].args.contains(&Arg::Caller(caller)))
            .collect();

        if let Some(c) = self.ports[caller].caller_mut() {
            c.remote = Some(callee);
        }
        for reaction in calling_reactions {
            self.reactors[caller_parent]
                .dependencies
                .add_edge(DepNode::Reaction(reaction), DepNode::Reaction(last_caller));
            last_caller = reaction;
        }
        if let Some(c) = self.ports[callee].callee_mut() {
            c.last_caller = Some(last_caller);
        }
        self.graph_dirty = true;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Value propagation
    // ------------------------------------------------------------------

    /// Store `value` on `port` at `tag`, share it with every transitive
    /// receiver, and stage the reactions registered on each port reached.
    pub(crate) fn propagate(
        &mut self,
        port: PortKey,
        value: Option<Arc<dyn ReactorData>>,
        tag: Tag,
        staged: &mut Vec<StagedReaction>,
    ) {
        let mut pending = vec![port];
        while let Some(key) = pending.pop() {
            let Some(p) = self.ports.get_mut(key) else {
                continue;
            };
            p.value.clone_from(&value);
            p.tag = Some(tag);
            pending.extend(p.receivers.iter().copied());
            for reaction in p.triggers.clone() {
                self.stage_if_active(reaction, staged);
            }
        }
    }

    pub(crate) fn stage_if_active(&self, key: ReactionKey, staged: &mut Vec<StagedReaction>) {
        let Some(reaction) = self.reactions.get(key) else {
            return;
        };
        let reactor_active = self
            .reactors
            .get(reaction.meta.container)
            .is_some_and(|r| r.active);
        if reaction.active && reactor_active {
            staged.push(StagedReaction {
                key,
                priority: reaction.priority,
            });
        }
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    fn reactor_fqn(&self, key: ReactorKey) -> String {
        let Some(reactor) = self.reactors.get(key) else {
            return "<deleted>".into();
        };
        let segment = match &reactor.bank_info {
            Some(BankInfo { idx, .. }) => format!("{}[{idx}]", reactor.name()),
            None => reactor.name().to_owned(),
        };
        if key == self.top {
            segment
        } else {
            format!("{}.{segment}", self.reactor_fqn(reactor.meta.container))
        }
    }

    /// The fully-qualified name of a component: the dotted path from the
    /// top-level reactor down.
    pub fn fqn(&self, id: impl Into<ComponentId>) -> String {
        let id = id.into();
        if let ComponentId::Reactor(key) = id {
            return self.reactor_fqn(key);
        }
        match self.component_access(id) {
            Some((container, name)) => {
                format!("{}.{name}", self.reactor_fqn(container))
            }
            None => "<deleted>".into(),
        }
    }

    // ------------------------------------------------------------------
    // Precedence analysis
    // ------------------------------------------------------------------

    /// The global dependency graph: the union of all local graphs plus
    /// the implicit edges from container mutations to the first reaction
    /// of each affected reactor.
    pub(crate) fn collect_dependency_graph(&self) -> DependencyGraph<DepNode> {
        let mut merged = DependencyGraph::new();
        for reactor in self.reactors.values() {
            merged.merge(&reactor.dependencies);
        }
        for (key, reactor) in self.reactors.iter() {
            // First reaction of a reactor depends on its own last
            // mutation, and on the last mutation of its container.
            if let (Some(last_mutation), Some(first_reaction)) =
                (reactor.last_mutation(), reactor.first_reaction())
            {
                merged.add_edge(
                    DepNode::Reaction(first_reaction),
                    DepNode::Reaction(last_mutation),
                );
            }
            if key != self.top {
                let container = &self.reactors[reactor.meta.container];
                if let (Some(last_mutation), Some(first_reaction)) =
                    (container.last_mutation(), reactor.first_reaction())
                {
                    merged.add_edge(
                        DepNode::Reaction(first_reaction),
                        DepNode::Reaction(last_mutation),
                    );
                }
            }
        }
        merged
    }

    /// Re-run the precedence analysis: collapse the global graph to
    /// reactions and assign totally-ordered priorities. Fails if a cycle
    /// is found.
    #[tracing::instrument(skip(self))]
    pub(crate) fn assign_priorities(&mut self) -> Result<(), RuntimeError> {
        let full = self.collect_dependency_graph();
        let reaction_graph = full.collapsed(|node| node.is_reaction());
        match reaction_graph.priorities(PRIORITY_SPACING) {
            Some(assignment) => {
                for (node, priority) in assignment {
                    if let DepNode::Reaction(key) = node {
                        if let Some(reaction) = self.reactions.get_mut(key) {
                            reaction.priority = priority;
                        }
                    }
                }
                self.graph_dirty = false;
                Ok(())
            }
            None => {
                let what = reaction_graph
                    .cycle_participants()
                    .into_iter()
                    .filter_map(|node| match node {
                        DepNode::Reaction(key) => Some(key),
                        DepNode::Port(_) => None,
                    })
                    .sorted()
                    .collect();
                Err(RuntimeError::GraphCycle { what })
            }
        }
    }

    // ------------------------------------------------------------------
    // Deletion
    // ------------------------------------------------------------------

    /// Remove a reactor and everything beneath it. Returns the triggers
    /// whose pending events must be dropped from the event queue.
    #[tracing::instrument(skip(self), fields(reactor = %self.fqn(root)))]
    pub(crate) fn remove_reactor_subtree(&mut self, root: ReactorKey) -> Vec<TriggerKey> {
        if root == self.top || !self.reactors.contains_key(root) {
            return Vec::new();
        }

        let mut subtree = Vec::new();
        let mut stack = vec![root];
        while let Some(key) = stack.pop() {
            subtree.push(key);
            stack.extend(self.reactors[key].children.iter().copied());
        }
        let subtree: HashSet<ReactorKey> = subtree.into_iter().collect();

        let removed_ports: HashSet<PortKey> = self
            .ports
            .iter()
            .filter(|(_, p)| subtree.contains(&p.meta.container))
            .map(|(k, _)| k)
            .collect();
        let removed_reactions: HashSet<ReactionKey> = self
            .reactions
            .iter()
            .filter(|(_, r)| subtree.contains(&r.meta.container))
            .map(|(k, _)| k)
            .collect();
        let removed_multiports: Vec<MultiPortKey> = self
            .multiports
            .iter()
            .filter(|(_, m)| subtree.contains(&m.meta.container))
            .map(|(k, _)| k)
            .collect();
        let removed_actions: Vec<ActionKey> = self
            .actions
            .iter()
            .filter(|(_, a)| subtree.contains(&a.meta.container))
            .map(|(k, _)| k)
            .collect();
        let removed_timers: Vec<TimerKey> = self
            .timers
            .iter()
            .filter(|(_, t)| subtree.contains(&t.meta.container))
            .map(|(k, _)| k)
            .collect();

        // Sever links from the surviving topology into the subtree.
        for (_, port) in self.ports.iter_mut() {
            if subtree.contains(&port.meta.container) {
                continue;
            }
            port.receivers.retain(|r| !removed_ports.contains(r));
            if port.source.is_some_and(|s| removed_ports.contains(&s)) {
                port.source = None;
            }
            port.triggers.retain(|t| !removed_reactions.contains(t));
            if let PortRole::Caller(state) = &mut port.role {
                if state.remote.is_some_and(|r| removed_ports.contains(&r)) {
                    tracing::warn!(port = %port.meta.name, "Remote callee was deleted");
                    state.remote = None;
                }
            }
        }
        for (_, action) in self.actions.iter_mut() {
            action.triggers.retain(|t| !removed_reactions.contains(t));
        }
        for (_, timer) in self.timers.iter_mut() {
            timer.triggers.retain(|t| !removed_reactions.contains(t));
        }
        for (key, reactor) in self.reactors.iter_mut() {
            if subtree.contains(&key) {
                continue;
            }
            reactor.children.retain(|c| !subtree.contains(c));
            for &port in &removed_ports {
                reactor.dependencies.remove_node(DepNode::Port(port));
                reactor.causality.remove_node(port);
            }
            for &reaction in &removed_reactions {
                reactor.dependencies.remove_node(DepNode::Reaction(reaction));
            }
        }
        let root_parent = self.reactors[root].meta.container;
        if let Some(parent) = self.reactors.get_mut(root_parent) {
            parent.key_chain.remove(&ComponentId::Reactor(root));
        }

        let dropped: Vec<TriggerKey> = removed_actions
            .iter()
            .copied()
            .map(TriggerKey::Action)
            .chain(removed_timers.iter().copied().map(TriggerKey::Timer))
            .collect();

        for key in removed_reactions {
            self.reactions.remove(key);
        }
        for key in removed_ports {
            self.ports.remove(key);
        }
        for key in removed_multiports {
            self.multiports.remove(key);
        }
        for key in removed_actions {
            self.actions.remove(key);
        }
        for key in removed_timers {
            self.timers.remove(key);
        }
        for key in subtree {
            self.reactors.remove(key);
        }

        self.graph_dirty = true;
        dropped
    }
}

fn port_reachable(graph: &DependencyGraph<PortKey>, from: PortKey, to: PortKey) -> bool {
    if !graph.contains_node(from) {
        return false;
    }
    let mut visited = HashSet::new();
    let mut stack = vec![from];
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if visited.insert(node) {
            stack.extend(graph.upstream(node));
        }
    }
    false
}

/// Builder for a reaction, mutation, or procedure. Declares the trigger
/// and argument lists, then registers the unit with `finish`.
pub struct ReactionBuilder<'env> {
    env: &'env mut Env,
    reactor: ReactorKey,
    name: String,
    kind: ReactionKind,
    body: ReactionBody,
    triggers: Vec<Trigger>,
    args: Vec<Arg>,
    deadline_delay: Option<TimeValue>,
    late: Option<Arc<crate::ReactionFn>>,
}

impl ReactionBuilder<'_> {
    pub fn with_trigger(mut self, trigger: impl Into<Trigger>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    pub fn with_arg(mut self, arg: Arg) -> Self {
        self.args.push(arg);
        self
    }

    pub fn with_read(self, port: impl Into<PortKey>) -> Self {
        self.with_arg(Arg::Read(port.into()))
    }

    pub fn with_write(self, port: impl Into<PortKey>) -> Self {
        self.with_arg(Arg::Write(port.into()))
    }

    pub fn with_read_multi(self, multiport: impl Into<MultiPortKey>) -> Self {
        self.with_arg(Arg::ReadMulti(multiport.into()))
    }

    pub fn with_write_multi(self, multiport: impl Into<MultiPortKey>) -> Self {
        self.with_arg(Arg::WriteMulti(multiport.into()))
    }

    pub fn with_sched(self, action: impl Into<ActionKey>) -> Self {
        self.with_arg(Arg::Sched(action.into()))
    }

    pub fn with_caller(self, caller: impl Into<PortKey>) -> Self {
        self.with_arg(Arg::Caller(caller.into()))
    }

    /// Attach a soft deadline. If the late handler is omitted, a miss is
    /// only logged.
    pub fn with_deadline(mut self, delay: TimeValue) -> Self {
        self.deadline_delay = Some(delay);
        self
    }

    pub fn with_late_handler(
        mut self,
        late: impl Fn(&mut ReactionCtx<'_>) -> Result<(), ReactionError> + Send + Sync + 'static,
    ) -> Self {
        self.late = Some(Arc::new(late));
        self
    }

    /// Validate the declarations and register the unit with its reactor.
    pub fn finish(self) -> Result<ReactionKey, RuntimeError> {
        let Self {
            env,
            reactor,
            name,
            mut kind,
            body,
            triggers,
            mut args,
            deadline_delay,
            late,
        } = self;

        if !env.reactors.contains_key(reactor) {
            return Err(RuntimeError::KeyNotFound { kind: "reactor" });
        }

        // Resolve trigger declarations, expanding multiports and the
        // built-in startup/shutdown actions.
        let mut resolved: Vec<TriggerRef> = Vec::with_capacity(triggers.len());
        for trigger in &triggers {
            match *trigger {
                Trigger::Port(port) => resolved.push(TriggerRef::Port(port)),
                Trigger::MultiPort(multiport) => {
                    let members = env
                        .multiports
                        .get(multiport)
                        .ok_or(RuntimeError::KeyNotFound { kind: "multiport" })?;
                    resolved.extend(members.ports.iter().map(|&p| TriggerRef::Port(p)));
                }
                Trigger::Action(action) => resolved.push(TriggerRef::Action(action)),
                Trigger::Timer(timer) => resolved.push(TriggerRef::Timer(timer)),
                Trigger::Startup => {
                    resolved.push(TriggerRef::Action(env.reactors[reactor].startup))
                }
                Trigger::Shutdown => {
                    resolved.push(TriggerRef::Action(env.reactors[reactor].shutdown))
                }
            }
        }

        // Capability checks: triggers and arguments must be accessible
        // from the declaring reactor.
        for trigger in &resolved {
            match *trigger {
                TriggerRef::Port(port) => {
                    env.grant_key(reactor, ComponentId::Port(port))?;
                }
                TriggerRef::Action(action) => {
                    env.grant_key(reactor, ComponentId::Action(action))?;
                }
                TriggerRef::Timer(timer) => {
                    env.grant_key(reactor, ComponentId::Timer(timer))?;
                }
            }
        }
        for arg in &args {
            match *arg {
                Arg::Read(port) | Arg::Write(port) | Arg::Caller(port) | Arg::Callee(port) => {
                    env.grant_key(reactor, ComponentId::Port(port))?;
                }
                Arg::ReadMulti(multiport) | Arg::WriteMulti(multiport) => {
                    env.grant_key(reactor, ComponentId::MultiPort(multiport))?;
                }
                Arg::Sched(action) => {
                    env.grant_key(reactor, ComponentId::Action(action))?;
                }
            }
        }

        // A unit triggered by a callee port is a procedure: exactly one
        // trigger, one procedure per callee, and never a mutation.
        let callee_triggers: Vec<PortKey> = resolved
            .iter()
            .filter_map(|t| match t {
                TriggerRef::Port(p) if env.ports[*p].kind() == PortKind::Callee => Some(*p),
                _ => None,
            })
            .collect();
        if let Some(&callee) = callee_triggers.first() {
            if resolved.len() != 1 || kind == ReactionKind::Mutation {
                return Err(RuntimeError::IllegalConnection {
                    src: env.fqn(ComponentId::Port(callee)),
                    dst: name.clone(),
                    reason: "a procedure must have its callee port as sole trigger".into(),
                });
            }
            if env.ports[callee]
                .callee()
                .and_then(|c| c.procedure)
                .is_some()
            {
                return Err(RuntimeError::IllegalConnection {
                    src: env.fqn(ComponentId::Port(callee)),
                    dst: name.clone(),
                    reason: "callee port already has a bound procedure".into(),
                });
            }
            kind = ReactionKind::Procedure;
            if !args.contains(&Arg::Callee(callee)) {
                args.push(Arg::Callee(callee));
            }
        }

        let triggered_immediately = resolved.iter().any(|t| match *t {
            TriggerRef::Action(action) => env.actions[action].class == ActionClass::Startup,
            TriggerRef::Timer(timer) => env.timers[timer].offset.is_zero(),
            TriggerRef::Port(_) => false,
        });

        let token = env.mint();
        let meta = ComponentMeta::new(&name, reactor, token);
        let key = env.reactions.insert(crate::Reaction {
            meta,
            kind,
            triggers: resolved.clone(),
            args: args.clone(),
            body,
            deadline: deadline_delay.map(|delay| crate::Deadline { delay, late }),
            priority: 0,
            active: true,
            triggered_immediately,
        });
        env.reactors[reactor].register(ComponentId::Reaction(key), token, &name)?;

        // Resolve the port sets first: triggers and reads are sources,
        // writes are effects.
        let mut source_ports: Vec<PortKey> = resolved
            .iter()
            .filter_map(|t| match t {
                TriggerRef::Port(port) => Some(*port),
                _ => None,
            })
            .collect();
        let mut effect_ports: Vec<PortKey> = Vec::new();
        for arg in &args {
            match *arg {
                Arg::Read(port) => source_ports.push(port),
                Arg::Write(port) => effect_ports.push(port),
                Arg::ReadMulti(multiport) => {
                    source_ports.extend(env.multiports[multiport].ports.iter().copied())
                }
                Arg::WriteMulti(multiport) => {
                    effect_ports.extend(env.multiports[multiport].ports.iter().copied())
                }
                Arg::Sched(_) | Arg::Caller(_) | Arg::Callee(_) => {}
            }
        }

        // Record local dependencies: the declaration-order chain, the
        // trigger and read edges, and the write edges with their
        // causality summary.
        let reactor_entry = &mut env.reactors[reactor];
        let previous = match kind {
            ReactionKind::Mutation => reactor_entry.mutations.last().copied(),
            _ => reactor_entry
                .reactions
                .last()
                .copied()
                .or_else(|| reactor_entry.last_mutation()),
        };
        reactor_entry.dependencies.add_node(DepNode::Reaction(key));
        if let Some(previous) = previous {
            reactor_entry
                .dependencies
                .add_edge(DepNode::Reaction(key), DepNode::Reaction(previous));
        }
        match kind {
            ReactionKind::Mutation => reactor_entry.mutations.push(key),
            _ => reactor_entry.reactions.push(key),
        }
        for &port in &source_ports {
            reactor_entry
                .dependencies
                .add_edge(DepNode::Reaction(key), DepNode::Port(port));
        }
        for &port in &effect_ports {
            reactor_entry
                .dependencies
                .add_edge(DepNode::Port(port), DepNode::Reaction(key));
        }
        // Causality summary: every effect depends on every source.
        for &effect in &effect_ports {
            for &source in &source_ports {
                reactor_entry.causality.add_edge(effect, source);
            }
        }

        // Register with the trigger managers.
        for trigger in &resolved {
            match *trigger {
                TriggerRef::Port(port) => {
                    if env.ports[port].kind() == PortKind::Callee {
                        let state = env.ports[port].callee_mut().expect("checked above");
                        state.procedure = Some(key);
                        state.last_caller = Some(key);
                    } else {
                        env.ports[port].triggers.push(key);
                    }
                }
                TriggerRef::Action(action) => env.actions[action].triggers.push(key),
                TriggerRef::Timer(timer) => env.timers[timer].triggers.push(key),
            }
        }

        env.graph_dirty = true;
        Ok(key)
    }
}
