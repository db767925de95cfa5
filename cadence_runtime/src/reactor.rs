//! Reactors: containers aggregating ports, actions, timers, reactions,
//! and child reactors, together with their local dependency graphs.

use std::collections::HashMap;

use crate::{
    ActionKey, BankInfo, ComponentId, ComponentMeta, DepNode, DependencyGraph, PortKey,
    ReactionKey, ReactorKey, RuntimeError, Token,
};

pub struct Reactor {
    pub(crate) meta: ComponentMeta,
    pub(crate) bank_info: Option<BankInfo>,
    /// Set on delivery of the startup event, cleared on shutdown.
    pub(crate) active: bool,
    /// Containment registry: component -> capability token. Registration
    /// is one-shot.
    pub(crate) key_chain: HashMap<ComponentId, Token>,
    /// Local dependency graph over ports, reactions, and mutations.
    pub(crate) dependencies: DependencyGraph<DepNode>,
    /// Port-only summary of reaction-induced dependencies, used for
    /// runtime cycle and feedback detection.
    pub(crate) causality: DependencyGraph<PortKey>,
    /// Mutations, in declaration order.
    pub(crate) mutations: Vec<ReactionKey>,
    /// Reactions, in declaration order.
    pub(crate) reactions: Vec<ReactionKey>,
    pub(crate) children: Vec<ReactorKey>,
    pub(crate) startup: ActionKey,
    pub(crate) shutdown: ActionKey,
}

impl std::fmt::Debug for Reactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reactor")
            .field("name", &self.meta.name)
            .field("bank_info", &self.bank_info)
            .field("active", &self.active)
            .field("mutations", &self.mutations)
            .field("reactions", &self.reactions)
            .field("children", &self.children)
            .finish()
    }
}

impl Reactor {
    pub(crate) fn new(
        meta: ComponentMeta,
        bank_info: Option<BankInfo>,
        startup: ActionKey,
        shutdown: ActionKey,
    ) -> Self {
        Self {
            meta,
            bank_info,
            active: false,
            key_chain: HashMap::new(),
            dependencies: DependencyGraph::new(),
            causality: DependencyGraph::new(),
            mutations: Vec::new(),
            reactions: Vec::new(),
            children: Vec::new(),
            startup,
            shutdown,
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn container(&self) -> ReactorKey {
        self.meta.container
    }

    pub fn bank_info(&self) -> Option<&BankInfo> {
        self.bank_info.as_ref()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn startup_action(&self) -> ActionKey {
        self.startup
    }

    pub fn shutdown_action(&self) -> ActionKey {
        self.shutdown
    }

    /// Register a component in the key chain. One-shot per component.
    pub(crate) fn register(
        &mut self,
        id: ComponentId,
        token: Token,
        name: &str,
    ) -> Result<(), RuntimeError> {
        if self.key_chain.contains_key(&id) {
            return Err(RuntimeError::AlreadyRegistered {
                what: name.to_owned(),
            });
        }
        self.key_chain.insert(id, token);
        Ok(())
    }

    pub(crate) fn token_for(&self, id: ComponentId) -> Option<Token> {
        self.key_chain.get(&id).copied()
    }

    pub(crate) fn last_mutation(&self) -> Option<ReactionKey> {
        self.mutations.last().copied()
    }

    pub(crate) fn first_reaction(&self) -> Option<ReactionKey> {
        self.reactions.first().copied()
    }

    /// The port-only causality summary exposed to the container for
    /// runtime feedback detection.
    pub(crate) fn causality_interface(&self) -> &DependencyGraph<PortKey> {
        &self.causality
    }
}
