//! Metadata shared by every reactor component: naming, containment, and
//! the capability token minted at registration.

use crate::{ActionKey, MultiPortKey, PortKey, ReactionKey, ReactorKey, TimerKey, Token};

/// Bank membership of a reactor: its index and the bank width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankInfo {
    pub idx: usize,
    pub total: usize,
}

/// Identifies any component for containment registries and name lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentId {
    Reactor(ReactorKey),
    Port(PortKey),
    MultiPort(MultiPortKey),
    Action(ActionKey),
    Timer(TimerKey),
    Reaction(ReactionKey),
}

impl From<ReactorKey> for ComponentId {
    fn from(key: ReactorKey) -> Self {
        ComponentId::Reactor(key)
    }
}

impl From<PortKey> for ComponentId {
    fn from(key: PortKey) -> Self {
        ComponentId::Port(key)
    }
}

impl From<MultiPortKey> for ComponentId {
    fn from(key: MultiPortKey) -> Self {
        ComponentId::MultiPort(key)
    }
}

impl From<ActionKey> for ComponentId {
    fn from(key: ActionKey) -> Self {
        ComponentId::Action(key)
    }
}

impl From<TimerKey> for ComponentId {
    fn from(key: TimerKey) -> Self {
        ComponentId::Timer(key)
    }
}

impl From<ReactionKey> for ComponentId {
    fn from(key: ReactionKey) -> Self {
        ComponentId::Reaction(key)
    }
}

/// Fields common to every component. Each component belongs to exactly
/// one container reactor; the top-level reactor is its own container.
#[derive(Debug, Clone)]
pub struct ComponentMeta {
    pub(crate) name: String,
    pub(crate) container: ReactorKey,
    pub(crate) token: Token,
}

impl ComponentMeta {
    pub(crate) fn new(name: impl Into<String>, container: ReactorKey, token: Token) -> Self {
        Self {
            name: name.into(),
            container,
            token,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn container(&self) -> ReactorKey {
        self.container
    }
}
