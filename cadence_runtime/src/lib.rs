#![doc = include_str!("../README.md")]
#![deny(clippy::all)]

mod action;
mod alarm;
mod app;
mod component;
mod context;
mod env;
mod event;
mod graph;
mod port;
mod queue;
mod reaction;
mod reactor;
mod timer;

// Re-exports
pub use action::*;
pub use alarm::*;
pub use app::*;
pub use component::*;
pub use context::*;
pub use env::*;
pub use event::*;
pub use graph::*;
pub use port::*;
pub use queue::*;
pub use reaction::*;
pub use reactor::*;
pub use timer::*;

pub use cadence_core::keys::{
    ActionKey, MultiPortKey, PortKey, ReactionKey, ReactorKey, TimerKey, Token,
};
pub use cadence_core::time::{Tag, TimeError, TimeUnit, TimeValue};

use downcast_rs::DowncastSync;

/// Values carried by ports, actions, and events.
pub trait ReactorData: std::fmt::Debug + DowncastSync {}
impl<T> ReactorData for T where T: std::fmt::Debug + Send + Sync + 'static {}

downcast_rs::impl_downcast!(sync ReactorData);

#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("component '{what}' is already registered with a container")]
    AlreadyRegistered { what: String },

    #[error("capability key refused for '{what}': {reason}")]
    KeyRefused { what: String, reason: &'static str },

    #[error("illegal connection {src} -> {dst}: {reason}")]
    IllegalConnection {
        src: String,
        dst: String,
        reason: String,
    },

    #[error("a cycle in the reaction graph was found: {what:?}")]
    GraphCycle { what: Vec<ReactionKey> },

    #[error("event tag {event_tag} does not match the current tag {current_tag}")]
    TagViolation { event_tag: Tag, current_tag: Tag },

    #[error("reaction '{reaction}' failed: {source}")]
    ReactionFailure {
        reaction: String,
        #[source]
        source: ReactionError,
    },

    #[error("execution stopped with error: {0}")]
    ErrorStop(String),

    #[error("{kind} key not found")]
    KeyNotFound { kind: &'static str },

    #[error("mismatched dynamic types: found {found} but wanted {wanted}")]
    TypeMismatch {
        found: &'static str,
        wanted: &'static str,
    },

    #[error("'{port}' is not declared as {usage} of this reaction")]
    UndeclaredArgument { port: String, usage: &'static str },

    #[error("caller port '{0}' is not bound to a callee procedure")]
    UnboundCaller(String),

    #[error(transparent)]
    Time(#[from] TimeError),
}

/// Failure raised from within a reaction body. Propagates out of the
/// main loop and terminates execution.
#[derive(thiserror::Error, Debug)]
pub enum ReactionError {
    #[error("{0}")]
    Custom(String),

    #[error(transparent)]
    Runtime(Box<RuntimeError>),
}

impl ReactionError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }
}

impl From<RuntimeError> for ReactionError {
    fn from(err: RuntimeError) -> Self {
        Self::Runtime(Box::new(err))
    }
}
