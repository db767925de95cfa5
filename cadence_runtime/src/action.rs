//! Actions: self-scheduled triggers.
//!
//! Scheduling an action enqueues a tagged event. Logical actions are
//! anchored to the current logical time; physical actions to the wall
//! clock. Startup and shutdown are special logical actions owned by every
//! reactor and managed by the main loop.

use std::{any::TypeId, marker::PhantomData, sync::Arc};

use crate::{ActionKey, ComponentMeta, ReactionKey, ReactorData, Tag, TimeValue};

/// The smallest admitted spacing between two events on the same action.
pub const DEFAULT_MIN_INTER_ARRIVAL: TimeValue = TimeValue::new(0, 1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionClass {
    /// Scheduled relative to the current logical time.
    Logical,
    /// Scheduled relative to the current physical time.
    Physical,
    /// Delivered once when the owning reactor starts.
    Startup,
    /// Delivered once when the owning reactor shuts down.
    Shutdown,
}

impl ActionClass {
    pub fn is_logical(&self) -> bool {
        !matches!(self, ActionClass::Physical)
    }
}

pub struct Action {
    pub(crate) meta: ComponentMeta,
    pub(crate) class: ActionClass,
    pub(crate) min_delay: TimeValue,
    /// Smallest admitted spacing between two events on this action.
    pub(crate) min_inter_arrival: TimeValue,
    pub(crate) value: Option<Arc<dyn ReactorData>>,
    pub(crate) tag: Option<Tag>,
    /// Reactions staged when this action becomes present.
    pub(crate) triggers: Vec<ReactionKey>,
    pub(crate) type_id: TypeId,
    pub(crate) type_name: &'static str,
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action")
            .field("name", &self.meta.name)
            .field("class", &self.class)
            .field("min_delay", &self.min_delay)
            .field("tag", &self.tag)
            .finish()
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Action({})", self.meta.name)
    }
}

impl Action {
    pub(crate) fn new<T: ReactorData>(
        meta: ComponentMeta,
        class: ActionClass,
        min_delay: TimeValue,
    ) -> Self {
        Self {
            meta,
            class,
            min_delay,
            min_inter_arrival: DEFAULT_MIN_INTER_ARRIVAL,
            value: None,
            tag: None,
            triggers: Vec::new(),
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn class(&self) -> ActionClass {
        self.class
    }

    pub fn min_delay(&self) -> TimeValue {
        self.min_delay
    }

    pub fn min_inter_arrival(&self) -> TimeValue {
        self.min_inter_arrival
    }

    /// True iff the action was delivered at the given tag.
    pub fn is_present(&self, current: Tag) -> bool {
        self.tag == Some(current)
    }
}

/// A typed handle to an action.
#[derive(Debug)]
pub struct TypedActionKey<T: ReactorData = ()>(ActionKey, PhantomData<fn() -> T>);

impl<T: ReactorData> Copy for TypedActionKey<T> {}

impl<T: ReactorData> Clone for TypedActionKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: ReactorData> TypedActionKey<T> {
    pub(crate) fn new(key: ActionKey) -> Self {
        Self(key, PhantomData)
    }

    pub fn key(&self) -> ActionKey {
        self.0
    }
}

impl<T: ReactorData> From<TypedActionKey<T>> for ActionKey {
    fn from(typed: TypedActionKey<T>) -> Self {
        typed.0
    }
}
