//! Change notification events.
//!
//! Mutating cache operations publish a [`ChangeEvent`] per observable
//! change. While a bulk load is in progress (query merge, import, relation
//! linkage) events are queued instead of delivered, and flushed in FIFO
//! order when the outermost load scope closes, so subscribers never see a
//! partially linked graph.
//!
//! A subscriber returning `Err` for an event that was queued during a load
//! is logged and swallowed, with one exception: failures for attach-family
//! actions always propagate. Outside a load, subscriber failures propagate
//! to the mutating call.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use daybook_foundation::{EntityAction, EntityRef, Result, Value};

/// The property-level payload of a change event.
#[derive(Clone, Debug, PartialEq)]
pub enum PropertyChange {
    /// A data property changed value.
    Data {
        /// Property name, dotted for nested complex members.
        property: Arc<str>,
        /// Value before the change.
        old: Value,
        /// Value after the change.
        new: Value,
    },
    /// A to-one navigation changed target.
    Reference {
        /// Navigation property name.
        property: Arc<str>,
        /// Previous target, or the null reference.
        old: EntityRef,
        /// New target, or the null reference.
        new: EntityRef,
    },
    /// An entity joined a to-many navigation.
    CollectionAdd {
        /// Navigation property name.
        property: Arc<str>,
        /// The entity that joined.
        item: EntityRef,
    },
    /// An entity left a to-many navigation.
    CollectionRemove {
        /// Navigation property name.
        property: Arc<str>,
        /// The entity that left.
        item: EntityRef,
    },
}

impl PropertyChange {
    /// The name of the property this change describes.
    #[must_use]
    pub fn property(&self) -> &str {
        match self {
            Self::Data { property, .. }
            | Self::Reference { property, .. }
            | Self::CollectionAdd { property, .. }
            | Self::CollectionRemove { property, .. } => property,
        }
    }
}

/// One observable change in a cache.
#[derive(Clone, Debug, PartialEq)]
pub struct ChangeEvent {
    /// The entity the change happened to.
    pub entity: EntityRef,
    /// What kind of change this is.
    pub action: EntityAction,
    /// Property-level detail, present for `PropertyChange` actions.
    pub change: Option<PropertyChange>,
}

impl ChangeEvent {
    pub(crate) fn entity_level(entity: EntityRef, action: EntityAction) -> Self {
        Self {
            entity,
            action,
            change: None,
        }
    }

    pub(crate) fn property(entity: EntityRef, change: PropertyChange) -> Self {
        Self {
            entity,
            action: EntityAction::PropertyChange,
            change: Some(change),
        }
    }
}

/// Identifies a subscription for later removal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A change notification callback.
pub type Subscriber = Box<dyn FnMut(&ChangeEvent) -> Result<()>>;

/// Subscriber registry plus the load-scope event queue.
pub(crate) struct EventHub {
    subscribers: Vec<(SubscriberId, Subscriber)>,
    next_id: u64,
    queue: VecDeque<ChangeEvent>,
    load_depth: u32,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            next_id: 0,
            queue: VecDeque::new(),
            load_depth: 0,
        }
    }

    pub(crate) fn subscribe(&mut self, subscriber: Subscriber) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push((id, subscriber));
        id
    }

    pub(crate) fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(sid, _)| *sid != id);
        self.subscribers.len() != before
    }

    pub(crate) fn is_loading(&self) -> bool {
        self.load_depth > 0
    }

    pub(crate) fn enter_load(&mut self) {
        self.load_depth += 1;
    }

    /// Closes one load scope. Closing the outermost scope flushes the
    /// queue in FIFO order.
    ///
    /// Flushed events were produced during a load, so subscriber failures
    /// are swallowed unless the action is attach-family; a propagated
    /// failure drops the rest of the queue.
    pub(crate) fn exit_load(&mut self) -> Result<()> {
        debug_assert!(self.load_depth > 0, "unbalanced load scope");
        self.load_depth = self.load_depth.saturating_sub(1);
        if self.load_depth > 0 {
            return Ok(());
        }
        while let Some(event) = self.queue.pop_front() {
            self.deliver(&event, true)?;
        }
        Ok(())
    }

    /// Publishes one event: queued while loading, delivered otherwise.
    pub(crate) fn publish(&mut self, event: ChangeEvent) -> Result<()> {
        if self.load_depth > 0 {
            self.queue.push_back(event);
            Ok(())
        } else {
            self.deliver(&event, false)
        }
    }

    fn deliver(&mut self, event: &ChangeEvent, during_load: bool) -> Result<()> {
        for (id, subscriber) in &mut self.subscribers {
            if let Err(err) = subscriber(event) {
                if during_load && !event.action.is_attach() {
                    tracing::warn!(
                        subscriber = id.0,
                        action = ?event.action,
                        entity = ?event.entity,
                        error = %err,
                        "event subscriber failed during load; continuing"
                    );
                } else {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn queued_len(&self) -> usize {
        self.queue.len()
    }
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscribers.len())
            .field("queued", &self.queue.len())
            .field("load_depth", &self.load_depth)
            .finish()
    }
}
