//! Load Targets
//!
//! Per-node loading state, the generational arena that stores it, and the
//! epoch guards that detect re-entrant supersession.

use std::rc::Rc;

use crate::channel::Channel;
use crate::content::{FallbackReason, ObjectKind};
use crate::element::ElementInfo;
use crate::host::StreamConsumer;
use crate::resolver::Parameters;
use crate::tasks::TaskToken;
use crate::{InstanceId, NodeId, SubDocumentId};

/// Generational handle to a load target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TargetId {
    pub index: u32,
    pub generation: u32,
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Generational arena (slot map)
pub(crate) struct TargetArena<T> {
    slots: Vec<Slot<T>>,
    free_list: Vec<u32>,
}

impl<T> TargetArena<T> {
    pub fn new() -> Self {
        Self { slots: Vec::new(), free_list: Vec::new() }
    }

    /// Insert item
    pub fn insert(&mut self, value: T) -> TargetId {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            TargetId { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { value: Some(value), generation: 0 });
            TargetId { index, generation: 0 }
        }
    }

    /// Get item
    pub fn get(&self, id: TargetId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, id: TargetId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Remove item; the handle and all copies of it go stale
    pub fn remove(&mut self, id: TargetId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(id.index);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for TargetArena<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Loader-wide monotonically increasing guard token
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Epoch(pub u64);

/// In-flight state of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Guard {
    #[default]
    Idle,
    Held(Epoch),
}

/// Operations that may be superseded by re-entrant calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Loading,
    Instantiating,
    Stopping,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InFlight {
    pub loading: Guard,
    pub instantiating: Guard,
    pub stopping: Guard,
}

impl InFlight {
    pub fn slot(&self, op: Operation) -> Guard {
        match op {
            Operation::Loading => self.loading,
            Operation::Instantiating => self.instantiating,
            Operation::Stopping => self.stopping,
        }
    }

    pub fn slot_mut(&mut self, op: Operation) -> &mut Guard {
        match op {
            Operation::Loading => &mut self.loading,
            Operation::Instantiating => &mut self.instantiating,
            Operation::Stopping => &mut self.stopping,
        }
    }
}

/// A running module instance as the loader tracks it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceHandle {
    pub id: InstanceId,
    pub mime: String,
    pub name: String,
    /// Event-loop nesting level at spawn
    pub nesting_level: u32,
}

/// Loading state of one object element
pub(crate) struct LoadTarget {
    pub node: NodeId,
    pub element: ElementInfo,
    pub kind: ObjectKind,
    pub params: Parameters,
    pub fallback: FallbackReason,
    pub activated: bool,
    pub play_preview_canceled: bool,
    pub channel: Option<Channel>,
    /// A channel was opened for the current resolution pass
    pub channel_loaded: bool,
    pub final_listener: Option<Rc<dyn StreamConsumer>>,
    pub instance: Option<InstanceHandle>,
    pub subdocument: Option<SubDocumentId>,
    pub guards: InFlight,
    pub pending_instantiate: Option<TaskToken>,
    pub pending_stop_check: Option<TaskToken>,
    pub script_requested: bool,
    pub network_created: bool,
}

impl LoadTarget {
    pub fn new(node: NodeId, element: ElementInfo) -> Self {
        Self {
            node,
            element,
            kind: ObjectKind::Loading,
            params: Parameters::default(),
            fallback: FallbackReason::Alternate,
            activated: false,
            play_preview_canceled: false,
            channel: None,
            channel_loaded: false,
            final_listener: None,
            instance: None,
            subdocument: None,
            guards: InFlight::default(),
            pending_instantiate: None,
            pending_stop_check: None,
            script_requested: false,
            network_created: true,
        }
    }

    pub fn channel_id(&self) -> Option<crate::ChannelId> {
        self.channel.as_ref().map(|c| c.id)
    }
}
