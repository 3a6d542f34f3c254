use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::types::{ProcessDefinition, ProcessInstance};

/// Observable state of one fetched resource collection.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionState<T> {
    pub items: Vec<T>,
    /// True while at least one operation on this collection is outstanding.
    pub loading: bool,
    /// Message of the last failed operation; cleared by the next success.
    pub error: Option<String>,
    pub selected: Option<T>,
}

impl<T> Default for CollectionState<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            loading: false,
            error: None,
            selected: None,
        }
    }
}

/// Entities with a stable identity inside a collection.
pub trait Keyed {
    fn key(&self) -> &str;
}

impl Keyed for ProcessDefinition {
    fn key(&self) -> &str {
        &self.id
    }
}

impl Keyed for ProcessInstance {
    fn key(&self) -> &str {
        &self.id
    }
}

struct SlotInner<T> {
    state: CollectionState<T>,
    in_flight: usize,
}

/// A collection plus its in-flight counter. Writes go through the
/// orchestrator only; guards are never held across an `.await`.
pub(crate) struct Slot<T> {
    inner: RwLock<SlotInner<T>>,
}

impl<T> Slot<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(SlotInner {
                state: CollectionState::default(),
                in_flight: 0,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SlotInner<T>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SlotInner<T>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark one operation as outstanding until the returned guard drops.
    pub(crate) fn begin(&self) -> InFlight<'_, T> {
        let mut inner = self.write();
        inner.in_flight += 1;
        inner.state.loading = true;
        InFlight { slot: self }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.read().in_flight
    }

    /// Successful refresh: new items, no error.
    pub(crate) fn replace_items(&self, items: Vec<T>) {
        let mut inner = self.write();
        inner.state.items = items;
        inner.state.error = None;
    }

    /// Failed operation: items stay as they were.
    pub(crate) fn record_error(&self, message: String) {
        self.write().state.error = Some(message);
    }

    pub(crate) fn clear_error(&self) {
        self.write().state.error = None;
    }

    pub(crate) fn push(&self, item: T) {
        let mut inner = self.write();
        inner.state.items.push(item);
        inner.state.error = None;
    }

    pub(crate) fn clear_selection(&self) {
        self.write().state.selected = None;
    }
}

impl<T: Clone> Slot<T> {
    pub(crate) fn snapshot(&self) -> CollectionState<T> {
        self.read().state.clone()
    }
}

impl<T: Keyed + Clone> Slot<T> {
    /// Replace the item with the same key (and the selection, if it is that
    /// item), or append it when it is not present yet.
    pub(crate) fn upsert(&self, item: T) {
        let mut inner = self.write();
        let state = &mut inner.state;
        if state
            .selected
            .as_ref()
            .is_some_and(|sel| sel.key() == item.key())
        {
            state.selected = Some(item.clone());
        }
        match state.items.iter_mut().find(|i| i.key() == item.key()) {
            Some(existing) => *existing = item,
            None => state.items.push(item),
        }
        state.error = None;
    }

    /// Point the selection at the current copy of the selected item, or
    /// clear it when the item is gone.
    pub(crate) fn resync_selection(&self) {
        let mut inner = self.write();
        let state = &mut inner.state;
        if let Some(key) = state.selected.as_ref().map(|s| s.key().to_string()) {
            state.selected = state.items.iter().find(|i| i.key() == key).cloned();
        }
    }

    /// Select an item by key. Returns false when no such item is loaded.
    pub(crate) fn select(&self, key: &str) -> bool {
        let mut inner = self.write();
        let state = &mut inner.state;
        state.selected = state.items.iter().find(|i| i.key() == key).cloned();
        state.selected.is_some()
    }

    pub(crate) fn find(&self, key: &str) -> Option<T> {
        self.read()
            .state
            .items
            .iter()
            .find(|i| i.key() == key)
            .cloned()
    }
}

/// Outstanding-operation marker. Dropping it settles `loading`.
pub(crate) struct InFlight<'a, T> {
    slot: &'a Slot<T>,
}

impl<T> Drop for InFlight<'_, T> {
    fn drop(&mut self) {
        let mut inner = self.slot.write();
        inner.in_flight = inner.in_flight.saturating_sub(1);
        inner.state.loading = inner.in_flight > 0;
    }
}
