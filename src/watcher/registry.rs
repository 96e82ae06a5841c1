//! Tag-keyed registry of targets per event type.
//!
//! Tags are unique within one event type and independent across types.
//! Multi-event registration is all-or-nothing: every requested type is
//! checked before any insertion happens.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;

use super::target::UNKNOWN_TAG;
use super::{FileEvent, Target, WatchError};

/// Which event types a registration applies to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventSelection {
    /// Every event in the taxonomy.
    #[default]
    All,
    One(FileEvent),
    Many(Vec<FileEvent>),
}

impl EventSelection {
    /// Build a selection from event names (see [`FileEvent`]'s `FromStr`).
    ///
    /// Fails on the first name outside the taxonomy.
    pub fn parse<S: AsRef<str>>(names: &[S]) -> Result<Self, WatchError> {
        let events = names
            .iter()
            .map(|name| name.as_ref().parse::<FileEvent>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(EventSelection::Many(events))
    }

    /// Resolve to a concrete, duplicate-free list of event types.
    fn resolve(&self) -> Result<Vec<FileEvent>, WatchError> {
        match self {
            EventSelection::All => Ok(FileEvent::ALL.to_vec()),
            EventSelection::One(event) => Ok(vec![*event]),
            EventSelection::Many(events) if events.is_empty() => Err(WatchError::NoEvents),
            EventSelection::Many(events) => {
                let mut resolved = Vec::with_capacity(events.len());
                for event in events {
                    if !resolved.contains(event) {
                        resolved.push(*event);
                    }
                }
                Ok(resolved)
            }
        }
    }
}

impl From<FileEvent> for EventSelection {
    fn from(event: FileEvent) -> Self {
        EventSelection::One(event)
    }
}

impl From<Vec<FileEvent>> for EventSelection {
    fn from(events: Vec<FileEvent>) -> Self {
        EventSelection::Many(events)
    }
}

impl From<&[FileEvent]> for EventSelection {
    fn from(events: &[FileEvent]) -> Self {
        EventSelection::Many(events.to_vec())
    }
}

impl<const N: usize> From<[FileEvent; N]> for EventSelection {
    fn from(events: [FileEvent; N]) -> Self {
        EventSelection::Many(events.to_vec())
    }
}

impl From<Option<FileEvent>> for EventSelection {
    fn from(event: Option<FileEvent>) -> Self {
        event.map_or(EventSelection::All, EventSelection::One)
    }
}

/// Registry mapping event type -> tag -> target.
pub struct TargetRegistry {
    targets: HashMap<FileEvent, IndexMap<String, Arc<dyn Target>>>,
}

impl TargetRegistry {
    /// Create a registry with an empty slot for every event type.
    pub fn new() -> Self {
        let targets = FileEvent::ALL
            .into_iter()
            .map(|event| (event, IndexMap::new()))
            .collect();
        Self { targets }
    }

    /// Register `target` for the selected events under `tag`.
    ///
    /// `tag` defaults to the target's declared name, or `"<Unknown>"` when it
    /// has none. Returns `Ok(false)` and changes nothing if the tag is already
    /// taken for any of the selected events.
    pub fn register(
        &mut self,
        target: Arc<dyn Target>,
        events: EventSelection,
        tag: Option<&str>,
    ) -> Result<bool, WatchError> {
        let events = events.resolve()?;
        let tag = tag
            .or_else(|| target.name())
            .unwrap_or(UNKNOWN_TAG)
            .to_string();

        // Validate every requested type before touching any of them
        for event in &events {
            let slot = self.targets.get(event).ok_or_else(|| WatchError::UnknownEvent {
                name: event.to_string(),
            })?;
            if slot.contains_key(&tag) {
                crate::debug_event!("registry", "tag taken", "{tag} for {event}");
                return Ok(false);
            }
        }

        for event in &events {
            if let Some(slot) = self.targets.get_mut(event) {
                slot.insert(tag.clone(), Arc::clone(&target));
            }
        }

        crate::debug_event!("registry", "registered", "{tag} for {} event types", events.len());
        Ok(true)
    }

    /// Remove the target stored under `tag` for `event`.
    ///
    /// Returns `false` if nothing was registered under that tag.
    pub fn unregister(&mut self, event: FileEvent, tag: &str) -> bool {
        match self.targets.get_mut(&event) {
            Some(slot) => slot.shift_remove(tag).is_some(),
            None => false,
        }
    }

    /// Tags registered for `event`, in registration order.
    pub fn list(&self, event: FileEvent) -> Vec<String> {
        self.targets
            .get(&event)
            .map(|slot| slot.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of the targets registered for `event`, in registration order.
    pub fn targets_for(&self, event: FileEvent) -> Vec<(String, Arc<dyn Target>)> {
        self.targets
            .get(&event)
            .map(|slot| {
                slot.iter()
                    .map(|(tag, target)| (tag.clone(), Arc::clone(target)))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Total number of (event, tag) entries.
    pub fn len(&self) -> usize {
        self.targets.values().map(IndexMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TargetRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for event in FileEvent::ALL {
            let tags = self.list(event);
            if !tags.is_empty() {
                map.entry(&event, &tags);
            }
        }
        map.finish()
    }
}
