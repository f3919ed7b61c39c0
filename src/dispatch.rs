//! Priority-ordered event handler tables.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{CvsError, Event, EventKind, HandlerError};

/// A registered event handler.
///
/// Handlers run synchronously on the task that polls the session. Returning
/// an error aborts delivery of the current event to lower-priority handlers
/// and surfaces as [`CvsError::Handler`] from the poll or verb call.
pub type Handler = Arc<dyn Fn(&Event) -> Result<(), HandlerError> + Send + Sync>;

/// Wraps a closure into a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Maps event kinds to handlers sorted by ascending priority.
///
/// Handlers with equal priority keep their registration order.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: HashMap<EventKind, Vec<(i32, Handler)>>,
}

impl std::fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut counts: Vec<_> = self
            .handlers
            .iter()
            .map(|(kind, list)| (kind.as_str(), list.len()))
            .collect();
        counts.sort_unstable();
        f.debug_struct("HandlerTable")
            .field("handlers", &counts)
            .finish()
    }
}

impl HandlerTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind` at `priority` (lower runs first).
    pub fn register(&mut self, kind: EventKind, priority: i32, handler: Handler) {
        let list = self.handlers.entry(kind).or_default();
        let idx = list.partition_point(|(p, _)| *p <= priority);
        list.insert(idx, (priority, handler));
    }

    /// Number of handlers registered for `kind`.
    pub fn len(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Returns `true` if no handler is registered at all.
    pub fn is_empty(&self) -> bool {
        self.handlers.values().all(Vec::is_empty)
    }

    /// Copies every handler of `self` into `target`, preserving priorities.
    pub(crate) fn replay_into(&self, target: &mut HandlerTable) {
        let mut kinds: Vec<_> = self.handlers.keys().copied().collect();
        kinds.sort_unstable();
        for kind in kinds {
            for (priority, handler) in &self.handlers[&kind] {
                target.register(kind, *priority, Arc::clone(handler));
            }
        }
    }

    /// Invokes every handler registered for `event.kind`, in order.
    pub fn dispatch(&self, event: &Event) -> Result<(), CvsError> {
        let Some(list) = self.handlers.get(&event.kind) else {
            return Ok(());
        };
        for (_, handler) in list {
            handler(event).map_err(|source| CvsError::Handler {
                event: event.kind.as_str(),
                source,
            })?;
        }
        Ok(())
    }
}
