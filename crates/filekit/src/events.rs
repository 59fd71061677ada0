//! Synchronous lifecycle hooks fired around save and delete.
//!
//! Handlers run inline, in registration order, on the task performing the
//! operation. The first handler to return an error stops dispatch and aborts
//! the operation; this is the only way a `Before*` handler can veto.

use crate::error::{HookError, Result, StorageError};
use fxhash::FxHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageEventKind {
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
}

impl StorageEventKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BeforeSave => "before_save",
            Self::AfterSave => "after_save",
            Self::BeforeDelete => "before_delete",
            Self::AfterDelete => "after_delete",
        }
    }
}

impl fmt::Display for StorageEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The record handed to every handler.
#[derive(Debug)]
pub struct StorageEvent<'a, B> {
    pub kind: StorageEventKind,
    /// Destination path for saves, target path for deletes.
    pub path: &'a str,
    /// The store the operation runs against.
    pub store: &'a B,
}

type Handler<B> = Arc<dyn Fn(&StorageEvent<'_, B>) -> Result<(), HookError> + Send + Sync>;

/// Registration table mapping each [`StorageEventKind`] to its ordered handlers.
pub struct LifecycleNotifier<B> {
    handlers: RwLock<FxHashMap<StorageEventKind, Vec<Handler<B>>>>,
}

impl<B> Default for LifecycleNotifier<B> {
    fn default() -> Self {
        Self { handlers: RwLock::new(FxHashMap::default()) }
    }
}

impl<B> fmt::Debug for LifecycleNotifier<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.read();
        let mut map = f.debug_map();
        for (kind, list) in handlers.iter() {
            map.entry(kind, &list.len());
        }
        map.finish()
    }
}

impl<B> LifecycleNotifier<B> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler for `kind`.
    pub fn on<F>(&self, kind: StorageEventKind, handler: F)
    where
        F: Fn(&StorageEvent<'_, B>) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.handlers.write().entry(kind).or_default().push(Arc::new(handler));
    }

    /// Removes every handler registered for `kind`, returning how many were dropped.
    pub fn clear(&self, kind: StorageEventKind) -> usize {
        self.handlers.write().remove(&kind).map_or(0, |list| list.len())
    }

    #[must_use]
    pub fn handler_count(&self, kind: StorageEventKind) -> usize {
        self.handlers.read().get(&kind).map_or(0, Vec::len)
    }

    /// Invokes the handlers for `kind` in registration order.
    ///
    /// Handlers may register further handlers; those apply from the next dispatch.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Observer`] with the first handler failure; later
    /// handlers are not invoked.
    pub fn dispatch(&self, kind: StorageEventKind, path: &str, store: &B) -> Result<()> {
        let handlers = self.handlers.read().get(&kind).cloned().unwrap_or_default();
        if handlers.is_empty() {
            return Ok(());
        }

        let event = StorageEvent { kind, path, store };
        for (position, handler) in handlers.iter().enumerate() {
            handler(&event).map_err(|source| StorageError::Observer {
                source,
                context: Some(format!("{kind} handler #{position} for {path}").into()),
            })?;
        }

        trace!(event = %kind, path, count = handlers.len(), "Lifecycle event dispatched");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn handlers_run_in_registration_order() {
        let notifier = LifecycleNotifier::<()>::new();
        let log = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for id in 0..3 {
            let log = log.clone();
            notifier.on(StorageEventKind::AfterSave, move |e| {
                log.lock().push((id, e.path.to_owned()));
                Ok(())
            });
        }

        notifier.dispatch(StorageEventKind::AfterSave, "a/1/x.png", &()).unwrap();
        assert_eq!(
            *log.lock(),
            vec![(0, "a/1/x.png".to_owned()), (1, "a/1/x.png".to_owned()), (2, "a/1/x.png".to_owned())]
        );
    }

    #[test]
    fn kinds_are_isolated() {
        let notifier = LifecycleNotifier::<()>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        notifier.on(StorageEventKind::BeforeDelete, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        notifier.dispatch(StorageEventKind::AfterDelete, "x", &()).unwrap();
        notifier.dispatch(StorageEventKind::BeforeSave, "x", &()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        notifier.dispatch(StorageEventKind::BeforeDelete, "x", &()).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failure_stops_remaining_handlers() {
        let notifier = LifecycleNotifier::<()>::new();
        let later = Arc::new(AtomicUsize::new(0));

        notifier.on(StorageEventKind::BeforeSave, |_| Err("quota exceeded".into()));
        let l = later.clone();
        notifier.on(StorageEventKind::BeforeSave, move |_| {
            l.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let err = notifier.dispatch(StorageEventKind::BeforeSave, "x", &()).unwrap_err();
        assert!(matches!(err, StorageError::Observer { .. }));
        assert!(err.to_string().contains("quota exceeded"));
        assert_eq!(later.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handlers_can_register_during_dispatch() {
        let notifier = Arc::new(LifecycleNotifier::<()>::new());
        let inner = notifier.clone();
        notifier.on(StorageEventKind::AfterSave, move |_| {
            inner.on(StorageEventKind::AfterSave, |_| Ok(()));
            Ok(())
        });

        notifier.dispatch(StorageEventKind::AfterSave, "x", &()).unwrap();
        assert_eq!(notifier.handler_count(StorageEventKind::AfterSave), 2);
        assert_eq!(notifier.clear(StorageEventKind::AfterSave), 2);
    }
}
