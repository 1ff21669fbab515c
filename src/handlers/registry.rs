use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::traits::TaskHandler;
use crate::tasks::model::TaskKind;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no handler registered for task kind: {0}")]
    NotFound(TaskKind),

    #[error("handler already registered for task kind: {0}")]
    Duplicate(TaskKind),
}

/// Registry mapping task kinds to handler instances
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its own kind; a kind can only be taken once
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) -> Result<(), RegistryError> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        debug!(%kind, "Registered handler");
        self.handlers.insert(kind, handler);
        Ok(())
    }

    /// Register or replace the handler for its kind
    pub fn replace(&mut self, handler: Arc<dyn TaskHandler>) {
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: TaskKind) -> Result<Arc<dyn TaskHandler>, RegistryError> {
        self.handlers
            .get(&kind)
            .cloned()
            .ok_or(RegistryError::NotFound(kind))
    }

    pub fn has_handler(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn kinds(&self) -> Vec<TaskKind> {
        self.handlers.keys().copied().collect()
    }

    /// Kinds from `expected` that have no handler
    pub fn missing(&self, expected: &[TaskKind]) -> Vec<TaskKind> {
        expected
            .iter()
            .copied()
            .filter(|kind| !self.has_handler(*kind))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{HandlerError, TaskContext};
    use crate::tasks::model::{TaskOutput, TaskResult};
    use async_trait::async_trait;

    struct Noop(TaskKind);

    #[async_trait]
    impl TaskHandler for Noop {
        fn kind(&self) -> TaskKind {
            self.0
        }

        async fn execute(&self, _ctx: TaskContext) -> Result<TaskOutput, HandlerError> {
            Ok(TaskResult::default().into())
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop(TaskKind::PackImages))).unwrap();

        assert!(registry.get(TaskKind::PackImages).is_ok());
        assert!(registry.has_handler(TaskKind::PackImages));
        assert_eq!(registry.kinds(), vec![TaskKind::PackImages]);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Noop(TaskKind::GallerySearch))).unwrap();

        let err = registry
            .register(Arc::new(Noop(TaskKind::GallerySearch)))
            .unwrap_err();
        assert!(matches!(err, RegistryError::Duplicate(TaskKind::GallerySearch)));

        registry.replace(Arc::new(Noop(TaskKind::GallerySearch)));
        assert_eq!(registry.kinds().len(), 1);
    }

    #[test]
    fn test_missing_handler_message() {
        let registry = HandlerRegistry::new();
        let err = registry.get(TaskKind::ConvertTxtToEpub).err().unwrap();
        assert_eq!(
            err.to_string(),
            "no handler registered for task kind: convert-txt-to-epub"
        );
        assert_eq!(
            registry.missing(&[TaskKind::ConvertTxtToEpub]),
            vec![TaskKind::ConvertTxtToEpub]
        );
    }
}
