//! Host services reachable from modules during `initialize`.
//!
//! The server registers things like the registry or the loader here; a module
//! asks for them by type: `ctx.client_hub().get::<ModuleRegistry>()`.
//! Keys are `type_name::<T>()`, so `T` may be a trait object.

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum ClientHubError {
    #[error("no service registered for type {0}")]
    NotFound(&'static str),
}

type Boxed = Box<dyn Any + Send + Sync>;

#[derive(Default)]
pub struct ClientHub {
    map: RwLock<HashMap<&'static str, Boxed>>,
}

impl ClientHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the service for `T`. Arcs already handed out stay valid.
    pub fn register<T>(&self, service: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.map
            .write()
            .insert(std::any::type_name::<T>(), Box::new(service));
    }

    pub fn get<T>(&self) -> Result<Arc<T>, ClientHubError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = std::any::type_name::<T>();
        self.map
            .read()
            .get(key)
            .and_then(|b| b.downcast_ref::<Arc<T>>())
            .cloned()
            .ok_or(ClientHubError::NotFound(key))
    }

    pub fn remove<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let boxed = self.map.write().remove(std::any::type_name::<T>())?;
        boxed.downcast::<Arc<T>>().ok().map(|b| *b)
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Severity: Send + Sync {
        fn floor(&self) -> u8;
    }

    struct Fixed(u8);
    impl Severity for Fixed {
        fn floor(&self) -> u8 {
            self.0
        }
    }

    #[test]
    fn register_get_and_remove_trait_object() {
        let hub = ClientHub::new();
        let svc: Arc<dyn Severity> = Arc::new(Fixed(7));
        hub.register::<dyn Severity>(svc.clone());

        let got = hub.get::<dyn Severity>().unwrap();
        assert_eq!(got.floor(), 7);
        assert!(Arc::ptr_eq(&svc, &got));

        assert!(hub.remove::<dyn Severity>().is_some());
        assert!(matches!(
            hub.get::<dyn Severity>(),
            Err(ClientHubError::NotFound(_))
        ));
        assert!(hub.is_empty());
    }
}
