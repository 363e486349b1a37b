use std::any::{type_name, Any, TypeId};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::warn;

pub type ListenerResult = Result<(), String>;

type ErasedListener = Arc<dyn Fn(&dyn Any) -> ListenerResult + Send + Sync>;

/// Typed publish/subscribe registry.
///
/// Listeners are keyed by the concrete notification type, so a publish of
/// `N` reaches only listeners subscribed to `N`. A listener that returns an
/// error or panics is logged and skipped; the remaining listeners still run.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: DashMap<TypeId, Vec<ErasedListener>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<N, F>(&self, listener: F)
    where
        N: Any,
        F: Fn(&N) -> ListenerResult + Send + Sync + 'static,
    {
        let erased: ErasedListener = Arc::new(move |notification: &dyn Any| {
            match notification.downcast_ref::<N>() {
                Some(n) => listener(n),
                None => Ok(()),
            }
        });
        self.listeners
            .entry(TypeId::of::<N>())
            .or_default()
            .push(erased);
    }

    pub fn listener_count<N: Any>(&self) -> usize {
        self.listeners
            .get(&TypeId::of::<N>())
            .map(|l| l.len())
            .unwrap_or(0)
    }

    /// Deliver to every listener of `N`; returns how many succeeded
    pub fn publish<N: Any>(&self, notification: &N) -> usize {
        // Clone out so listeners may subscribe/publish without deadlocking the map
        let listeners: Vec<ErasedListener> = match self.listeners.get(&TypeId::of::<N>()) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut delivered = 0;
        for (idx, listener) in listeners.iter().enumerate() {
            match catch_unwind(AssertUnwindSafe(|| listener(notification))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(message)) => warn!(
                    notification = type_name::<N>(),
                    listener = idx,
                    error = %message,
                    "Listener failed"
                ),
                Err(_) => warn!(
                    notification = type_name::<N>(),
                    listener = idx,
                    "Listener panicked"
                ),
            }
        }
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Ping(u32);
    struct Pong;

    #[test]
    fn test_publish_reaches_exact_type_only() {
        let registry = ListenerRegistry::new();
        let pings = Arc::new(AtomicUsize::new(0));
        let pongs = Arc::new(AtomicUsize::new(0));

        let p = Arc::clone(&pings);
        registry.subscribe(move |n: &Ping| {
            p.fetch_add(n.0 as usize, Ordering::SeqCst);
            Ok(())
        });
        let p = Arc::clone(&pongs);
        registry.subscribe(move |_: &Pong| {
            p.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(registry.publish(&Ping(3)), 1);
        assert_eq!(pings.load(Ordering::SeqCst), 3);
        assert_eq!(pongs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_failing_listeners_are_isolated() {
        let registry = ListenerRegistry::new();
        let reached = Arc::new(AtomicUsize::new(0));

        registry.subscribe(|_: &Ping| Err("nope".to_string()));
        registry.subscribe(|_: &Ping| panic!("listener bug"));
        let r = Arc::clone(&reached);
        registry.subscribe(move |_: &Ping| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert_eq!(registry.listener_count::<Ping>(), 3);
        assert_eq!(registry.publish(&Ping(1)), 1);
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_publish_without_listeners() {
        let registry = ListenerRegistry::new();
        assert_eq!(registry.publish(&Pong), 0);
    }
}
