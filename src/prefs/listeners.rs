// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Change listener registry.
//!
//! Listeners are held weakly: registering does not keep a listener alive,
//! and registrations whose listener has been dropped are pruned the next
//! time a notification is delivered.
//!
//! All callbacks run on one dispatcher task, never on the task that
//! committed the change, and in the order the changes were committed.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::{mpsc, oneshot};

/// Receives the logical keys changed by each committed transaction.
pub trait StoreListener: Send + Sync {
    /// Called once per changed key. `None` is the null key.
    fn on_store_changed(&self, key: Option<&str>);
}

struct Registration {
    id: usize,
    listener: Weak<dyn StoreListener>,
}

enum Dispatch {
    Changed(Vec<Option<String>>),
    Flush(oneshot::Sender<()>),
}

fn identity(listener: &Arc<dyn StoreListener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

#[derive(Clone)]
pub struct ListenerRegistry {
    registrations: Arc<Mutex<Vec<Registration>>>,
    dispatch: mpsc::UnboundedSender<Dispatch>,
}

impl ListenerRegistry {
    /// Create a registry and spawn its dispatcher on the current runtime.
    ///
    /// The dispatcher stops once every clone of the registry is dropped.
    pub fn spawn() -> Self {
        let registrations = Arc::new(Mutex::new(Vec::new()));
        let (dispatch, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_dispatcher(registrations.clone(), rx));
        Self {
            registrations,
            dispatch,
        }
    }

    /// Register a listener. Registering the same listener again is a no-op.
    pub fn register(&self, listener: &Arc<dyn StoreListener>) {
        let id = identity(listener);
        let mut registrations = self.lock();
        // A dead entry at the same address belongs to a dropped listener.
        registrations.retain(|r| r.id != id || r.listener.strong_count() > 0);
        if registrations.iter().any(|r| r.id == id) {
            return;
        }
        registrations.push(Registration {
            id,
            listener: Arc::downgrade(listener),
        });
    }

    pub fn unregister(&self, listener: &Arc<dyn StoreListener>) {
        let id = identity(listener);
        self.lock().retain(|r| r.id != id);
    }

    /// Queue delivery of `keys` to every live listener.
    pub fn notify(&self, keys: Vec<Option<String>>) {
        if keys.is_empty() {
            return;
        }
        // The dispatcher lives as long as any registry handle, including self.
        let _ = self.dispatch.send(Dispatch::Changed(keys));
    }

    /// Wait until every notification queued before this call was delivered.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.dispatch.send(Dispatch::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }

    /// Number of registrations, including dead ones not yet pruned.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Registration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_dispatcher(
    registrations: Arc<Mutex<Vec<Registration>>>,
    mut rx: mpsc::UnboundedReceiver<Dispatch>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            Dispatch::Changed(keys) => deliver(&registrations, &keys),
            Dispatch::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

fn deliver(registrations: &Mutex<Vec<Registration>>, keys: &[Option<String>]) {
    // Upgrade under the lock, call outside it so listeners may
    // register or unregister from inside a callback.
    let live: Vec<Arc<dyn StoreListener>> = {
        let mut registrations = registrations.lock().unwrap_or_else(PoisonError::into_inner);
        let before = registrations.len();
        registrations.retain(|r| r.listener.strong_count() > 0);
        let pruned = before - registrations.len();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned dropped store listeners");
        }
        registrations
            .iter()
            .filter_map(|r| r.listener.upgrade())
            .collect()
    };

    for listener in live {
        for key in keys {
            listener.on_store_changed(key.as_deref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<Option<String>>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<Option<String>> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl StoreListener for Recorder {
        fn on_store_changed(&self, key: Option<&str>) {
            self.seen.lock().unwrap().push(key.map(str::to_string));
        }
    }

    fn keys(names: &[&str]) -> Vec<Option<String>> {
        names.iter().map(|n| Some(n.to_string())).collect()
    }

    #[tokio::test]
    async fn delivers_each_key_to_each_listener() {
        let registry = ListenerRegistry::spawn();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let a_dyn: Arc<dyn StoreListener> = a.clone();
        let b_dyn: Arc<dyn StoreListener> = b.clone();
        registry.register(&a_dyn);
        registry.register(&b_dyn);

        registry.notify(vec![Some("x".to_string()), None]);
        registry.flush().await;

        assert_eq!(a.seen(), vec![Some("x".to_string()), None]);
        assert_eq!(b.seen(), vec![Some("x".to_string()), None]);
    }

    #[tokio::test]
    async fn registering_twice_delivers_once() {
        let registry = ListenerRegistry::spawn();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn StoreListener> = recorder.clone();
        registry.register(&listener);
        registry.register(&listener);
        assert_eq!(registry.len(), 1);

        registry.notify(keys(&["k"]));
        registry.flush().await;
        assert_eq!(recorder.seen(), keys(&["k"]));
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let registry = ListenerRegistry::spawn();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn StoreListener> = recorder.clone();
        registry.register(&listener);
        registry.unregister(&listener);
        // Unknown listener is a no-op
        registry.unregister(&listener);

        registry.notify(keys(&["k"]));
        registry.flush().await;
        assert!(recorder.seen().is_empty());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropped_listeners_are_pruned_on_delivery() {
        let registry = ListenerRegistry::spawn();
        let kept = Arc::new(Recorder::default());
        let kept_dyn: Arc<dyn StoreListener> = kept.clone();
        registry.register(&kept_dyn);
        {
            let dropped: Arc<dyn StoreListener> = Arc::new(Recorder::default());
            registry.register(&dropped);
        }
        assert_eq!(registry.len(), 2);

        registry.notify(keys(&["k"]));
        registry.flush().await;

        assert_eq!(registry.len(), 1);
        assert_eq!(kept.seen(), keys(&["k"]));
    }

    #[tokio::test]
    async fn notifications_arrive_in_commit_order() {
        let registry = ListenerRegistry::spawn();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn StoreListener> = recorder.clone();
        registry.register(&listener);

        registry.notify(keys(&["first"]));
        registry.notify(keys(&["second", "third"]));
        registry.flush().await;

        assert_eq!(recorder.seen(), keys(&["first", "second", "third"]));
    }

    #[tokio::test]
    async fn notify_returns_before_callbacks_run() {
        let registry = ListenerRegistry::spawn();
        let recorder = Arc::new(Recorder::default());
        let listener: Arc<dyn StoreListener> = recorder.clone();
        registry.register(&listener);

        // On a current-thread runtime the dispatcher cannot run until this
        // task yields, so nothing is delivered inside notify().
        registry.notify(keys(&["k"]));
        assert!(recorder.seen().is_empty());
        registry.flush().await;
        assert_eq!(recorder.seen(), keys(&["k"]));
    }
}
