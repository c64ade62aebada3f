//! Fan-out of group/device lifecycle events to per-`app_id` subscribers
//! (spec.md §4.4). Listeners are trait objects with default no-op method
//! bodies, registered by ownership (redesign flag, spec.md §9: "model
//! listeners as a trait/interface with default no-op methods").

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;

/// Callback surface a registered app may implement any subset of.
pub trait GroupListener: Send {
    fn on_group_created(&self, _group_id: &str) {}
    fn on_group_deleted(&self, _group_id: &str) {}
    fn on_device_bound(&self, _group_id: &str, _udid: &str) {}
    fn on_device_unbound(&self, _group_id: &str, _udid: &str) {}
    fn on_device_not_trusted(&self, _udid: &str) {}
    fn on_last_group_deleted(&self, _udid: &str) {}
    fn on_trusted_device_num_changed(&self, _new_count: u32) {}
}

pub struct Broadcaster {
    listeners: Mutex<HashMap<String, Box<dyn GroupListener>>>,
}

impl Broadcaster {
    pub fn new() -> Self {
        Broadcaster {
            listeners: Mutex::new(HashMap::new()),
        }
    }

    pub fn reg_listener(&self, app_id: &str, listener: Box<dyn GroupListener>) {
        self.listeners.lock().unwrap().insert(app_id.to_string(), listener);
    }

    pub fn unreg_listener(&self, app_id: &str) {
        self.listeners.lock().unwrap().remove(app_id);
    }

    pub fn post_group_created(&self, group_id: &str) {
        self.dispatch(|l| l.on_group_created(group_id));
    }

    pub fn post_group_deleted(&self, group_id: &str) {
        self.dispatch(|l| l.on_group_deleted(group_id));
    }

    pub fn post_device_bound(&self, group_id: &str, udid: &str) {
        self.dispatch(|l| l.on_device_bound(group_id, udid));
    }

    pub fn post_device_unbound(&self, group_id: &str, udid: &str) {
        self.dispatch(|l| l.on_device_unbound(group_id, udid));
    }

    pub fn post_device_not_trusted(&self, udid: &str) {
        self.dispatch(|l| l.on_device_not_trusted(udid));
    }

    pub fn post_last_group_deleted(&self, udid: &str) {
        self.dispatch(|l| l.on_last_group_deleted(udid));
    }

    pub fn post_trusted_device_num_changed(&self, new_count: u32) {
        self.dispatch(|l| l.on_trusted_device_num_changed(new_count));
    }

    /// Invokes `f` for every registered listener, synchronously, on the
    /// caller's thread (always the worker thread — spec.md §4.4). A
    /// panicking listener is caught and logged, never propagated, so one
    /// bad implementation can't take the worker thread down.
    fn dispatch<F>(&self, f: F)
    where
        F: Fn(&dyn GroupListener),
    {
        let listeners = self.listeners.lock().unwrap();
        for (app_id, listener) in listeners.iter() {
            let listener_ref = listener.as_ref();
            let result = panic::catch_unwind(AssertUnwindSafe(|| f(listener_ref)));
            if result.is_err() {
                log::warn!("broadcaster: listener for {app_id} panicked, event dropped");
            }
        }
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingListener {
        created: Arc<AtomicUsize>,
    }

    impl GroupListener for CountingListener {
        fn on_group_created(&self, _group_id: &str) {
            self.created.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct PanickingListener;

    impl GroupListener for PanickingListener {
        fn on_group_created(&self, _group_id: &str) {
            panic!("boom");
        }
    }

    #[test]
    fn fan_out_invokes_every_registered_listener() {
        let b = Broadcaster::new();
        let counter = Arc::new(AtomicUsize::new(0));
        b.reg_listener("app1", Box::new(CountingListener { created: counter.clone() }));
        b.reg_listener("app2", Box::new(CountingListener { created: counter.clone() }));
        b.post_group_created("g1");
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregistered_app_receives_nothing() {
        let b = Broadcaster::new();
        let counter = Arc::new(AtomicUsize::new(0));
        b.reg_listener("app1", Box::new(CountingListener { created: counter.clone() }));
        b.unreg_listener("app1");
        b.post_group_created("g1");
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_other_listeners() {
        let b = Broadcaster::new();
        let counter = Arc::new(AtomicUsize::new(0));
        b.reg_listener("bad", Box::new(PanickingListener));
        b.reg_listener("good", Box::new(CountingListener { created: counter.clone() }));
        b.post_group_created("g1");
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
