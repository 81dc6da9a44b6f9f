//! Device event notification
//!
//! Subscription is a capability of its own: a device may offer readbacks,
//! centroids and events in any combination.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Events emitted by subscribable devices
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Device moved into the beam path
    Inserted { device: String },
    /// Device moved out of the beam path
    Removed { device: String },
    /// A setpoint was accepted
    Moved {
        device: String,
        key: String,
        value: f64,
    },
}

/// Subscription ID for registration/deregistration
pub type SubscriptionId = u64;

/// Callback function type
pub type DeviceCallback = Arc<dyn Fn(&DeviceEvent) + Send + Sync>;

/// Devices that can notify subscribers
pub trait Subscribable {
    /// Register a callback, returning an ID for [`Subscribable::unsubscribe`]
    fn subscribe(&self, callback: DeviceCallback) -> SubscriptionId;

    /// Remove a callback; false if the ID was unknown
    fn unsubscribe(&self, id: SubscriptionId) -> bool;
}

/// Shared callback table that devices embed to implement [`Subscribable`]
#[derive(Default)]
pub struct CallbackRegistry {
    callbacks: Mutex<HashMap<SubscriptionId, DeviceCallback>>,
    next_id: Mutex<SubscriptionId>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, callback: DeviceCallback) -> SubscriptionId {
        let mut callbacks = self.callbacks.lock().unwrap();
        let mut next_id = self.next_id.lock().unwrap();

        let id = *next_id;
        *next_id += 1;

        callbacks.insert(id, callback);
        id
    }

    pub fn deregister(&self, id: SubscriptionId) -> bool {
        self.callbacks.lock().unwrap().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every registered callback
    ///
    /// Callbacks are cloned out first so a callback may itself subscribe or
    /// unsubscribe without deadlocking.
    pub fn emit(&self, event: &DeviceEvent) {
        let callbacks: Vec<DeviceCallback> =
            self.callbacks.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(event);
        }
    }
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("subscribers", &self.len())
            .finish()
    }
}
