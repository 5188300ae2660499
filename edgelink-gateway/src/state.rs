use crate::models::{ActuatorData, LED_ACTUATOR_NAME, LED_ACTUATOR_TYPE, OFF_COMMAND};
use parking_lot::Mutex;
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Last intended actuation, shared between the router's analysis path and the
/// CoAP read resource. Every access takes the lock; callers only ever see
/// whole records.
#[derive(Clone)]
pub struct ActuationCell {
    inner: Shared<ActuatorData>,
}

impl ActuationCell {
    pub fn new(initial: ActuatorData) -> Self {
        Self {
            inner: new_state(initial),
        }
    }

    pub fn snapshot(&self) -> ActuatorData {
        self.inner.lock().clone()
    }

    pub fn update(&self, data: &ActuatorData) {
        self.inner.lock().update_from(data);
    }

    /// Set a new command code. Returns the updated record, or `None` when the
    /// cell already holds that command.
    pub fn set_command(&self, command: i32, value: f32) -> Option<ActuatorData> {
        let mut current = self.inner.lock();
        if current.command == command {
            return None;
        }
        current.command = command;
        current.value = value;
        current.is_response = false;
        current.header.timestamp = chrono::Utc::now();
        Some(current.clone())
    }
}

impl Default for ActuationCell {
    fn default() -> Self {
        Self::new(ActuatorData::command(
            LED_ACTUATOR_NAME,
            LED_ACTUATOR_TYPE,
            OFF_COMMAND,
            0.0,
        ))
    }
}
