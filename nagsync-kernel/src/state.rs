use crate::session::SessionTracker;
use parking_lot::Mutex;
use std::sync::Arc;

/// State handle passed between the engine task and the HTTP/WebSocket side.
pub type Shared<T> = Arc<Mutex<T>>;

pub type SharedSession = Shared<SessionTracker>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
