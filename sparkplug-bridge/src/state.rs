use parking_lot::Mutex;
use std::sync::Arc;

/// État partagé entre la tâche d'ingestion et les handlers Axum.
/// Ne jamais garder le verrou au travers d'un `.await`.
pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}
