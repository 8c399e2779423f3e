use std::sync::Arc;

use parking_lot::Mutex;

/// A thread-safe, mutually exclusive shared component.
///
/// Uses a synchronous lock: holders must never keep the guard across an `.await`.
pub type Shared<T> = Arc<Mutex<T>>;

/// A generic boxed error type.
pub type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// A convenient Result alias returning `AnyError`.
pub type AnyResult<T> = std::result::Result<T, AnyError>;

/// Identity of one live track session.
///
/// A fresh id is minted every time a track is loaded; late completions carrying
/// an older id are dropped instead of being inserted into the buffer store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub uuid::Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short form is enough to tell sessions apart in logs.
        let full = self.0.simple().to_string();
        write!(f, "{}", &full[..8])
    }
}
