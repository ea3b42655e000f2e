use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A lock held on one logical path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockToken {
    pub token: String,
    pub owner: Option<String>,
    pub exclusive: bool,
}

/// Per-path protocol bookkeeping: lock state plus dead properties.
///
/// Keyed by logical path in the store; the repository core never sees it.
#[derive(Debug, Clone, Default)]
pub struct ResourceMeta {
    pub lock: Option<LockToken>,
    pub properties: FxHashMap<String, Value>,
}
