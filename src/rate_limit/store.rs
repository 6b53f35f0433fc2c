use crate::errors::StoreError;
use crate::rate_limit::scripts::WindowScript;
use async_trait::async_trait;

/// Shared counting backend able to run the window scripts atomically.
///
/// Implementations must run one `eval_script` call without interleaving with
/// any other call on the same key. Script identity is the content hash; an
/// unknown hash fails with [`StoreError::NoScript`].
#[async_trait]
pub trait ScriptStore: Send + Sync {
    /// Compile and cache a script, returning its hash
    async fn load_script(&self, script: &WindowScript) -> Result<String, StoreError>;

    /// Run a cached script against one key. Replies `{allowed, pttl}`.
    async fn eval_script(
        &self,
        hash: &str,
        key: &str,
        limit: u64,
        duration_ms: i64,
    ) -> Result<Vec<i64>, StoreError>;

    /// Remaining lifetime of a key in milliseconds (-1 persistent, -2 missing)
    async fn pttl(&self, key: &str) -> Result<i64, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
