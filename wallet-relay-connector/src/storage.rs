use anyhow::Result;
use async_trait::async_trait;

/// The block height a fresh cursor starts at.
pub const INITIAL_CURSOR: u64 = 1;

/// A trait defining the persistence the scan loop needs: one durable scalar,
/// the next unscanned block height, namespaced by application name.
///
/// This allows for different database implementations.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Returns the persisted cursor for `app`, creating it with
    /// [`INITIAL_CURSOR`] if it does not exist yet.
    async fn get_cursor(&self, app: &str) -> Result<u64>;

    /// Durably records the next unscanned block height for `app`.
    async fn set_cursor(&self, app: &str, height: u64) -> Result<()>;
}
