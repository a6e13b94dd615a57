/// Provides the concrete `sled`-based implementation of the cursor store
/// defined in the `wallet-relay-connector` library.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sled::Db;

use wallet_relay_connector::storage::{CursorStore, INITIAL_CURSOR};

/// A `sled`-backed implementation of the `CursorStore` trait.
///
/// Each application name owns one key, `<app>::scan-cursor`, holding the next
/// unscanned block height as a decimal string.
#[derive(Clone)]
pub struct SledCursorStore {
    db: Db,
}

impl SledCursorStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    fn key(app: &str) -> String {
        format!("{}::scan-cursor", app)
    }
}

#[async_trait]
impl CursorStore for SledCursorStore {
    async fn get_cursor(&self, app: &str) -> Result<u64> {
        let key = Self::key(app);
        match self.db.get(&key)? {
            Some(raw) => {
                let text = std::str::from_utf8(&raw)
                    .with_context(|| format!("Cursor '{}' is not valid UTF-8", key))?;
                text.parse::<u64>()
                    .with_context(|| format!("Cursor '{}' holds '{}', not a block height", key, text))
            }
            None => {
                self.set_cursor(app, INITIAL_CURSOR).await?;
                Ok(INITIAL_CURSOR)
            }
        }
    }

    /// Writes the cursor and waits for it to reach disk.
    async fn set_cursor(&self, app: &str, height: u64) -> Result<()> {
        self.db
            .insert(Self::key(app), height.to_string().as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }
}
