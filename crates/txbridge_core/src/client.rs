//! Client facade.

use crate::config::ClientConfig;
use crate::context::CallerContext;
use crate::error::CoreResult;
use crate::transaction::TransactionHandle;
use std::fmt;
use std::sync::Arc;
use txbridge_engine::StoreEngine;

/// The entry point for creating transactions.
///
/// A `Client` wraps a shared [`StoreEngine`] and the configuration applied
/// to every transaction it hands out. It is cheap to clone and may be
/// shared across threads; the transactions it creates are bound to the
/// [`CallerContext`] passed at creation.
///
/// ```rust,ignore
/// use txbridge_core::{CallerContext, Client};
/// use txbridge_engine::MemoryEngine;
///
/// let client = Client::new(Arc::new(MemoryEngine::with_defaults()?));
/// let ctx = CallerContext::new();
///
/// let tr = client.create_transaction(&ctx)?;
/// tr.set("hello", "world")?;
/// tr.commit()?.on_ready(|outcome| println!("committed: {outcome:?}"))?;
/// ctx.dispatch_next(Duration::from_secs(1));
/// ```
#[derive(Clone)]
pub struct Client {
    engine: Arc<dyn StoreEngine>,
    config: ClientConfig,
}

impl Client {
    /// Creates a client with the default configuration.
    pub fn new(engine: Arc<dyn StoreEngine>) -> Self {
        Self::with_config(engine, ClientConfig::default())
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(engine: Arc<dyn StoreEngine>, config: ClientConfig) -> Self {
        Self { engine, config }
    }

    /// Creates a transaction whose results are delivered through `ctx`.
    ///
    /// # Errors
    ///
    /// Fails if the engine cannot allocate a native transaction.
    pub fn create_transaction(&self, ctx: &CallerContext) -> CoreResult<TransactionHandle> {
        let native = self.engine.transaction_create()?;
        Ok(TransactionHandle::new(
            Arc::clone(&self.engine),
            native,
            ctx,
            self.config.clone(),
        ))
    }

    /// The underlying engine.
    pub fn engine(&self) -> &Arc<dyn StoreEngine> {
        &self.engine
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("config", &self.config).finish()
    }
}
