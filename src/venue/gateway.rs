//! Engine-facing venue capability trait and its pooled implementation.

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::config::AccountConfig;
use crate::error::VenueError;
use crate::models::{OrderSpec, PositionSnapshot, Quote, Ticket};

use super::session::{SessionPool, VenueTransport};

/// Capability interface the reconciliation engine works against: list
/// positions, quote, open, close, modify stop levels on one account.
///
/// Calls are potentially slow, fallible, and non-transactional. A successful
/// order submission means the venue accepted the request; the caller must
/// re-poll `list_positions` to observe the resulting position.
#[async_trait]
pub trait VenueGateway: Send + Sync {
    async fn list_positions(
        &self,
        account: &AccountConfig,
        symbol: Option<&str>,
    ) -> Result<PositionSnapshot, VenueError>;

    async fn quote(&self, account: &AccountConfig, symbol: &str) -> Result<Quote, VenueError>;

    async fn submit_open(
        &self,
        account: &AccountConfig,
        spec: &OrderSpec,
    ) -> Result<(), VenueError>;

    async fn submit_close(
        &self,
        account: &AccountConfig,
        ticket: Ticket,
        spec: &OrderSpec,
    ) -> Result<(), VenueError>;

    async fn modify_stops(
        &self,
        account: &AccountConfig,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), VenueError>;
}

/// [`VenueGateway`] implementation that acquires a pooled session before
/// every transport call, mirroring the connect-before-call discipline of the
/// underlying terminal API.
pub struct PooledVenue<T: VenueTransport> {
    transport: Arc<T>,
    pool: Arc<SessionPool<T>>,
}

impl<T: VenueTransport> PooledVenue<T> {
    pub fn new(transport: Arc<T>) -> Self {
        let pool = Arc::new(SessionPool::new(transport.clone()));
        Self { transport, pool }
    }

    /// Handle to the shared session pool, e.g. for the eviction janitor.
    pub fn pool(&self) -> Arc<SessionPool<T>> {
        self.pool.clone()
    }
}

#[async_trait]
impl<T: VenueTransport> VenueGateway for PooledVenue<T> {
    async fn list_positions(
        &self,
        account: &AccountConfig,
        symbol: Option<&str>,
    ) -> Result<PositionSnapshot, VenueError> {
        let session = self.pool.acquire(account).await?;
        let positions = self.transport.positions(session, symbol).await?;
        self.pool.release(account).await;
        Ok(PositionSnapshot::new(positions))
    }

    async fn quote(&self, account: &AccountConfig, symbol: &str) -> Result<Quote, VenueError> {
        let session = self.pool.acquire(account).await?;
        let quote = self.transport.tick(session, symbol).await?;
        self.pool.release(account).await;
        Ok(quote)
    }

    async fn submit_open(
        &self,
        account: &AccountConfig,
        spec: &OrderSpec,
    ) -> Result<(), VenueError> {
        let session = self.pool.acquire(account).await?;
        self.transport.order_open(session, spec).await?;
        self.pool.release(account).await;
        Ok(())
    }

    async fn submit_close(
        &self,
        account: &AccountConfig,
        ticket: Ticket,
        spec: &OrderSpec,
    ) -> Result<(), VenueError> {
        let session = self.pool.acquire(account).await?;
        self.transport.order_close(session, ticket, spec).await?;
        self.pool.release(account).await;
        Ok(())
    }

    async fn modify_stops(
        &self,
        account: &AccountConfig,
        ticket: Ticket,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<(), VenueError> {
        let session = self.pool.acquire(account).await?;
        self.transport
            .order_modify(session, ticket, stop_loss, take_profit)
            .await?;
        self.pool.release(account).await;
        Ok(())
    }
}
