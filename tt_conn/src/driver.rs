//! ABOUTME: Seam between the manager and the underlying database client
//! ABOUTME: The client is opaque; the manager only connects, probes, drops

use async_trait::async_trait;
use tt_core::Result;

use crate::settings::PoolSettings;

/// The underlying database client factory.
///
/// The manager treats the client as an opaque resource: it creates one
/// per connection lifetime, validates it with a cheap probe, hands it
/// to query closures, and tears it down on disconnect. A client is
/// never reused across reconnection attempts.
///
/// The client itself must tolerate concurrent use; pooled drivers
/// (such as the sqlx implementation in `tt_db`) satisfy this natively.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    type Client: Send + Sync + 'static;

    /// Establish a fresh client using the current pool settings
    async fn connect(&self, settings: &PoolSettings) -> Result<Self::Client>;

    /// Cheap round-trip that proves the client is usable, not merely open
    async fn probe(&self, client: &Self::Client) -> Result<()>;

    /// Release the client's resources; best effort
    async fn disconnect(&self, client: &Self::Client) -> Result<()>;
}
