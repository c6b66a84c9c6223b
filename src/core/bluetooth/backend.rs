//! Platform BLE seam.
//!
//! Every platform call the session needs goes through [`GattBackend`]. The
//! driver only ever sees this one vocabulary, whatever shape the platform API
//! has underneath.

use futures_util::stream::BoxStream;
use uuid::Uuid;

use crate::core::bluetooth::error::GattFailure;
use crate::core::bluetooth::types::{Advertisement, GattProfile, ScanFilter};

/// Live advertisements; dropping the stream ends the scan
pub type AdvertisementStream = BoxStream<'static, Advertisement>;

/// Notification values of one characteristic, in the order the peripheral sent them
pub type NotificationStream = BoxStream<'static, Result<Vec<u8>, GattFailure>>;

#[async_trait::async_trait]
pub trait GattBackend: Send + Sync + 'static {
    /// Starts discovery. The filter may be applied by the platform or not at all.
    async fn scan(&self, filter: &ScanFilter) -> Result<AdvertisementStream, GattFailure>;

    /// Opens a low-energy link to a previously observed address.
    async fn connect(&self, address: &str) -> Result<(), GattFailure>;

    /// Reads the full attribute table of a connected peripheral.
    async fn discover_services(&self, address: &str) -> Result<GattProfile, GattFailure>;

    /// Writes the CCCD of `characteristic` and returns its notification stream.
    async fn subscribe(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream, GattFailure>;

    /// Resolves when the link drops; `Some` carries a failure status.
    async fn wait_for_link_down(&self, address: &str) -> Option<GattFailure>;

    /// Releases the link to `address`. Succeeds if there is no link.
    async fn disconnect(&self, address: &str) -> Result<(), GattFailure>;
}
