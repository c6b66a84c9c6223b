//! Peripheral discovery
//! The scanner keeps a deduplicated, signal-ranked device list and runs the
//! backend scan as a cancellable task with an optional auto-stop timer.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::backend::GattBackend;
use crate::core::bluetooth::constants::UNKNOWN_DEVICE_NAME;
use crate::core::bluetooth::error::ScanError;
use crate::core::bluetooth::types::{Advertisement, PeripheralRef, ScanFilter};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ScanState {
    #[default]
    Idle,
    Scanning,
    Error(ScanError),
}

/// Everything the scan task needs for one scan run
#[derive(Debug, Clone)]
pub struct ScanTicket {
    pub generation: u64,
    pub filter: ScanFilter,
    pub cancel_token: CancellationToken,
}

/// Results posted by the scan task back to the driver
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    Observed {
        generation: u64,
        advertisement: Advertisement,
    },
    Failed {
        generation: u64,
        error: ScanError,
    },
    /// The backend stream ended on its own
    Finished { generation: u64 },
    /// The auto-stop timer fired
    TimedOut { generation: u64 },
}

pub struct BluetoothScanner {
    state: ScanState,
    devices: Vec<PeripheralRef>,
    default_filter: ScanFilter,
    filter: ScanFilter,
    generation: u64,
    cancel_token: Option<CancellationToken>,
}

impl BluetoothScanner {
    pub fn new(default_filter: ScanFilter) -> Self {
        Self {
            state: ScanState::Idle,
            devices: Vec::new(),
            filter: default_filter.clone(),
            default_filter,
            generation: 0,
            cancel_token: None,
        }
    }

    pub fn state(&self) -> &ScanState {
        &self.state
    }

    pub fn is_scanning(&self) -> bool {
        self.state == ScanState::Scanning
    }

    /// Ranked by signal strength, strongest first
    pub fn devices(&self) -> &[PeripheralRef] {
        &self.devices
    }

    /// The filter of the current or most recent scan
    pub fn filter(&self) -> &ScanFilter {
        &self.filter
    }

    /// Begins a scan run. Returns `None` if a scan is already running.
    pub fn start(&mut self, filter: Option<ScanFilter>) -> Option<ScanTicket> {
        if self.is_scanning() {
            debug!("Scan already running, ignoring start request.");
            return None;
        }

        self.devices.clear();
        self.filter = filter.unwrap_or_else(|| self.default_filter.clone());
        self.generation += 1;
        let cancel_token = CancellationToken::new();
        self.cancel_token = Some(cancel_token.clone());
        self.state = ScanState::Scanning;

        info!("Starting scan #{} with filter {:?}", self.generation, self.filter);
        Some(ScanTicket {
            generation: self.generation,
            filter: self.filter.clone(),
            cancel_token,
        })
    }

    /// Stops the running scan. Returns `false` if nothing was running.
    pub fn stop(&mut self) -> bool {
        if !self.is_scanning() {
            return false;
        }
        self.cancel();
        self.state = ScanState::Idle;
        info!("Scan #{} stopped.", self.generation);
        true
    }

    /// Drops the device list, e.g. when a connection attempt begins.
    pub fn clear_devices(&mut self) {
        self.devices.clear();
    }

    /// Records an advertisement. Returns `true` when the ranked list changed.
    pub fn observe(&mut self, generation: u64, advertisement: Advertisement) -> bool {
        if !self.is_current(generation) {
            debug!("Ignoring advertisement from stale scan #{}", generation);
            return false;
        }
        if !self.filter.matches(&advertisement) {
            return false;
        }

        let name = advertisement
            .name
            .unwrap_or_else(|| UNKNOWN_DEVICE_NAME.to_string());
        let signal_strength = advertisement.rssi.unwrap_or(i16::MIN);

        match self
            .devices
            .iter_mut()
            .find(|d| d.address == advertisement.address)
        {
            Some(existing) => {
                existing.name = name;
                existing.signal_strength = signal_strength;
                existing.connected |= advertisement.connected;
            }
            None => {
                info!(
                    "Found device: {} @ {} (RSSI {})",
                    name, advertisement.address, signal_strength
                );
                let mut device = PeripheralRef::new(name, advertisement.address, signal_strength);
                device.connected = advertisement.connected;
                self.devices.push(device);
            }
        }
        // Devices the OS already links to come first, then by signal.
        self.devices.sort_by(|a, b| {
            b.connected
                .cmp(&a.connected)
                .then(b.signal_strength.cmp(&a.signal_strength))
        });
        true
    }

    /// Moves into the error state. Returns `false` for stale generations.
    pub fn fail(&mut self, generation: u64, error: ScanError) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        error!("Scan #{} failed: {}", generation, error);
        self.cancel();
        self.state = ScanState::Error(error);
        true
    }

    /// Ends the scan after a timeout or end of stream. Stale generations are ignored.
    pub fn finish(&mut self, generation: u64) -> bool {
        if !self.is_current(generation) {
            return false;
        }
        info!("Scan #{} complete.", generation);
        self.cancel();
        self.state = ScanState::Idle;
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        generation == self.generation && self.is_scanning()
    }

    fn cancel(&mut self) {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }
    }
}

/// Runs one backend scan until cancelled, timed out or the stream ends.
///
/// Every result goes through `post`; the timer is raced against the
/// cancellation token so a manual stop always wins over auto-stop.
pub async fn run_scan_task<F>(
    backend: Arc<dyn GattBackend>,
    ticket: ScanTicket,
    timeout: Option<Duration>,
    post: F,
) where
    F: Fn(ScanEvent) + Send + 'static,
{
    let ScanTicket {
        generation,
        filter,
        cancel_token,
    } = ticket;

    let mut scan_stream = tokio::select! {
        biased;
        _ = cancel_token.cancelled() => return,
        result = backend.scan(&filter) => match result {
            Ok(stream) => stream,
            Err(failure) => {
                post(ScanEvent::Failed { generation, error: failure.into() });
                return;
            }
        },
    };

    let deadline = async move {
        match timeout {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => break,
            _ = &mut deadline => {
                post(ScanEvent::TimedOut { generation });
                break;
            }
            item = scan_stream.next() => match item {
                Some(advertisement) => {
                    debug!("Advertisement: {:?}", advertisement);
                    post(ScanEvent::Observed { generation, advertisement });
                }
                None => {
                    warn!("Bluetooth scan stream has ended.");
                    post(ScanEvent::Finished { generation });
                    break;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advert(address: &str, name: &str, rssi: i16) -> Advertisement {
        Advertisement {
            name: Some(name.to_string()),
            address: address.to_string(),
            rssi: Some(rssi),
            services: Vec::new(),
            connected: false,
        }
    }

    fn started() -> (BluetoothScanner, u64) {
        let mut scanner = BluetoothScanner::new(ScanFilter::default());
        let ticket = scanner.start(None).unwrap();
        (scanner, ticket.generation)
    }

    #[test]
    fn repeated_addresses_are_deduplicated_with_latest_values() {
        let (mut scanner, generation) = started();
        scanner.observe(generation, advert("A", "band", -70));
        scanner.observe(generation, advert("B", "other", -50));
        scanner.observe(generation, advert("A", "band-renamed", -40));
        scanner.observe(generation, advert("B", "other", -90));

        let devices = scanner.devices();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0], PeripheralRef::new("band-renamed".into(), "A".into(), -40));
        assert_eq!(devices[1], PeripheralRef::new("other".into(), "B".into(), -90));
    }

    #[test]
    fn list_is_always_ranked_by_signal() {
        let (mut scanner, generation) = started();
        for (i, rssi) in [-80, -30, -55, -91, -30, -10].iter().enumerate() {
            scanner.observe(generation, advert(&format!("dev{}", i % 4), "x", *rssi));
            let strengths: Vec<i16> = scanner.devices().iter().map(|d| d.signal_strength).collect();
            let mut sorted = strengths.clone();
            sorted.sort_by(|a, b| b.cmp(a));
            assert_eq!(strengths, sorted);
        }
    }

    #[test]
    fn missing_name_and_rssi_get_placeholders() {
        let (mut scanner, generation) = started();
        scanner.observe(
            generation,
            Advertisement {
                name: None,
                address: "C".into(),
                rssi: None,
                services: Vec::new(),
                connected: false,
            },
        );
        assert_eq!(scanner.devices()[0].name, UNKNOWN_DEVICE_NAME);
        assert_eq!(scanner.devices()[0].signal_strength, i16::MIN);
    }

    #[test]
    fn already_connected_devices_rank_first() {
        let (mut scanner, generation) = started();
        scanner.observe(generation, advert("A", "band", -30));
        scanner.observe(
            generation,
            Advertisement {
                name: Some("band".into()),
                address: "L".into(),
                rssi: None,
                services: Vec::new(),
                connected: true,
            },
        );
        scanner.observe(generation, advert("B", "band", -20));

        let addresses: Vec<&str> = scanner.devices().iter().map(|d| d.address.as_str()).collect();
        assert_eq!(addresses, vec!["L", "B", "A"]);
        assert!(scanner.devices()[0].connected);
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut scanner = BluetoothScanner::new(ScanFilter::default());
        let ticket = scanner.start(None).unwrap();
        assert!(scanner.start(None).is_none());

        assert!(scanner.stop());
        assert!(ticket.cancel_token.is_cancelled());
        assert!(!scanner.stop());
        assert_eq!(scanner.state(), &ScanState::Idle);
    }

    #[test]
    fn start_clears_previous_results() {
        let (mut scanner, generation) = started();
        scanner.observe(generation, advert("A", "band", -70));
        scanner.stop();
        scanner.start(None).unwrap();
        assert!(scanner.devices().is_empty());
    }

    #[test]
    fn stale_generation_events_are_ignored() {
        let (mut scanner, first) = started();
        scanner.stop();
        let second = scanner.start(None).unwrap().generation;

        assert!(!scanner.observe(first, advert("A", "band", -70)));
        assert!(!scanner.finish(first));
        assert!(!scanner.fail(first, ScanError::AdapterUnavailable));
        assert!(scanner.is_scanning());

        assert!(scanner.finish(second));
        assert!(!scanner.is_scanning());
    }

    #[test]
    fn timeout_after_manual_stop_does_nothing() {
        let (mut scanner, generation) = started();
        scanner.stop();
        assert!(!scanner.finish(generation));
        assert_eq!(scanner.state(), &ScanState::Idle);
    }

    #[test]
    fn failure_enters_error_state_and_allows_restart() {
        let (mut scanner, generation) = started();
        assert!(scanner.fail(generation, ScanError::Rejected("busy".into())));
        assert_eq!(scanner.state(), &ScanState::Error(ScanError::Rejected("busy".into())));
        assert!(scanner.start(None).is_some());
    }

    #[test]
    fn filter_is_applied_to_observations() {
        let mut scanner = BluetoothScanner::new(ScanFilter::by_name("Test Device"));
        let generation = scanner.start(None).unwrap().generation;
        assert!(!scanner.observe(generation, advert("A", "headphones", -40)));
        assert!(scanner.observe(generation, advert("B", "Test Device", -60)));
        assert_eq!(scanner.devices().len(), 1);

        scanner.stop();
        let generation = scanner.start(Some(ScanFilter::default())).unwrap().generation;
        assert!(scanner.observe(generation, advert("A", "headphones", -40)));
    }
}
