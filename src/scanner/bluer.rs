//! BlueZ D-Bus backend for beacon scanning.
//!
//! This backend uses the `bluer` crate to communicate with the BlueZ daemon
//! via D-Bus. It requires the `bluetoothd` daemon to be running.

use super::{
    Advertisement, DecodeError, OBSERVATION_CHANNEL_BUFFER_SIZE, ObservationResult, ScanError,
};
use crate::mac_address::MacAddress;
use bluer::{Adapter, AdapterEvent, Address, Session};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

impl From<bluer::Error> for ScanError {
    fn from(err: bluer::Error) -> Self {
        ScanError::Bluetooth(err.to_string())
    }
}

/// Start scanning for beacons using the BlueZ D-Bus backend.
///
/// Discovery reports every device the adapter sees and re-reports a device
/// whenever one of its properties (RSSI included) changes, so each event
/// becomes a fresh observation. Runs until the receiver is dropped.
///
/// # Arguments
/// * `verbose` - If true, decode errors are sent as Err values; otherwise they're silently dropped.
pub async fn start_scan(verbose: bool) -> Result<mpsc::Receiver<ObservationResult>, ScanError> {
    let session = Session::new().await?;
    let adapter = session.default_adapter().await?;
    adapter.set_powered(true).await?;
    info!(adapter = adapter.name(), "BlueZ adapter powered");

    let (tx, rx) = mpsc::channel(OBSERVATION_CHANNEL_BUFFER_SIZE);
    let mut events = Box::pin(adapter.discover_devices_with_changes().await?);

    // Spawn a task that owns all Bluetooth state and runs the event loop
    tokio::spawn(async move {
        let _session = session;

        while let Some(event) = events.next().await {
            let AdapterEvent::DeviceAdded(address) = event else {
                continue;
            };

            let result = match read_advertisement(&adapter, address).await {
                Ok(advertisement) => Ok(advertisement.into_observation()),
                Err(ScanError::Decode(e)) => Err(e),
                Err(e) => Err(DecodeError::InvalidData(e.to_string())),
            };

            if result.is_err() && !verbose {
                continue;
            }
            if tx.send(result).await.is_err() {
                debug!("receiver dropped, stopping BlueZ discovery");
                break;
            }
        }
    });

    Ok(rx)
}

/// Read the properties BlueZ has cached for a device into an [`Advertisement`].
async fn read_advertisement(
    adapter: &Adapter,
    address: Address,
) -> Result<Advertisement, ScanError> {
    let device = adapter.device(address)?;
    let address = MacAddress::from(address).to_string();

    // Devices remembered from earlier sessions have no RSSI until heard again
    let rssi = device
        .rssi()
        .await?
        .ok_or_else(|| DecodeError::MissingRssi(address.clone()))?;

    Ok(Advertisement {
        local_name: device.name().await?,
        tx_power: device.tx_power().await?,
        address,
        rssi,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_to_identity() {
        let addr = Address([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x0F]);
        assert_eq!(MacAddress::from(addr).to_string(), "AA:BB:CC:DD:EE:0F");
    }

    #[test]
    fn test_bluer_error_maps_to_bluetooth() {
        let err: ScanError = bluer::Error {
            kind: bluer::ErrorKind::NotReady,
            message: "adapter not ready".to_string(),
        }
        .into();
        assert!(matches!(err, ScanError::Bluetooth(_)));
    }
}
