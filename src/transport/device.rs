//! Serial character device access.
//!
//! Line settings (baud rate, parity, raw mode) are configured outside this
//! crate, e.g. with `stty`. Here the device is just a file that bytes go in
//! and out of.
//!
//! # Example
//!
//! ```ignore
//! use serialwire::transport::{open_device, AdapterConfig, StreamPacketAdapter};
//!
//! let port = open_device("/dev/ttyUSB0").await?;
//! let adapter = StreamPacketAdapter::new(port, AdapterConfig::default());
//! ```

use std::path::Path;

use tokio::fs::{File, OpenOptions};
use tokio::io::Join;

use crate::error::Result;

/// Duplex handle on a serial device.
pub type DeviceStream = Join<File, File>;

/// Open a serial device for reading and writing.
///
/// The device is opened twice, once per direction. A single `tokio::fs::File`
/// runs one blocking operation at a time, so a read waiting for the peer
/// would otherwise hold up every write.
pub async fn open_device(path: impl AsRef<Path>) -> Result<DeviceStream> {
    let path = path.as_ref();

    let reader = OpenOptions::new().read(true).open(path).await?;
    let writer = OpenOptions::new().write(true).open(path).await?;

    tracing::debug!(path = %path.display(), "Serial device opened");
    Ok(tokio::io::join(reader, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SerialwireError;

    #[tokio::test]
    async fn test_open_missing_device() {
        let Err(err) = open_device("/nonexistent/serialwire-tty").await else {
            panic!("opening a missing device should fail");
        };
        assert!(matches!(err, SerialwireError::Io(_)));
        assert!(err.is_fatal());
    }
}
