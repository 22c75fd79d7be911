//! Point-to-point byte stream transports.
//!
//! A `Radio` stands for the local link hardware (or its stand-in). It reports
//! whether it can be used at all and performs the blocking connect to a remote
//! device, yielding a `Channel`. A channel is one sequential byte stream:
//! - `reader()` hands out the receive side for the ingestion loop
//! - `close()` may be called from any thread and unblocks a pending read
//!
//! Implementations:
//! - `tcp`: serial stream bridged over TCP (e.g. an RFCOMM-to-TCP relay)
//! - `memory`: in-process pipe for tests and dry runs

pub mod memory;
pub mod tcp;

use std::fmt;
use std::io::{self, Read};

pub use memory::{MemoryDevice, MemoryRadio};
pub use tcp::{parse_endpoint, TcpRadio};

/// 128-bit service identifier negotiated when opening a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ServiceId(u128);

impl ServiceId {
    pub const fn from_u128(value: u128) -> Self {
        Self(value)
    }

    pub const fn as_u128(&self) -> u128 {
        self.0
    }
}

impl fmt::Display for ServiceId {
    /// Canonical 8-4-4-4-12 form, upper case.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let v = self.0;
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:04X}-{:012X}",
            (v >> 96) as u32,
            (v >> 80) as u16,
            (v >> 64) as u16,
            (v >> 48) as u16,
            v & 0xFFFF_FFFF_FFFF
        )
    }
}

/// Serial Port Profile. The wearable only exposes this service.
pub const SERIAL_PORT_PROFILE: ServiceId =
    ServiceId::from_u128(0x0000_1101_0000_1000_8000_0080_5F9B_34FB);

/// Local link hardware.
pub trait Radio: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &'static str;

    /// False when the radio is absent or switched off. No I/O is attempted then.
    fn is_available(&self) -> bool;

    /// Blocking connect to `address` for `service`.
    fn open(&self, address: &str, service: ServiceId) -> io::Result<Box<dyn Channel>>;
}

/// One open byte stream to the remote device.
pub trait Channel: Send + Sync {
    /// Receive side of the stream. Reads block until data, end-of-stream,
    /// error, or `close()`.
    fn reader(&self) -> io::Result<Box<dyn Read + Send>>;

    /// Tear the stream down. Idempotent.
    fn close(&self) -> io::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_port_profile_formats_canonically() {
        assert_eq!(
            SERIAL_PORT_PROFILE.to_string(),
            "00001101-0000-1000-8000-00805F9B34FB"
        );
    }

    #[test]
    fn service_id_round_trips_raw_value() {
        let id = ServiceId::from_u128(42);
        assert_eq!(id.as_u128(), 42);
        assert_eq!(id.to_string(), "00000000-0000-0000-0000-00000000002A");
    }
}
