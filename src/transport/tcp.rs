//! Serial stream bridged over TCP.
//!
//! The wearable's serial link is exposed on the host by a relay (for example
//! an RFCOMM-to-TCP bridge) that forwards the raw byte stream unchanged. The
//! service identifier is checked by the relay, so it is only logged here.
//!
//! Addresses are `host:port`, `[v6]:port`, or `tcp://host:port`.

use anyhow::{anyhow, Context, Result};
use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{Channel, Radio, ServiceId};

#[derive(Clone, Debug)]
pub struct TcpRadio {
    enabled: bool,
    connect_timeout: Option<Duration>,
}

impl TcpRadio {
    pub fn new() -> Self {
        Self {
            enabled: true,
            connect_timeout: None,
        }
    }

    /// Mark the radio as switched off. `open` is never reached while disabled.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Bound the connect step. Reads are never timed out.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    fn connect(&self, host: &str, port: u16) -> io::Result<TcpStream> {
        let Some(timeout) = self.connect_timeout else {
            return TcpStream::connect((host, port));
        };
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("{} did not resolve", host))
        }))
    }
}

impl Default for TcpRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for TcpRadio {
    fn name(&self) -> &'static str {
        "tcp"
    }

    fn is_available(&self) -> bool {
        self.enabled
    }

    fn open(&self, address: &str, service: ServiceId) -> io::Result<Box<dyn Channel>> {
        let (host, port) = parse_endpoint(address)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        log::debug!("opening {}:{} for service {}", host, port, service);
        let stream = self.connect(&host, port)?;
        stream.set_nodelay(true)?;
        Ok(Box::new(TcpChannel { stream }))
    }
}

struct TcpChannel {
    stream: TcpStream,
}

impl Channel for TcpChannel {
    fn reader(&self) -> io::Result<Box<dyn Read + Send>> {
        Ok(Box::new(self.stream.try_clone()?))
    }

    fn close(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// Split a device address into host and port.
pub fn parse_endpoint(addr: &str) -> Result<(String, u16)> {
    let mut remainder = addr.trim();
    if let Some((scheme, rest)) = remainder.split_once("://") {
        if scheme != "tcp" {
            return Err(anyhow!("unsupported device address scheme: {}", scheme));
        }
        remainder = rest;
    }

    if let Some(rest) = remainder.strip_prefix('[') {
        let (host, rest) = rest
            .split_once(']')
            .ok_or_else(|| anyhow!("invalid device address: {}", addr))?;
        let port = rest
            .strip_prefix(':')
            .ok_or_else(|| anyhow!("missing port in device address {}", addr))?;
        let port: u16 = port
            .parse()
            .with_context(|| format!("invalid port in device address {}", addr))?;
        return Ok((host.to_string(), port));
    }

    let (host, port) = remainder
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("missing port in device address {}", addr))?;
    if host.is_empty() {
        return Err(anyhow!("missing host in device address {}", addr));
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in device address {}", addr))?;
    Ok((host.to_string(), port))
}
