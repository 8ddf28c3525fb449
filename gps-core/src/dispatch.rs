//! Protocol selection for new connections.
//!
//! The registration table is built once at startup and only read afterwards,
//! so it can sit behind an `Arc` shared by every connection.

use std::collections::HashMap;

use crate::config::PortConfig;
use crate::protocol::Protocol;
use crate::types::{GpsError, Result};

/// Bytes the listener may buffer while trying to recognise a protocol.
pub const SNIFF_WINDOW: usize = 64;

/// How a listening port picks its protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    Fixed(Protocol),
    Sniff,
}

/// Outcome of a selection attempt on the bytes seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Selected(Protocol),
    /// Sniff port without a recognised signature yet; read more bytes.
    NeedMore,
}

#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    ports: HashMap<u16, PortRole>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Dispatcher::default()
    }

    pub fn from_ports(ports: &PortConfig) -> Self {
        let mut dispatcher = Dispatcher::new();
        for protocol in Protocol::ALL {
            if let Some(port) = ports.port_for(protocol) {
                dispatcher.register(port, protocol);
            }
        }
        if let Some(port) = ports.sniff {
            dispatcher.register_sniff(port);
        }
        dispatcher
    }

    pub fn register(&mut self, port: u16, protocol: Protocol) -> &mut Self {
        self.ports.insert(port, PortRole::Fixed(protocol));
        self
    }

    pub fn register_sniff(&mut self, port: u16) -> &mut Self {
        self.ports.insert(port, PortRole::Sniff);
        self
    }

    pub fn role(&self, port: u16) -> Option<PortRole> {
        self.ports.get(&port).copied()
    }

    /// Ports to bind, in ascending order.
    pub fn ports(&self) -> Vec<(u16, PortRole)> {
        let mut ports: Vec<_> = self.ports.iter().map(|(p, r)| (*p, *r)).collect();
        ports.sort_by_key(|(p, _)| *p);
        ports
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Try to select the protocol for a connection accepted on `local_port`.
    ///
    /// `prefix` is whatever the device has sent so far (may be empty).
    /// A fixed port answers immediately; a sniff port needs a recognised
    /// signature within [`SNIFF_WINDOW`] bytes.
    pub fn probe(&self, local_port: u16, prefix: &[u8]) -> Result<Selection> {
        match self.role(local_port) {
            Some(PortRole::Fixed(protocol)) => Ok(Selection::Selected(protocol)),
            Some(PortRole::Sniff) => match Protocol::sniff(prefix) {
                Some(protocol) => Ok(Selection::Selected(protocol)),
                None if prefix.len() < SNIFF_WINDOW => Ok(Selection::NeedMore),
                None => Err(GpsError::UnknownProtocol { port: local_port }),
            },
            None => Err(GpsError::UnknownProtocol { port: local_port }),
        }
    }

    /// Select the protocol from the bytes available, with no further reads
    /// possible (peer closed, window full or timed out).
    pub fn select(&self, local_port: u16, prefix: &[u8]) -> Result<Protocol> {
        match self.probe(local_port, prefix)? {
            Selection::Selected(protocol) => Ok(protocol),
            Selection::NeedMore => Err(GpsError::UnknownProtocol { port: local_port }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let mut d = Dispatcher::new();
        d.register(5001, Protocol::Amwell)
            .register(5002, Protocol::Freedom)
            .register_sniff(5000);
        d
    }

    #[test]
    fn test_fixed_port_ignores_bytes() {
        let d = dispatcher();
        assert_eq!(
            d.probe(5001, b"IMEI,").unwrap(),
            Selection::Selected(Protocol::Amwell)
        );
        assert_eq!(
            d.probe(5002, &[]).unwrap(),
            Selection::Selected(Protocol::Freedom)
        );
    }

    #[test]
    fn test_sniff_port() {
        let d = dispatcher();
        assert_eq!(d.probe(5000, b"").unwrap(), Selection::NeedMore);
        assert_eq!(d.probe(5000, b"IM").unwrap(), Selection::NeedMore);
        assert_eq!(
            d.probe(5000, b"IMEI,1234").unwrap(),
            Selection::Selected(Protocol::Freedom)
        );
        assert_eq!(
            d.probe(5000, &[0x29, 0x29]).unwrap(),
            Selection::Selected(Protocol::Amwell)
        );
    }

    #[test]
    fn test_sniff_window_exhausted() {
        let d = dispatcher();
        let junk = vec![b'x'; SNIFF_WINDOW];
        assert!(matches!(
            d.probe(5000, &junk),
            Err(GpsError::UnknownProtocol { port: 5000 })
        ));
    }

    #[test]
    fn test_unregistered_port() {
        let d = dispatcher();
        assert!(matches!(
            d.select(9999, &[0x29, 0x29]),
            Err(GpsError::UnknownProtocol { port: 9999 })
        ));
    }

    #[test]
    fn test_select() {
        let d = dispatcher();
        assert!(d.select(5000, b"IM").is_err());
        assert_eq!(d.select(5000, b"IMEI,").unwrap(), Protocol::Freedom);
        assert_eq!(d.select(5001, b"").unwrap(), Protocol::Amwell);
    }

    #[test]
    fn test_from_ports() {
        let ports = PortConfig {
            amwell: Some(6001),
            freedom: None,
            haicom: Some(6003),
            xexun: Some(6004),
            sniff: Some(6000),
        };
        let d = Dispatcher::from_ports(&ports);
        assert_eq!(d.role(6001), Some(PortRole::Fixed(Protocol::Amwell)));
        assert_eq!(d.role(6000), Some(PortRole::Sniff));
        assert_eq!(d.role(6002), None);
        let bound: Vec<u16> = d.ports().into_iter().map(|(p, _)| p).collect();
        assert_eq!(bound, vec![6000, 6001, 6003, 6004]);
    }
}
