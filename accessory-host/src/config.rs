//! Configuration for the accessory host

use std::net::{IpAddr, Ipv4Addr};

use crate::error::ServerError;
use crate::pairing::PairingPin;

/// Configuration for the AccessoryServer
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on
    /// Default: 0.0.0.0
    pub bind_addr: IpAddr,

    /// Port range to try binding to, inclusive
    /// Default: (51826, 51926)
    pub port_range: (u16, u16),

    /// Setup code controllers must present to pair
    /// Default: 123-41-234
    pub pin: PairingPin,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port_range: (51826, 51926),
            pin: PairingPin::default(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen on the loopback interface only
    pub fn local_only() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ..Default::default()
        }
    }

    pub fn with_pin(mut self, pin: PairingPin) -> Self {
        self.pin = pin;
        self
    }

    pub fn with_port_range(mut self, start: u16, end: u16) -> Self {
        self.port_range = (start, end);
        self
    }

    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ServerError> {
        let (start, end) = self.port_range;
        if start > end {
            return Err(ServerError::Configuration(format!(
                "port range start {start} is greater than end {end}"
            )));
        }
        if start == 0 && end != 0 {
            return Err(ServerError::Configuration(
                "port 0 may only be used alone".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(config.port_range, (51826, 51926));
        assert_eq!(config.pin, PairingPin::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders() {
        let pin: PairingPin = "031-45-154".parse().unwrap();
        let config = ServerConfig::local_only()
            .with_port_range(0, 0)
            .with_pin(pin.clone());

        assert_eq!(config.bind_addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.port_range, (0, 0));
        assert_eq!(config.pin, pin);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        let config = ServerConfig::default().with_port_range(5000, 4000);
        assert!(matches!(
            config.validate(),
            Err(ServerError::Configuration(_))
        ));

        let config = ServerConfig::default().with_port_range(0, 10);
        assert!(config.validate().is_err());
    }
}
