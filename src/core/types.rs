use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{Error, Result};

/// Link-layer address of a radio neighbor (EUI-64)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct LinkAddr(
    #[serde(serialize_with = "super::serde::serialize_eui64")]
    #[serde(deserialize_with = "super::serde::deserialize_eui64")]
    pub [u8; 8],
);

impl LinkAddr {
    /// Creates an address from its 8 octets
    pub const fn new(bytes: [u8; 8]) -> Self {
        LinkAddr(bytes)
    }

    /// Creates an address whose last two octets carry a short node id
    pub fn from_short(id: u16) -> Self {
        let mut bytes = [0u8; 8];
        bytes[6..].copy_from_slice(&id.to_be_bytes());
        LinkAddr(bytes)
    }

    /// Returns the raw octets
    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, b) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkAddr({})", self)
    }
}

impl FromStr for LinkAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut bytes = [0u8; 8];
        let mut count = 0;
        for part in s.split(':') {
            if count == bytes.len() {
                return Err(Error::config(format!("link address too long: {}", s)));
            }
            bytes[count] = u8::from_str_radix(part, 16)
                .map_err(|e| Error::config(format!("invalid link address {}: {}", s, e)))?;
            count += 1;
        }
        if count != bytes.len() {
            return Err(Error::config(format!("link address too short: {}", s)));
        }
        Ok(LinkAddr(bytes))
    }
}

/// Configuration for a 6P engine instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SixpConfig {
    /// Capacity of the neighbor table
    pub max_neighbors: usize,
    /// Capacity of the transaction pool
    pub max_transactions: usize,
    /// Capacity of the scheduling function registry
    pub max_scheduling_functions: usize,
    /// Sequence number given to a freshly allocated neighbor
    pub initial_seqno: u8,
    /// Depth of the queue towards the MAC
    pub tx_queue_capacity: usize,
    /// Timeout used by scheduling functions that do not pick their own
    #[serde(serialize_with = "super::serde::serialize_duration")]
    #[serde(deserialize_with = "super::serde::deserialize_duration")]
    pub default_timeout: Duration,
}

impl Default for SixpConfig {
    fn default() -> Self {
        SixpConfig {
            max_neighbors: 2,
            max_transactions: 2,
            max_scheduling_functions: 4,
            initial_seqno: 0,
            tx_queue_capacity: 8,
            default_timeout: Duration::from_secs(1),
        }
    }
}

impl SixpConfig {
    /// Checks that the configuration can back a working engine
    pub fn validate(&self) -> Result<()> {
        if self.max_neighbors == 0 {
            return Err(Error::config("max_neighbors must be positive"));
        }
        if self.max_transactions == 0 {
            return Err(Error::config("max_transactions must be positive"));
        }
        if self.max_transactions > u16::MAX as usize {
            return Err(Error::config("max_transactions is too large"));
        }
        if self.max_scheduling_functions == 0 {
            return Err(Error::config("max_scheduling_functions must be positive"));
        }
        if self.initial_seqno > super::MAX_SEQNO {
            return Err(Error::config("initial_seqno does not fit in 4 bits"));
        }
        if self.tx_queue_capacity == 0 {
            return Err(Error::config("tx_queue_capacity must be positive"));
        }
        if self.default_timeout.is_zero() {
            return Err(Error::config("default_timeout must be non-zero"));
        }
        if self.default_timeout > super::MAX_TIMEOUT {
            return Err(Error::config(format!(
                "default_timeout must not exceed {:?}",
                super::MAX_TIMEOUT
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_addr_display_and_parse() {
        let addr = LinkAddr::new([0x00, 0x12, 0x4b, 0x00, 0x06, 0x0d, 0x9b, 0x01]);
        let text = addr.to_string();
        assert_eq!(text, "00:12:4b:00:06:0d:9b:01");
        assert_eq!(text.parse::<LinkAddr>().unwrap(), addr);
    }

    #[test]
    fn test_link_addr_parse_errors() {
        assert!("00:11".parse::<LinkAddr>().is_err());
        assert!("00:11:22:33:44:55:66:77:88".parse::<LinkAddr>().is_err());
        assert!("zz:11:22:33:44:55:66:77".parse::<LinkAddr>().is_err());
    }

    #[test]
    fn test_link_addr_from_short() {
        let addr = LinkAddr::from_short(0x0102);
        assert_eq!(addr.as_bytes(), &[0, 0, 0, 0, 0, 0, 0x01, 0x02]);
        assert_ne!(LinkAddr::from_short(1), LinkAddr::from_short(2));
    }

    #[test]
    fn test_config_rejects_huge_timeout() {
        let config = SixpConfig {
            default_timeout: Duration::from_secs(u64::MAX),
            ..SixpConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = SixpConfig {
            default_timeout: crate::core::MAX_TIMEOUT,
            ..SixpConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_defaults_are_valid() {
        let config = SixpConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_neighbors, 2);
    }

    #[test]
    fn test_config_validation() {
        let mut config = SixpConfig::default();
        config.max_transactions = 0;
        assert!(config.validate().is_err());

        let mut config = SixpConfig::default();
        config.initial_seqno = 16;
        assert!(config.validate().is_err());

        let mut config = SixpConfig::default();
        config.default_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_partial_json() {
        let config: SixpConfig = serde_json::from_str(r#"{"max_neighbors": 4}"#).unwrap();
        assert_eq!(config.max_neighbors, 4);
        assert_eq!(config.max_transactions, SixpConfig::default().max_transactions);
    }
}
