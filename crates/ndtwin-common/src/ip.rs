//! Dotted-quad IPv4 conversions used by the topology loader and classifier.

use std::net::Ipv4Addr;

use crate::error::{NdtError, NdtResult};

/// Parses a dotted-quad string into a host-order `u32`.
pub fn ip_string_to_u32(s: &str) -> NdtResult<u32> {
    let addr: Ipv4Addr = s
        .parse()
        .map_err(|_| NdtError::Parse(format!("invalid IPv4 address: {s}")))?;
    Ok(u32::from(addr))
}

/// Renders a host-order `u32` as a dotted-quad string.
pub fn ip_to_string(ip: u32) -> String {
    Ipv4Addr::from(ip).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_on_valid_dotted_ipv4() {
        for s in ["10.0.0.2", "0.0.0.0", "255.255.255.255", "192.168.1.100"] {
            let n = ip_string_to_u32(s).unwrap();
            assert_eq!(ip_to_string(n), s);
        }
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(ip_string_to_u32("not-an-ip").is_err());
        assert!(ip_string_to_u32("10.0.0.999").is_err());
    }

    proptest::proptest! {
        #[test]
        fn round_trip_law(a in 0u8..=255, b in 0u8..=255, c in 0u8..=255, d in 0u8..=255) {
            let s = format!("{a}.{b}.{c}.{d}");
            let n = ip_string_to_u32(&s).unwrap();
            proptest::prop_assert_eq!(ip_to_string(n), s);
        }
    }
}
