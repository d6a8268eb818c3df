//! Input validation for fwadm
//!
//! Every value that ends up in a privileged `iptables` invocation passes
//! through this module first. Validation is purely structural: no DNS
//! lookups, no network or privileged calls, so it is safe to run (and test)
//! without root.

use crate::core::error::ValidationError;
use crate::core::rule::{Action, Chain, Protocol, Rule};
use std::net::IpAddr;
use std::str::FromStr;

/// Validates a chain token (`INPUT`, `OUTPUT`, `FORWARD`, any case).
///
/// # Errors
///
/// Returns `InvalidChain` for any other token.
pub fn validate_chain(input: &str) -> Result<Chain, ValidationError> {
    Chain::from_str(input).map_err(|_| ValidationError::InvalidChain(input.to_string()))
}

/// Validates an address literal.
///
/// Accepts an IPv4 dotted quad with every octet in 0..=255 or an IPv6
/// literal. Hostnames are rejected rather than resolved, as are CIDR
/// suffixes and zone identifiers.
///
/// # Examples
///
/// ```
/// use fwadm::validators::validate_address;
///
/// assert!(validate_address("192.168.1.100").is_ok());
/// assert!(validate_address("2001:db8::1").is_ok());
/// assert!(validate_address("999.1.1.1").is_err());
/// assert!(validate_address("example.com").is_err());
/// ```
///
/// # Errors
///
/// Returns `InvalidAddress` if the input is not an address literal. IPv4
/// octets with leading zeros are rejected.
pub fn validate_address(input: &str) -> Result<IpAddr, ValidationError> {
    IpAddr::from_str(input).map_err(|_| ValidationError::InvalidAddress(input.to_string()))
}

/// Validates a port given as a decimal string.
///
/// Port 0 is accepted and means "every port".
///
/// # Errors
///
/// Returns `InvalidPort` for non-numeric input or values outside 0..=65535.
pub fn validate_port(input: &str) -> Result<u16, ValidationError> {
    let invalid = || ValidationError::InvalidPort(input.to_string());

    if input.is_empty() || !input.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    // Parse wide first so "65536" and "99999999999" report the same error
    let value: u64 = input.parse().map_err(|_| invalid())?;
    u16::try_from(value).map_err(|_| invalid())
}

/// Validates an optional protocol token. Absent means [`Protocol::Any`].
///
/// # Errors
///
/// Returns `InvalidProtocol` for anything other than `tcp`, `udp` or `any`.
pub fn validate_protocol(input: Option<&str>) -> Result<Protocol, ValidationError> {
    match input {
        None => Ok(Protocol::Any),
        Some(token) => Protocol::from_str(token)
            .map_err(|_| ValidationError::InvalidProtocol(token.to_string())),
    }
}

/// Validates an action token (`ACCEPT` or `DROP`, any case).
///
/// # Errors
///
/// Returns `InvalidAction` for any other token.
pub fn validate_action(input: &str) -> Result<Action, ValidationError> {
    Action::from_str(input).map_err(|_| ValidationError::InvalidAction(input.to_string()))
}

/// Validates a proposed rule and builds it with the default `ACCEPT` action.
///
/// Fields are checked in order chain, address, port, protocol; the first
/// failure is reported.
///
/// # Examples
///
/// ```
/// use fwadm::core::rule::{Chain, Protocol};
/// use fwadm::validators::validate;
///
/// let rule = validate("input", "192.168.1.100", "80", Some("tcp")).unwrap();
/// assert_eq!(rule.chain, Chain::Input);
/// assert_eq!(rule.protocol, Protocol::Tcp);
///
/// let rule = validate("OUTPUT", "10.0.0.1", "53", None).unwrap();
/// assert_eq!(rule.protocol, Protocol::Any);
/// ```
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first invalid field.
pub fn validate(
    chain: &str,
    address: &str,
    port: &str,
    protocol: Option<&str>,
) -> Result<Rule, ValidationError> {
    validate_with_action(chain, address, port, protocol, None)
}

/// Like [`validate`], with an explicit action token.
///
/// # Errors
///
/// Returns the [`ValidationError`] of the first invalid field.
pub fn validate_with_action(
    chain: &str,
    address: &str,
    port: &str,
    protocol: Option<&str>,
    action: Option<&str>,
) -> Result<Rule, ValidationError> {
    let chain = validate_chain(chain)?;
    let address = validate_address(address)?;
    let port = validate_port(port)?;
    let protocol = validate_protocol(protocol)?;
    let action = action.map_or(Ok(Action::Accept), validate_action)?;

    Ok(Rule::new(chain, address, port, protocol, action))
}

/// Checks if a port is well-known and returns informational message.
///
/// This is informational only and does not block the operation.
pub fn check_well_known_port(port: u16) -> Option<String> {
    match port {
        0 => Some("Port 0: matches every destination port".to_string()),
        22 => Some("Port 22: SSH".to_string()),
        80 => Some("Port 80: HTTP".to_string()),
        443 => Some("Port 443: HTTPS".to_string()),
        53 => Some("Port 53: DNS".to_string()),
        25 => Some("Port 25: SMTP".to_string()),
        21 => Some("Port 21: FTP".to_string()),
        3389 => Some("Port 3389: RDP".to_string()),
        1..=1023 => Some(format!("Privileged port {port}")),
        _ => None,
    }
}

/// Checks if an address is in a reserved range and returns informational warning.
///
/// This is informational only and does not block the operation.
pub fn check_reserved_ip(ip: IpAddr) -> Option<String> {
    match ip {
        IpAddr::V4(ipv4) => {
            let octets = ipv4.octets();

            // RFC 1918 private ranges
            if octets[0] == 10
                || (octets[0] == 172 && (16..=31).contains(&octets[1]))
                || (octets[0] == 192 && octets[1] == 168)
            {
                return Some("Private IP range (RFC 1918) - usually safe for LAN".to_string());
            }

            if ipv4.is_loopback() {
                return Some("Loopback range (127.x) - traffic never leaves this host".to_string());
            }

            if ipv4.is_link_local() {
                return Some("Link-local range (169.254.x.x) - APIPA addresses".to_string());
            }

            if ipv4.is_unspecified() {
                return Some("Unspecified address (0.0.0.0) - matches no real source".to_string());
            }

            None
        }
        IpAddr::V6(ipv6) => {
            if ipv6.is_loopback() {
                return Some("IPv6 loopback (::1) - traffic never leaves this host".to_string());
            }

            if ipv6.segments()[0] & 0xffc0 == 0xfe80 {
                return Some("IPv6 link-local (fe80::/10) - local network only".to_string());
            }

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_http_rule() {
        let rule = validate("INPUT", "192.168.1.100", "80", Some("tcp")).unwrap();
        assert_eq!(rule.chain, Chain::Input);
        assert_eq!(rule.address.to_string(), "192.168.1.100");
        assert_eq!(rule.port, 80);
        assert_eq!(rule.protocol, Protocol::Tcp);
        assert_eq!(rule.action, Action::Accept);
    }

    #[test]
    fn test_validate_chain_case_insensitive() {
        assert_eq!(validate_chain("forward").unwrap(), Chain::Forward);
        assert_eq!(validate_chain("Output").unwrap(), Chain::Output);
    }

    #[test]
    fn test_validate_chain_rejects_unknown() {
        assert_eq!(
            validate_chain("PREROUTING"),
            Err(ValidationError::InvalidChain("PREROUTING".to_string()))
        );
        assert!(validate_chain("").is_err());
        assert!(validate_chain("INPUT ").is_err());
    }

    #[test]
    fn test_validate_address_rejects_bad_octets() {
        for bad in [
            "999.1.1.1",
            "256.0.0.1",
            "1.2.3",
            "1.2.3.4.5",
            "abc.def.ghi.jkl",
            // Leading zeros read as octal by some tools
            "010.1.1.1",
            "1.2.3.04",
        ] {
            assert_eq!(
                validate_address(bad),
                Err(ValidationError::InvalidAddress(bad.to_string())),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_address_rejects_hostnames_and_cidr() {
        assert!(validate_address("localhost").is_err());
        assert!(validate_address("example.com").is_err());
        assert!(validate_address("10.0.0.0/8").is_err());
        assert!(validate_address("fe80::1%eth0").is_err());
        assert!(validate_address("").is_err());
    }

    #[test]
    fn test_validate_address_accepts_ipv6() {
        assert!(validate_address("::1").unwrap().is_ipv6());
        assert!(validate_address("2001:db8::42").is_ok());
    }

    #[test]
    fn test_validate_port_rejects_out_of_range() {
        for bad in ["-1", "65536", "http", "", " 80", "8080x", "99999999999999999999999"] {
            assert_eq!(
                validate_port(bad),
                Err(ValidationError::InvalidPort(bad.to_string())),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_port_bounds() {
        assert_eq!(validate_port("0").unwrap(), 0);
        assert_eq!(validate_port("65535").unwrap(), 65535);
        assert_eq!(validate_port("00022").unwrap(), 22);
    }

    #[test]
    fn test_validate_protocol_defaults_to_any() {
        assert_eq!(validate_protocol(None).unwrap(), Protocol::Any);
        assert_eq!(validate_protocol(Some("UDP")).unwrap(), Protocol::Udp);
        assert_eq!(
            validate_protocol(Some("icmp")),
            Err(ValidationError::InvalidProtocol("icmp".to_string()))
        );
    }

    #[test]
    fn test_validate_action() {
        assert_eq!(validate_action("drop").unwrap(), Action::Drop);
        assert_eq!(validate_action("ACCEPT").unwrap(), Action::Accept);
        assert!(matches!(
            validate_action("REJECT"),
            Err(ValidationError::InvalidAction(_))
        ));
    }

    #[test]
    fn test_first_invalid_field_wins() {
        let err = validate("nope", "999.1.1.1", "http", Some("icmp")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidChain(_)));

        let err = validate("INPUT", "999.1.1.1", "http", Some("icmp")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidAddress(_)));

        let err = validate("INPUT", "1.1.1.1", "http", Some("icmp")).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidPort(_)));
    }

    #[test]
    fn test_check_well_known_port() {
        assert_eq!(check_well_known_port(22).unwrap(), "Port 22: SSH");
        assert!(check_well_known_port(111).unwrap().contains("Privileged"));
        assert!(check_well_known_port(8080).is_none());
    }

    #[test]
    fn test_check_reserved_ip() {
        assert!(check_reserved_ip("192.168.1.1".parse().unwrap()).unwrap().contains("RFC 1918"));
        assert!(check_reserved_ip("127.0.0.1".parse().unwrap()).unwrap().contains("Loopback"));
        assert!(check_reserved_ip("fe80::1".parse().unwrap()).unwrap().contains("link-local"));
        assert!(check_reserved_ip("8.8.8.8".parse().unwrap()).is_none());
    }
}
