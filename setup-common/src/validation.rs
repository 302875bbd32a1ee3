use ipnet::Ipv4Net;
use regex::Regex;
use std::net::Ipv4Addr;
use std::sync::OnceLock;
use thiserror::Error;

use crate::types::Host;

/// Lower-case DNS name with at least two labels and an alphabetic TLD.
/// Labels neither start nor end with a dash.
pub const DNS_NAME_PATTERN: &str = r"^((xn--)?[a-z0-9]([a-z0-9_-]{0,61}[a-z0-9])?\.)*(xn--)?[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.[a-z]{2,}$";

const MAX_DNS_NAME_LENGTH: usize = 253;

fn dns_name_regex() -> Option<&'static Regex> {
    static DNS_NAME: OnceLock<Option<Regex>> = OnceLock::new();
    DNS_NAME
        .get_or_init(|| Regex::new(DNS_NAME_PATTERN).ok())
        .as_ref()
}

/// Check a cluster domain suffix entered by the operator
pub fn validate_dns_name(input: &str) -> bool {
    input.len() <= MAX_DNS_NAME_LENGTH && dns_name_regex().is_some_and(|re| re.is_match(input))
}

/// Structural problems of a [`Host`] submitted for static IP configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostValidationError {
    #[error("host has no node name")]
    MissingNodeName,

    #[error("host {0} has no DNS servers")]
    MissingDns(String),

    #[error("host {0} has no interfaces")]
    MissingInterfaces(String),

    #[error("host {host}: interface {interface:?} is missing name, ip, gateway or prefix length")]
    IncompleteInterface { host: String, interface: String },

    #[error("host {host}: interface {interface} has invalid address {value}")]
    InvalidAddress {
        host: String,
        interface: String,
        value: String,
    },

    #[error("host {host}: interface {interface} has invalid prefix length {prefix}")]
    InvalidPrefix {
        host: String,
        interface: String,
        prefix: u32,
    },
}

/// Validate one host before any cluster resource is touched for it
pub fn validate_host(host: &Host) -> Result<(), HostValidationError> {
    if host.node_name.is_empty() {
        return Err(HostValidationError::MissingNodeName);
    }
    if host.dns.is_empty() {
        return Err(HostValidationError::MissingDns(host.node_name.clone()));
    }
    if host.interfaces.is_empty() {
        return Err(HostValidationError::MissingInterfaces(host.node_name.clone()));
    }

    for interface in &host.interfaces {
        let incomplete = || HostValidationError::IncompleteInterface {
            host: host.node_name.clone(),
            interface: interface.name.clone(),
        };

        let address = interface.address().ok_or_else(incomplete)?;
        if interface.name.is_empty()
            || address.ip.is_empty()
            || address.gateway.is_empty()
            || address.prefix_length == 0
        {
            return Err(incomplete());
        }

        let ip = parse_ipv4(host, &interface.name, &address.ip)?;
        parse_ipv4(host, &interface.name, &address.gateway)?;

        u8::try_from(address.prefix_length)
            .ok()
            .and_then(|prefix| Ipv4Net::new(ip, prefix).ok())
            .ok_or_else(|| HostValidationError::InvalidPrefix {
                host: host.node_name.clone(),
                interface: interface.name.clone(),
                prefix: address.prefix_length,
            })?;
    }

    Ok(())
}

fn parse_ipv4(host: &Host, interface: &str, value: &str) -> Result<Ipv4Addr, HostValidationError> {
    value
        .parse::<Ipv4Addr>()
        .map_err(|_| HostValidationError::InvalidAddress {
            host: host.node_name.clone(),
            interface: interface.to_string(),
            value: value.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Interface, Ipv4Address, Ipv4Config};
    use proptest::prelude::*;

    fn valid_host() -> Host {
        Host {
            node_name: "master-0".to_string(),
            hostname: "master-0.edge.example.com".to_string(),
            dns: vec!["192.168.7.1".to_string()],
            interfaces: vec![Interface {
                name: "enp1s0".to_string(),
                ipv4: Ipv4Config {
                    dhcp: None,
                    address: Some(Ipv4Address {
                        ip: "192.168.7.10".to_string(),
                        prefix_length: 24,
                        gateway: "192.168.7.1".to_string(),
                    }),
                },
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_dns_names() {
        assert!(validate_dns_name("example.com"));
        assert!(validate_dns_name("edge-0.lab.example.com"));
        assert!(validate_dns_name("xn--bcher-kva.example"));
        assert!(!validate_dns_name("not a domain"));
        assert!(!validate_dns_name("-leadingdash.com"));
        assert!(!validate_dns_name("trailingdash-.com"));
        assert!(!validate_dns_name("localhost"));
        assert!(!validate_dns_name("Example.com"));
        assert!(!validate_dns_name(""));
        assert!(!validate_dns_name(" example.com"));
        assert!(!validate_dns_name("example.com\n"));
    }

    #[test]
    fn test_dns_name_length_limit() {
        let label = "a".repeat(60);
        let long = format!("{label}.{label}.{label}.{label}.{label}.com");
        assert!(long.len() > MAX_DNS_NAME_LENGTH);
        assert!(!validate_dns_name(&long));
    }

    #[test]
    fn test_valid_host() {
        assert_eq!(validate_host(&valid_host()), Ok(()));
    }

    #[test]
    fn test_host_missing_fields() {
        let mut host = valid_host();
        host.node_name.clear();
        assert_eq!(validate_host(&host), Err(HostValidationError::MissingNodeName));

        let mut host = valid_host();
        host.dns.clear();
        assert!(matches!(validate_host(&host), Err(HostValidationError::MissingDns(_))));

        let mut host = valid_host();
        host.interfaces.clear();
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::MissingInterfaces(_))
        ));
    }

    #[test]
    fn test_host_incomplete_interface() {
        let mut host = valid_host();
        host.interfaces[0].ipv4.address = None;
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::IncompleteInterface { .. })
        ));

        let mut host = valid_host();
        if let Some(address) = host.interfaces[0].ipv4.address.as_mut() {
            address.gateway.clear();
        }
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::IncompleteInterface { .. })
        ));

        let mut host = valid_host();
        if let Some(address) = host.interfaces[0].ipv4.address.as_mut() {
            address.prefix_length = 0;
        }
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::IncompleteInterface { .. })
        ));
    }

    #[test]
    fn test_host_bad_addresses() {
        let mut host = valid_host();
        if let Some(address) = host.interfaces[0].ipv4.address.as_mut() {
            address.ip = "192.168.7".to_string();
        }
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::InvalidAddress { .. })
        ));

        let mut host = valid_host();
        if let Some(address) = host.interfaces[0].ipv4.address.as_mut() {
            address.prefix_length = 33;
        }
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::InvalidPrefix { prefix: 33, .. })
        ));

        let mut host = valid_host();
        if let Some(address) = host.interfaces[0].ipv4.address.as_mut() {
            address.prefix_length = 300;
        }
        assert!(matches!(
            validate_host(&host),
            Err(HostValidationError::InvalidPrefix { prefix: 300, .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_generated_domains_are_valid(domain in "[a-z][a-z0-9]{0,10}(\\.[a-z][a-z0-9]{0,10}){0,3}\\.[a-z]{2,6}") {
            prop_assert!(validate_dns_name(&domain));
        }

        #[test]
        fn prop_names_with_spaces_are_rejected(left in "[a-z]{1,10}", right in "[a-z]{1,10}\\.com") {
            let domain = format!("{left} {right}");
            prop_assert!(!validate_dns_name(&domain));
        }

        #[test]
        fn prop_leading_dash_is_rejected(name in "[a-z0-9]{1,20}\\.[a-z]{2,6}") {
            let domain = format!("-{name}");
            prop_assert!(!validate_dns_name(&domain));
        }
    }
}
