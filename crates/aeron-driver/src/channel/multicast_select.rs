// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Longest-prefix interface selection for joining multicast groups.
//!
//! Kept independent of any real NIC enumeration so it is unit-testable
//! against a plain table of interfaces, per the testable property in
//! SPEC_FULL §8 ("a subnet filter ranks interfaces by decreasing match
//! length; ties are broken by registration order").

use std::net::Ipv4Addr;

/// A candidate interface, as reported by the OS (or, in tests, fabricated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    pub supports_multicast: bool,
    pub is_loopback: bool,
}

/// Select the interface to join a multicast group on, given an optional
/// subnet hint (`interface=addr/prefix` from the channel URI).
///
/// With a hint, ranks interfaces by the number of leading bits they share
/// with the hint address, capped at the interface's own `prefix_len` (an
/// interface cannot claim a match wider than its own network). Ties are
/// broken by registration order (lowest index wins). Without a hint, falls
/// back to the first interface that supports multicast or is loopback.
#[must_use]
pub fn select_interface(interfaces: &[Interface], hint: Option<(Ipv4Addr, u8)>) -> Option<usize> {
    match hint {
        Some((hint_addr, hint_prefix)) => interfaces
            .iter()
            .enumerate()
            .map(|(index, iface)| {
                let match_len = common_prefix_len(iface.address, hint_addr)
                    .min(iface.prefix_len)
                    .min(hint_prefix);
                (index, match_len)
            })
            .max_by_key(|&(index, match_len)| (match_len, std::cmp::Reverse(index)))
            .filter(|&(_, match_len)| match_len > 0)
            .map(|(index, _)| index),
        None => interfaces
            .iter()
            .position(|iface| iface.supports_multicast || iface.is_loopback),
    }
}

/// Number of matching leading bits between two IPv4 addresses.
fn common_prefix_len(a: Ipv4Addr, b: Ipv4Addr) -> u8 {
    let diff = u32::from(a) ^ u32::from(b);
    diff.leading_zeros() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iface(addr: &str, prefix_len: u8) -> Interface {
        Interface {
            address: addr.parse().unwrap(),
            prefix_len,
            supports_multicast: true,
            is_loopback: false,
        }
    }

    #[test]
    fn picks_longest_matching_prefix() {
        let interfaces = [
            iface("10.0.1.1", 24),
            iface("10.0.0.1", 16),
            iface("192.168.1.1", 24),
        ];
        let selected = select_interface(&interfaces, Some(("10.0.1.200".parse().unwrap(), 24)));
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn ties_break_by_registration_order() {
        let interfaces = [iface("10.0.0.1", 24), iface("10.0.0.2", 24)];
        let selected = select_interface(&interfaces, Some(("10.0.0.200".parse().unwrap(), 24)));
        assert_eq!(selected, Some(0));
    }

    #[test]
    fn falls_back_to_multicast_capable_without_hint() {
        let interfaces = [
            Interface {
                address: "10.0.0.1".parse().unwrap(),
                prefix_len: 24,
                supports_multicast: false,
                is_loopback: false,
            },
            iface("10.0.0.2", 24),
        ];
        assert_eq!(select_interface(&interfaces, None), Some(1));
    }

    #[test]
    fn no_match_returns_none() {
        let interfaces = [iface("10.0.0.1", 24)];
        let selected = select_interface(&interfaces, Some(("192.168.1.1".parse().unwrap(), 24)));
        assert_eq!(selected, None);
    }
}
