// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test data generators for attack simulation.

use std::net::{IpAddr, Ipv4Addr};

/// Generate a pool of IP addresses for testing.
pub fn generate_ips(count: usize) -> Vec<IpAddr> {
    (0..count)
        .map(|i| {
            // Use 10.x.x.x private range
            let a = ((i >> 16) & 0xFF) as u8;
            let b = ((i >> 8) & 0xFF) as u8;
            let c = (i & 0xFF) as u8;
            IpAddr::V4(Ipv4Addr::new(10, a, b, c))
        })
        .collect()
}

/// Generate a pool of recipient identifiers.
pub fn generate_recipients(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("user-{i:04}")).collect()
}

/// Forwarded-for header values a client might try to spoof with.
pub fn spoofed_forwarded_for() -> Vec<&'static str> {
    vec![
        "203.0.113.1",
        "203.0.113.2, 10.0.0.1",
        "198.51.100.7, 203.0.113.9, 10.0.0.1",
        "2001:db8::1",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_ips() {
        let ips = generate_ips(256);
        assert_eq!(ips.len(), 256);
        // All should be unique
        let unique: std::collections::HashSet<_> = ips.iter().collect();
        assert_eq!(unique.len(), 256);
    }

    #[test]
    fn test_generate_recipients() {
        let recipients = generate_recipients(100);
        assert_eq!(recipients.len(), 100);
        assert_eq!(recipients[7], "user-0007");
    }
}
