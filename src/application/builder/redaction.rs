//! Viewer-dependent handling of submitter addresses.

use std::net::IpAddr;

use sha2::{Digest, Sha256};

use crate::config::GeneralSettings;

const HASH_DISPLAY_LEN: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Viewer {
    Public,
    /// Staff member; lower roles carry more clearance.
    Staff { role: u8 },
}

#[derive(Debug, Clone, Copy)]
pub struct RedactionContext<'a> {
    viewer: Viewer,
    salt: &'a str,
    clear_ip_min_role: u8,
}

impl RedactionContext<'static> {
    pub fn public() -> Self {
        Self {
            viewer: Viewer::Public,
            salt: "",
            clear_ip_min_role: 0,
        }
    }
}

impl<'a> RedactionContext<'a> {
    pub fn staff(role: u8, salt: &'a str, clear_ip_min_role: u8) -> Self {
        Self {
            viewer: Viewer::Staff { role },
            salt,
            clear_ip_min_role,
        }
    }

    /// Resolve a viewer against the global staff range; roles outside it see
    /// the public rendering.
    pub fn for_viewer(viewer: Viewer, salt: &'a str, settings: &GeneralSettings) -> Self {
        match viewer {
            Viewer::Staff { role } if role <= settings.max_staff_role => {
                Self::staff(role, salt, settings.clear_ip_min_role)
            }
            _ => Self {
                viewer: Viewer::Public,
                salt,
                clear_ip_min_role: settings.clear_ip_min_role,
            },
        }
    }

    pub fn viewer(&self) -> Viewer {
        self.viewer
    }

    pub fn is_moderation(&self) -> bool {
        matches!(self.viewer, Viewer::Staff { .. })
    }

    pub fn shows_ranges(&self) -> bool {
        matches!(self.viewer, Viewer::Staff { role } if role > self.clear_ip_min_role)
    }

    pub fn hash_ip(&self, ip: &IpAddr) -> String {
        hash_for_display(self.salt, &ip.to_string())
    }

    pub fn broad_range(&self, ip: &IpAddr) -> String {
        hash_for_display(self.salt, &range(ip, false))
    }

    pub fn narrow_range(&self, ip: &IpAddr) -> String {
        hash_for_display(self.salt, &range(ip, true))
    }

    /// Hash an already-extracted range, e.g. from a range ban.
    pub fn hash_range(&self, octets: &[u8]) -> String {
        let dotted = octets
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join(".");
        hash_for_display(self.salt, &dotted)
    }
}

/// Keyed display hash: SHA-256 over `salt ‖ text`, first ten hex digits.
pub fn hash_for_display(salt: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(text.as_bytes());
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(HASH_DISPLAY_LEN);
    digest
}

/// Network prefix of an address: two leading groups, or three when `narrow`.
pub fn range(ip: &IpAddr, narrow: bool) -> String {
    let groups = if narrow { 3 } else { 2 };
    match ip {
        IpAddr::V4(v4) => v4.octets()[..groups]
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join("."),
        IpAddr::V6(v6) => v6.segments()[..groups]
            .iter()
            .map(|segment| format!("{segment:x}"))
            .collect::<Vec<_>>()
            .join(":"),
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;

    #[test]
    fn ranges_keep_leading_groups() {
        let v4 = IpAddr::V4(Ipv4Addr::new(10, 20, 30, 40));
        assert_eq!(range(&v4, false), "10.20");
        assert_eq!(range(&v4, true), "10.20.30");

        let v6 = IpAddr::V6(Ipv6Addr::new(0x2001, 0xdb8, 0xa, 0, 0, 0, 0, 1));
        assert_eq!(range(&v6, false), "2001:db8");
        assert_eq!(range(&v6, true), "2001:db8:a");
    }

    #[test]
    fn display_hash_depends_on_salt() {
        let first = hash_for_display("salt-a", "10.20.30.40");
        let second = hash_for_display("salt-b", "10.20.30.40");

        assert_eq!(first.len(), 10);
        assert!(first.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert_ne!(first, second);
        assert_eq!(first, hash_for_display("salt-a", "10.20.30.40"));
    }

    #[test]
    fn roles_outside_staff_range_are_public() {
        let settings = GeneralSettings {
            max_staff_role: 3,
            clear_ip_min_role: 1,
            ..GeneralSettings::default()
        };

        let outsider = RedactionContext::for_viewer(Viewer::Staff { role: 4 }, "s", &settings);
        assert!(!outsider.is_moderation());

        let janitor = RedactionContext::for_viewer(Viewer::Staff { role: 3 }, "s", &settings);
        assert!(janitor.is_moderation());
        assert!(janitor.shows_ranges());

        let admin = RedactionContext::for_viewer(Viewer::Staff { role: 1 }, "s", &settings);
        assert!(admin.is_moderation());
        assert!(!admin.shows_ranges());
    }
}
