//! Interface ordering
//!
//! Bridge numbers are assigned in the order produced here, so the ranking
//! must be total and stable: two runs over the same inventory give the same
//! interface the same bridge.

use crate::inventory::{ConnectionKind, ConnectionProfile};
use crate::manifest::{NamingConfig, UnknownRank};

/// Numeric rank encoded in a profile name, if any
///
/// - netplan profiles: the number after the device prefix (`netplan-ens7` -> 7)
/// - wired defaults: the trailing number (`Wired connection 3` -> 3)
pub fn rank(profile: &ConnectionProfile, naming: &NamingConfig) -> Option<u64> {
    match profile.kind {
        ConnectionKind::NetplanManaged => {
            let (_, rest) = profile.name.split_once(naming.netplan_prefix.as_str())?;
            let token = rest.split('-').next()?;
            let digits = token.strip_prefix(naming.device_prefix.as_str())?;
            parse_digits(digits)
        }
        ConnectionKind::WiredDefault => {
            let start = profile
                .name
                .rfind(|c: char| !c.is_ascii_digit())
                .map(|i| i + 1)
                .unwrap_or(0);
            parse_digits(&profile.name[start..])
        }
        ConnectionKind::Other => None,
    }
}

fn parse_digits(s: &str) -> Option<u64> {
    if s.is_empty() || !s.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// Sort key including the unknown-rank policy
pub fn sort_key(profile: &ConnectionProfile, naming: &NamingConfig) -> u64 {
    rank(profile, naming).unwrap_or(match naming.unknown_rank {
        UnknownRank::First => 0,
        UnknownRank::Last => u64::MAX,
    })
}

/// Order profiles for bridging (stable for equal keys)
pub fn order(profiles: &[ConnectionProfile], naming: &NamingConfig) -> Vec<ConnectionProfile> {
    let mut ordered = profiles.to_vec();
    ordered.sort_by_key(|p| sort_key(p, naming));
    ordered
}
