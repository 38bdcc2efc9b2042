//! Bridge forwarding database access through iproute2 `bridge fdb`

use crate::error::{Error, Result};
use crate::sys::CommandRunner;
use nom::{
    bytes::complete::{tag, take_while1},
    character::complete::{space0, space1},
    multi::many0,
    sequence::preceded,
    Parser,
};

const BRIDGE: &str = "bridge";

/// A learned or static forwarding entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardingEntry {
    /// MAC address
    pub mac: String,
    /// Port device the address was learned on
    pub device: String,
    /// VLAN tag, when the entry carries one
    pub vlan: Option<u16>,
    /// Bridge the port belongs to (`master` attribute)
    pub bridge: Option<String>,
}

impl ForwardingEntry {
    /// Arguments for `bridge fdb del` removing this entry from its master
    pub fn delete_args(&self) -> [&str; 6] {
        ["fdb", "del", &self.mac, "dev", &self.device, "master"]
    }
}

fn token(input: &str) -> nom::IResult<&str, &str> {
    take_while1(|c: char| !c.is_whitespace()).parse(input)
}

/// Parse one `bridge fdb show` line
fn fdb_line(input: &str) -> nom::IResult<&str, ForwardingEntry> {
    let (input, _) = space0.parse(input)?;
    let (input, mac) = token(input)?;
    let (input, _) = (space1, tag("dev"), space1).parse(input)?;
    let (input, device) = token(input)?;
    let (input, attrs) = many0(preceded(space1, token)).parse(input)?;
    let (input, _) = space0.parse(input)?;

    let mut vlan = None;
    let mut bridge = None;
    let mut iter = attrs.iter();
    while let Some(attr) = iter.next() {
        match *attr {
            "vlan" => vlan = iter.next().and_then(|v| v.parse::<u16>().ok()),
            "master" => bridge = iter.next().map(|b| b.to_string()),
            _ => {}
        }
    }

    Ok((
        input,
        ForwardingEntry {
            mac: mac.to_string(),
            device: device.to_string(),
            vlan,
            bridge,
        },
    ))
}

/// Parse `bridge fdb show` output, skipping lines that are not entries
pub fn parse_fdb(output: &str) -> Vec<ForwardingEntry> {
    output
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match fdb_line(line) {
            Ok((_, entry)) => Some(entry),
            Err(_) => {
                tracing::trace!(line, "skipping unrecognized fdb line");
                None
            }
        })
        .collect()
}

/// Forwarding database client
pub struct Fdb<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> Fdb<'a> {
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Read every forwarding entry on the host
    pub fn entries(&self) -> Result<Vec<ForwardingEntry>> {
        let output = self.runner.run_checked(BRIDGE, &["fdb", "show"])?;
        Ok(parse_fdb(&output.stdout))
    }

    /// Remove an entry from its bridge
    pub fn delete(&self, entry: &ForwardingEntry) -> Result<()> {
        if entry.bridge.is_none() {
            return Err(Error::CommandFailed {
                command: format!("{} fdb del {}", BRIDGE, entry.mac),
                message: format!("entry on '{}' has no master bridge", entry.device),
            });
        }

        self.runner
            .run_checked(BRIDGE, &entry.delete_args())
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::testing::ScriptedRunner;

    const SHOW: &str = "\
33:33:00:00:00:01 dev ens3 self permanent
52:54:00:aa:bb:01 dev eth0 vlan 1 master bridge101
52:54:00:aa:bb:01 dev eth0 master bridge101 permanent
52:54:00:aa:bb:02 dev eth1 vlan 10 master bridge102
01:00:5e:00:00:01 dev bridge101 self permanent
garbage
";

    #[test]
    fn test_parse_fdb() {
        let entries = parse_fdb(SHOW);
        assert_eq!(entries.len(), 5);

        assert_eq!(entries[0].device, "ens3");
        assert_eq!(entries[0].bridge, None);
        assert_eq!(entries[0].vlan, None);

        assert_eq!(entries[1].mac, "52:54:00:aa:bb:01");
        assert_eq!(entries[1].vlan, Some(1));
        assert_eq!(entries[1].bridge.as_deref(), Some("bridge101"));

        assert_eq!(entries[2].vlan, None);
        assert_eq!(entries[3].vlan, Some(10));
        assert_eq!(entries[3].bridge.as_deref(), Some("bridge102"));
    }

    #[test]
    fn test_delete_command() {
        let runner = ScriptedRunner::new();
        let fdb = Fdb::new(&runner);
        let entry = parse_fdb("52:54:00:aa:bb:01 dev eth0 vlan 1 master bridge101").remove(0);

        fdb.delete(&entry).unwrap();
        assert_eq!(
            runner.calls(),
            vec!["bridge fdb del 52:54:00:aa:bb:01 dev eth0 master"]
        );
    }

    #[test]
    fn test_delete_requires_master() {
        let runner = ScriptedRunner::new();
        let fdb = Fdb::new(&runner);
        let entry = parse_fdb("33:33:00:00:00:01 dev ens3 self permanent").remove(0);

        assert!(fdb.delete(&entry).is_err());
        assert!(runner.calls().is_empty());
    }
}
