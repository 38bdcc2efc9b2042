//! NetworkManager connection management through `nmcli`
//!
//! This is the only place that understands `nmcli` output. The connection
//! table is fixed-width text, so columns are located from the header line
//! rather than by splitting on whitespace (profile names contain spaces).

use crate::error::{Error, Result};
use crate::sys::CommandRunner;
use nom::{
    bytes::complete::take_till1,
    character::complete::{char, space0},
    combinator::rest,
    sequence::terminated,
    Parser,
};

const NMCLI: &str = "nmcli";

/// Placeholder nmcli prints for an empty value
const EMPTY_VALUE: &str = "--";

/// Property holding the interface a profile is bound to
const INTERFACE_NAME_PROPERTY: &str = "connection.interface-name";

/// One row of `nmcli connection show`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionRow {
    /// Profile name (may contain spaces)
    pub name: String,
    /// Connection type (ethernet, bridge, loopback, ...)
    pub conn_type: String,
    /// Active device, if any
    pub device: Option<String>,
}

/// Parse the fixed-width table printed by `nmcli connection show`
pub fn parse_connection_table(output: &str) -> Result<Vec<ConnectionRow>> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());

    let header = lines
        .next()
        .ok_or_else(|| Error::InventoryUnavailable("empty connection listing".to_string()))?;

    let columns = header_columns(header)?;
    let column = |name: &str| columns.iter().position(|(n, _)| *n == name);

    let name_idx = column("NAME")
        .ok_or_else(|| Error::InventoryUnavailable(format!("no NAME column in header: {}", header.trim())))?;
    let device_idx = column("DEVICE")
        .ok_or_else(|| Error::InventoryUnavailable(format!("no DEVICE column in header: {}", header.trim())))?;
    let type_idx = column("TYPE");

    let mut rows = Vec::new();
    for line in lines {
        let chars: Vec<char> = line.chars().collect();
        let field = |idx: usize| -> String {
            let start = columns[idx].1.min(chars.len());
            let end = columns
                .get(idx + 1)
                .map(|(_, offset)| *offset)
                .unwrap_or(chars.len())
                .min(chars.len());
            chars[start..end].iter().collect::<String>().trim().to_string()
        };

        let name = field(name_idx);
        if name.is_empty() {
            return Err(Error::InventoryUnavailable(format!(
                "row without a connection name: {}",
                line.trim()
            )));
        }

        let device = field(device_idx);
        rows.push(ConnectionRow {
            name,
            conn_type: type_idx.map(&field).unwrap_or_default(),
            device: if device.is_empty() || device == EMPTY_VALUE {
                None
            } else {
                Some(device)
            },
        });
    }

    Ok(rows)
}

/// Locate header labels and their starting column, ordered left to right
fn header_columns(header: &str) -> Result<Vec<(&str, usize)>> {
    let mut columns = Vec::new();
    let mut offset = 0;

    for (pos, ch) in header.char_indices() {
        let starts_word = !ch.is_whitespace()
            && (pos == 0 || header[..pos].ends_with(char::is_whitespace));
        if starts_word {
            let word_end = header[pos..]
                .find(char::is_whitespace)
                .map(|len| pos + len)
                .unwrap_or(header.len());
            columns.push((&header[pos..word_end], offset));
        }
        offset += 1;
    }

    if columns.is_empty() {
        return Err(Error::InventoryUnavailable(
            "connection listing has no header".to_string(),
        ));
    }

    Ok(columns)
}

/// Parse a `key: value` line from `nmcli connection show <name>`
fn property_line(input: &str) -> nom::IResult<&str, (&str, &str)> {
    let (input, key) = terminated(take_till1(|c| c == ':'), char(':')).parse(input)?;
    let (input, _) = space0.parse(input)?;
    let (input, value) = rest.parse(input)?;
    Ok((input, (key.trim(), value.trim())))
}

/// Look up a property in `nmcli connection show <name>` output
pub fn parse_property(output: &str, property: &str) -> Option<String> {
    output
        .lines()
        .filter_map(|line| property_line(line).ok().map(|(_, kv)| kv))
        .find(|(key, _)| *key == property)
        .map(|(_, value)| value)
        .filter(|value| !value.is_empty() && *value != EMPTY_VALUE)
        .map(str::to_string)
}

/// Client for NetworkManager connection profiles
pub struct NmCli<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> NmCli<'a> {
    /// Create a new client over a command runner
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// List every connection profile NetworkManager knows about
    pub fn connections(&self) -> Result<Vec<ConnectionRow>> {
        let output = self
            .runner
            .run(NMCLI, &["connection", "show"])
            .map_err(|e| Error::InventoryUnavailable(e.to_string()))?;

        if !output.success {
            return Err(Error::InventoryUnavailable(format!(
                "nmcli connection show: {}",
                output.summary()
            )));
        }

        parse_connection_table(&output.stdout)
    }

    /// Resolve the interface a profile is bound to
    pub fn interface_name(&self, profile: &str) -> Result<String> {
        let output = self
            .runner
            .run(NMCLI, &["connection", "show", profile])
            .map_err(|_| Error::InterfaceResolutionFailed(profile.to_string()))?;

        if !output.success {
            return Err(Error::InterfaceResolutionFailed(profile.to_string()));
        }

        parse_property(&output.stdout, INTERFACE_NAME_PROPERTY)
            .ok_or_else(|| Error::InterfaceResolutionFailed(profile.to_string()))
    }

    /// Create a bridge profile whose interface carries the same name
    pub fn add_bridge(&self, bridge: &str) -> Result<()> {
        self.runner
            .run_checked(
                NMCLI,
                &["connection", "add", "type", "bridge", "con-name", bridge, "ifname", bridge],
            )
            .map(|_| ())
            .map_err(|e| Error::BridgeCreationFailed {
                bridge: bridge.to_string(),
                message: e.to_string(),
            })
    }

    /// Set a single property on a profile
    pub fn modify(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.runner
            .run_checked(NMCLI, &["connection", "modify", name, key, value])
            .map(|_| ())
    }

    /// Create an ethernet port profile enslaved to a bridge
    pub fn add_bridge_port(&self, bridge: &str, port: &str, interface: &str) -> Result<()> {
        self.runner
            .run_checked(
                NMCLI,
                &[
                    "connection", "add", "type", "ethernet", "slave-type", "bridge",
                    "con-name", port, "ifname", interface, "master", bridge,
                ],
            )
            .map(|_| ())
            .map_err(|e| Error::AttachFailed {
                bridge: bridge.to_string(),
                interface: interface.to_string(),
                message: e.to_string(),
            })
    }

    /// Delete a profile
    pub fn delete(&self, name: &str) -> Result<()> {
        self.runner
            .run_checked(NMCLI, &["connection", "delete", name])
            .map(|_| ())
    }

    /// Restart the NetworkManager service so profile changes take effect
    pub fn restart_service(&self) -> Result<()> {
        self.runner
            .run_checked("systemctl", &["restart", "NetworkManager"])
            .map(|_| ())
    }
}
