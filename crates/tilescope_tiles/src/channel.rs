//! Acquisition channels and the user's channel selection.
//!
//! Channels form a closed set identified by small integer codes. Anything
//! outside that set is rejected instead of being mapped to a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// RGB display color.
pub type Rgb = [u8; 3];

/// Errors from channel lookup and selection edits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("Unknown channel id {0}")]
    UnknownChannel(u8),

    #[error("Cannot parse channel id '{0}'")]
    InvalidChannelId(String),

    #[error("At least one channel must stay selected")]
    Empty,

    #[error("Cannot deselect {0:?}: it is the last selected channel")]
    LastChannel(ChannelId),
}

/// Known acquisition channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum ChannelId {
    /// LED matrix brightfield
    Brightfield = 0,
    /// 405 nm excitation
    Fluorescence405 = 11,
    /// 488 nm excitation
    Fluorescence488 = 12,
    /// 638 nm excitation
    Fluorescence638 = 13,
    /// 561 nm excitation
    Fluorescence561 = 14,
    /// 730 nm excitation
    Fluorescence730 = 15,
}

impl ChannelId {
    /// All channels, in code order.
    pub fn all() -> &'static [ChannelId] {
        &[
            ChannelId::Brightfield,
            ChannelId::Fluorescence405,
            ChannelId::Fluorescence488,
            ChannelId::Fluorescence638,
            ChannelId::Fluorescence561,
            ChannelId::Fluorescence730,
        ]
    }

    /// Numeric channel code.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Channel code as used for settings dictionary keys (`"12"`).
    pub fn key(self) -> String {
        self.code().to_string()
    }

    /// Name the tile server uses for this channel.
    pub fn server_name(self) -> &'static str {
        match self {
            ChannelId::Brightfield => "BF_LED_matrix_full",
            ChannelId::Fluorescence405 => "Fluorescence_405_nm_Ex",
            ChannelId::Fluorescence488 => "Fluorescence_488_nm_Ex",
            ChannelId::Fluorescence638 => "Fluorescence_638_nm_Ex",
            ChannelId::Fluorescence561 => "Fluorescence_561_nm_Ex",
            ChannelId::Fluorescence730 => "Fluorescence_730_nm_Ex",
        }
    }

    /// Default human-readable label.
    pub fn default_label(self) -> &'static str {
        match self {
            ChannelId::Brightfield => "Brightfield",
            ChannelId::Fluorescence405 => "405 nm",
            ChannelId::Fluorescence488 => "488 nm",
            ChannelId::Fluorescence638 => "638 nm",
            ChannelId::Fluorescence561 => "561 nm",
            ChannelId::Fluorescence730 => "730 nm",
        }
    }

    /// Default display color.
    pub fn default_color(self) -> Rgb {
        match self {
            ChannelId::Brightfield => [255, 255, 255],
            ChannelId::Fluorescence405 => [0, 102, 255],
            ChannelId::Fluorescence488 => [0, 255, 0],
            ChannelId::Fluorescence638 => [255, 0, 0],
            ChannelId::Fluorescence561 => [255, 200, 0],
            ChannelId::Fluorescence730 => [255, 0, 255],
        }
    }

    /// Look up a channel by its server name.
    pub fn from_server_name(name: &str) -> Option<ChannelId> {
        Self::all().iter().copied().find(|c| c.server_name() == name)
    }
}

impl TryFrom<u8> for ChannelId {
    type Error = SelectionError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        ChannelId::all()
            .iter()
            .copied()
            .find(|c| c.code() == code)
            .ok_or(SelectionError::UnknownChannel(code))
    }
}

impl From<ChannelId> for u8 {
    fn from(id: ChannelId) -> Self {
        id.code()
    }
}

impl std::str::FromStr for ChannelId {
    type Err = SelectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code: u8 = s
            .trim()
            .parse()
            .map_err(|_| SelectionError::InvalidChannelId(s.to_string()))?;
        ChannelId::try_from(code)
    }
}

/// Display metadata for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub label: String,
    pub color: Rgb,
}

/// Display metadata for every known channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelCatalog {
    entries: BTreeMap<ChannelId, ChannelInfo>,
}

impl ChannelCatalog {
    /// Catalog with built-in labels and colors.
    pub fn new() -> Self {
        let entries = ChannelId::all()
            .iter()
            .map(|&id| {
                (
                    id,
                    ChannelInfo {
                        id,
                        label: id.default_label().to_string(),
                        color: id.default_color(),
                    },
                )
            })
            .collect();
        Self { entries }
    }

    /// Override the label and color of a channel given by raw code.
    pub fn set_display(&mut self, code: u8, label: &str, color: Rgb) -> Result<(), SelectionError> {
        let id = ChannelId::try_from(code)?;
        self.entries.insert(
            id,
            ChannelInfo {
                id,
                label: label.to_string(),
                color,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: ChannelId) -> &ChannelInfo {
        // Every id is inserted by `new()` and never removed.
        &self.entries[&id]
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelInfo> {
        self.entries.values()
    }
}

impl Default for ChannelCatalog {
    fn default() -> Self {
        Self::new()
    }
}

/// Ordered, non-empty set of selected channels.
///
/// The first entry is the primary channel shown when merging is off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSelection {
    channels: Vec<ChannelId>,
}

impl ChannelSelection {
    /// Selection holding a single channel.
    pub fn single(id: ChannelId) -> Self {
        Self { channels: vec![id] }
    }

    /// Build a selection from a list, dropping duplicates but keeping order.
    pub fn from_channels(ids: impl IntoIterator<Item = ChannelId>) -> Result<Self, SelectionError> {
        let mut channels = Vec::new();
        for id in ids {
            if !channels.contains(&id) {
                channels.push(id);
            }
        }
        if channels.is_empty() {
            return Err(SelectionError::Empty);
        }
        Ok(Self { channels })
    }

    /// Parse a comma-separated list of channel codes, e.g. `"12,13"`.
    pub fn parse_codes(csv: &str) -> Result<Self, SelectionError> {
        let ids = csv
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<ChannelId>, _>>()?;
        Self::from_channels(ids)
    }

    /// Add the channel if absent, remove it otherwise.
    ///
    /// Removing the last channel is rejected and leaves the selection as is.
    pub fn toggle(&mut self, id: ChannelId) -> Result<(), SelectionError> {
        if let Some(pos) = self.channels.iter().position(|&c| c == id) {
            if self.channels.len() == 1 {
                return Err(SelectionError::LastChannel(id));
            }
            self.channels.remove(pos);
        } else {
            self.channels.push(id);
        }
        Ok(())
    }

    pub fn contains(&self, id: ChannelId) -> bool {
        self.channels.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn primary(&self) -> ChannelId {
        self.channels[0]
    }

    pub fn channels(&self) -> &[ChannelId] {
        &self.channels
    }

    /// Server names joined with commas, for merged-tile requests.
    pub fn server_names_csv(&self) -> String {
        self.channels
            .iter()
            .map(|c| c.server_name())
            .collect::<Vec<_>>()
            .join(",")
    }
}

impl Default for ChannelSelection {
    fn default() -> Self {
        Self::single(ChannelId::Brightfield)
    }
}
