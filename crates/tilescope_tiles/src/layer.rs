//! Raster layer tile store with tile identity checks.
//!
//! A [`RasterLayer`] tracks every tile it has asked for. Each request gets a
//! [`TileTicket`] naming the layer, the coordinate and a per-layer sequence
//! number; a result is only written back when all three still match. A
//! fetch that outlives its layer, or a request that was superseded, can
//! therefore never paint over the tiles of the current layer.

use std::collections::HashMap;

use image::{Rgba, RgbaImage};

use crate::address::TileSource;
use crate::grid::TileCoord;

/// Decoded tile pixels.
pub type TileImage = RgbaImage;

/// Opaque black tile used when a location has no imagery.
pub fn black_tile(tile_size_px: u32) -> TileImage {
    RgbaImage::from_pixel(tile_size_px, tile_size_px, Rgba([0, 0, 0, 255]))
}

/// Identity of a raster layer, unique for the lifetime of a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl std::fmt::Display for LayerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Identity of one tile request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileTicket {
    pub layer: LayerId,
    pub coord: TileCoord,
    pub sequence: u64,
}

/// What the resolved pixels represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileContent {
    /// Decoded server imagery
    Imagery,
    /// Black placeholder for an empty or failed load
    Placeholder,
}

#[derive(Debug)]
enum TileState {
    Loading { sequence: u64, priority: u32 },
    Resolved { image: TileImage, content: TileContent },
}

/// Result of asking the layer for a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileDemand {
    /// Nothing known about the tile yet; a fetch must be issued
    Fetch(TileTicket),
    /// A fetch is pending and its priority changed
    Reprioritized { ticket: TileTicket, priority: u32 },
    /// A fetch is pending with the same priority
    Pending,
    /// Pixels are already set
    Resolved,
}

/// Outcome of writing a fetch result back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The ticket belongs to another layer
    StaleLayer,
    /// The tile was requested again, or already resolved
    Superseded,
    /// The layer never asked for this tile
    Unrequested,
}

/// The single raster layer currently attached to a map.
#[derive(Debug)]
pub struct RasterLayer {
    id: LayerId,
    source: TileSource,
    tiles: HashMap<TileCoord, TileState>,
    next_sequence: u64,
}

impl RasterLayer {
    pub fn new(id: LayerId, source: TileSource) -> Self {
        Self {
            id,
            source,
            tiles: HashMap::new(),
            next_sequence: 0,
        }
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    pub fn source(&self) -> &TileSource {
        &self.source
    }

    /// Ask for a tile at the given priority.
    ///
    /// Repeated demands never issue a second fetch for a pending or resolved
    /// tile; a pending tile only has its priority updated.
    pub fn demand(&mut self, coord: TileCoord, priority: u32) -> TileDemand {
        match self.tiles.get_mut(&coord) {
            Some(TileState::Resolved { .. }) => TileDemand::Resolved,
            Some(TileState::Loading {
                sequence,
                priority: current,
            }) => {
                if *current == priority {
                    TileDemand::Pending
                } else {
                    *current = priority;
                    TileDemand::Reprioritized {
                        ticket: TileTicket {
                            layer: self.id,
                            coord,
                            sequence: *sequence,
                        },
                        priority,
                    }
                }
            }
            None => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.tiles
                    .insert(coord, TileState::Loading { sequence, priority });
                TileDemand::Fetch(TileTicket {
                    layer: self.id,
                    coord,
                    sequence,
                })
            }
        }
    }

    /// Forget a pending request so the tile can be demanded again.
    pub fn abandon(&mut self, ticket: &TileTicket) {
        if ticket.layer != self.id {
            return;
        }
        if let Some(TileState::Loading { sequence, .. }) = self.tiles.get(&ticket.coord) {
            if *sequence == ticket.sequence {
                self.tiles.remove(&ticket.coord);
            }
        }
    }

    /// Write a fetch result back if the ticket is still current.
    pub fn resolve(
        &mut self,
        ticket: &TileTicket,
        image: TileImage,
        content: TileContent,
    ) -> ApplyOutcome {
        if ticket.layer != self.id {
            return ApplyOutcome::StaleLayer;
        }
        match self.tiles.get(&ticket.coord) {
            None => ApplyOutcome::Unrequested,
            Some(TileState::Resolved { .. }) => ApplyOutcome::Superseded,
            Some(TileState::Loading { sequence, .. }) if *sequence != ticket.sequence => {
                ApplyOutcome::Superseded
            }
            Some(TileState::Loading { .. }) => {
                self.tiles
                    .insert(ticket.coord, TileState::Resolved { image, content });
                ApplyOutcome::Applied
            }
        }
    }

    /// Resolved pixels of a tile, if any.
    pub fn tile(&self, coord: TileCoord) -> Option<(&TileImage, TileContent)> {
        match self.tiles.get(&coord) {
            Some(TileState::Resolved { image, content }) => Some((image, *content)),
            _ => None,
        }
    }

    pub fn is_pending(&self, coord: TileCoord) -> bool {
        matches!(self.tiles.get(&coord), Some(TileState::Loading { .. }))
    }

    /// Priority of a pending tile.
    pub fn pending_priority(&self, coord: TileCoord) -> Option<u32> {
        match self.tiles.get(&coord) {
            Some(TileState::Loading { priority, .. }) => Some(*priority),
            _ => None,
        }
    }

    /// Coordinates of every tile still waiting for a result.
    pub fn pending_coords(&self) -> Vec<TileCoord> {
        self.tiles
            .iter()
            .filter(|(_, s)| matches!(s, TileState::Loading { .. }))
            .map(|(coord, _)| *coord)
            .collect()
    }

    pub fn pending_count(&self) -> usize {
        self.tiles
            .values()
            .filter(|s| matches!(s, TileState::Loading { .. }))
            .count()
    }

    pub fn resolved_count(&self) -> usize {
        self.tiles.len() - self.pending_count()
    }

    /// Coordinates of all resolved tiles at one zoom.
    pub fn resolved_at(&self, z: u8) -> impl Iterator<Item = (TileCoord, &TileImage)> + '_ {
        self.tiles.iter().filter_map(move |(coord, state)| match state {
            TileState::Resolved { image, .. } if coord.z == z => Some((*coord, image)),
            _ => None,
        })
    }
}
