//! Raster layer lifecycle.
//!
//! Display changes are modelled as a pure function from the current
//! [`DisplayState`] and a [`DisplayEvent`] to a new state plus the list of
//! [`Effect`]s needed to bring the map in line with it. The new tile source
//! is built before any effect is emitted, so a failed transition leaves the
//! map untouched.
//!
//! [`MapSurface`] owns the layers and applies effects. It holds at most one
//! raster layer and exactly one mask overlay; the overlay is created with
//! the surface and never removed.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use url::Url;

use crate::address::{ChannelMode, RasterMode, SourceError, TileSource, TimeScope};
use crate::annotation::MaskOverlay;
use crate::channel::ChannelSelection;
use crate::grid::ImagePyramid;
use crate::layer::{ApplyOutcome, LayerId, RasterLayer, TileContent, TileImage, TileTicket};
use crate::scheduler::{SchedulePass, ViewState, ViewportTileScheduler};
use crate::settings::ProcessingSettings;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransitionError {
    #[error("Cannot build tile source: {0}")]
    Source(#[from] SourceError),
}

/// Everything that determines which raster layer is shown.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplayState {
    pub selection: ChannelSelection,
    pub merge: bool,
    pub settings: ProcessingSettings,
    pub dataset_id: Option<String>,
    /// Selected timepoint; `None` shows the live scan grid
    pub timepoint: Option<String>,
    /// Acquisition timestamp of the latest live scan
    pub live_timestamp: Option<String>,
}

impl DisplayState {
    /// Whether tiles are composited server-side.
    ///
    /// Merging a single channel falls back to the single-channel endpoint.
    pub fn is_merged(&self) -> bool {
        self.merge && self.selection.len() > 1
    }

    pub fn raster_mode(&self) -> RasterMode {
        let channels = if self.is_merged() {
            ChannelMode::Merged(self.selection.clone())
        } else {
            ChannelMode::Single(self.selection.primary())
        };
        let scope = match &self.timepoint {
            Some(name) => TimeScope::Timepoint(name.clone()),
            None => TimeScope::LiveGrid {
                timestamp: self.live_timestamp.clone(),
            },
        };
        RasterMode { channels, scope }
    }
}

/// User actions and notifications that affect the raster layer.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    /// Channel selector applied a new selection
    ChannelsApplied(ChannelSelection),
    TimepointSelected(Option<String>),
    MergeToggled(bool),
    SettingsChanged(ProcessingSettings),
    DatasetSelected(Option<String>),
    /// A new live scan finished with the given acquisition timestamp
    LiveGridRefreshed(String),
    /// Rebuild the raster from the current state
    Reload,
}

/// Side effect to apply to the map, in order.
#[derive(Debug, Clone)]
pub enum Effect {
    DetachRaster,
    AttachRaster(TileSource),
    /// Run a scheduling pass against the current view
    Reprioritize,
}

#[derive(Debug, Clone)]
pub struct Transition {
    pub state: DisplayState,
    pub effects: Vec<Effect>,
}

/// Builds one tile source per transition.
///
/// Pyramid geometry is looked up per dataset; datasets without an entry use
/// the default pyramid.
#[derive(Debug, Clone)]
pub struct TileSourceFactory {
    base_url: Url,
    default_grid: Arc<ImagePyramid>,
    dataset_grids: HashMap<String, Arc<ImagePyramid>>,
}

impl TileSourceFactory {
    pub fn new(base_url: Url, default_grid: ImagePyramid) -> Self {
        Self {
            base_url,
            default_grid: Arc::new(default_grid),
            dataset_grids: HashMap::new(),
        }
    }

    pub fn with_dataset_grid(mut self, dataset_id: &str, grid: ImagePyramid) -> Self {
        self.dataset_grids.insert(dataset_id.to_string(), Arc::new(grid));
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Pyramid used for a dataset.
    pub fn grid_for(&self, dataset_id: Option<&str>) -> Arc<ImagePyramid> {
        dataset_id
            .and_then(|id| self.dataset_grids.get(id))
            .unwrap_or(&self.default_grid)
            .clone()
    }

    pub fn build(&self, state: &DisplayState) -> Result<TileSource, SourceError> {
        let grid = self.grid_for(state.dataset_id.as_deref());
        TileSource::builder(self.base_url.clone(), grid)
            .dataset(state.dataset_id.clone())
            .mode(state.raster_mode())
            .settings(&state.settings)
            .build()
    }
}

/// Compute the next display state and the effects that realize it.
pub fn transition(
    factory: &TileSourceFactory,
    state: &DisplayState,
    event: DisplayEvent,
) -> Result<Transition, TransitionError> {
    let mut next = state.clone();
    match event {
        DisplayEvent::ChannelsApplied(selection) => next.selection = selection,
        DisplayEvent::TimepointSelected(timepoint) => next.timepoint = timepoint,
        DisplayEvent::MergeToggled(merge) => next.merge = merge,
        DisplayEvent::SettingsChanged(settings) => next.settings = settings,
        DisplayEvent::DatasetSelected(dataset_id) => {
            next.dataset_id = dataset_id;
            next.timepoint = None;
            next.live_timestamp = None;
        }
        DisplayEvent::LiveGridRefreshed(timestamp) => {
            next.live_timestamp = Some(timestamp);
            if next.timepoint.is_some() {
                // A stored timepoint is on screen; nothing to refetch.
                return Ok(Transition {
                    state: next,
                    effects: Vec::new(),
                });
            }
        }
        DisplayEvent::Reload => {}
    }

    let source = factory.build(&next)?;
    Ok(Transition {
        state: next,
        effects: vec![
            Effect::DetachRaster,
            Effect::AttachRaster(source),
            Effect::Reprioritize,
        ],
    })
}

/// The map's layer stack.
#[derive(Debug)]
pub struct MapSurface {
    annotations: MaskOverlay,
    raster: Option<RasterLayer>,
    next_layer_id: u64,
    scheduler: ViewportTileScheduler,
    view: Option<ViewState>,
}

impl MapSurface {
    pub fn new(scheduler: ViewportTileScheduler) -> Self {
        Self {
            annotations: MaskOverlay::new(),
            raster: None,
            next_layer_id: 1,
            scheduler,
            view: None,
        }
    }

    pub fn annotations(&self) -> &MaskOverlay {
        &self.annotations
    }

    pub fn annotations_mut(&mut self) -> &mut MaskOverlay {
        &mut self.annotations
    }

    pub fn raster(&self) -> Option<&RasterLayer> {
        self.raster.as_ref()
    }

    pub fn view(&self) -> Option<&ViewState> {
        self.view.as_ref()
    }

    pub fn raster_layer_count(&self) -> usize {
        usize::from(self.raster.is_some())
    }

    /// Always one: the overlay cannot be detached.
    pub fn annotation_layer_count(&self) -> usize {
        1
    }

    /// Record a new view and schedule tiles for it.
    pub fn set_view(&mut self, view: ViewState) -> SchedulePass {
        self.view = Some(view);
        self.reprioritize()
    }

    /// Apply transition effects in order.
    pub fn apply(&mut self, effects: Vec<Effect>) -> SchedulePass {
        let mut pass = SchedulePass::default();
        for effect in effects {
            match effect {
                Effect::DetachRaster => {
                    if let Some(old) = self.raster.take() {
                        log::debug!(
                            "Detached {} ({} pending tiles dropped)",
                            old.id(),
                            old.pending_count()
                        );
                    }
                }
                Effect::AttachRaster(source) => {
                    if let Some(old) = self.raster.take() {
                        log::warn!("Replacing {} that was not detached", old.id());
                    }
                    let id = LayerId(self.next_layer_id);
                    self.next_layer_id += 1;
                    log::info!("Attached {} on endpoint '{}'", id, source.endpoint().path());
                    self.raster = Some(RasterLayer::new(id, source));
                }
                Effect::Reprioritize => {
                    let next = self.reprioritize();
                    pass.fetches.extend(next.fetches);
                    pass.reprioritized.extend(next.reprioritized);
                    pass.visible = next.visible.or(pass.visible);
                }
            }
        }
        pass
    }

    /// Scheduling pass for the current view, empty when no view or raster exists.
    pub fn reprioritize(&mut self) -> SchedulePass {
        match (&self.view, self.raster.as_mut()) {
            (Some(view), Some(raster)) => self.scheduler.reprioritize(view, raster),
            _ => SchedulePass::default(),
        }
    }

    /// Write a fetched tile into the active raster, dropping stale results.
    pub fn resolve(
        &mut self,
        ticket: &TileTicket,
        image: TileImage,
        content: TileContent,
    ) -> ApplyOutcome {
        let outcome = match self.raster.as_mut() {
            Some(raster) => raster.resolve(ticket, image, content),
            None => ApplyOutcome::StaleLayer,
        };
        if outcome != ApplyOutcome::Applied {
            log::debug!(
                "Dropped result for tile {} of {}: {:?}",
                ticket.coord,
                ticket.layer,
                outcome
            );
        }
        outcome
    }

    /// Make a failed request demandable again.
    pub fn abandon(&mut self, ticket: &TileTicket) {
        if let Some(raster) = self.raster.as_mut() {
            raster.abandon(ticket);
        }
    }
}
