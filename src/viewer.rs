//! The map display component.
//!
//! `MapViewer` owns the display state, the map surface with its layers and
//! the fetcher. All layer swaps go through [`transition`], so the active
//! raster is only ever replaced from here, on the caller's thread.

use tilescope_tiles::{
    ApplyOutcome, ChannelCatalog, ChannelId, ChannelProcessing, DisplayEvent, DisplayState,
    MapSurface, SchedulePass, SelectionError, TileSourceFactory, TransitionError, ViewState,
    transition,
};

use crate::config::{AppConfig, ConfigError};
use crate::fetch::TileFetcher;
use crate::storage::{MapPreferences, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error(transparent)]
    Transition(#[from] TransitionError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub struct MapViewer<F: TileFetcher> {
    factory: TileSourceFactory,
    catalog: ChannelCatalog,
    state: DisplayState,
    surface: MapSurface,
    fetcher: F,
    preferences: MapPreferences,
}

impl<F: TileFetcher> MapViewer<F> {
    /// Create a viewer; no raster is attached until [`MapViewer::open`].
    pub fn new(
        config: &AppConfig,
        fetcher: F,
        preferences: MapPreferences,
    ) -> Result<Self, ViewerError> {
        let catalog = config.channel_catalog()?;
        let mut state = DisplayState {
            dataset_id: preferences.selected_dataset(),
            ..DisplayState::default()
        };
        state.settings.initialize(&catalog);

        Ok(Self {
            factory: config.source_factory()?,
            catalog,
            state,
            surface: MapSurface::new(config.scheduler()),
            fetcher,
            preferences,
        })
    }

    pub fn state(&self) -> &DisplayState {
        &self.state
    }

    pub fn surface(&self) -> &MapSurface {
        &self.surface
    }

    /// Mutable access for annotation edits.
    pub fn surface_mut(&mut self) -> &mut MapSurface {
        &mut self.surface
    }

    pub fn catalog(&self) -> &ChannelCatalog {
        &self.catalog
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn preferences(&self) -> &MapPreferences {
        &self.preferences
    }

    /// Attach the first raster layer and remember the explicit setup.
    pub fn open(&mut self) -> Result<(), ViewerError> {
        self.handle(DisplayEvent::Reload)?;
        if let Err(e) = self.preferences.set_setup_explicit(true) {
            log::warn!("Cannot persist map setup flag: {}", e);
        }
        Ok(())
    }

    /// Open the map if an earlier setup in this session allows it.
    pub fn auto_open(&mut self) -> Result<bool, ViewerError> {
        if !self.preferences.should_auto_load() {
            log::debug!("Map auto-load skipped");
            return Ok(false);
        }
        self.handle(DisplayEvent::Reload)?;
        Ok(true)
    }

    /// Apply a display event; on error the current layer stays in place.
    pub fn handle(&mut self, event: DisplayEvent) -> Result<(), ViewerError> {
        let t = transition(&self.factory, &self.state, event)?;

        if t.state.dataset_id != self.state.dataset_id {
            if let Err(e) = self
                .preferences
                .set_selected_dataset(t.state.dataset_id.as_deref())
            {
                log::warn!("Cannot persist dataset selection: {}", e);
            }
        }

        self.state = t.state;
        let pass = self.surface.apply(t.effects);

        if let Some(raster) = self.surface.raster() {
            let dropped = self.fetcher.discard_queued_except(raster.id());
            if !dropped.is_empty() {
                log::debug!("Discarded {} queued fetches of detached layers", dropped.len());
            }
        }
        self.dispatch(pass);
        Ok(())
    }

    /// Toggle a channel and rebuild; deselecting the last channel is rejected.
    pub fn toggle_channel(&mut self, id: ChannelId) -> Result<(), ViewerError> {
        let mut selection = self.state.selection.clone();
        selection.toggle(id)?;
        self.handle(DisplayEvent::ChannelsApplied(selection))
    }

    /// Edit one channel's processing settings and rebuild.
    pub fn update_settings(
        &mut self,
        id: ChannelId,
        edit: impl FnOnce(&mut ChannelProcessing),
    ) -> Result<(), ViewerError> {
        let mut settings = self.state.settings.clone();
        settings.update(id, edit);
        self.handle(DisplayEvent::SettingsChanged(settings))
    }

    /// Pan, zoom or resize.
    pub fn set_view(&mut self, view: ViewState) {
        let pass = self.surface.set_view(view);
        self.dispatch(pass);
    }

    fn dispatch(&mut self, pass: SchedulePass) {
        for (ticket, priority) in &pass.reprioritized {
            self.fetcher.reprioritize(ticket, *priority);
        }
        for job in pass.fetches {
            self.fetcher.submit(job);
        }
    }

    /// Drive the fetcher and write finished tiles back. Returns tiles applied.
    pub fn tick(&mut self) -> usize {
        self.fetcher.poll();
        let mut applied = 0;
        while let Some(result) = self.fetcher.take_one_result() {
            if self.surface.resolve(&result.ticket, result.image, result.content)
                == ApplyOutcome::Applied
            {
                applied += 1;
            }
        }
        applied
    }

    /// No fetch is queued, in flight or waiting to be applied.
    pub fn is_idle(&self) -> bool {
        self.fetcher.pending_count() == 0
    }
}
