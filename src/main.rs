/// Tilescope entry point for native builds
#[cfg(not(target_arch = "wasm32"))]
fn main() -> std::process::ExitCode {
    native::main()
}

// WASM doesn't use main(), it uses wasm_bindgen's start function
#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod native {
    use std::path::{Path, PathBuf};
    use std::process::ExitCode;
    use std::sync::Arc;
    use std::time::Duration;

    use clap::{Args, Parser, Subcommand};
    use tilescope::config::AppConfig;
    use tilescope::fetch::{FetchPool, HttpTransport, TileFetcher, TileTransport};
    use tilescope::storage::{FileStore, KeyValueStore, MapPreferences, MemoryStore};
    use tilescope::{MapViewer, snapshot, timepoints};
    use tilescope_tiles::{ChannelId, ChannelSelection, DisplayEvent, ViewState};
    use web_time::Instant;

    type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

    #[derive(Parser, Debug)]
    #[command(name = "tilescope", version, about = "Render views of a tiled microscopy scan")]
    struct Cli {
        /// Configuration file (defaults to the per-user config file)
        #[arg(long, global = true)]
        config: Option<PathBuf>,

        /// Tile service base URL, overriding the configuration
        #[arg(long, global = true)]
        server: Option<String>,

        /// Log level filter; RUST_LOG still takes precedence
        #[arg(long, global = true)]
        log_level: Option<log::LevelFilter>,

        #[command(subcommand)]
        command: Command,
    }

    #[derive(Subcommand, Debug)]
    enum Command {
        /// Fetch the tiles of one view and write them out as an image
        Render(RenderArgs),
        /// List the stored timepoints of a dataset
        Timepoints {
            /// Dataset id
            #[arg(long)]
            dataset: String,
        },
        /// Show the effective configuration
        Config {
            /// Write it back to --config, or to the per-user config file
            #[arg(long)]
            save: bool,
        },
    }

    #[derive(Args, Debug)]
    struct RenderArgs {
        /// Dataset id (defaults to the last selected dataset)
        #[arg(long)]
        dataset: Option<String>,

        /// Comma-separated channel codes, e.g. "0,12"
        #[arg(long, default_value = "0")]
        channels: String,

        /// Composite all selected channels server-side
        #[arg(long)]
        merge: bool,

        /// Stored timepoint to show instead of the live grid
        #[arg(long)]
        timepoint: Option<String>,

        /// Per-channel contrast as CODE=VALUE, repeatable
        #[arg(long, value_parser = parse_channel_value)]
        contrast: Vec<(ChannelId, f64)>,

        /// Per-channel brightness as CODE=VALUE, repeatable
        #[arg(long, value_parser = parse_channel_value)]
        brightness: Vec<(ChannelId, f64)>,

        /// View center in map units
        #[arg(long, num_args = 2, value_names = ["X", "Y"], default_values_t = [8192.0, 8192.0])]
        center: Vec<f64>,

        /// Map units per screen pixel
        #[arg(long, default_value_t = 16.0)]
        resolution: f64,

        #[arg(long, default_value_t = 1024)]
        width: u32,

        #[arg(long, default_value_t = 1024)]
        height: u32,

        /// Seconds to wait for outstanding tiles
        #[arg(long, default_value_t = 60)]
        wait: u64,

        /// Output image path
        #[arg(short, long, default_value = "view.png")]
        output: PathBuf,
    }

    fn parse_channel_value(s: &str) -> Result<(ChannelId, f64), String> {
        let (code, value) = s
            .split_once('=')
            .ok_or_else(|| format!("expected CODE=VALUE, got '{}'", s))?;
        let code: u8 = code
            .trim()
            .parse()
            .map_err(|e| format!("bad channel code '{}': {}", code, e))?;
        let id = ChannelId::try_from(code).map_err(|e| e.to_string())?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|e| format!("bad value '{}': {}", value, e))?;
        Ok((id, value))
    }

    pub fn main() -> ExitCode {
        let cli = Cli::parse();

        let config = match load_config(&cli) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Configuration error: {}", e);
                return ExitCode::FAILURE;
            }
        };

        let level = cli
            .log_level
            .unwrap_or_else(|| config.preferences.log_level.to_level_filter());
        env_logger::Builder::new()
            .filter_level(level)
            .parse_default_env()
            .init();

        let result = match &cli.command {
            Command::Render(args) => render(&config, args),
            Command::Timepoints { dataset } => list_timepoints(&config, dataset),
            Command::Config { save } => show_config(&config, cli.config.as_deref(), *save),
        };

        match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                log::error!("{}", e);
                ExitCode::FAILURE
            }
        }
    }

    fn load_config(cli: &Cli) -> CliResult<AppConfig> {
        let mut config = match &cli.config {
            Some(path) => AppConfig::load_from_path(path)?,
            None => AppConfig::load_from_default_path().unwrap_or_default(),
        };
        if let Some(server) = &cli.server {
            config.server_url = server.clone();
        }
        config.validate()?;
        Ok(config)
    }

    fn transport(config: &AppConfig) -> Arc<HttpTransport> {
        let timeout = Duration::from_secs(config.preferences.request_timeout_secs);
        Arc::new(HttpTransport::new(timeout).with_max_body(config.preferences.max_body_bytes))
    }

    /// Dataset selection persists in a file; the setup flag lives for this process only.
    fn preferences() -> MapPreferences {
        let session: Box<dyn KeyValueStore> = Box::new(MemoryStore::new());
        match FileStore::default_path().map(FileStore::open) {
            Some(Ok(store)) => MapPreferences::new(Box::new(store), session),
            Some(Err(e)) => {
                log::warn!("Cannot open map state file, using memory: {}", e);
                MapPreferences::in_memory()
            }
            None => MapPreferences::in_memory(),
        }
    }

    fn render(config: &AppConfig, args: &RenderArgs) -> CliResult<()> {
        let transport: Arc<dyn TileTransport> = transport(config);
        let pool = FetchPool::spawn(transport, config.preferences.max_connections)?;
        let mut viewer = MapViewer::new(config, pool, preferences())?;

        if let Some(dataset) = &args.dataset {
            viewer.handle(DisplayEvent::DatasetSelected(Some(dataset.clone())))?;
        }
        viewer.open()?;
        viewer.handle(DisplayEvent::ChannelsApplied(ChannelSelection::parse_codes(
            &args.channels,
        )?))?;
        for &(id, contrast) in &args.contrast {
            viewer.update_settings(id, |p| p.contrast = contrast)?;
        }
        for &(id, brightness) in &args.brightness {
            viewer.update_settings(id, |p| p.brightness = brightness)?;
        }
        if args.merge {
            viewer.handle(DisplayEvent::MergeToggled(true))?;
        }
        if let Some(timepoint) = &args.timepoint {
            viewer.handle(DisplayEvent::TimepointSelected(Some(timepoint.clone())))?;
        }

        // Only the final layer sees a view, so only its tiles are fetched.
        let center = (args.center[0], args.center[1]);
        let view = ViewState::new(center, args.resolution, (args.width, args.height));
        viewer.set_view(view);

        let started = Instant::now();
        let deadline = Duration::from_secs(args.wait);
        let mut applied = 0;
        while !viewer.is_idle() {
            if started.elapsed() > deadline {
                log::warn!(
                    "Gave up waiting after {:?}; {} tiles still outstanding",
                    deadline,
                    viewer.fetcher().pending_count()
                );
                break;
            }
            applied += viewer.tick();
            std::thread::sleep(Duration::from_millis(10));
        }
        applied += viewer.tick();
        log::info!("Resolved {} tiles in {:?}", applied, started.elapsed());

        let Some(raster) = viewer.surface().raster() else {
            return Err("No raster layer attached".into());
        };
        let mut image = snapshot::compose(raster, &view)?;
        snapshot::draw_masks(&mut image, viewer.surface().annotations(), &view)?;
        image.save(&args.output)?;
        log::info!("Wrote {}", args.output.display());
        Ok(())
    }

    fn show_config(config: &AppConfig, path: Option<&Path>, save: bool) -> CliResult<()> {
        let prefs = &config.preferences;
        println!("server:          {}", config.server_url()?);
        println!("log level:       {}", prefs.log_level.name());
        println!("connections:     {}", prefs.max_connections);
        println!("timeout:         {}s", prefs.request_timeout_secs);
        println!("prefetch rings:  {}", prefs.prefetch_margin);
        println!("max body:        {} bytes", prefs.max_body_bytes);
        for dataset in config.datasets.keys() {
            println!("dataset pyramid: {}", dataset);
        }

        if save {
            let written = match path {
                Some(path) => {
                    config.save_to_path(path)?;
                    path.to_path_buf()
                }
                None => config.save_to_default_path()?,
            };
            println!("saved to {}", written.display());
        }
        Ok(())
    }

    fn list_timepoints(config: &AppConfig, dataset: &str) -> CliResult<()> {
        let transport = transport(config);
        let server = config.server_url()?;
        let listed = timepoints::list_timepoints(transport.as_ref(), &server, dataset)?;
        for timepoint in listed {
            println!("{}", timepoint.name);
        }
        Ok(())
    }
}
