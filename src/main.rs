use iced::widget::image::Handle;
use iced::widget::{button, canvas, checkbox, column, container, row, slider, text, Column};
use iced::{window, Alignment, Element, Length, Size, Subscription, Task, Theme, Vector};
use rfd::FileDialog;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod config;
mod geo;
mod imaging;
mod pipeline;
mod remote;
mod state;
mod ui;

use config::{AppConfig, EarthEngineAuth};
use geo::GeoPoint;
use imaging::export;
use imaging::EncodedImage;
use pipeline::{ClickCoordinator, ProgressEvent, RunOutcome};
use remote::{AccessTokens, EarthEngineFetcher, GeminiColorizer, TileClient, TileId, TileLayer};
use state::{PipelineStatus, StateStore};
use ui::gallery::Gallery;
use ui::map::{MapCanvas, MapViewport};
use ui::progress::progress_events;
use ui::tiles::TileCache;

type Coordinator = ClickCoordinator<EarthEngineFetcher, GeminiColorizer>;

const WINDOW_WIDTH: f32 = 1280.0;
const WINDOW_HEIGHT: f32 = 820.0;
const SIDE_PANEL_WIDTH: f32 = 340.0;

const INSTRUCTIONS: &str = "Explore past landscapes from the Great Plains to the Pacific coast \
in a new lens. Historic black and white aerial imagery is restored with a generative model \
so you can see how landscapes have changed since the mid-20th century.\n\n\
Click on the map to select a location. The 1950s aerial image around it is fetched and \
colorized. Toggle the historical layer or change its opacity to compare.";

/// Main application state
struct LandscapeColorizer {
    /// Runs the click pipeline and owns the session store
    coordinator: Arc<Coordinator>,
    /// Basemap and historical tile source
    tile_client: Arc<TileClient>,
    /// Visible part of the map
    viewport: MapViewport,
    /// Decoded tiles for both layers
    tiles: TileCache,
    /// Last known size of the map canvas
    map_size: Size,
    /// Decoded images of the last completed run
    gallery: Gallery,
    show_instructions: bool,
    show_images: bool,
    /// Result of the last download, if any
    notice: Option<String>,
}

/// Application messages (events)
#[derive(Debug, Clone)]
enum Message {
    /// User clicked a point on the map
    MapClicked(GeoPoint),
    /// Mouse wheel over the map
    Zoom(f32),
    /// Map dragged by this many pixels
    Pan(Vector),
    /// Canvas reported a new size
    MapResized(Size),
    WindowResized(Size),
    /// A tile request finished
    TileLoaded(TileLayer, TileId, Result<Handle, String>),
    /// Event from the click pipeline
    Progress(ProgressEvent),
    ToggleLayer(bool),
    OpacityChanged(f32),
    ShowInstructions,
    HideInstructions,
    ShowImages,
    HideImages,
    /// User pressed "Download" on the colorized image
    SaveColorized,
    /// Background save finished
    Saved(Result<PathBuf, String>),
}

impl LandscapeColorizer {
    fn new(coordinator: Arc<Coordinator>, tile_client: Arc<TileClient>) -> (Self, Task<Message>) {
        let mut app = LandscapeColorizer {
            coordinator,
            tile_client,
            viewport: MapViewport::default(),
            tiles: TileCache::default(),
            map_size: Size::new(WINDOW_WIDTH - SIDE_PANEL_WIDTH, WINDOW_HEIGHT),
            gallery: Gallery::default(),
            show_instructions: true,
            show_images: false,
            notice: None,
        };
        let tiles = app.request_tiles();
        (app, tiles)
    }

    fn store(&self) -> &StateStore {
        self.coordinator.store()
    }

    /// Handle application messages and update state
    fn update(&mut self, message: Message) -> Task<Message> {
        match message {
            // ========== Click pipeline ==========
            Message::MapClicked(point) => {
                // Loading is already in the store when begin() returns; the
                // outcome arrives through the progress subscription
                match self.coordinator.begin(point) {
                    Ok(ticket) => {
                        let coordinator = Arc::clone(&self.coordinator);
                        Task::future(async move { coordinator.execute(ticket).await }).discard()
                    }
                    Err(_) => Task::none(),
                }
            }
            Message::Progress(ProgressEvent::LoadingStarted { request_id, .. }) => {
                // Ignore a start that a newer click already replaced
                if self.store().current_request() == Some(request_id) {
                    self.show_images = false;
                    self.gallery = Gallery::default();
                    self.notice = None;
                }
                Task::none()
            }
            Message::Progress(ProgressEvent::RunCompleted(outcome)) => {
                self.run_completed(outcome);
                Task::none()
            }

            // ========== Map navigation ==========
            Message::Zoom(delta) => {
                self.viewport.zoom_by(delta as f64);
                self.request_tiles()
            }
            Message::Pan(delta) => {
                self.viewport.pan_by(delta);
                self.request_tiles()
            }
            Message::MapResized(size) => {
                self.map_size = size;
                self.request_tiles()
            }
            Message::WindowResized(size) => {
                // The side panel keeps its width; the map takes the rest
                self.map_size = Size::new((size.width - SIDE_PANEL_WIDTH).max(0.0), size.height);
                self.request_tiles()
            }
            Message::TileLoaded(layer, tile, result) => {
                self.tiles.resolve(layer, tile, result);
                Task::none()
            }

            // ========== Layer controls ==========
            Message::ToggleLayer(visible) => {
                self.store().set_layer_visible(visible);
                if visible {
                    // Retry tiles that failed while the layer was shown before
                    self.tiles.forget_failed(TileLayer::Historical);
                }
                self.request_tiles()
            }
            Message::OpacityChanged(opacity) => {
                self.store().set_layer_opacity(opacity);
                Task::none()
            }

            // ========== Panels ==========
            Message::ShowInstructions => {
                self.show_instructions = true;
                Task::none()
            }
            Message::HideInstructions => {
                self.show_instructions = false;
                Task::none()
            }
            Message::ShowImages => {
                self.show_images = self.gallery.has_images();
                Task::none()
            }
            Message::HideImages => {
                self.show_images = false;
                Task::none()
            }

            // ========== Download ==========
            Message::SaveColorized => {
                let Some(image) = self.gallery.colorized_data().cloned() else {
                    return Task::none();
                };

                // Show the native save dialog
                let mut dialog = FileDialog::new()
                    .set_title("Save colorized image")
                    .set_file_name(export::default_file_name(chrono::Local::now()))
                    .add_filter("PNG image", &["png"]);
                if let Some(dir) = export::default_directory() {
                    dialog = dialog.set_directory(dir);
                }

                // Write the file in the background
                match dialog.save_file() {
                    Some(path) => Task::perform(save_colorized(path, image), Message::Saved),
                    None => Task::none(),
                }
            }
            Message::Saved(result) => {
                self.notice = Some(match result {
                    Ok(path) => format!("Saved to {}", path.display()),
                    Err(err) => format!("Save failed: {}", err),
                });
                Task::none()
            }
        }
    }

    /// Refresh the gallery from the store once a run settles
    fn run_completed(&mut self, outcome: RunOutcome) {
        // A superseded run left the store untouched
        if !outcome.applied {
            return;
        }

        match Gallery::from_view(&self.store().view()) {
            Ok(gallery) => self.gallery = gallery,
            Err(err) => tracing::error!("could not prepare images for display: {}", err),
        }
        if outcome.status == PipelineStatus::Succeeded && outcome.colorized && self.gallery.has_colorized() {
            self.show_images = true;
        }
    }

    /// Start fetching tiles that cover the map and are not cached yet
    fn request_tiles(&mut self) -> Task<Message> {
        let visible = self.viewport.visible_tiles(self.map_size);
        let ids: HashSet<TileId> = visible.iter().map(|(tile, _)| *tile).collect();
        self.tiles.prune(&ids);

        let mut layers = vec![TileLayer::Basemap];
        if self.store().layer().visible {
            layers.push(TileLayer::Historical);
        }

        let mut tasks = Vec::new();
        for layer in layers {
            for tile in self.tiles.claim(layer, visible.iter().map(|(tile, _)| *tile)) {
                let client = Arc::clone(&self.tile_client);
                tasks.push(Task::perform(
                    async move {
                        client
                            .fetch(layer, tile)
                            .await
                            .map(|bytes| Handle::from_bytes(bytes))
                            .map_err(|err| err.to_string())
                    },
                    move |result| Message::TileLoaded(layer, tile, result),
                ));
            }
        }
        Task::batch(tasks)
    }

    /// Build the user interface
    fn view(&self) -> Element<Message> {
        let view = self.store().view();

        // ========== Main area: map or images ==========
        let main: Element<Message> = if self.show_images && self.gallery.has_images() {
            self.gallery.view()
        } else {
            canvas(MapCanvas {
                viewport: &self.viewport,
                tiles: &self.tiles,
                size: self.map_size,
                marker: view.point,
                bbox: view.bbox,
                layer: view.layer,
            })
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
        };

        // ========== Side panel ==========
        let mut side: Column<Message> = column![
            text("Landscape Explorer Colorizer").size(24),
            if self.show_instructions {
                button("Hide instructions").on_press(Message::HideInstructions)
            } else {
                button("Instructions").on_press(Message::ShowInstructions)
            },
        ]
        .spacing(16)
        .padding(20)
        .width(Length::Fixed(SIDE_PANEL_WIDTH));

        if self.show_instructions {
            side = side.push(text(INSTRUCTIONS).size(14));
        }

        // Layer toggle and opacity
        side = side.push(
            column![
                text("Layers").size(18),
                checkbox("Historical Imagery", view.layer.visible).on_toggle(Message::ToggleLayer),
                row![
                    text("Opacity").size(14),
                    slider(0.0..=1.0, view.layer.opacity, Message::OpacityChanged).step(0.1_f32),
                ]
                .spacing(10)
                .align_y(Alignment::Center),
            ]
            .spacing(8),
        );

        // Pipeline status
        let status = match view.status {
            PipelineStatus::Idle => "Click the map to pick a location.".to_string(),
            PipelineStatus::Loading => "Fetching and colorizing image...".to_string(),
            PipelineStatus::Succeeded if view.colorized_image.is_none() => {
                "The model returned no colorized image; showing the original only.".to_string()
            }
            PipelineStatus::Succeeded => "Done.".to_string(),
            PipelineStatus::Failed => view.error.clone().unwrap_or_else(|| "Failed.".to_string()),
        };
        side = side.push(text(status).size(14));

        if let (Some(point), Some(bbox)) = (view.point, view.bbox) {
            side = side.push(
                text(format!(
                    "Point {:.5}, {:.5}\nN {:.5}  S {:.5}\nE {:.5}  W {:.5}",
                    point.latitude, point.longitude, bbox.north, bbox.south, bbox.east, bbox.west
                ))
                .size(12),
            );
        }

        if self.gallery.has_images() && !self.show_images {
            side = side.push(button("Show Images").on_press(Message::ShowImages));
        }

        if let Some(notice) = &self.notice {
            side = side.push(text(notice).size(12));
        }

        row![
            container(main).width(Length::Fill).height(Length::Fill),
            side,
        ]
        .height(Length::Fill)
        .into()
    }

    /// Pipeline progress and window size changes
    fn subscription(&self) -> Subscription<Message> {
        Subscription::batch([
            Subscription::run_with_id("progress-events", progress_events(self.coordinator.subscribe()))
                .map(Message::Progress),
            window::resize_events().map(|(_id, size)| Message::WindowResized(size)),
        ])
    }

    /// Set the application theme
    fn theme(&self) -> Theme {
        Theme::Dark
    }
}

async fn save_colorized(path: PathBuf, image: EncodedImage) -> Result<PathBuf, String> {
    export::save_image(path, image)
        .await
        .map_err(|err| err.to_string())
}

fn main() -> iced::Result {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    // Credentials are read exactly once, here
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("configuration error: {}", err);
            std::process::exit(2);
        }
    };
    if matches!(config.imagery.auth, EarthEngineAuth::AccessToken(_)) {
        tracing::warn!(
            "using EE_ACCESS_TOKEN; it expires after about an hour. \
             Set EE_REFRESH_TOKEN with EE_CLIENT_ID and EE_CLIENT_SECRET for longer sessions"
        );
    }

    // One HTTP client shared by every remote service
    let client = match remote::imagery::http_client() {
        Ok(client) => client,
        Err(err) => {
            tracing::error!("could not create HTTP client: {}", err);
            std::process::exit(1);
        }
    };
    let tokens = Arc::new(AccessTokens::new(client.clone(), config.imagery.auth.clone()));

    let fetcher = EarthEngineFetcher::new(client.clone(), &config.imagery, Arc::clone(&tokens));
    let colorizer = GeminiColorizer::new(client.clone(), &config.model);
    let tile_client = Arc::new(TileClient::new(client, &config.basemap, &config.imagery, tokens));

    tracing::info!(
        "imagery collection {} via project {}, model {}",
        config.imagery.collection_id,
        config.imagery.project,
        config.model.model_id
    );

    let coordinator = Arc::new(ClickCoordinator::new(fetcher, colorizer, StateStore::new()));

    iced::application(
        "Landscape Explorer Colorizer",
        LandscapeColorizer::update,
        LandscapeColorizer::view,
    )
    .theme(LandscapeColorizer::theme)
    .subscription(LandscapeColorizer::subscription)
    .window_size((WINDOW_WIDTH, WINDOW_HEIGHT))
    .centered()
    .run_with(move || LandscapeColorizer::new(coordinator, tile_client))
}
