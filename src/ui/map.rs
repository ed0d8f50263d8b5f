/// Interactive map surface
///
/// A Web Mercator viewport drawn on an iced canvas:
/// - left click (press + release without dragging) selects a point
/// - drag pans, mouse wheel zooms
/// - basemap tiles, the historical imagery tiles (toggle + opacity), the
///   selected point and its bounding box are drawn in that order

use iced::mouse::{self, Cursor};
use iced::widget::canvas::{self, Path, Program, Stroke};
use iced::{Color, Pixels, Point, Rectangle, Renderer, Size, Theme, Vector};
use std::f64::consts::PI;

use super::tiles::TileCache;
use crate::geo::{BoundingBox, GeoPoint};
use crate::remote::{TileId, TileLayer};
use crate::state::LayerSettings;
use crate::Message;

/// Side of one Web Mercator tile in pixels
const TILE_SIZE: f64 = 256.0;

/// Latitude where Web Mercator becomes a square
const MAX_LATITUDE: f64 = 85.051_128_78;

const MIN_ZOOM: f64 = 2.0;
const MAX_ZOOM: f64 = 19.0;

/// Pointer travel (px) after which a press counts as a drag, not a click
const CLICK_SLOP: f32 = 4.0;

/// What part of the world the canvas shows
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapViewport {
    pub center: GeoPoint,
    pub zoom: f64,
}

impl Default for MapViewport {
    fn default() -> Self {
        Self {
            center: GeoPoint::new(37.422697, -122.084113),
            zoom: 14.0,
        }
    }
}

impl MapViewport {
    fn world_size(&self) -> f64 {
        TILE_SIZE * 2f64.powf(self.zoom)
    }

    /// Geographic → world pixel coordinates at the current zoom
    pub fn project(&self, point: GeoPoint) -> (f64, f64) {
        let world = self.world_size();
        let lat = point.latitude.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let x = (point.longitude + 180.0) / 360.0 * world;
        let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * world;
        (x, y)
    }

    /// World pixel coordinates → geographic, longitude wrapped into [-180, 180)
    pub fn unproject(&self, x: f64, y: f64) -> GeoPoint {
        let world = self.world_size();
        let longitude = (x / world * 360.0 - 180.0 + 180.0).rem_euclid(360.0) - 180.0;
        let n = PI - 2.0 * PI * y / world;
        let latitude = n.sinh().atan().to_degrees().clamp(-MAX_LATITUDE, MAX_LATITUDE);
        GeoPoint::new(latitude, longitude)
    }

    /// Canvas-relative position → geographic point
    pub fn screen_to_geo(&self, position: Point, size: Size) -> GeoPoint {
        let (cx, cy) = self.project(self.center);
        self.unproject(
            cx + (position.x - size.width / 2.0) as f64,
            cy + (position.y - size.height / 2.0) as f64,
        )
    }

    /// Geographic point → canvas-relative position
    pub fn geo_to_screen(&self, point: GeoPoint, size: Size) -> Point {
        let (cx, cy) = self.project(self.center);
        let (x, y) = self.project(point);
        Point::new(
            (x - cx) as f32 + size.width / 2.0,
            (y - cy) as f32 + size.height / 2.0,
        )
    }

    /// Move the view so content follows the pointer by `delta` pixels
    pub fn pan_by(&mut self, delta: Vector) {
        let (cx, cy) = self.project(self.center);
        self.center = self.unproject(cx - delta.x as f64, cy - delta.y as f64);
    }

    pub fn zoom_by(&mut self, delta: f64) {
        self.zoom = (self.zoom + delta).clamp(MIN_ZOOM, MAX_ZOOM);
    }

    /// Integer zoom whose tiles are drawn, scaled, at the current zoom
    pub fn tile_zoom(&self) -> u8 {
        self.zoom.round().clamp(MIN_ZOOM, MAX_ZOOM) as u8
    }

    /// Tiles covering a canvas of `size`, with their on-screen rectangles
    ///
    /// Columns wrap around the antimeridian; rows outside the world are skipped.
    pub fn visible_tiles(&self, size: Size) -> Vec<(TileId, Rectangle)> {
        if size.width <= 0.0 || size.height <= 0.0 {
            return Vec::new();
        }

        let zoom = self.tile_zoom();
        let tile_px = TILE_SIZE * 2f64.powf(self.zoom - zoom as f64);
        let count = 1i64 << zoom;

        let (cx, cy) = self.project(self.center);
        let left = cx - size.width as f64 / 2.0;
        let top = cy - size.height as f64 / 2.0;

        let first_x = (left / tile_px).floor() as i64;
        let last_x = ((left + size.width as f64) / tile_px).floor() as i64;
        let first_y = ((top / tile_px).floor() as i64).max(0);
        let last_y = (((top + size.height as f64) / tile_px).floor() as i64).min(count - 1);

        let mut tiles = Vec::new();
        for ty in first_y..=last_y {
            for tx in first_x..=last_x {
                let id = TileId {
                    zoom,
                    x: tx.rem_euclid(count) as u32,
                    y: ty as u32,
                };
                let bounds = Rectangle {
                    x: (tx as f64 * tile_px - left) as f32,
                    y: (ty as f64 * tile_px - top) as f32,
                    width: tile_px as f32,
                    height: tile_px as f32,
                };
                tiles.push((id, bounds));
            }
        }
        tiles
    }
}

/// Canvas program; borrows everything it draws from the app state
pub struct MapCanvas<'a> {
    pub viewport: &'a MapViewport,
    pub tiles: &'a TileCache,
    /// Canvas size the app requests tiles for
    pub size: Size,
    pub marker: Option<GeoPoint>,
    pub bbox: Option<BoundingBox>,
    pub layer: LayerSettings,
}

impl Program<Message> for MapCanvas<'_> {
    type State = PointerState;

    fn draw(
        &self,
        _state: &Self::State,
        renderer: &Renderer,
        _theme: &Theme,
        bounds: Rectangle,
        _cursor: Cursor,
    ) -> Vec<canvas::Geometry> {
        let size = bounds.size();
        let mut frame = canvas::Frame::new(renderer, size);

        frame.fill_rectangle(Point::ORIGIN, size, Color::from_rgb(0.12, 0.14, 0.16));
        self.draw_graticule(&mut frame, size);

        let visible = self.viewport.visible_tiles(size);
        for (tile, bounds) in &visible {
            if let Some(handle) = self.tiles.get(TileLayer::Basemap, *tile) {
                frame.draw_image(*bounds, canvas::Image::new(handle.clone()));
            }
        }

        if self.layer.visible && self.layer.opacity > 0.0 {
            for (tile, bounds) in &visible {
                if let Some(handle) = self.tiles.get(TileLayer::Historical, *tile) {
                    frame.draw_image(
                        *bounds,
                        canvas::Image::new(handle.clone()).opacity(self.layer.opacity),
                    );
                }
            }
        }

        if let Some(bbox) = self.bbox {
            let top_left = self
                .viewport
                .geo_to_screen(GeoPoint::new(bbox.north, bbox.west), size);
            let bottom_right = self
                .viewport
                .geo_to_screen(GeoPoint::new(bbox.south, bbox.east), size);
            let rect_size = Size::new(bottom_right.x - top_left.x, bottom_right.y - top_left.y);

            frame.stroke(
                &Path::rectangle(top_left, rect_size),
                Stroke::default()
                    .with_color(Color::from_rgb(1.0, 0.23, 0.19))
                    .with_width(2.0),
            );
        }

        if let Some(marker) = self.marker {
            let position = self.viewport.geo_to_screen(marker, size);
            frame.fill(&Path::circle(position, 6.0), Color::from_rgb(1.0, 0.23, 0.19));
            frame.stroke(
                &Path::circle(position, 6.0),
                Stroke::default().with_color(Color::WHITE).with_width(1.5),
            );
        }

        frame.fill_text(canvas::Text {
            content: format!(
                "{:.5}, {:.5}  z{:.1}",
                self.viewport.center.latitude, self.viewport.center.longitude, self.viewport.zoom
            ),
            position: Point::new(10.0, size.height - 22.0),
            color: Color::from_rgba(1.0, 1.0, 1.0, 0.8),
            size: Pixels(13.0),
            ..canvas::Text::default()
        });
        frame.fill_text(canvas::Text {
            content: "© OpenStreetMap contributors".to_string(),
            position: Point::new(size.width - 180.0, size.height - 20.0),
            color: Color::from_rgba(1.0, 1.0, 1.0, 0.7),
            size: Pixels(11.0),
            ..canvas::Text::default()
        });

        vec![frame.into_geometry()]
    }

    fn update(
        &self,
        state: &mut Self::State,
        event: canvas::Event,
        bounds: Rectangle,
        cursor: Cursor,
    ) -> (canvas::event::Status, Option<Message>) {
        match event {
            canvas::Event::Mouse(mouse::Event::WheelScrolled { delta }) => {
                if cursor.is_over(bounds) {
                    let zoom_delta = match delta {
                        mouse::ScrollDelta::Lines { y, .. } => y * 0.5,
                        mouse::ScrollDelta::Pixels { y, .. } => y * 0.01,
                    };
                    return (canvas::event::Status::Captured, Some(Message::Zoom(zoom_delta)));
                }
            }

            canvas::Event::Mouse(mouse::Event::ButtonPressed(mouse::Button::Left)) => {
                if let (Some(_), Some(pos)) = (cursor.position_in(bounds), cursor.position()) {
                    state.pressed_at = Some(pos);
                    state.last_position = Some(pos);
                    state.dragged = false;
                    return (canvas::event::Status::Captured, None);
                }
            }

            canvas::Event::Mouse(mouse::Event::CursorMoved { .. }) => {
                // The canvas learns its real size only here
                if state.pressed_at.is_none() && bounds.size() != self.size {
                    return (canvas::event::Status::Ignored, Some(Message::MapResized(bounds.size())));
                }
                if let (Some(pressed_at), Some(last), Some(current)) =
                    (state.pressed_at, state.last_position, cursor.position())
                {
                    if !state.dragged && pressed_at.distance(current) > CLICK_SLOP {
                        state.dragged = true;
                    }
                    if state.dragged {
                        state.last_position = Some(current);
                        return (
                            canvas::event::Status::Captured,
                            Some(Message::Pan(current - last)),
                        );
                    }
                }
            }

            canvas::Event::Mouse(mouse::Event::ButtonReleased(mouse::Button::Left)) => {
                let was_click = state.pressed_at.is_some() && !state.dragged;
                *state = PointerState::default();

                if was_click {
                    if let Some(pos) = cursor.position_in(bounds) {
                        let point = self.viewport.screen_to_geo(pos, bounds.size());
                        return (canvas::event::Status::Captured, Some(Message::MapClicked(point)));
                    }
                }
                return (canvas::event::Status::Captured, None);
            }

            _ => {}
        }

        (canvas::event::Status::Ignored, None)
    }

    fn mouse_interaction(
        &self,
        state: &Self::State,
        bounds: Rectangle,
        cursor: Cursor,
    ) -> mouse::Interaction {
        if state.dragged {
            mouse::Interaction::Grabbing
        } else if cursor.is_over(bounds) {
            mouse::Interaction::Crosshair
        } else {
            mouse::Interaction::default()
        }
    }
}

impl MapCanvas<'_> {
    /// Lat/lng lines at a round spacing that gives a handful per screen
    fn draw_graticule(&self, frame: &mut canvas::Frame, size: Size) {
        let top_left = self.viewport.screen_to_geo(Point::ORIGIN, size);
        let bottom_right = self
            .viewport
            .screen_to_geo(Point::new(size.width, size.height), size);

        let span = (bottom_right.longitude - top_left.longitude).abs().max(1e-6);
        let step = graticule_step(span);

        let mut lines = canvas::path::Builder::new();

        let mut lng = (top_left.longitude / step).floor() * step;
        while lng <= bottom_right.longitude {
            let x = self.viewport.geo_to_screen(GeoPoint::new(0.0, lng), size).x;
            lines.move_to(Point::new(x, 0.0));
            lines.line_to(Point::new(x, size.height));
            lng += step;
        }

        let mut lat = (bottom_right.latitude / step).floor() * step;
        while lat <= top_left.latitude {
            let y = self.viewport.geo_to_screen(GeoPoint::new(lat, 0.0), size).y;
            lines.move_to(Point::new(0.0, y));
            lines.line_to(Point::new(size.width, y));
            lat += step;
        }

        frame.stroke(
            &lines.build(),
            Stroke::default()
                .with_color(Color::from_rgba(1.0, 1.0, 1.0, 0.08))
                .with_width(1.0),
        );
    }
}

/// Largest "nice" spacing giving at least four lines across `span` degrees
fn graticule_step(span: f64) -> f64 {
    const STEPS: [f64; 12] = [
        30.0, 10.0, 5.0, 1.0, 0.5, 0.1, 0.05, 0.01, 0.005, 0.001, 0.0005, 0.0001,
    ];
    STEPS
        .iter()
        .copied()
        .find(|step| span / step >= 4.0)
        .unwrap_or(0.0001)
}

/// Pointer tracking between press and release
#[derive(Debug, Clone, Default)]
pub struct PointerState {
    pub pressed_at: Option<Point>,
    pub last_position: Option<Point>,
    pub dragged: bool,
}
