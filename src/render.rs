use std::path::Path;

use bevy::math::Vec2;
use image::{Rgba, RgbaImage};

use crate::assets::SpriteCache;
use crate::canvas::{self, rgb, SpriteParams};
use crate::components::{ObjectKind, SceneObject};
use crate::simulation::Resolution;
use crate::transform::SceneIndex;

pub const GRID_CELL: f32 = 50.0;
pub const ZOOM_IN: f32 = 1.1;
pub const ZOOM_OUT: f32 = 0.9;
const MIN_ZOOM: f32 = 0.05;
const MAX_ZOOM: f32 = 20.0;

const EDIT_BACKGROUND: Rgba<u8> = rgb(0x2d2d2d);
const GRID_COLOR: Rgba<u8> = rgb(0x333333);
const EMPTY_FILL: Rgba<u8> = rgb(0xffffff);
const EMPTY_OUTLINE: Rgba<u8> = rgb(0xaaaaaa);
const EMPTY_RADIUS: f32 = 15.0;
const PLACEHOLDER_SIZE: f32 = 50.0;
const PLACEHOLDER_FILL: Rgba<u8> = rgb(0x888888);
const PLACEHOLDER_OUTLINE: Rgba<u8> = rgb(0x555555);
const SELECTION_COLOR: Rgba<u8> = rgb(0x00ffff);
const SELECTION_SIZE: f32 = 60.0;
const RUNTIME_BACKGROUND: Rgba<u8> = rgb(0x000000);
const RUNTIME_PLACEHOLDER: Rgba<u8> = rgb(0x646464);

/// Pan offset and zoom factor of the edit camera.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub offset: Vec2,
    pub zoom: f32,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl ViewTransform {
    pub const fn identity() -> Self {
        Self {
            offset: Vec2::ZERO,
            zoom: 1.0,
        }
    }

    pub fn world_to_screen(&self, world: Vec2) -> Vec2 {
        world * self.zoom + self.offset
    }

    pub fn screen_to_world(&self, screen: Vec2) -> Vec2 {
        (screen - self.offset) / self.zoom
    }

    pub fn pan(&mut self, screen_delta: Vec2) {
        self.offset += screen_delta;
    }

    /// Scales by `factor` keeping the world point under `cursor` fixed.
    pub fn zoom_at(&mut self, cursor: Vec2, factor: f32) {
        let new_zoom = (self.zoom * factor).clamp(MIN_ZOOM, MAX_ZOOM);
        let applied = new_zoom / self.zoom;
        self.offset = cursor - (cursor - self.offset) * applied;
        self.zoom = new_zoom;
    }
}

/// What to draw when a sprite image cannot be produced.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placeholder {
    pub size: f32,
    pub fill: Rgba<u8>,
    pub outline: Option<Rgba<u8>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCommand {
    Clear(Rgba<u8>),
    /// Lines every `cell` pixels, phase-shifted by `origin`.
    Grid { cell: f32, origin: Vec2, color: Rgba<u8> },
    Disc {
        center: Vec2,
        radius: f32,
        fill: Rgba<u8>,
        outline: Option<Rgba<u8>>,
    },
    Rect {
        center: Vec2,
        size: Vec2,
        fill: Rgba<u8>,
        outline: Option<Rgba<u8>>,
    },
    DashedRect {
        center: Vec2,
        size: Vec2,
        color: Rgba<u8>,
    },
    Sprite {
        center: Vec2,
        path: Option<String>,
        params: SpriteParams,
        placeholder: Placeholder,
    },
}

struct Style {
    empty: Option<(f32, Rgba<u8>, Option<Rgba<u8>>)>,
    placeholder: Placeholder,
}

/// Depth-first projection shared by both renderers: every root, each followed
/// by its subtree, so children draw after their parents.
fn project_objects(
    objects: &[SceneObject],
    view: &ViewTransform,
    style: &Style,
    out: &mut Vec<DrawCommand>,
) {
    let index = SceneIndex::build(objects);
    index.walk_depth_first(|i, _| {
        let obj = &objects[i];
        let center = view.world_to_screen(index.world_position(obj));
        match obj.kind {
            ObjectKind::Empty => match style.empty {
                Some((radius, fill, outline)) => out.push(DrawCommand::Disc {
                    center,
                    radius,
                    fill,
                    outline,
                }),
                None => out.push(DrawCommand::Rect {
                    center,
                    size: Vec2::splat(style.placeholder.size),
                    fill: style.placeholder.fill,
                    outline: style.placeholder.outline,
                }),
            },
            ObjectKind::Sprite => out.push(DrawCommand::Sprite {
                center,
                path: obj.sprite.clone(),
                params: SpriteParams {
                    scale_x: obj.scale_x * view.zoom,
                    scale_y: obj.scale_y * view.zoom,
                    rotation: obj.rotation,
                    opacity: obj.opacity_or_default(),
                },
                placeholder: Placeholder {
                    size: style.placeholder.size * view.zoom,
                    ..style.placeholder
                },
            }),
        }
    });
}

/// Edit-time view: grid, objects, then the selection box.
pub fn project_edit_view(
    objects: &[SceneObject],
    view: &ViewTransform,
    selected: Option<&str>,
) -> Vec<DrawCommand> {
    let mut out = vec![
        DrawCommand::Clear(EDIT_BACKGROUND),
        DrawCommand::Grid {
            cell: GRID_CELL,
            origin: view.offset,
            color: GRID_COLOR,
        },
    ];
    let style = Style {
        empty: Some((EMPTY_RADIUS, EMPTY_FILL, Some(EMPTY_OUTLINE))),
        placeholder: Placeholder {
            size: PLACEHOLDER_SIZE,
            fill: PLACEHOLDER_FILL,
            outline: Some(PLACEHOLDER_OUTLINE),
        },
    };
    project_objects(objects, view, &style, &mut out);
    if let Some(obj) = selected.and_then(|name| objects.iter().find(|o| o.name == name)) {
        let world = SceneIndex::build(objects).world_position(obj);
        out.push(DrawCommand::DashedRect {
            center: view.world_to_screen(world),
            size: Vec2::splat(SELECTION_SIZE),
            color: SELECTION_COLOR,
        });
    }
    out
}

/// Simulation frame: black background, identity camera, no overlays.
pub fn project_runtime_frame(objects: &[SceneObject], _resolution: Resolution) -> Vec<DrawCommand> {
    let mut out = vec![DrawCommand::Clear(RUNTIME_BACKGROUND)];
    let style = Style {
        empty: None,
        placeholder: Placeholder {
            size: PLACEHOLDER_SIZE,
            fill: RUNTIME_PLACEHOLDER,
            outline: None,
        },
    };
    project_objects(objects, &ViewTransform::identity(), &style, &mut out);
    out
}

/// Paints `commands` in order. Sprites resolve against `root`; anything that
/// cannot be loaded becomes its placeholder.
pub fn rasterize(
    commands: &[DrawCommand],
    canvas: &mut RgbaImage,
    cache: &mut SpriteCache,
    root: &Path,
) {
    for command in commands {
        match command {
            DrawCommand::Clear(color) => canvas::clear(canvas, *color),
            DrawCommand::Grid { cell, origin, color } => draw_grid(canvas, *cell, *origin, *color),
            DrawCommand::Disc {
                center,
                radius,
                fill,
                outline,
            } => {
                canvas::fill_disc(canvas, *center, *radius, *fill);
                if let Some(outline) = outline {
                    canvas::stroke_circle(canvas, *center, *radius, *outline);
                }
            }
            DrawCommand::Rect {
                center,
                size,
                fill,
                outline,
            } => draw_rect(canvas, *center, *size, *fill, *outline),
            DrawCommand::DashedRect {
                center,
                size,
                color,
            } => {
                let half = *size / 2.0;
                canvas::dashed_rect(canvas, *center - half, *center + half, *color, 2, Some((4, 2)));
            }
            DrawCommand::Sprite {
                center,
                path,
                params,
                placeholder,
            } => {
                if !params.is_drawable() {
                    continue;
                }
                match path.as_deref().and_then(|p| cache.rendered(root, p, params)) {
                    Some(image) => canvas::blit_centered(canvas, &image, *center),
                    None => draw_rect(
                        canvas,
                        *center,
                        Vec2::splat(placeholder.size),
                        placeholder.fill,
                        placeholder.outline,
                    ),
                }
            }
        }
    }
}

fn draw_rect(canvas: &mut RgbaImage, center: Vec2, size: Vec2, fill: Rgba<u8>, outline: Option<Rgba<u8>>) {
    let half = size / 2.0;
    canvas::fill_rect(canvas, center - half, center + half, fill);
    if let Some(outline) = outline {
        canvas::stroke_rect(canvas, center - half, center + half, outline, 1);
    }
}

fn draw_grid(canvas: &mut RgbaImage, cell: f32, origin: Vec2, color: Rgba<u8>) {
    if cell < 1.0 {
        return;
    }
    let mut x = origin.x.rem_euclid(cell);
    while x < canvas.width() as f32 {
        canvas::vline(canvas, x as i64, color);
        x += cell;
    }
    let mut y = origin.y.rem_euclid(cell);
    while y < canvas.height() as f32 {
        canvas::hline(canvas, y as i64, color);
        y += cell;
    }
}
