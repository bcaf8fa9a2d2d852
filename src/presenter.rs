use std::sync::atomic::{AtomicU64, Ordering};

use bevy::input::keyboard::KeyboardInput;
use bevy::input::mouse::MouseButtonInput;
use bevy::input::ButtonState;
use bevy::prelude::*;
use bevy::render::camera::RenderTarget;
use bevy::render::render_asset::RenderAssetUsages;
use bevy::render::render_resource::{Extent3d, TextureDimension, TextureFormat};
use bevy::render::view::RenderLayers;
use bevy::window::{CursorMoved, WindowCloseRequested, WindowRef, WindowResolution};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use image::RgbaImage;

use crate::error::{SparError, SparResult};
use crate::input::{key_name, mouse_button_name, InputEvent};
use crate::simulation::{PresentationSurface, Resolution, SurfaceFactory};

const SIM_LAYER: usize = 1;
const FRAME_QUEUE: usize = 4;

/// Window lifecycle for one run. Never dropped, unlike frames.
#[derive(Debug, PartialEq)]
pub enum PresenterControl {
    Open { run: u64, resolution: Resolution },
    Close { run: u64 },
}

/// Simulation-thread end of the presenter link.
pub struct ChannelSurface {
    run: u64,
    control: Sender<PresenterControl>,
    frames: Sender<(u64, RgbaImage)>,
    input: Receiver<InputEvent>,
}

impl PresentationSurface for ChannelSurface {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        self.input.try_iter().collect()
    }

    fn present(&mut self, frame: &RgbaImage) -> SparResult<()> {
        match self.frames.try_send((self.run, frame.clone())) {
            // The editor is behind; it only ever shows the newest frame.
            Ok(()) | Err(TrySendError::Full(_)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => {
                Err(SparError::Surface("editor window is gone".into()))
            }
        }
    }
}

impl Drop for ChannelSurface {
    fn drop(&mut self) {
        let _ = self.control.send(PresenterControl::Close { run: self.run });
    }
}

/// Both ends of the presenter channels, shared by the editor.
#[derive(Resource)]
pub struct PresenterLink {
    next_run: AtomicU64,
    control_tx: Sender<PresenterControl>,
    control_rx: Receiver<PresenterControl>,
    frames_tx: Sender<(u64, RgbaImage)>,
    frames_rx: Receiver<(u64, RgbaImage)>,
    input_tx: Sender<InputEvent>,
    input_rx: Receiver<InputEvent>,
}

impl Default for PresenterLink {
    fn default() -> Self {
        let (control_tx, control_rx) = crossbeam_channel::unbounded();
        let (frames_tx, frames_rx) = crossbeam_channel::bounded(FRAME_QUEUE);
        let (input_tx, input_rx) = crossbeam_channel::unbounded();
        Self {
            next_run: AtomicU64::new(0),
            control_tx,
            control_rx,
            frames_tx,
            frames_rx,
            input_tx,
            input_rx,
        }
    }
}

impl PresenterLink {
    /// Factory for the next simulation run. Input left over from a previous
    /// run is discarded.
    pub fn surface_factory(&self) -> SurfaceFactory {
        for _ in self.input_rx.try_iter() {}
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        let control = self.control_tx.clone();
        let frames = self.frames_tx.clone();
        let input = self.input_rx.clone();
        Box::new(move |resolution| {
            control
                .send(PresenterControl::Open { run, resolution })
                .map_err(|_| SparError::Surface("editor window is gone".into()))?;
            Ok(Box::new(ChannelSurface {
                run,
                control,
                frames,
                input,
            }) as Box<dyn PresentationSurface>)
        })
    }
}

#[derive(Resource, Default)]
pub struct SimWindow {
    run: Option<u64>,
    window: Option<Entity>,
    camera: Option<Entity>,
    sprite: Option<Entity>,
    image: Option<Handle<Image>>,
}

pub struct PresenterPlugin;

impl Plugin for PresenterPlugin {
    fn build(&self, app: &mut App) {
        app.insert_resource(PresenterLink::default())
            .insert_resource(SimWindow::default())
            .add_systems(Update, (pump_presenter, forward_sim_input).chain());
    }
}

pub fn rgba_to_image(frame: &RgbaImage) -> Image {
    Image::new(
        Extent3d {
            width: frame.width(),
            height: frame.height(),
            depth_or_array_layers: 1,
        },
        TextureDimension::D2,
        frame.as_raw().clone(),
        TextureFormat::Rgba8UnormSrgb,
        RenderAssetUsages::default(),
    )
}

fn pump_presenter(
    mut commands: Commands,
    link: Res<PresenterLink>,
    mut sim_window: ResMut<SimWindow>,
    mut images: ResMut<Assets<Image>>,
) {
    for message in link.control_rx.try_iter() {
        match message {
            PresenterControl::Open { run, resolution } => {
                close_window(&mut commands, &mut sim_window);
                let window = commands
                    .spawn(Window {
                        title: format!("Spar Simulation ({resolution})"),
                        resolution: WindowResolution::new(
                            resolution.width as f32,
                            resolution.height as f32,
                        ),
                        resizable: false,
                        ..default()
                    })
                    .id();
                let camera = commands
                    .spawn((
                        Camera2d,
                        Camera {
                            target: RenderTarget::Window(WindowRef::Entity(window)),
                            ..default()
                        },
                        RenderLayers::layer(SIM_LAYER),
                    ))
                    .id();
                let handle = images.add(rgba_to_image(&RgbaImage::new(
                    resolution.width,
                    resolution.height,
                )));
                let sprite = commands
                    .spawn((Sprite::from_image(handle.clone()), RenderLayers::layer(SIM_LAYER)))
                    .id();
                *sim_window = SimWindow {
                    run: Some(run),
                    window: Some(window),
                    camera: Some(camera),
                    sprite: Some(sprite),
                    image: Some(handle),
                };
            }
            PresenterControl::Close { run } => {
                if sim_window.run == Some(run) {
                    close_window(&mut commands, &mut sim_window);
                }
            }
        }
    }
    // Frames from a finished run, or with no window open, are discarded.
    let latest = link
        .frames_rx
        .try_iter()
        .filter(|(run, _)| sim_window.run == Some(*run))
        .last();
    if let (Some((_, frame)), Some(handle)) = (latest, sim_window.image.as_ref()) {
        if let Some(image) = images.get_mut(handle) {
            *image = rgba_to_image(&frame);
        }
    }
}

fn close_window(commands: &mut Commands, sim_window: &mut SimWindow) {
    for entity in [sim_window.sprite, sim_window.camera, sim_window.window]
        .into_iter()
        .flatten()
    {
        if let Some(mut e) = commands.get_entity(entity) {
            e.despawn();
        }
    }
    *sim_window = SimWindow::default();
}

/// Input aimed at the simulation window becomes [`InputEvent`]s. Closing the
/// window or pressing Escape in it asks the loop to quit.
fn forward_sim_input(
    link: Res<PresenterLink>,
    sim_window: Res<SimWindow>,
    windows: Query<&Window>,
    mut keys: EventReader<KeyboardInput>,
    mut buttons: EventReader<MouseButtonInput>,
    mut moves: EventReader<CursorMoved>,
    mut close: EventReader<WindowCloseRequested>,
) {
    let Some(target) = sim_window.window else {
        keys.clear();
        buttons.clear();
        moves.clear();
        close.clear();
        return;
    };
    let send = |event: InputEvent| {
        let _ = link.input_tx.send(event);
    };
    for ev in close.read() {
        if ev.window == target {
            send(InputEvent::Quit);
        }
    }
    for ev in keys.read() {
        if ev.window != target || ev.repeat {
            continue;
        }
        if ev.key_code == KeyCode::Escape {
            send(InputEvent::Quit);
            continue;
        }
        let Some(key) = key_name(ev.key_code) else {
            continue;
        };
        send(match ev.state {
            ButtonState::Pressed => InputEvent::KeyDown { key: key.into() },
            ButtonState::Released => InputEvent::KeyUp { key: key.into() },
        });
    }
    let cursor = windows
        .get(target)
        .ok()
        .and_then(Window::cursor_position)
        .unwrap_or(Vec2::ZERO);
    for ev in buttons.read() {
        if ev.window != target {
            continue;
        }
        let button = mouse_button_name(ev.button).to_string();
        send(match ev.state {
            ButtonState::Pressed => InputEvent::MouseDown {
                button,
                x: cursor.x,
                y: cursor.y,
            },
            ButtonState::Released => InputEvent::MouseUp {
                button,
                x: cursor.x,
                y: cursor.y,
            },
        });
    }
    for ev in moves.read() {
        if ev.window == target {
            send(InputEvent::MouseMove {
                x: ev.position.x,
                y: ev.position.y,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_surface_round_trip() {
        let link = PresenterLink::default();
        let factory = link.surface_factory();
        let mut surface = factory(Resolution::new(4, 2)).expect("open");
        assert_eq!(
            link.control_rx.try_recv(),
            Ok(PresenterControl::Open {
                run: 0,
                resolution: Resolution::new(4, 2)
            })
        );

        link.input_tx.send(InputEvent::key_down("a")).expect("send");
        assert_eq!(surface.poll_events(), vec![InputEvent::key_down("a")]);

        // A full queue drops frames instead of blocking the loop.
        for _ in 0..FRAME_QUEUE + 2 {
            surface.present(&RgbaImage::new(4, 2)).expect("present");
        }
        let frames: Vec<(u64, RgbaImage)> = link.frames_rx.try_iter().collect();
        assert_eq!(frames.len(), FRAME_QUEUE);
        assert!(frames.iter().all(|(run, _)| *run == 0));
    }

    #[test]
    fn close_arrives_even_when_frame_queue_is_full() {
        let link = PresenterLink::default();
        let mut surface = link.surface_factory()(Resolution::new(2, 2)).expect("open");
        for _ in 0..10 {
            surface.present(&RgbaImage::new(2, 2)).expect("present");
        }
        drop(surface);
        let control: Vec<PresenterControl> = link.control_rx.try_iter().collect();
        assert_eq!(
            control,
            vec![
                PresenterControl::Open {
                    run: 0,
                    resolution: Resolution::new(2, 2)
                },
                PresenterControl::Close { run: 0 },
            ]
        );

        // The next run gets its own id, so stale frames and closes can be told apart.
        let _next = link.surface_factory()(Resolution::new(2, 2)).expect("open");
        assert_eq!(
            link.control_rx.try_recv(),
            Ok(PresenterControl::Open {
                run: 1,
                resolution: Resolution::new(2, 2)
            })
        );
    }

    #[test]
    fn converted_image_keeps_pixels() {
        let frame = RgbaImage::from_pixel(3, 2, image::Rgba([1, 2, 3, 4]));
        let image = rgba_to_image(&frame);
        assert_eq!(image.width(), 3);
        assert_eq!(image.height(), 2);
        assert_eq!(&image.data[..4], &[1, 2, 3, 4]);
    }
}
