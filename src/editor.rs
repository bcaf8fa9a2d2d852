use std::path::{Path, PathBuf};

use bevy::input::mouse::{MouseScrollUnit, MouseWheel};
use bevy::prelude::*;
use bevy::window::{FileDragAndDrop, PrimaryWindow, WindowResized};
use image::RgbaImage;

use crate::assets::{import_script, SpriteCache};
use crate::error::{SparError, SparResult};
use crate::file_watcher::{FileWatchEvent, ProjectWatcher};
use crate::graph::Parenting;
use crate::presenter::{rgba_to_image, PresenterLink};
use crate::render::{project_edit_view, rasterize, ViewTransform, ZOOM_IN, ZOOM_OUT};
use crate::scene::Project;
use crate::simulation::{Resolution, SimConfig, SimReport, SimState, Simulator};
use crate::transform::SceneIndex;

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "gif"];
const SCRIPT_EXTENSIONS: [&str; 2] = ["lua", "rhai"];
const ROTATE_STEP: f32 = 15.0;
const SCALE_STEP: f32 = 1.1;
const OPACITY_STEP: f32 = 0.25;

/// Settings the editor starts with.
#[derive(Clone, Debug)]
pub struct EditorSettings {
    pub project_dir: Option<PathBuf>,
    pub scene: Option<String>,
    pub resolution: Resolution,
    pub target_fps: u32,
    pub base_title: String,
}

struct Drag {
    name: String,
    grab: Vec2,
}

/// Editor state: the project being edited, the camera, selection and the
/// simulation it may be running.
#[derive(Resource)]
pub struct EditorSession {
    pub project: Option<Project>,
    pub selected: Option<String>,
    pub parenting: Parenting,
    pub view: ViewTransform,
    pub cache: SpriteCache,
    pub sim: Simulator,
    pub resolution: Resolution,
    pub target_fps: u32,
    status: String,
    drag: Option<Drag>,
    pan_anchor: Option<Vec2>,
    dirty: bool,
}

impl EditorSession {
    pub fn new(settings: &EditorSettings) -> Self {
        let mut session = Self {
            project: None,
            selected: None,
            parenting: Parenting::default(),
            view: ViewTransform::identity(),
            cache: SpriteCache::new(),
            sim: Simulator::new(),
            resolution: settings.resolution,
            target_fps: settings.target_fps,
            status: String::from("Drop a project folder to begin"),
            drag: None,
            pan_anchor: None,
            dirty: true,
        };
        if let Some(dir) = &settings.project_dir {
            session.open_project(dir);
            if let Some(scene) = &settings.scene {
                let result = session.project_mut().and_then(|p| p.select_scene(scene));
                session.report(result.map(|_| format!("Scene '{scene}'")));
            }
        }
        session
    }

    fn project_mut(&mut self) -> SparResult<&mut Project> {
        self.project.as_mut().ok_or(SparError::NoProject)
    }

    pub fn open_project(&mut self, dir: &Path) {
        if self.sim.is_active() {
            self.sim.stop();
        }
        match Project::open(dir) {
            Ok(project) => {
                self.status = format!("Opened {}", dir.display());
                self.project = Some(project);
                self.selected = None;
                self.parenting.cancel();
                self.cache.clear();
                self.view = ViewTransform::identity();
            }
            Err(e) => {
                error!("[Spar editor] {}", e);
                self.status = e.to_string();
            }
        }
        self.dirty = true;
    }

    /// Shows the outcome of a user action in the title bar.
    fn report<T>(&mut self, result: SparResult<T>)
    where
        T: Into<String>,
    {
        match result {
            Ok(message) => self.status = message.into(),
            Err(e) => {
                if e.is_validation() {
                    warn!("[Spar editor] {}", e);
                } else {
                    error!("[Spar editor] {}", e);
                }
                self.status = e.to_string();
            }
        }
        self.dirty = true;
    }

    fn sprite_of(&self, name: &str) -> Option<String> {
        self.project
            .as_ref()?
            .object(name)?
            .sprite
            .clone()
    }

    /// Drops cached renders of `name`'s asset after a visual field changed.
    fn invalidate(&mut self, name: &str) {
        if let Some(path) = self.sprite_of(name) {
            self.cache.invalidate(&path);
        }
    }

    fn select(&mut self, name: Option<String>) {
        let completed = match (name.as_deref(), self.project.as_mut()) {
            (Some(child), Some(project)) => self.parenting.complete(project, child),
            _ => None,
        };
        if let (Some(result), Some(child)) = (completed, name.as_deref()) {
            self.report(result.map(|()| format!("Parented '{child}'")));
        }
        self.selected = name;
        self.dirty = true;
    }

    fn edit_selected<F>(&mut self, label: &str, f: F)
    where
        F: FnOnce(&mut Project, &str) -> SparResult<()>,
    {
        let Some(name) = self.selected.clone() else {
            return;
        };
        let result = self.project_mut().and_then(|p| f(p, &name));
        self.invalidate(&name);
        self.report(result.map(|()| format!("{label} '{name}'")));
    }

    pub fn toggle_simulation(&mut self, link: &PresenterLink) {
        let config = SimConfig {
            resolution: self.resolution,
            target_fps: self.target_fps,
            max_frames: None,
        };
        let result = self
            .sim
            .toggle(self.project.as_mut(), config, link.surface_factory());
        match result {
            Ok(Some(report)) => self.finish_run(report),
            Ok(None) => self.status = format!("Running at {}", self.resolution),
            Err(e) => self.report::<String>(Err(e)),
        }
        self.dirty = true;
    }

    fn finish_run(&mut self, report: SimReport) {
        self.status = format!(
            "Stopped after {} frames ({} script errors)",
            report.frames,
            report.errors.total()
        );
    }

    fn title(&self, base: &str) -> String {
        let scene = self
            .project
            .as_ref()
            .and_then(|p| p.active_name())
            .unwrap_or("no scene");
        let parenting = match self.parenting.pending() {
            Some(parent) => format!(" | pick a child for '{parent}'"),
            None => String::new(),
        };
        format!("{base} - {scene} [{}]{parenting} - {}", self.resolution, self.status)
    }
}

/// Texture and sprite the edit view is drawn into.
#[derive(Resource)]
struct EditView {
    image: Handle<Image>,
    canvas: RgbaImage,
}

#[derive(Resource, Clone)]
struct BaseTitle(String);

pub struct EditorPlugin {
    pub settings: EditorSettings,
}

impl Plugin for EditorPlugin {
    fn build(&self, app: &mut App) {
        let session = EditorSession::new(&self.settings);
        if let Some(project) = &session.project {
            app.insert_resource(ProjectWatcher::spawn(project.root()));
        }
        app.insert_resource(session)
            .insert_resource(BaseTitle(self.settings.base_title.clone()))
            .add_systems(Startup, setup_edit_view)
            .add_systems(
                Update,
                (
                    handle_file_drops,
                    handle_shortcuts,
                    handle_mouse,
                    apply_file_changes,
                    poll_simulation,
                    resize_edit_view,
                    redraw_edit_view,
                    update_title,
                )
                    .chain(),
            );
    }
}

fn setup_edit_view(
    mut commands: Commands,
    mut images: ResMut<Assets<Image>>,
    windows: Query<&Window, With<PrimaryWindow>>,
) {
    let (w, h) = windows
        .get_single()
        .map(|w| (w.width().max(1.0) as u32, w.height().max(1.0) as u32))
        .unwrap_or((960, 540));
    let canvas = RgbaImage::new(w, h);
    let image = images.add(rgba_to_image(&canvas));
    commands.spawn(Camera2d);
    commands.spawn(Sprite::from_image(image.clone()));
    commands.insert_resource(EditView { image, canvas });
}

fn primary_focused(windows: &Query<&Window, With<PrimaryWindow>>) -> bool {
    windows.get_single().map(|w| w.focused).unwrap_or(false)
}

fn handle_shortcuts(
    keys: Res<ButtonInput<KeyCode>>,
    windows: Query<&Window, With<PrimaryWindow>>,
    link: Res<PresenterLink>,
    mut session: ResMut<EditorSession>,
) {
    if !primary_focused(&windows) {
        return;
    }
    let ctrl = keys.any_pressed([KeyCode::ControlLeft, KeyCode::ControlRight]);
    let shift = keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);

    if keys.just_pressed(KeyCode::F5) {
        session.toggle_simulation(&link);
    }
    if keys.just_pressed(KeyCode::F6) {
        session.resolution = session.resolution.next_preset();
        session.status = format!("Resolution {}", session.resolution);
    }
    if keys.just_pressed(KeyCode::KeyN) && !ctrl {
        let result = session.project_mut().and_then(|p| {
            let names = p.scene_names();
            let name = (1..)
                .map(|i| format!("Scene{i}"))
                .find(|n| !names.contains(n))
                .unwrap_or_default();
            p.create_scene(&name).map(|()| format!("Created scene '{name}'"))
        });
        session.selected = None;
        session.report(result);
    }
    if keys.just_pressed(KeyCode::Tab) {
        let result = session.project_mut().and_then(|p| {
            let names = p.scene_names();
            let current = p.active_name().map(str::to_string);
            let next = current
                .and_then(|c| names.iter().position(|n| *n == c))
                .map_or(0, |i| (i + 1) % names.len().max(1));
            match names.get(next) {
                Some(name) => p.select_scene(name).map(|()| format!("Scene '{name}'")),
                None => Ok(String::from("No scenes")),
            }
        });
        session.selected = None;
        session.parenting.cancel();
        session.report(result);
    }
    if keys.just_pressed(KeyCode::KeyH) {
        if let Some(project) = &session.project {
            for (depth, name) in project.hierarchy() {
                info!("[Spar editor] {}{}", "  ".repeat(depth), name);
            }
        }
    }
    if keys.just_pressed(KeyCode::KeyE) {
        let result = session.project_mut().and_then(|p| p.create_empty());
        if let Ok(name) = &result {
            session.selected = Some(name.clone());
        }
        session.report(result.map(|n| format!("Created '{n}'")));
    }

    let Some(selected) = session.selected.clone() else {
        if keys.just_pressed(KeyCode::Escape) {
            session.parenting.cancel();
            session.dirty = true;
        }
        return;
    };
    if keys.just_pressed(KeyCode::Escape) {
        session.parenting.cancel();
        session.selected = None;
        session.dirty = true;
    }
    if keys.just_pressed(KeyCode::Delete) {
        session.invalidate(&selected);
        let result = session.project_mut().and_then(|p| p.delete_object(&selected));
        session.selected = None;
        session.report(result.map(|()| format!("Deleted '{selected}'")));
    }
    if ctrl && keys.just_pressed(KeyCode::KeyD) {
        let result = session.project_mut().and_then(|p| p.duplicate_object(&selected));
        if let Ok(name) = &result {
            session.selected = Some(name.clone());
        }
        session.report(result.map(|n| format!("Duplicated as '{n}'")));
    }
    if keys.just_pressed(KeyCode::KeyP) {
        session.parenting.designate(selected.clone());
        session.dirty = true;
    }
    if keys.just_pressed(KeyCode::KeyU) {
        session.edit_selected("Unparented", |p, name| p.clear_parent(name));
    }
    if keys.just_pressed(KeyCode::KeyR) {
        let step = if shift { -ROTATE_STEP } else { ROTATE_STEP };
        session.edit_selected("Rotated", |p, name| {
            let current = p.object(name).map_or(0.0, |o| o.rotation);
            p.set_rotation(name, (current + step).rem_euclid(360.0))
        });
    }
    let scale = if keys.just_pressed(KeyCode::Equal) {
        Some(SCALE_STEP)
    } else if keys.just_pressed(KeyCode::Minus) {
        Some(1.0 / SCALE_STEP)
    } else {
        None
    };
    if let Some(factor) = scale {
        session.edit_selected("Scaled", |p, name| {
            let (sx, sy) = p.object(name).map_or((1.0, 1.0), |o| (o.scale_x, o.scale_y));
            p.set_scale(name, sx * factor, sy * factor)
        });
    }
    if keys.just_pressed(KeyCode::KeyO) {
        session.edit_selected("Faded", |p, name| {
            let current = p.object(name).map_or(1.0, |o| o.opacity_or_default());
            let next = if current <= 0.0 { 1.0 } else { (current - OPACITY_STEP).max(0.0) };
            p.set_opacity(name, next)
        });
    }
}

fn handle_mouse(
    buttons: Res<ButtonInput<MouseButton>>,
    windows: Query<(Entity, &Window), With<PrimaryWindow>>,
    mut wheel: EventReader<MouseWheel>,
    mut session: ResMut<EditorSession>,
) {
    let Ok((primary, window)) = windows.get_single() else {
        return;
    };
    let Some(cursor) = window.cursor_position() else {
        wheel.clear();
        session.pan_anchor = None;
        return;
    };

    for ev in wheel.read() {
        if ev.window != primary {
            continue;
        }
        let delta = match ev.unit {
            MouseScrollUnit::Line => ev.y,
            MouseScrollUnit::Pixel => ev.y / 40.0,
        };
        if delta == 0.0 {
            continue;
        }
        let factor = if delta > 0.0 { ZOOM_IN } else { ZOOM_OUT };
        session.view.zoom_at(cursor, factor);
        session.cache.clear_derived();
        session.dirty = true;
    }

    if buttons.pressed(MouseButton::Right) || buttons.pressed(MouseButton::Middle) {
        if let Some(anchor) = session.pan_anchor {
            let delta = cursor - anchor;
            if delta != Vec2::ZERO {
                session.view.pan(delta);
                session.dirty = true;
            }
        }
        session.pan_anchor = Some(cursor);
    } else {
        session.pan_anchor = None;
    }

    let world = session.view.screen_to_world(cursor);
    if buttons.just_pressed(MouseButton::Left) {
        let hit = session.project.as_ref().and_then(|p| p.hit_test(world));
        let drag = hit.as_ref().and_then(|name| {
            let project = session.project.as_ref()?;
            let index = SceneIndex::build(project.objects());
            let obj = index.get(name)?;
            Some(Drag {
                name: name.clone(),
                grab: index.world_position(obj) - world,
            })
        });
        session.drag = drag;
        session.select(hit);
    } else if buttons.pressed(MouseButton::Left) {
        let Some((name, target)) = session
            .drag
            .as_ref()
            .map(|d| (d.name.clone(), world + d.grab))
        else {
            return;
        };
        let current = session.project.as_ref().and_then(|p| {
            let index = SceneIndex::build(p.objects());
            index.get(&name).map(|o| index.world_position(o))
        });
        if current.is_some_and(|c| c.distance(target) > 0.5) {
            if let Err(e) = session.project_mut().and_then(|p| p.drag_to(&name, target)) {
                session.drag = None;
                session.report::<String>(Err(e));
            }
            session.dirty = true;
        }
    } else {
        session.drag = None;
    }
}

fn handle_file_drops(
    mut drops: EventReader<FileDragAndDrop>,
    keys: Res<ButtonInput<KeyCode>>,
    mut commands: Commands,
    mut session: ResMut<EditorSession>,
) {
    let shift = keys.any_pressed([KeyCode::ShiftLeft, KeyCode::ShiftRight]);
    for ev in drops.read() {
        let FileDragAndDrop::DroppedFile { path_buf, .. } = ev else {
            continue;
        };
        if path_buf.is_dir() {
            session.open_project(path_buf);
            if let Some(project) = &session.project {
                commands.insert_resource(ProjectWatcher::spawn(project.root()));
            }
            continue;
        }
        let ext = path_buf
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            drop_image(&mut session, path_buf, shift);
        } else if SCRIPT_EXTENSIONS.contains(&ext.as_str()) {
            drop_script(&mut session, path_buf);
        } else {
            session.status = format!("Ignored {}", path_buf.display());
        }
    }
}

fn drop_image(session: &mut EditorSession, path: &Path, retarget: bool) {
    let selected_sprite = session
        .selected
        .clone()
        .filter(|name| {
            session
                .project
                .as_ref()
                .and_then(|p| p.object(name))
                .is_some_and(|o| o.kind.is_sprite())
        });
    match selected_sprite.filter(|_| retarget) {
        Some(name) => {
            let old = session.sprite_of(&name);
            let result = session
                .project_mut()
                .and_then(|p| p.set_sprite_from_file(&name, path));
            if let Some(old) = old {
                session.cache.invalidate(&old);
            }
            if let Ok(new) = &result {
                session.cache.forget(new);
            }
            session.report(result.map(|rel| format!("'{name}' now shows {rel}")));
        }
        None => {
            let result = session.project_mut().and_then(|p| p.create_sprite(path));
            if let Ok(name) = &result {
                session.selected = Some(name.clone());
                if let Some(rel) = session.sprite_of(name) {
                    session.cache.forget(&rel);
                }
            }
            session.report(result.map(|n| format!("Created '{n}'")));
        }
    }
}

fn drop_script(session: &mut EditorSession, path: &Path) {
    let selected = session.selected.clone();
    let result = session.project_mut().and_then(|p| {
        let relative = import_script(p.root(), path)?;
        match &selected {
            Some(name) => p
                .set_script(name, Some(relative.clone()))
                .map(|()| format!("'{name}' runs {relative}")),
            None => p
                .set_global_script(Some(relative.clone()))
                .map(|()| format!("Global script {relative}")),
        }
    });
    session.report(result);
}

fn apply_file_changes(watcher: Option<Res<ProjectWatcher>>, mut session: ResMut<EditorSession>) {
    let Some(watcher) = watcher else {
        return;
    };
    for change in watcher.drain() {
        match change {
            FileWatchEvent::AssetChanged(path) => {
                info!("[Spar FileWatcher] Asset changed: {}", path);
                session.cache.forget(&path);
                session.dirty = true;
            }
            FileWatchEvent::ScriptChanged(path) => {
                info!("[Spar FileWatcher] Script changed: {} (used on next run)", path);
            }
        }
    }
}

fn poll_simulation(mut session: ResMut<EditorSession>) {
    if let Some(report) = session.sim.poll() {
        session.finish_run(report);
        session.dirty = true;
    }
}

fn resize_edit_view(
    mut resized: EventReader<WindowResized>,
    windows: Query<Entity, With<PrimaryWindow>>,
    view: Option<ResMut<EditView>>,
    mut session: ResMut<EditorSession>,
) {
    let Some(mut view) = view else {
        resized.clear();
        return;
    };
    let Ok(primary) = windows.get_single() else {
        return;
    };
    let Some(last) = resized.read().filter(|ev| ev.window == primary).last() else {
        return;
    };
    let (w, h) = (last.width.max(1.0) as u32, last.height.max(1.0) as u32);
    if view.canvas.dimensions() != (w, h) {
        view.canvas = RgbaImage::new(w, h);
        session.dirty = true;
    }
}

fn redraw_edit_view(
    view: Option<ResMut<EditView>>,
    mut images: ResMut<Assets<Image>>,
    mut session: ResMut<EditorSession>,
) {
    let Some(mut view) = view else {
        return;
    };
    if !session.dirty {
        return;
    }
    let session = &mut *session;
    session.dirty = false;
    let commands = match &session.project {
        Some(project) => project_edit_view(project.objects(), &session.view, session.selected.as_deref()),
        None => project_edit_view(&[], &session.view, None),
    };
    let root = session
        .project
        .as_ref()
        .map(|p| p.root().to_path_buf())
        .unwrap_or_default();
    let view = &mut *view;
    rasterize(&commands, &mut view.canvas, &mut session.cache, &root);
    if let Some(image) = images.get_mut(&view.image) {
        *image = rgba_to_image(&view.canvas);
    }
}

fn update_title(
    session: Res<EditorSession>,
    base: Res<BaseTitle>,
    mut windows: Query<&mut Window, With<PrimaryWindow>>,
) {
    let Ok(mut window) = windows.get_single_mut() else {
        return;
    };
    let mut title = session.title(&base.0);
    if session.sim.state() != SimState::Idle {
        title.push_str(" (running)");
    }
    if window.title != title {
        window.title = title;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TempProject;

    fn settings(dir: &Path) -> EditorSettings {
        EditorSettings {
            project_dir: Some(dir.to_path_buf()),
            scene: None,
            resolution: Resolution::default(),
            target_fps: 0,
            base_title: "Spar".into(),
        }
    }

    fn session_with_scene(tmp: &TempProject) -> EditorSession {
        let mut session = EditorSession::new(&settings(tmp.path()));
        session
            .project_mut()
            .and_then(|p| p.create_scene("Main"))
            .expect("scene");
        session
    }

    #[test]
    fn selecting_completes_a_pending_parent() {
        let tmp = TempProject::new("editor_parent");
        let mut session = session_with_scene(&tmp);
        let project = session.project.as_mut().expect("project");
        let parent = project.create_empty().expect("a");
        let child = project.create_empty().expect("b");
        session.parenting.designate(parent.clone());
        session.select(Some(child.clone()));
        let project = session.project.as_ref().expect("project");
        assert_eq!(project.object(&child).and_then(|o| o.parent.clone()), Some(parent));
        assert!(session.parenting.pending().is_none());
    }

    #[test]
    fn dropping_files_creates_sprites_and_binds_scripts() {
        let tmp = TempProject::new("editor_drop");
        let outside = TempProject::new("editor_drop_src");
        let png = outside.write_png("ship.png", 4, 4, [9, 9, 9, 255]);
        let script = outside.write("ship.lua", "function update(o) end");
        let mut session = session_with_scene(&tmp);

        drop_script(&mut session, &script);
        assert_eq!(
            session.project.as_ref().and_then(|p| p.global_script()),
            Some("scripts/ship.lua")
        );

        drop_image(&mut session, &png, false);
        let name = session.selected.clone().expect("selected sprite");
        drop_script(&mut session, &script);
        let project = session.project.as_ref().expect("project");
        let obj = project.object(&name).expect("sprite");
        assert_eq!(obj.sprite.as_deref(), Some("assets/ship.png"));
        assert_eq!(obj.script.as_deref(), Some("scripts/ship.lua"));
    }

    #[test]
    fn title_reports_scene_and_status() {
        let tmp = TempProject::new("editor_title");
        let session = session_with_scene(&tmp);
        let title = session.title("Spar");
        assert!(title.starts_with("Spar - Main [1024x768]"));
    }
}
