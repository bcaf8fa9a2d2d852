use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bevy::app::ScheduleRunnerPlugin;
use bevy::log::LogPlugin;
use bevy::prelude::*;

use crate::error::{SparError, SparResult};
use crate::scene::Project;
use crate::simulation::{HeadlessSurface, SimConfig, SimReport, Simulator, SurfaceLog};

pub const DEFAULT_HEADLESS_FRAMES: u64 = 600;

#[derive(Clone, Debug)]
pub struct HeadlessSettings {
    pub project_dir: PathBuf,
    pub scene: Option<String>,
    pub config: SimConfig,
    /// Where to save the last presented frame as an image.
    pub capture: Option<PathBuf>,
}

#[derive(Resource)]
struct HeadlessRun {
    settings: HeadlessSettings,
    sim: Simulator,
    log: Arc<Mutex<SurfaceLog>>,
}

pub fn run(settings: HeadlessSettings) -> AppExit {
    let mut app = App::new();
    app.add_plugins(
        MinimalPlugins.set(ScheduleRunnerPlugin::run_loop(Duration::from_millis(16))),
    )
    .add_plugins(LogPlugin::default())
    .insert_resource(HeadlessRun {
        settings,
        sim: Simulator::new(),
        log: Arc::new(Mutex::new(SurfaceLog::default())),
    })
    .add_systems(Startup, start_headless)
    .add_systems(Update, finish_headless);
    app.run()
}

fn open_and_start(run: &mut HeadlessRun) -> SparResult<()> {
    let mut project = Project::open(&run.settings.project_dir)?;
    if let Some(scene) = &run.settings.scene {
        project.select_scene(scene)?;
    }
    let factory = HeadlessSurface::factory(run.log.clone(), Vec::new(), None);
    run.sim
        .start(Some(&mut project), run.settings.config.clone(), factory)
}

fn start_headless(mut run: ResMut<HeadlessRun>, mut exit: EventWriter<AppExit>) {
    if let Err(e) = open_and_start(&mut run) {
        error!("[Spar headless] {}", e);
        exit.send(AppExit::from_code(2));
    }
}

fn finish_headless(mut run: ResMut<HeadlessRun>, mut exit: EventWriter<AppExit>) {
    if !run.sim.is_active() {
        return;
    }
    let Some(report) = run.sim.poll() else {
        return;
    };
    summarize(&report);
    if let Some(path) = run.settings.capture.clone() {
        if let Err(e) = save_capture(&run.log, &path) {
            error!("[Spar headless] {}", e);
        }
    }
    exit.send(if report.errors.total() == 0 {
        AppExit::Success
    } else {
        AppExit::from_code(1)
    });
}

fn summarize(report: &SimReport) {
    info!(
        "[Spar headless] {} frames, stop: {:?}, {} script errors",
        report.frames,
        report.stop_reason,
        report.errors.total()
    );
    for err in report.errors.entries() {
        warn!(
            "[Spar headless] frame {} {}{}: {}",
            err.frame,
            err.script,
            err.object
                .as_deref()
                .map(|o| format!(" on '{o}'"))
                .unwrap_or_default(),
            err.message
        );
    }
}

fn save_capture(log: &Mutex<SurfaceLog>, path: &Path) -> SparResult<()> {
    let log = log
        .lock()
        .map_err(|_| SparError::Surface("surface log poisoned".into()))?;
    let Some(frame) = log.last_frame.as_ref() else {
        return Err(SparError::Surface("no frame was presented".into()));
    };
    frame.save(path).map_err(|source| SparError::Image {
        path: path.to_path_buf(),
        source,
    })?;
    info!("[Spar headless] Saved last frame to {}", path.display());
    Ok(())
}
