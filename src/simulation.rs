use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use bevy::log::{error, info, warn};
use image::RgbaImage;

use crate::assets::SpriteCache;
use crate::components::SceneObject;
use crate::error::{SparError, SparResult};
use crate::frame_clock::FrameClock;
use crate::input::InputEvent;
use crate::render::{project_runtime_frame, rasterize};
use crate::scene::Project;
use crate::scripting::{ScriptErrors, ScriptHost};

pub const DEFAULT_TARGET_FPS: u32 = 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

pub const RESOLUTION_PRESETS: [Resolution; 4] = [
    Resolution::new(800, 600),
    Resolution::new(1024, 768),
    Resolution::new(1280, 720),
    Resolution::new(1920, 1080),
];

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// The preset after this one, wrapping; the first preset if this is not
    /// a preset.
    pub fn next_preset(self) -> Self {
        let next = RESOLUTION_PRESETS
            .iter()
            .position(|r| *r == self)
            .map_or(0, |i| (i + 1) % RESOLUTION_PRESETS.len());
        RESOLUTION_PRESETS[next]
    }
}

impl Default for Resolution {
    fn default() -> Self {
        RESOLUTION_PRESETS[1]
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = SparError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || SparError::InvalidResolution(s.to_string());
        let (w, h) = s.trim().split_once(|c: char| c == 'x' || c == 'X').ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self::new(width, height))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SimState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl SimState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => SimState::Starting,
            2 => SimState::Running,
            3 => SimState::Stopping,
            _ => SimState::Idle,
        }
    }
}

/// Where simulation frames are shown and input comes from. Closing happens
/// on drop, on the simulation thread.
pub trait PresentationSurface {
    fn poll_events(&mut self) -> Vec<InputEvent>;
    fn present(&mut self, frame: &RgbaImage) -> SparResult<()>;
}

/// Opens a surface on the simulation thread. An error aborts the start and
/// returns the runtime to idle.
pub type SurfaceFactory =
    Box<dyn FnOnce(Resolution) -> SparResult<Box<dyn PresentationSurface>> + Send>;

#[derive(Clone, Debug)]
pub struct SimConfig {
    pub resolution: Resolution,
    /// Zero runs unpaced.
    pub target_fps: u32,
    pub max_frames: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            target_fps: DEFAULT_TARGET_FPS,
            max_frames: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    Stopped,
    FrameLimit,
    SurfaceFailed,
    PresentFailed,
    Crashed,
}

#[derive(Debug)]
pub struct SimReport {
    pub frames: u64,
    pub errors: ScriptErrors,
    pub stop_reason: StopReason,
    /// Snapshot as the scripts left it.
    pub objects: Vec<SceneObject>,
}

impl SimReport {
    fn empty(stop_reason: StopReason) -> Self {
        Self {
            frames: 0,
            errors: ScriptErrors::default(),
            stop_reason,
            objects: Vec::new(),
        }
    }
}

/// Owner of at most one running simulation.
///
/// Stopping is cooperative: the loop checks its flag between frames, so a
/// hook that never returns also blocks `stop`.
pub struct Simulator {
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<SimReport>>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SimState::Idle as u8)),
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn state(&self) -> SimState {
        SimState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether a loop thread exists, even if it is about to finish.
    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Saves the active scene, snapshots it and starts the loop thread.
    pub fn start(
        &mut self,
        project: Option<&mut Project>,
        config: SimConfig,
        surface: SurfaceFactory,
    ) -> SparResult<()> {
        if self.is_active() {
            return Err(SparError::SimulationRunning);
        }
        let project = project.ok_or(SparError::NoProject)?;
        if project.active().is_none() {
            return Err(SparError::NoScene);
        }
        project.save()?;
        let ctx = LoopContext {
            root: project.root().to_path_buf(),
            global_script: project.global_script().map(str::to_string),
            objects: project.snapshot(),
            config,
            state: self.state.clone(),
            running: self.running.clone(),
        };
        self.running.store(true, Ordering::Release);
        self.state.store(SimState::Starting as u8, Ordering::Release);
        info!(
            "[Spar sim] Starting '{}' at {}",
            project.active_name().unwrap_or_default(),
            ctx.config.resolution
        );
        let spawned = std::thread::Builder::new()
            .name("spar-sim".into())
            .spawn(move || run_loop(ctx, surface));
        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                self.state.store(SimState::Idle as u8, Ordering::Release);
                Err(SparError::io("spar-sim", e))
            }
        }
    }

    /// Asks the loop to stop and waits for it. `None` if nothing was running.
    pub fn stop(&mut self) -> Option<SimReport> {
        self.running.store(false, Ordering::Release);
        let handle = self.handle.take()?;
        Some(self.join(handle))
    }

    /// Starts when idle, stops when active. Returns the report of a stopped
    /// run.
    pub fn toggle(
        &mut self,
        project: Option<&mut Project>,
        config: SimConfig,
        surface: SurfaceFactory,
    ) -> SparResult<Option<SimReport>> {
        if self.is_active() {
            return Ok(self.stop());
        }
        self.start(project, config, surface).map(|()| None)
    }

    /// Reaps a loop that ended by itself (window closed, frame limit, surface
    /// failure).
    pub fn poll(&mut self) -> Option<SimReport> {
        if !self.handle.as_ref()?.is_finished() {
            return None;
        }
        let handle = self.handle.take()?;
        Some(self.join(handle))
    }

    fn join(&mut self, handle: JoinHandle<SimReport>) -> SimReport {
        let report = handle.join().unwrap_or_else(|_| {
            error!("[Spar sim] Simulation thread panicked");
            SimReport::empty(StopReason::Crashed)
        });
        self.running.store(false, Ordering::Release);
        self.state.store(SimState::Idle as u8, Ordering::Release);
        info!(
            "[Spar sim] Stopped after {} frames ({:?}, {} script errors)",
            report.frames,
            report.stop_reason,
            report.errors.total()
        );
        report
    }
}

impl Drop for Simulator {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LoopContext {
    root: PathBuf,
    global_script: Option<String>,
    objects: Vec<SceneObject>,
    config: SimConfig,
    state: Arc<AtomicU8>,
    running: Arc<AtomicBool>,
}

impl LoopContext {
    fn set_state(&self, state: SimState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn keep_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

fn run_loop(ctx: LoopContext, open_surface: SurfaceFactory) -> SimReport {
    let resolution = ctx.config.resolution;
    let mut surface = match open_surface(resolution) {
        Ok(surface) => surface,
        Err(e) => {
            error!("[Spar sim] Cannot open presentation surface: {}", e);
            ctx.set_state(SimState::Idle);
            return SimReport::empty(StopReason::SurfaceFailed);
        }
    };

    let mut objects = ctx.objects.clone();
    let mut host = ScriptHost::load(&ctx.root, ctx.global_script.as_deref(), &objects);
    host.run_init(&mut objects);

    let mut cache = SpriteCache::new();
    let mut canvas = RgbaImage::new(resolution.width, resolution.height);
    let mut clock = FrameClock::new(ctx.config.target_fps);
    let mut frames = 0u64;
    ctx.set_state(SimState::Running);

    let stop_reason = loop {
        if !ctx.keep_running() {
            break StopReason::Stopped;
        }
        let events = surface.poll_events();
        if events.iter().any(InputEvent::is_quit) {
            break StopReason::Quit;
        }
        host.run_update(&mut objects, &events);
        let commands = project_runtime_frame(&objects, resolution);
        rasterize(&commands, &mut canvas, &mut cache, &ctx.root);
        if let Err(e) = surface.present(&canvas) {
            warn!("[Spar sim] Present failed: {}", e);
            break StopReason::PresentFailed;
        }
        frames += 1;
        if ctx.config.max_frames.is_some_and(|max| frames >= max) {
            break StopReason::FrameLimit;
        }
        clock.tick();
    };

    ctx.set_state(SimState::Stopping);
    drop(surface);
    ctx.set_state(SimState::Idle);
    SimReport {
        frames,
        errors: host.into_errors(),
        stop_reason,
        objects,
    }
}

/// What a [`HeadlessSurface`] saw, shared with whoever created it.
#[derive(Default, Debug)]
pub struct SurfaceLog {
    pub opened: u32,
    pub closed: u32,
    pub presented: u64,
    pub last_frame: Option<RgbaImage>,
}

/// A surface with no window: frames are counted (and the last one kept),
/// input is scripted up front.
pub struct HeadlessSurface {
    log: Arc<Mutex<SurfaceLog>>,
    scripted: Vec<(u64, InputEvent)>,
    quit_after: Option<u64>,
    polls: u64,
}

impl HeadlessSurface {
    /// Factory for a surface that reports into `log`. `scripted` events are
    /// delivered on the poll with the given frame index; a quit is injected
    /// once `quit_after` frames have been presented.
    pub fn factory(
        log: Arc<Mutex<SurfaceLog>>,
        scripted: Vec<(u64, InputEvent)>,
        quit_after: Option<u64>,
    ) -> SurfaceFactory {
        Box::new(move |_resolution| {
            if let Ok(mut log) = log.lock() {
                log.opened += 1;
            }
            Ok(Box::new(HeadlessSurface {
                log,
                scripted,
                quit_after,
                polls: 0,
            }) as Box<dyn PresentationSurface>)
        })
    }
}

impl PresentationSurface for HeadlessSurface {
    fn poll_events(&mut self) -> Vec<InputEvent> {
        let frame = self.polls;
        self.polls += 1;
        let mut events: Vec<InputEvent> = self
            .scripted
            .iter()
            .filter(|(at, _)| *at == frame)
            .map(|(_, e)| e.clone())
            .collect();
        if self.quit_after.is_some_and(|n| frame >= n) {
            events.push(InputEvent::Quit);
        }
        events
    }

    fn present(&mut self, frame: &RgbaImage) -> SparResult<()> {
        if let Ok(mut log) = self.log.lock() {
            log.presented += 1;
            log.last_frame = Some(frame.clone());
        }
        Ok(())
    }
}

impl Drop for HeadlessSurface {
    fn drop(&mut self) {
        if let Ok(mut log) = self.log.lock() {
            log.closed += 1;
        }
    }
}
