mod assets;
mod canvas;
mod components;
mod editor;
mod error;
mod file_watcher;
mod frame_clock;
mod graph;
mod headless;
mod input;
mod presenter;
mod render;
mod scene;
mod scripting;
mod simulation;
#[cfg(test)]
mod test_support;
mod transform;

use std::path::PathBuf;

use bevy::prelude::*;
use bevy::window::ExitCondition;

use editor::{EditorPlugin, EditorSettings};
use headless::{HeadlessSettings, DEFAULT_HEADLESS_FRAMES};
use presenter::PresenterPlugin;
use simulation::{Resolution, SimConfig, DEFAULT_TARGET_FPS};

const USAGE: &str =
    "usage: spar [PROJECT_DIR] [--headless] [--frames N] [--scene NAME] [--capture PATH]";

#[derive(serde::Deserialize, Default)]
struct StartupConfig {
    window_title: Option<String>,
    window_width: Option<f32>,
    window_height: Option<f32>,
    background_color: Option<[f32; 3]>,
    project_dir: Option<String>,
    resolution: Option<String>,
    target_fps: Option<u32>,
}

fn load_startup_config() -> StartupConfig {
    let path = env_value("SPAR_CONFIG").unwrap_or_else(|| "spar.json".to_string());
    match std::fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(cfg) => {
                println!("[Spar] Loaded startup config from {}", path);
                cfg
            }
            Err(e) => {
                eprintln!("[Spar] Failed to parse {}: {}", path, e);
                StartupConfig::default()
            }
        },
        Err(_) => StartupConfig::default(),
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

#[derive(Debug, Default, PartialEq)]
struct CliArgs {
    project_dir: Option<PathBuf>,
    headless: bool,
    frames: Option<u64>,
    scene: Option<String>,
    capture: Option<PathBuf>,
}

fn parse_args(args: &[String]) -> Result<CliArgs, String> {
    let mut cli = CliArgs::default();
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        let mut value = |flag: &str| {
            iter.next()
                .cloned()
                .ok_or_else(|| format!("{flag} needs a value"))
        };
        match arg.as_str() {
            "--headless" => cli.headless = true,
            "--frames" => {
                let n = value("--frames")?;
                cli.frames = Some(n.parse().map_err(|_| format!("invalid frame count '{n}'"))?);
            }
            "--scene" => cli.scene = Some(value("--scene")?),
            "--capture" => cli.capture = Some(PathBuf::from(value("--capture")?)),
            flag if flag.starts_with("--") => return Err(format!("unknown flag '{flag}'")),
            dir if cli.project_dir.is_none() => cli.project_dir = Some(PathBuf::from(dir)),
            extra => return Err(format!("unexpected argument '{extra}'")),
        }
    }
    Ok(cli)
}

fn main() -> AppExit {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = match parse_args(&args) {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("[Spar] {e}\n{USAGE}");
            return AppExit::from_code(2);
        }
    };
    let startup_config = load_startup_config();

    // Command line, then env vars, then spar.json.
    let project_dir = cli
        .project_dir
        .or_else(|| env_value("SPAR_PROJECT_DIR").map(PathBuf::from))
        .or_else(|| startup_config.project_dir.map(PathBuf::from));
    let resolution = match env_value("SPAR_RESOLUTION").or(startup_config.resolution) {
        Some(text) => match text.parse::<Resolution>() {
            Ok(r) => r,
            Err(e) => {
                eprintln!("[Spar] {e}, using {}", Resolution::default());
                Resolution::default()
            }
        },
        None => Resolution::default(),
    };
    let target_fps = startup_config.target_fps.unwrap_or(DEFAULT_TARGET_FPS);

    if cli.headless {
        let Some(project_dir) = project_dir else {
            eprintln!("[Spar] --headless needs a project directory\n{USAGE}");
            return AppExit::from_code(2);
        };
        println!("[Spar] Starting in HEADLESS mode");
        return headless::run(HeadlessSettings {
            project_dir,
            scene: cli.scene,
            config: SimConfig {
                resolution,
                target_fps,
                max_frames: Some(cli.frames.unwrap_or(DEFAULT_HEADLESS_FRAMES)),
            },
            capture: cli.capture,
        });
    }

    let window_title = startup_config
        .window_title
        .unwrap_or_else(|| "Spar Editor".to_string());
    let window_width = startup_config.window_width.unwrap_or(1280.0);
    let window_height = startup_config.window_height.unwrap_or(800.0);
    let bg = startup_config.background_color.unwrap_or([0.1, 0.1, 0.1]);

    let mut app = App::new();
    app.add_plugins(DefaultPlugins.set(WindowPlugin {
        primary_window: Some(Window {
            title: window_title.clone(),
            resolution: (window_width, window_height).into(),
            present_mode: bevy::window::PresentMode::AutoVsync,
            ..default()
        }),
        // The simulation window must not keep the app alive on its own.
        exit_condition: ExitCondition::OnPrimaryClosed,
        ..default()
    }))
    .insert_resource(ClearColor(Color::srgb(bg[0], bg[1], bg[2])))
    .add_plugins(PresenterPlugin)
    .add_plugins(EditorPlugin {
        settings: EditorSettings {
            project_dir,
            scene: cli.scene,
            resolution,
            target_fps,
            base_title: window_title,
        },
    });
    println!("[Spar] Starting in WINDOWED mode");
    app.run()
}
