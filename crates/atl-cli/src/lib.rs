//! # ATL CLI
//!
//! Command-line driver for the ATL audio object runtime.
//!
//! ## Commands
//! - `simulate` - Run a scripted scene against the simulated middleware
//! - `config` - Print or write the default runtime configuration
//! - `validate` - Check a controls library or runtime configuration file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use atl_core::job::JobSystem;
use atl_core::math::{Transform, Vec3};
use atl_core::time::DeltaTime;
use atl_physics::{Collider, PhysicsWorld, RayCaster};
use atl_runtime::{
    AudioRuntime, ControlsLibrary, Notification, ObjectDesc, ObjectId, OcclusionType,
    RuntimeConfig, SimulatedBackend, StopTarget, TriggerRequest, UserData,
};
use clap::{Parser, Subcommand};

/// ATL audio runtime CLI
#[derive(Parser)]
#[command(name = "atl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Run a scripted scene against the simulated middleware
    Simulate {
        /// Number of audio objects
        #[arg(short, long, default_value = "16")]
        objects: usize,

        /// Number of fixed 10 ms ticks
        #[arg(short, long, default_value = "500")]
        ticks: usize,

        /// Occlusion type for every object
        #[arg(long, default_value = "adaptive")]
        occlusion: OcclusionType,

        /// Runtime configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Controls library file
        #[arg(long)]
        controls: Option<PathBuf>,
    },

    /// Print or write the default runtime configuration
    Config {
        /// Output file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check a controls library or runtime configuration file
    Validate {
        /// File to check
        file: PathBuf,

        /// Treat the file as a runtime configuration
        #[arg(long)]
        config: bool,
    },
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    match cli.command {
        Commands::Simulate {
            objects,
            ticks,
            occlusion,
            config,
            controls,
        } => {
            let config = match config {
                Some(path) => RuntimeConfig::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => RuntimeConfig::default(),
            };
            let controls = match controls {
                Some(path) => ControlsLibrary::from_file(&path)
                    .with_context(|| format!("loading {}", path.display()))?,
                None => default_controls()?,
            };

            let summary = simulate(
                config,
                &controls,
                &SimulationSettings {
                    objects,
                    ticks,
                    occlusion,
                },
            )?;
            log::info!("Simulation complete:");
            log::info!("  Triggers executed: {}", summary.executed);
            log::info!(
                "  Triggers finished: {} ({} unsuccessful)",
                summary.finished,
                summary.failed
            );
            log::info!(
                "  Files started/finished: {}/{}",
                summary.files_started,
                summary.files_finished
            );
            log::info!("  Peak occlusion: {:.3}", summary.peak_occlusion);
        }

        Commands::Config { output } => {
            let json = RuntimeConfig::default().to_json_pretty()?;
            match output {
                Some(path) => {
                    std::fs::write(&path, json)
                        .with_context(|| format!("writing {}", path.display()))?;
                    log::info!("Wrote default configuration to {}", path.display());
                }
                None => println!("{}", json),
            }
        }

        Commands::Validate { file, config } => {
            if config {
                let config = RuntimeConfig::from_file(&file)
                    .with_context(|| format!("loading {}", file.display()))?;
                config.validate()?;
                log::info!("{}: valid runtime configuration", file.display());
            } else {
                let library = ControlsLibrary::from_file(&file)
                    .with_context(|| format!("loading {}", file.display()))?;
                library.validate()?;
                let connections: usize = library
                    .triggers
                    .iter()
                    .map(|trigger| trigger.connections.len())
                    .sum();
                log::info!(
                    "{}: {} triggers, {} connections",
                    file.display(),
                    library.triggers.len(),
                    connections
                );
            }
        }
    }

    Ok(())
}

/// Scene parameters for [`simulate`]
#[derive(Debug, Clone, Copy)]
pub struct SimulationSettings {
    pub objects: usize,
    pub ticks: usize,
    pub occlusion: OcclusionType,
}

/// Totals gathered while simulating
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SimulationSummary {
    pub executed: usize,
    pub finished: usize,
    pub failed: usize,
    pub files_started: usize,
    pub files_finished: usize,
    pub peak_occlusion: f32,
}

impl SimulationSummary {
    fn record(&mut self, notification: Notification) {
        match notification {
            Notification::TriggerFinished { info, .. } => {
                self.finished += 1;
                if !info.success {
                    self.failed += 1;
                }
            }
            Notification::FileStarted { success, .. } => {
                if success {
                    self.files_started += 1;
                }
            }
            Notification::FileFinished { .. } => self.files_finished += 1,
        }
    }
}

const TICK_MS: f64 = 10.0;
const DRAIN_TICKS: usize = 1000;

/// Built-in controls used when no library is given
pub fn default_controls() -> Result<ControlsLibrary> {
    let json = serde_json::json!({
        "triggers": [
            {
                "id": 1,
                "name": "footstep",
                "connections": [
                    { "name": "step", "properties": { "outcome": "success", "duration_ms": 120 } }
                ]
            },
            {
                "id": 2,
                "name": "explosion",
                "radius": 80.0,
                "connections": [
                    { "name": "blast", "properties": { "outcome": "pending", "load_ms": 40, "duration_ms": 800 } },
                    { "name": "debris", "properties": { "outcome": "success", "duration_ms": 300 } }
                ]
            },
            {
                "id": 3,
                "name": "ui_click",
                "connections": [
                    { "name": "click", "properties": { "outcome": "do_not_track" } }
                ]
            }
        ]
    });
    Ok(ControlsLibrary::from_json_str(&json.to_string())?)
}

fn orbit(index: usize, tick: usize) -> Transform {
    let radius = 2.0 + (index % 8) as f32 * 6.0;
    let angle = index as f32 * 0.7 + tick as f32 * 0.01;
    Transform::from_position(Vec3::new(radius * angle.cos(), 0.0, radius * angle.sin()))
}

fn build_world(jobs: Arc<JobSystem>) -> PhysicsWorld {
    let world = PhysicsWorld::new(jobs);
    for i in 0..8 {
        let angle = i as f32 * std::f32::consts::FRAC_PI_4;
        world.add_collider(Collider::cuboid(
            Vec3::new(12.0 * angle.cos(), 0.0, 12.0 * angle.sin()),
            Vec3::new(2.0, 3.0, 2.0),
            0.6,
        ));
    }
    world.add_collider(Collider::sphere(Vec3::new(0.0, 0.0, 25.0), 4.0, 0.9));
    world
}

/// Run a deterministic scene on the calling thread
pub fn simulate(
    config: RuntimeConfig,
    controls: &ControlsLibrary,
    settings: &SimulationSettings,
) -> Result<SimulationSummary> {
    if controls.triggers.is_empty() {
        bail!("controls library has no triggers");
    }

    let jobs = Arc::new(JobSystem::with_cores());
    let caster: Arc<dyn RayCaster> = Arc::new(build_world(jobs.clone()));
    let backend = SimulatedBackend::new().with_file_duration_ms(2000.0);
    let monitor = backend.monitor();

    let mut runtime = AudioRuntime::new(config, Box::new(backend), Some(caster))?;
    runtime.load_controls(controls)?;
    let notifications = runtime.notifications();

    let objects = (0..settings.objects)
        .map(|index| {
            runtime.create_object(
                ObjectDesc::named(format!("emitter_{}", index))
                    .at(orbit(index, 0))
                    .with_occlusion(settings.occlusion)
                    .with_entity(index as u64),
            )
        })
        .collect::<Result<Vec<ObjectId>, _>>()?;

    let mut summary = SimulationSummary::default();
    for (index, object) in objects.iter().enumerate() {
        runtime.toggle_relative_velocity_tracking(*object, index % 2 == 0)?;
        if index % 4 == 0 {
            runtime.play_file(*object, &format!("ambience_{}.ogg", index), false, UserData::default())?;
        }
    }

    let delta = DeltaTime::from_millis(TICK_MS);
    for tick in 0..settings.ticks {
        for (index, object) in objects.iter().enumerate() {
            runtime.set_transformation(*object, orbit(index, tick))?;
            if (tick + index) % 25 == 0 {
                let trigger = &controls.triggers[(tick / 25 + index) % controls.triggers.len()];
                runtime.execute_trigger(
                    *object,
                    trigger.id,
                    TriggerRequest::default()
                        .with_user_data(UserData::new(index as u64, tick as u64, 0))
                        .with_lifetime_ms(1500.0),
                )?;
                summary.executed += 1;
            }
        }

        runtime.process_requests();
        runtime.update(delta);
        notifications.try_iter().for_each(|n| summary.record(n));

        summary.peak_occlusion = runtime
            .objects()
            .map(|object| object.propagation_data().occlusion)
            .fold(summary.peak_occlusion, f32::max);
    }

    for object in runtime.objects() {
        let data = object.propagation_data();
        log::debug!(
            "{}: obstruction {:.3}, occlusion {:.3}",
            object.name().unwrap_or("unnamed"),
            data.obstruction,
            data.occlusion
        );
    }

    for object in &objects {
        runtime.stop_trigger(*object, StopTarget::All)?;
        runtime.release_object(*object)?;
    }
    for _ in 0..DRAIN_TICKS {
        if runtime.num_objects() == 0 {
            break;
        }
        runtime.update(delta);
        notifications.try_iter().for_each(|n| summary.record(n));
    }
    if runtime.num_objects() > 0 {
        log::warn!("{} objects still draining after shutdown", runtime.num_objects());
    }

    let stats = monitor.stats();
    log::debug!(
        "Simulated middleware: {} events started, {} finished, {} occlusion updates",
        stats.events_started,
        stats.events_finished,
        stats.occlusion_updates
    );

    runtime.shutdown();
    jobs.wait_idle();
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse() {
        let cli = Cli::parse_from(["atl", "config"]);
        assert!(matches!(cli.command, Commands::Config { output: None }));
    }

    #[test]
    fn test_simulate_command() {
        let cli = Cli::parse_from([
            "atl", "simulate", "-o", "4", "-t", "50", "--occlusion", "high",
        ]);
        if let Commands::Simulate {
            objects,
            ticks,
            occlusion,
            config,
            controls,
        } = cli.command
        {
            assert_eq!(objects, 4);
            assert_eq!(ticks, 50);
            assert_eq!(occlusion, OcclusionType::High);
            assert!(config.is_none());
            assert!(controls.is_none());
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn test_unknown_occlusion_rejected() {
        assert!(Cli::try_parse_from(["atl", "simulate", "--occlusion", "extreme"]).is_err());
    }

    #[test]
    fn test_simulation_balances_notifications() {
        let summary = simulate(
            RuntimeConfig::default(),
            &default_controls().unwrap(),
            &SimulationSettings {
                objects: 8,
                ticks: 200,
                occlusion: OcclusionType::Adaptive,
            },
        )
        .unwrap();

        assert!(summary.executed > 0);
        assert_eq!(summary.finished, summary.executed);
        assert_eq!(summary.files_started, summary.files_finished);
        assert_eq!(summary.files_started, 2);
    }
}
