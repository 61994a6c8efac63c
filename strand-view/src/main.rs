//! Application entry point for the strand viewer.
//!
//! Usage: `strand-view [SHOOT ROOT [CONFIG.json]]`. Without arguments the
//! built-in demo skeleton is grown with the default configuration.
//!
//! This binary sets up logging and eframe/egui and delegates all
//! interactive logic and rendering to [`Viewer`] from the `viewer` module.

mod demo;
mod viewer;

use std::error::Error;

use strand_core::{config::PipelineConfig, skeleton::Skeleton};
use tracing::info;
use tracing_subscriber::EnvFilter;
use viewer::Viewer;

/// Skeleton and configuration chosen on the command line.
#[derive(Debug, PartialEq)]
enum Inputs {
    Demo,
    Files {
        shoot: String,
        root: String,
        config: Option<String>,
    },
}

fn parse_args(args: &[String]) -> Result<Inputs, String> {
    match args {
        [] => Ok(Inputs::Demo),
        [shoot, root] => Ok(Inputs::Files {
            shoot: shoot.clone(),
            root: root.clone(),
            config: None,
        }),
        [shoot, root, config] => Ok(Inputs::Files {
            shoot: shoot.clone(),
            root: root.clone(),
            config: Some(config.clone()),
        }),
        _ => Err("usage: strand-view [SHOOT ROOT [CONFIG.json]]".to_string()),
    }
}

fn load(inputs: Inputs) -> Result<(Skeleton, PipelineConfig), Box<dyn Error>> {
    match inputs {
        Inputs::Demo => Ok((demo::demo_skeleton()?, PipelineConfig::default())),
        Inputs::Files {
            shoot,
            root,
            config,
        } => {
            let skeleton = Skeleton::from_path(&shoot, &root)?;
            let cfg = match config {
                Some(path) => PipelineConfig::from_path(path)?,
                None => PipelineConfig::default(),
            };
            Ok((skeleton, cfg))
        }
    }
}

/// Starts the native eframe application.
///
/// ### Returns
/// - `Ok(())` if the application runs to completion without errors.
/// - `Err` if the inputs cannot be loaded, or eframe fails to create the
///   native window or event loop.
fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (skeleton, cfg) = load(parse_args(&args)?)?;
    let stats = skeleton.stats();
    info!(
        nodes = stats.node_count,
        edges = stats.edge_count,
        length = stats.total_length,
        "skeleton loaded"
    );

    let options = eframe::NativeOptions::default();
    eframe::run_native(
        "Strand Viewer",
        options,
        Box::new(|_cc| Ok(Box::new(Viewer::new(skeleton, cfg)))),
    )?;
    Ok(())
}
