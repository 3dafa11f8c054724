//! Shaderpack validation tool
//!
//! Loads a shaderpack directory or archive, prints every error and warning,
//! and for a valid pack dumps the resolved segment graph per world and stage.

use std::env;
use std::path::Path;
use std::process;
use sulkan_pack::manifest::lang::DEFAULT_LOCALE;
use sulkan_pack::pipelines::stage::format_ports;
use sulkan_pack::{Stage, load_shaderpack};

fn main() {
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 || args.len() > 3 {
        eprintln!("Usage: {} <shaderpack> [locale]", args[0]);
        eprintln!("Validates a shaderpack and dumps its segment graph to stdout");
        process::exit(1);
    }

    let path = Path::new(&args[1]);
    let locale = args.get(2).map(String::as_str).unwrap_or(DEFAULT_LOCALE);
    if !path.exists() {
        eprintln!("Error: Shaderpack '{}' does not exist", path.display());
        process::exit(1);
    }

    let result = load_shaderpack(path, locale);
    for warning in &result.warnings {
        println!("warning: {warning}");
    }
    for error in &result.errors {
        println!("error: {error}");
    }
    let Some(manifest) = result.manifest else {
        eprintln!("{} error(s), {} warning(s)", result.errors.len(), result.warnings.len());
        process::exit(1);
    };

    println!("{} (spec {})", manifest.display_name(), manifest.spec_version);
    let stages: Vec<&str> = manifest.stages.iter().map(Stage::as_str).collect();
    println!("stages: {}", stages.join(", "));
    println!("options: {}", manifest.options.leaves().count());
    for world in manifest.pipelines.worlds() {
        println!("world {world}");
        for stage in Stage::ALL {
            let segments = manifest.pipelines.segments(world, stage);
            if segments.is_empty() {
                continue;
            }
            println!("  {stage}");
            for segment in segments {
                println!("    #{} {}: {} -> {}", segment.index, segment.name, format_ports(&segment.inputs), format_ports(&segment.outputs));
                if let Some(enabled) = &segment.enabled {
                    println!("      enabled: {enabled}");
                }
            }
        }
    }
}
