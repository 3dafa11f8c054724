//! Segment interface validation
//!
//! Checks the stage's fixed external contract against the first and last
//! segments, then walks the chain in index order tracking every typed port
//! produced so far.

use super::segment::Segment;
use super::stage::{PortMap, format_ports};
use crate::diagnostics::Diagnostics;

/// Validates the typed data flow of one stage's sorted segments
///
/// # Arguments
/// * `source_label` - Stage file path used as message prefix
/// * `segments` - Segments of one (world, stage), sorted by `(index, name)`
/// * `diag` - Receives one error per contract or flow violation
pub fn validate_segment_flow(source_label: &str, segments: &[Segment], diag: &mut Diagnostics) {
    let (Some(first), Some(last)) = (segments.first(), segments.last()) else {
        return;
    };
    let stage = first.stage;

    let fixed_inputs = stage.fixed_inputs();
    if first.inputs != fixed_inputs {
        diag.error(format!(
            "{source_label} first segment '{}' must declare fixed stage inputs: {}",
            first.name,
            format_ports(&fixed_inputs)
        ));
    }
    let fixed_outputs = stage.fixed_outputs();
    if last.outputs != fixed_outputs {
        diag.error(format!(
            "{source_label} last segment '{}' must declare fixed stage outputs: {}",
            last.name,
            format_ports(&fixed_outputs)
        ));
    }

    let mut produced: PortMap = first.outputs.clone();
    for segment in &segments[1..] {
        for (name, expected) in &segment.inputs {
            match produced.get(name) {
                None => diag.error(format!(
                    "{source_label} segment '{}' input '{expected}:{name}' is not produced by any previous segment.",
                    segment.name
                )),
                Some(actual) if actual != expected => diag.error(format!(
                    "{source_label} segment '{}' input type mismatch for '{name}': expected '{expected}', got '{actual}'.",
                    segment.name
                )),
                Some(_) => {}
            }
        }
        for (name, ty) in &segment.outputs {
            match produced.get(name) {
                Some(existing) if existing != ty => diag.error(format!(
                    "{source_label} segment '{}' output '{name}' changes type from '{existing}' to '{ty}'.",
                    segment.name
                )),
                _ => {
                    produced.insert(name.clone(), *ty);
                }
            }
        }
    }
}
