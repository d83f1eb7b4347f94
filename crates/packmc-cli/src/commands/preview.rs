use crate::cli::PreviewArgs;
use crate::config::RunConfig;
use crate::error::{CliError, Result};
use packmc_core::core::io::ramsnap::RamsnapFile;
use packmc_core::core::io::SnapshotFile;
use packmc_core::engine::packing::Packing;
use std::sync::Arc;

pub fn execute(args: &PreviewArgs) -> Result<()> {
    let config = RunConfig::load(&args.input)?;
    let model = config.shape.build()?;

    let (simulation_box, shapes) = match &args.start_from {
        Some(path) => {
            let data = RamsnapFile::read_from_path(path)?;
            (data.simulation_box, data.shapes)
        }
        None => {
            let initial = config.initial.as_ref().ok_or_else(|| {
                CliError::Config("no [initial] section and no --start-from snapshot".into())
            })?;
            initial.build()?
        }
    };

    let packing = Packing::new(simulation_box, shapes, Arc::clone(&model), config.walls)?;
    let heights = packing.simulation_box().heights();

    println!("particles:        {}", packing.size());
    println!("box volume:       {}", packing.simulation_box().volume());
    println!(
        "box heights:      {} {} {}",
        heights[0], heights[1], heights[2]
    );
    println!("number density:   {}", packing.number_density());
    println!("packing fraction: {}", packing.packing_fraction());
    if packing.model().has_hard_part() {
        println!("overlapping pairs: {}", packing.count_overlaps_full());
    }
    if packing.model().has_soft_part() {
        println!("total energy:     {}", packing.total_energy());
    }
    Ok(())
}
