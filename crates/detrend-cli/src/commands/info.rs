use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use detrend_core::io::read_artifact;

#[derive(Args)]
pub struct InfoArgs {
    /// Artifact file
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let artifact = read_artifact(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let size = std::fs::metadata(&args.file)?.len();

    println!("File:        {}", args.file.display());
    println!("Size:        {:.1} MB", size as f64 / (1024.0 * 1024.0));
    println!("Planes:      {}", artifact.planes.len());
    for plane in &artifact.planes {
        let (rows, cols) = plane.data.dim();
        println!(
            "  {:<10} {}x{} {}",
            plane.name,
            cols,
            rows,
            plane.data.dtype_name()
        );
    }

    println!("Header:      {} cards", artifact.header.len());
    for card in artifact.header.iter() {
        match &card.comment {
            Some(comment) => println!("  {:<8} = {:<30} / {}", card.key, card.value.to_string(), comment),
            None => println!("  {:<8} = {}", card.key, card.value),
        }
    }

    Ok(())
}
