//! Check command - build the store tree and report its status

use std::path::PathBuf;

use anyhow::{Result, bail};

use crate::handler::Handler;

pub fn run(config: Option<PathBuf>) -> Result<()> {
    let config = super::load_config(config)?;
    let handler = Handler::from_config(&config)?;

    let root = handler.root();
    println!("store:   {} ({})", root.store_type(), root.category());
    println!("sources: {}", config.sources.len());
    for source in &config.sources {
        println!("  - {} -> {}", source.type_name(), source.category());
    }

    let status = root.status();
    if !status.is_empty() {
        bail!("store tree has errors: {}", status);
    }
    println!("status:  ok");
    Ok(())
}
