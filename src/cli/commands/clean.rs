use std::path::PathBuf;

use anyhow::Result;

use crate::{
    cli::state::remove_cache_db_files,
    config::{load_config, resolve_cache_db_path},
};

pub(crate) fn run(config: Option<PathBuf>) -> Result<()> {
    let loaded = load_config(config.as_deref())?;
    let path = resolve_cache_db_path(&loaded.config)?;

    if remove_cache_db_files(&path)? {
        println!("cleaned cache db: {}", path.display());
    } else {
        println!("no existing cache db to clean: {}", path.display());
    }
    Ok(())
}
