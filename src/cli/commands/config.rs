use anyhow::Result;

use crate::config::resolve_config_path_with_source;

pub(crate) fn run_path() -> Result<()> {
    let resolved = resolve_config_path_with_source(None)?;
    println!("{} (source: {})", resolved.path.display(), resolved.source);
    Ok(())
}
