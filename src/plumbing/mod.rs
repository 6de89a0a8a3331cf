use crate::args::Plumbing;
use crate::config::Config;
use crate::errors::*;
use crate::package;
use crate::repo::RepositoryIndex;

pub async fn run(config: Result<Config>, args: Plumbing) -> Result<()> {
    match args {
        Plumbing::Config(_config) => {
            let config = config?;
            let config = serde_json::to_string_pretty(&config.data)?;
            println!("{config}");
        }
        Plumbing::ByHash(by_hash) => {
            let path = match by_hash.path {
                Some(path) => path,
                None => config?.data.repo,
            };
            let index = RepositoryIndex::load(&path).await?;
            let n = index.write_by_hash().await?;
            info!("Wrote {n} by-hash entries to {:?}", path.join("by-hash"));
        }
        Plumbing::Control(control) => {
            let config = config?;
            let deb = package::metadata(&config, &control.path).await?;
            print!("{}", deb.control(&config.data.maintainer));
        }
    }

    Ok(())
}
