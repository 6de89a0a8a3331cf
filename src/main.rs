use clap::Parser;
use colored::Colorize;
use env_logger::Env;
use std::process;
use tokio::fs;
use zotero_deb::args::{self, Args, SubCommand};
use zotero_deb::config;
use zotero_deb::errors::*;
use zotero_deb::package;
use zotero_deb::plumbing;
use zotero_deb::publish;
use zotero_deb::rebuild;
use zotero_deb::repo;
use zotero_deb::republish;
use zotero_deb::resolve::{Filter, Resolver};
use zotero_deb::site;
use zotero_deb::verify;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match (args.quiet, args.verbose) {
        (0, 0) => "warn,zotero_deb=info",
        (1, 0) => "warn",
        (_, 0) => "error",
        (_, 1) => "info,zotero_deb=debug",
        (_, 2) => "debug",
        (_, 3) => "debug,zotero_deb=trace",
        _ => "trace",
    };
    env_logger::init_from_env(Env::default().default_filter_or(log_level));

    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls ring CryptoProvider"))?;

    let config = config::Config::load_with_args(&args).await;

    if args.colors {
        colored::control::set_override(true);
    }

    match args.subcommand {
        SubCommand::Resolve(resolve) => {
            let config = config?;
            let filter = Filter::from(resolve.filter);
            let releases = Resolver::new(&config)?.resolve(&filter).await?;

            if resolve.json {
                let releases = serde_json::to_string_pretty(&releases)
                    .context("Failed to encode releases as json")?;
                println!("{releases}");
            } else {
                for release in &releases {
                    println!(
                        "{}  {}  {}",
                        release.deb_filename().green(),
                        release.channel.as_str().yellow(),
                        release.url
                    );
                }
            }
        }
        SubCommand::Rebuild(rebuild) => {
            let config = config?;
            rebuild::rebuild(&config, rebuild, &args.credentials).await?;
        }
        SubCommand::Package(pkg) => {
            let config = config?;
            for path in &pkg.paths {
                let deb = package::package(&config, path, !pkg.no_sign).await?;
                println!("{}", deb.display());
            }
        }
        SubCommand::Repo(_repo) => {
            let config = config?;
            repo::mkrepo(&config).await?;
        }
        SubCommand::Publish(publish) => {
            let config = config?;
            let target = config.target(&publish.target)?;
            let publisher = publish::publisher(target, &args.credentials, config.http_client()?)?;
            if publish.fetch {
                publisher.fetch(&config.data.repo).await?;
            } else {
                let summary = publisher.publish(&config.data.repo).await?;
                info!("Published to {:?}: {summary}", target.name);
            }
        }
        SubCommand::Republish(republish) => {
            let config = config?;
            republish::republish(&config, &republish, &args.credentials).await?;
        }
        SubCommand::Site(site) => run_site(config, site).await?,
        SubCommand::Verify(_verify) => {
            let config = config?;
            let violations = verify::verify(&config.data.repo).await?;
            for violation in &violations {
                error!("{violation}");
            }
            if !violations.is_empty() {
                bail!("Repository has {} inconsistencies", violations.len());
            }
            info!("Repository is consistent");
        }
        SubCommand::Plumbing(plumbing) => plumbing::run(config, plumbing).await?,
        SubCommand::Completions(completions) => args::gen_completions(&completions)?,
    }

    Ok(())
}

async fn run_site(config: Result<config::Config>, site: args::Site) -> Result<()> {
    // the remote check runs in CI before any configuration is in place
    let config = config.ok();

    if site.remote_check {
        let http = match &config {
            Some(config) => config.http_client()?,
            None => reqwest::Client::builder()
                .user_agent(config::DEFAULT_USER_AGENT)
                .build()
                .context("Failed to setup http client")?,
        };
        if site::remote_has_packages(&http, &site.url).await? {
            info!("Remote index exists: {:?}", site::packages_url(&site.url));
            process::exit(1);
        }
        println!("{} missing, force republish", site::packages_url(&site.url));
        return Ok(());
    }

    let config = config.context("Failed to load configuration, required to generate the site")?;
    fs::create_dir_all(&site.output).await?;

    let install_sh = site.output.join("install.sh");
    fs::write(&install_sh, site::install_sh(&site.url, &config.data.codename))
        .await
        .with_context(|| anyhow!("Failed to write {install_sh:?}"))?;

    let readme = site.readme.read().await?;
    let readme = String::from_utf8(readme).context("Failed to utf-8 decode README")?;
    let assets = site::list_assets(&config.data.repo)?;
    let index = site::index_md(&readme, &site.url, &assets)?;
    let index_md = site.output.join("index.md");
    fs::write(&index_md, index)
        .await
        .with_context(|| anyhow!("Failed to write {index_md:?}"))?;
    info!("Wrote {install_sh:?} and {index_md:?}");
    Ok(())
}
