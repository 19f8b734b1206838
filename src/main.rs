use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use definy_sync::api::types::{AccountToken, OpenIdConnectProvider};
use definy_sync::app::{App, Target};
use definy_sync::config::Config;
use definy_sync::logging;

#[derive(Parser, Debug)]
#[command(name = "definy-sync")]
#[command(about = "Fetch and cache definy resources")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/definy-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// API base URL, overriding the config file
  #[arg(short, long)]
  url: Option<String>,

  /// Print a login URL for this provider (google or github) and exit
  #[arg(long, value_name = "PROVIDER")]
  log_in_url: Option<OpenIdConnectProvider>,

  /// What to fetch: project:<id>, account:<id>, type-part:<id>, image:<hash>,
  /// top-projects, type-parts-of:<project-id>
  targets: Vec<Target>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = Config::load(args.config.as_deref())?;
  if let Some(url) = args.url {
    config.api.url = url;
  }

  let _log_guard = logging::init(&config.log)?;

  let mut app = App::new(&config, args.targets)?;

  if let Some(provider) = args.log_in_url {
    let location = config.api.base_url()?;
    println!("{}", app.log_in_url(provider, location.as_str()).await?);
    return Ok(());
  }

  app
    .start_session(Config::account_token().map(AccountToken::new))
    .await;
  let summary = app.run().await?;
  println!("{}", serde_json::to_string_pretty(&summary)?);

  Ok(())
}
