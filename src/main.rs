use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

use rentdesk::app::App;
use rentdesk::commands::Command;
use rentdesk::config::Config;
use rentdesk::logging;

#[derive(Parser, Debug)]
#[command(name = "rentdesk")]
#[command(about = "Manage houses, tenants, rent and expenses from the terminal")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/rentdesk/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory for log files (default: <data dir>/rentdesk/logs)
  #[arg(long)]
  log_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let log_dir = match args.log_dir {
    Some(dir) => dir,
    None => logging::default_log_dir()?,
  };
  let _guard = logging::init(&log_dir)?;

  let config = Config::load(args.config.as_deref())?;

  let app = App::new(config)?;
  let output = app.execute(args.command).await?;
  println!("{}", output);

  Ok(())
}
