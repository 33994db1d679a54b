//! Config command implementation.

use anyhow::Result;

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", Config::path().display());
        }
        ConfigAction::Show => {
            let config = Config::load();
            print!("{}", toml::to_string_pretty(&config)?);
        }
        ConfigAction::Forget => {
            let mut config = Config::load();
            if config.forget_device() {
                config.save()?;
                println!("Forgot last connected sensor.");
            } else {
                println!("No sensor remembered.");
            }
        }
    }
    Ok(())
}
