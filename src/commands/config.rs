//! `bidwatch config [key] [value]`.

use anyhow::Result;

use crate::config::Config;

/// Show the whole configuration, one key, or set a key and save.
pub fn run(key: Option<&str>, value: Option<&str>) -> Result<()> {
    let mut config = Config::load()?;
    match (key, value) {
        (None, _) => println!("{}", serde_json::to_string_pretty(&config)?),
        (Some(key), None) => println!("{}", serde_json::to_string_pretty(&config.get_value(key)?)?),
        (Some(key), Some(value)) => {
            config.set_value(key, value)?;
            config.save()?;
            println!("{} = {}", key, config.get_value(key)?);
        }
    }
    Ok(())
}
