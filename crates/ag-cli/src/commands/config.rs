use ag_core::config::Config;

pub fn show(config: &Config) -> anyhow::Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn path() -> anyhow::Result<()> {
    println!("{}", Config::default_path().display());
    Ok(())
}
