use anyhow::Result;

fn main() -> Result<()> {
    regwatch::boot::init_logger();

    let matches = regwatch::cli::parse_args();
    let options = regwatch::cli::Options::from_matches(&matches)?;
    log::info!(
        "Monitoring Modbus server {}:{}",
        options.config.monitor.host,
        options.config.monitor.port
    );
    regwatch::cli::run(options)
}
