use clap::Parser;

/// Zendure Bridge - polls Zendure batteries and meters on the local network
#[derive(Debug, Parser)]
#[clap(author, version)]
pub struct Options {
    /// Config file to read
    #[clap(short = 'c', long = "config", default_value = "config.yaml")]
    pub config_file: String,

    /// Query a device at this IPv4 address, print its identity and exit
    #[clap(short = 'p', long = "probe")]
    pub probe: Option<String>,
}

impl Options {
    pub fn new() -> Self {
        Self::parse()
    }
}

impl Default for Options {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_probe() {
        let options = Options::parse_from(["zendure-bridge", "-p", "192.168.1.40"]);
        assert_eq!(options.config_file, "config.yaml");
        assert_eq!(options.probe.as_deref(), Some("192.168.1.40"));

        let options = Options::parse_from(["zendure-bridge", "--config", "/etc/zendure.yaml"]);
        assert_eq!(options.config_file, "/etc/zendure.yaml");
        assert!(options.probe.is_none());
    }
}
