use serde_derive::{Deserialize, Serialize};
use sloggers::LoggerConfig;
use std::path::Path;

pub const DEFAULT_PORT: u16 = 5004;

#[derive(Serialize, Deserialize)]
pub struct Server {
    pub address: Option<String>,
    pub workers: usize,
    pub debug: bool,
}

#[derive(Serialize, Deserialize)]
pub struct HopdConfig {
    pub server: Server,
    pub log: LoggerConfig,
}

impl Default for HopdConfig {
    fn default() -> HopdConfig {
        HopdConfig {
            server: Server {
                address: Some(format!("0.0.0.0:{}", DEFAULT_PORT)),
                workers: 4,
                debug: false,
            },
            log: serdeconv::from_toml_str(
                r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
            )
            .expect("default log config must parse"),
        }
    }
}

impl HopdConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> HopdConfig {
        serdeconv::from_toml_file(path).expect("Error loading hopd configuration file")
    }
}
