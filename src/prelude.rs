pub use anyhow::{anyhow, bail, Error, Result};
pub use log::{debug, error, info, trace, warn};
pub use std::str::FromStr;
pub use tokio::sync::broadcast;

pub use crate::{
    channels::Channels,
    command::Command,
    config::{self, Config, ConfigWrapper},
    error::{ConfigurationError, DeviceError, PersistenceError, TransportError},
    mqtt,
    options::Options,
};
