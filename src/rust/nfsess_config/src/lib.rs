//! Configuration handling for the nfsess flow summariser: the
//! `/etc/nfsess.conf` file and the subnet map that labels local
//! address space.

mod config;
mod subnet_index;

pub use config::{Config, ConfigError, CONFIG_ENV, DEFAULT_CONFIG_PATH};
pub use subnet_index::{parse_cidr_v4, SubnetIndex, SubnetMapError};
