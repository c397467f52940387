//! Config serialization to TOML
//!
//! Single source of truth for the config file format: `write_default` and
//! `tether config --show` both render through here.

use super::{Config, VERSION};

impl Config {
    pub fn to_toml(&self) -> String {
        format!(
            r#"# tether configuration (v{version})
# Environment variables override these values:
#   TETHER_LOG_LEVEL, TETHER_BUS_LOG_CAPACITY,
#   TETHER_TOOL_GRACE_MS, TETHER_TICK_INTERVAL_MS

[bus]
# Events kept in the rolling debug log (0 disables it)
log_capacity = {log_capacity}

[store]
# How long a finished tool call stays visible before eviction
tool_grace_ms = {tool_grace_ms}

[runtime]
# How often deferred work (evictions, queue releases) runs
tick_interval_ms = {tick_interval_ms}

[logging]
# Filter directive; RUST_LOG takes precedence when set
level = {level:?}
file_enabled = {file_enabled}
file_dir = {file_dir:?}
# hourly, daily or never
file_rotation = "{file_rotation}"
file_prefix = {file_prefix:?}
"#,
            version = VERSION,
            log_capacity = self.bus.log_capacity,
            tool_grace_ms = self.store.tool_grace.as_millis(),
            tick_interval_ms = self.runtime.tick_interval.as_millis(),
            level = self.logging.level,
            file_enabled = self.logging.file_enabled,
            file_dir = self.logging.file_dir.display().to_string(),
            file_rotation = self.logging.file_rotation.as_str(),
            file_prefix = self.logging.file_prefix,
        )
    }
}
