//! Hour schedule: one guidance prompt per hour of the day.

use std::path::Path;

use tracing::{info, warn};

use radio24_core::error::{RadioError, Result};
use radio24_core::program::{CHANNEL_NAME, ScheduleEntry, default_schedule};

/// Read-only after bootstrap.
#[derive(Debug, Clone)]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Default for Schedule {
    fn default() -> Self {
        Self {
            entries: default_schedule(),
        }
    }
}

impl Schedule {
    pub fn new(entries: Vec<ScheduleEntry>) -> Self {
        Self { entries }
    }

    /// Parse a JSON array of schedule entries.
    pub fn from_json(data: &str) -> Result<Self> {
        let entries: Vec<ScheduleEntry> = serde_json::from_str(data)?;
        if entries.is_empty() {
            return Err(RadioError::Store("schedule has no entries".into()));
        }
        Ok(Self { entries })
    }

    /// Load `path`, falling back to the built-in schedule when the file is
    /// missing or unreadable.
    pub async fn load_or_default(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(data) => match Self::from_json(&data) {
                Ok(schedule) => {
                    info!(path = %path.display(), entries = schedule.entries.len(), "Loaded schedule");
                    schedule
                }
                Err(e) => {
                    warn!(path = %path.display(), %e, "Invalid schedule file, using built-in schedule");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                warn!(path = %path.display(), %e, "Unreadable schedule file, using built-in schedule");
                Self::default()
            }
        }
    }

    /// Guidance prompt for `hour` on the broadcast channel.
    pub fn prompt_for(&self, hour: u32) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.channel == CHANNEL_NAME && e.hour == hour)
            .map(|e| e.prompt.as_str())
    }
}
