//! Observatory configuration and the static host-target file loader.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{Result, SchedulerError};
use crate::model::{Target, TargetSet};

static HOST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^,]+),(-?\d+(?:\.\d+)?),(-?\d+(?:\.\d+)?)$").expect("valid regex")
});

#[derive(Debug, Clone, Deserialize)]
pub struct TelescopeEntry {
    pub name: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservatoryEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub telescopes: Vec<TelescopeEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObservatoryConfig {
    pub observatories: Vec<ObservatoryEntry>,
}

impl ObservatoryConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Only `observatories[0]` is ever used.
    pub fn primary(&self) -> Result<&ObservatoryEntry> {
        self.observatories
            .first()
            .ok_or_else(|| SchedulerError::Internal("observatory config has no observatories".into()))
    }
}

impl ObservatoryEntry {
    pub fn latitude_rad(&self) -> f64 {
        self.latitude.to_radians()
    }

    pub fn longitude_rad(&self) -> f64 {
        self.longitude.to_radians()
    }
}

/// Reads the host-galaxy target file: CSV, three columns
/// `name,ra_deg,dec_deg`, one target per line. Strict: a blank line is a
/// parse error, matching the original parser's behavior exactly (an
/// acknowledged but preserved rough edge, not a defect to silently paper over).
pub fn read_host_targets(path: impl AsRef<Path>) -> Result<TargetSet> {
    let text = std::fs::read_to_string(path)?;
    let mut targets = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let captures = HOST_LINE.captures(line).ok_or_else(|| {
            SchedulerError::InvalidHostFile(format!("line {lineno} is not `name,ra_deg,dec_deg`: {line:?}"))
        })?;
        let name = captures[1].to_string();
        let ra_deg: f64 = captures[2]
            .parse()
            .map_err(|_| SchedulerError::InvalidHostFile(format!("line {lineno} has non-numeric ra")))?;
        let dec_deg: f64 = captures[3]
            .parse()
            .map_err(|_| SchedulerError::InvalidHostFile(format!("line {lineno} has non-numeric dec")))?;
        targets.push(Target { name, ra_deg, dec_deg });
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_well_formed_observatory_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("observatories.json");
        std::fs::write(
            &path,
            r#"{"observatories":[{"latitude":32.78,"longitude":-105.82,"telescopes":[{"name":"t1","ip":"10.0.0.1","port":8080}]}]}"#,
        )
        .unwrap();
        let config = ObservatoryConfig::load(&path).unwrap();
        let primary = config.primary().unwrap();
        assert_eq!(primary.telescopes.len(), 1);
    }

    #[test]
    fn reads_well_formed_host_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        std::fs::write(&path, "ngc1,10.684,41.269\nngc2,23.462,30.660\n").unwrap();
        let targets = read_host_targets(&path).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].name, "ngc1");
    }

    #[test]
    fn blank_line_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hosts.txt");
        std::fs::write(&path, "ngc1,10.684,41.269\n\nngc2,23.462,30.660\n").unwrap();
        assert!(read_host_targets(&path).is_err());
    }
}
