//! Rotation configuration surface.
//!
//! Mirrors the recognized options exactly: `rule`, `maxSize`, `timeRate`,
//! `maxFiles`, `oldFile`. Deserializable from JSON; scalar-or-string fields
//! accept both spellings (`maxSize: 1048576` or `maxSize: "1mb"`,
//! `timeRate: "daily"` or `timeRate: 60000`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use rotolog_sink::{FilePattern, Pruner};

use crate::error::RotationError;
use crate::policy::{parse_size, Granularity, RotationRule};

/// Archives kept when `maxFiles` is not configured.
pub const DEFAULT_MAX_FILES: usize = 5;

/// Which trigger governs rotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rule {
    Size,
    Time,
}

/// `maxSize`: integer byte count or suffix string (`"10mb"`, `"1mb 512kb"`).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Bytes(u64),
    Text(String),
}

/// `timeRate`: named granularity or raw millisecond interval.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RateSpec {
    Millis(u64),
    Named(String),
}

/// Raw configuration as accepted from callers or JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationConfig {
    pub rule: Rule,
    #[serde(default)]
    pub max_size: Option<SizeSpec>,
    #[serde(default)]
    pub time_rate: Option<RateSpec>,
    #[serde(default)]
    pub max_files: Option<usize>,
    #[serde(default)]
    pub old_file: Option<String>,
}

/// Validated rotation wiring for one live file.
#[derive(Debug, Clone)]
pub struct BuiltRotation {
    pub rule: RotationRule,
    pub max_files: usize,
    /// Base path archives are numbered against (size rule).
    pub archive_base: PathBuf,
    /// Retention pruner (time rule only; size retention happens in the
    /// renumbering walk itself).
    pub pruner: Option<Pruner>,
}

impl RotationConfig {
    pub fn size(max_size: impl Into<String>) -> Self {
        Self {
            rule: Rule::Size,
            max_size: Some(SizeSpec::Text(max_size.into())),
            time_rate: None,
            max_files: None,
            old_file: None,
        }
    }

    pub fn time(time_rate: impl Into<String>) -> Self {
        Self {
            rule: Rule::Time,
            max_size: None,
            time_rate: Some(RateSpec::Named(time_rate.into())),
            max_files: None,
            old_file: None,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = Some(max_files);
        self
    }

    pub fn with_old_file(mut self, pattern: impl Into<String>) -> Self {
        self.old_file = Some(pattern.into());
        self
    }

    /// Validate against the live file path and build the rotation wiring.
    ///
    /// # Errors
    /// [`RotationError::Config`] on missing or contradictory options;
    /// pattern compilation errors surface as [`RotationError::Sink`].
    pub fn build(&self, live: &Path) -> Result<BuiltRotation, RotationError> {
        let live_str = live
            .to_str()
            .ok_or_else(|| RotationError::Config(format!("non-UTF-8 path: {}", live.display())))?;
        let max_files = self.max_files.unwrap_or(DEFAULT_MAX_FILES);

        match self.rule {
            Rule::Size => {
                let max_bytes = match &self.max_size {
                    Some(SizeSpec::Bytes(n)) => *n,
                    Some(SizeSpec::Text(text)) => parse_size(text)?,
                    None => {
                        return Err(RotationError::Config(
                            "rule=size requires maxSize".to_string(),
                        ))
                    }
                };
                if max_bytes == 0 {
                    return Err(RotationError::Config("maxSize must be positive".to_string()));
                }

                let raw = self
                    .old_file
                    .clone()
                    .unwrap_or_else(|| format!("{live_str}.%i"));
                let pattern = FilePattern::compile(&raw, "")?;
                if !pattern.has_index() || pattern.has_date() {
                    return Err(RotationError::Config(format!(
                        "size-rule oldFile '{raw}' must contain %i and no %d"
                    )));
                }
                // Numbered archives share a base name; the pattern must be
                // the base followed by the rank.
                let rendered = pattern.render_indexed(1)?;
                let archive_base = rendered
                    .to_str()
                    .and_then(|s| s.strip_suffix(".1"))
                    .map(PathBuf::from)
                    .ok_or_else(|| {
                        RotationError::Config(format!(
                            "size-rule oldFile '{raw}' must end with .%i"
                        ))
                    })?;

                Ok(BuiltRotation {
                    rule: RotationRule::Size { max_bytes },
                    max_files,
                    archive_base,
                    pruner: None,
                })
            }
            Rule::Time => {
                let granularity = match &self.time_rate {
                    Some(RateSpec::Named(name)) => {
                        Granularity::parse_named(name).ok_or_else(|| {
                            RotationError::Config(format!("unknown timeRate '{name}'"))
                        })?
                    }
                    Some(RateSpec::Millis(0)) => {
                        return Err(RotationError::Config(
                            "timeRate interval must be positive".to_string(),
                        ))
                    }
                    Some(RateSpec::Millis(ms)) => {
                        Granularity::Interval(Duration::from_millis(*ms))
                    }
                    None => {
                        return Err(RotationError::Config(
                            "rule=time requires timeRate".to_string(),
                        ))
                    }
                };

                let raw = self
                    .old_file
                    .clone()
                    .unwrap_or_else(|| format!("{live_str}-%d"));
                let pattern = FilePattern::compile(&raw, granularity.default_date_format())?;
                if !pattern.has_date() || pattern.has_index() {
                    return Err(RotationError::Config(format!(
                        "time-rule oldFile '{raw}' must contain %d and no %i"
                    )));
                }

                let pruner = Pruner::new(pattern.clone(), max_files);
                Ok(BuiltRotation {
                    rule: RotationRule::Time { granularity, pattern },
                    max_files,
                    archive_base: live.to_path_buf(),
                    pruner: Some(pruner),
                })
            }
        }
    }
}
