use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use glob::glob;
use serde::{Deserialize, Serialize};

use crate::frame::SourceFormat;
use crate::pipeline::OutputSpec;
use crate::sinks::SinkSpec;

#[derive(Debug, Deserialize)]
pub struct Job {
    pub version: u32,
    pub inputs: Vec<InputSpec>,
    pub source: SourceSpec,
    #[serde(default)]
    pub frames: Option<usize>,
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkSpec>,
    pub output: OutputSpec,
}

fn default_sinks() -> Vec<SinkSpec> {
    vec![SinkSpec {
        sink: "raw".to_string(),
        params: None,
    }]
}

impl Job {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read job file: {}", path.display()))?;
        let job: Job = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse job YAML: {}", path.display()))?;
        Ok(job)
    }

    pub fn expand_inputs(&self) -> Result<Vec<PathBuf>> {
        let mut resolved = Vec::new();
        for input in &self.inputs {
            let matches = glob(&input.path)
                .with_context(|| format!("Invalid glob pattern: {}", input.path))?;
            let mut found = false;
            for entry in matches {
                let path = entry?;
                if path.is_file() {
                    resolved.push(path);
                    found = true;
                }
            }
            if !found {
                anyhow::bail!("No inputs matched pattern: {}", input.path);
            }
        }
        Ok(resolved)
    }
}

#[derive(Debug, Deserialize)]
pub struct InputSpec {
    pub path: String,
}

/// Geometry and layout of the raw input streams.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub format: SourceFormat,
    pub resolution: Resolution,
    #[serde(default)]
    pub line_length: Option<usize>,
}

/// Frame dimensions written as `WIDTHxHEIGHT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: usize,
    pub height: usize,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (width, height) = value
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("Invalid resolution '{value}', expected WIDTHxHEIGHT"))?;
        let parse = |part: &str| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("Invalid resolution '{value}', expected WIDTHxHEIGHT"))
        };
        let resolution = Resolution {
            width: parse(width)?,
            height: parse(height)?,
        };
        if resolution.width == 0 || resolution.height == 0 {
            return Err(format!("Resolution '{value}' must be non-zero"));
        }
        Ok(resolution)
    }
}

impl TryFrom<String> for Resolution {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Resolution> for String {
    fn from(value: Resolution) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
