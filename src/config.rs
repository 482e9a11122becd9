use std::path::Path;

use log::{debug, warn};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{CIPulseError, Result};

/// Step names that usually only do work when a dependency cache missed.
const DEFAULT_CACHE_STEP_PATTERNS: [&str; 8] = [
    r"install (project )?dependencies",
    r"\bnpm (ci|install)\b",
    r"\byarn install\b",
    r"\bpnpm install\b",
    r"\bpip install\b",
    r"\bcargo fetch\b",
    r"\bbundle install\b",
    r"\bgo mod download\b",
];

/// Regression thresholds for the trend detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Absolute percentage points.
    pub warning_success_drop_pts: f64,
    pub critical_success_drop_pts: f64,
    /// Percent growth of the p90 duration.
    pub warning_p90_growth_pct: f64,
    pub critical_p90_growth_pct: f64,
    /// Both windows need at least this many completed runs.
    pub min_samples: usize,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            warning_success_drop_pts: 5.0,
            critical_success_drop_pts: 15.0,
            warning_p90_growth_pct: 30.0,
            critical_p90_growth_pct: 75.0,
            min_samples: 5,
        }
    }
}

impl Thresholds {
    pub fn validate(&self) -> Result<()> {
        if self.min_samples == 0 {
            return Err(CIPulseError::Config(
                "minimum sample count must be at least 1".to_string(),
            ));
        }

        let limits = [
            ("warning success drop", self.warning_success_drop_pts),
            ("critical success drop", self.critical_success_drop_pts),
            ("warning p90 growth", self.warning_p90_growth_pct),
            ("critical p90 growth", self.critical_p90_growth_pct),
        ];
        if let Some((name, value)) = limits
            .iter()
            .find(|(_, value)| !value.is_finite() || *value < 0.0)
        {
            return Err(CIPulseError::Config(format!(
                "{name} threshold must be a non-negative number, got {value}"
            )));
        }

        if self.warning_success_drop_pts > self.critical_success_drop_pts
            || self.warning_p90_growth_pct > self.critical_p90_growth_pct
        {
            return Err(CIPulseError::Config(
                "warning thresholds must not exceed critical thresholds".to_string(),
            ));
        }

        Ok(())
    }
}

/// Settings shared by every stage of one analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub thresholds: Thresholds,
    pub concurrency: usize,
    pub include_live: bool,
    pub cache_steps: CacheStepRegistry,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            concurrency: 4,
            include_live: false,
            cache_steps: CacheStepRegistry::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(CIPulseError::Config(
                "concurrency must be at least 1".to_string(),
            ));
        }
        self.thresholds.validate()
    }
}

/// Case-insensitive step-name patterns identifying cache-guarded steps.
#[derive(Debug, Clone)]
pub struct CacheStepRegistry {
    patterns: Vec<Regex>,
}

impl Default for CacheStepRegistry {
    fn default() -> Self {
        let patterns = DEFAULT_CACHE_STEP_PATTERNS
            .iter()
            .filter_map(|p| compile_pattern(p).ok())
            .collect();
        Self { patterns }
    }
}

impl CacheStepRegistry {
    pub fn from_patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| compile_pattern(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Parse a pattern list: one expression per line, `#` starts a comment line.
    pub fn parse(contents: &str) -> Result<Self> {
        Self::from_patterns(
            contents
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let registry = Self::parse(&contents)?;
        if registry.is_empty() {
            warn!(
                "{} lists no cache step patterns, cache hit ratios will be absent",
                path.display()
            );
        }
        debug!(
            "Loaded {} cache step patterns from {}",
            registry.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn matches(&self, step_name: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(step_name))
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| CIPulseError::Config(format!("Invalid cache step pattern '{pattern}': {e}")))
}
