//! Scenario configuration loaded from TOML.
//!
//! Every section is optional; missing fields fall back to the values the
//! classroom demos were written with.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::accumulator::{AccumulatorScenario, Guarding, RaceWindow};
use crate::error::ConfigError;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolkitConfig {
    pub counter: CounterConfig,
    pub bank: BankConfig,
    pub matrix: MatrixConfig,
    pub game: GameConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

/// Plain integer counter shared by a couple of incrementing workers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CounterConfig {
    pub workers: usize,
    pub increments_per_worker: u32,
    pub trials: usize,
    pub race_window_micros: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            increments_per_worker: 10_000,
            trials: 5,
            race_window_micros: 0,
        }
    }
}

impl CounterConfig {
    pub fn race_window(&self) -> RaceWindow {
        RaceWindow::from_micros(self.race_window_micros)
    }
}

/// Bank balance in cents, deposited into by several customers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BankConfig {
    pub customers: usize,
    pub deposits_per_customer: u32,
    pub deposit_cents: i64,
    pub opening_balance_cents: i64,
    pub trials: usize,
    pub race_window_micros: u64,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            customers: 5,
            deposits_per_customer: 10,
            deposit_cents: 5_000,
            opening_balance_cents: 100_000,
            trials: 1,
            race_window_micros: 1_000,
        }
    }
}

impl BankConfig {
    pub fn race_window(&self) -> RaceWindow {
        RaceWindow::from_micros(self.race_window_micros)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatrixConfig {
    pub size: usize,
    pub workers: usize,
    /// One worker per logical CPU, ignoring `workers`.
    pub auto_workers: bool,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            size: 4,
            workers: 2,
            auto_workers: false,
        }
    }
}

impl MatrixConfig {
    pub fn effective_workers(&self) -> usize {
        if self.auto_workers {
            num_cpus::get()
        } else {
            self.workers
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GameConfig {
    pub cycles: u32,
    pub producer_interval_ms: u64,
    pub renderer_interval_ms: u64,
    pub min_coordinate: i32,
    pub max_coordinate: i32,
    pub max_step: i32,
    pub seed: Option<u64>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            cycles: 20,
            producer_interval_ms: 100,
            renderer_interval_ms: 150,
            min_coordinate: 0,
            max_coordinate: 100,
            max_step: 5,
            seed: None,
        }
    }
}

impl GameConfig {
    pub fn producer_interval(&self) -> Duration {
        Duration::from_millis(self.producer_interval_ms)
    }

    pub fn renderer_interval(&self) -> Duration {
        Duration::from_millis(self.renderer_interval_ms)
    }

    /// Everything that would stop the model from walking, one message each.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.cycles == 0 {
            problems.push("game.cycles must be at least 1".to_string());
        }
        if self.min_coordinate >= self.max_coordinate {
            problems.push(format!(
                "game domain [{}, {}] is empty",
                self.min_coordinate, self.max_coordinate
            ));
        }
        if self.max_step <= 0 {
            problems.push("game.max_step must be positive".to_string());
        }
        problems
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SearchConfig {
    pub record_delay_ms: u64,
    pub targets: Vec<u32>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            record_delay_ms: 50,
            targets: vec![2002, 9999],
        }
    }
}

impl SearchConfig {
    pub fn record_delay(&self) -> Duration {
        Duration::from_millis(self.record_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ToolkitConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|err| ConfigError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses and validates in one step.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ToolkitConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Collects every problem instead of stopping at the first one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if self.counter.workers == 0 {
            problems.push("counter.workers must be at least 1".to_string());
        }
        if self.counter.trials == 0 {
            problems.push("counter.trials must be at least 1".to_string());
        }
        if self.bank.customers == 0 {
            problems.push("bank.customers must be at least 1".to_string());
        }
        if self.bank.trials == 0 {
            problems.push("bank.trials must be at least 1".to_string());
        }
        if self.bank.deposit_cents <= 0 {
            problems.push(format!(
                "bank.deposit_cents must be positive, got {}",
                self.bank.deposit_cents
            ));
        }
        if AccumulatorScenario::counter(&self.counter, Guarding::Guarded)
            .expected_total()
            .is_none()
        {
            problems.push("counter totals overflow a 64-bit value".to_string());
        }
        if AccumulatorScenario::bank(&self.bank, Guarding::Guarded)
            .expected_total()
            .is_none()
        {
            problems.push("bank totals overflow a 64-bit value".to_string());
        }
        if self.matrix.size == 0 {
            problems.push("matrix.size must be at least 1".to_string());
        }
        if !self.matrix.auto_workers && self.matrix.workers == 0 {
            problems.push("matrix.workers must be at least 1".to_string());
        }
        problems.extend(self.game.problems());
        if !LOG_LEVELS.contains(&self.logging.level.to_ascii_lowercase().as_str()) {
            problems.push(format!(
                "logging.level '{}' is not one of {}",
                self.logging.level,
                LOG_LEVELS.join(", ")
            ));
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid { problems })
        }
    }
}
