//! Logging Module
//!
//! Structured logging via the `tracing` crate, plus the status-line logger
//! used by the training loop.

use std::time::Instant;

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use super::metrics::MetricsRecord;

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: LogLevel,
    /// Whether to include target (module path)
    pub include_target: bool,
    /// Whether to use ANSI colors
    pub ansi_colors: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: true,
        }
    }
}

impl LogConfig {
    /// Verbose config for debugging, with module paths
    pub fn verbose() -> Self {
        Self {
            level: LogLevel::Debug,
            include_target: true,
            ansi_colors: true,
        }
    }

    /// Config for non-interactive runs (no colors)
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            include_target: false,
            ansi_colors: false,
        }
    }
}

/// Log level enum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Convert to tracing Level
    pub fn to_tracing_level(&self) -> Level {
        match self {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }

    /// Parse a level name, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

/// Initialize the global subscriber with the given configuration
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.level.to_tracing_level())
        .with_ansi(config.ansi_colors)
        .with_target(config.include_target)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Emits the one-line status messages of a training run.
///
/// Iteration lines go out every `log_interval` steps, evaluation lines on
/// every evaluation. Both are emitted at `info!`.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    total_iterations: usize,
    log_interval: usize,
    training_start: Instant,
}

impl TrainingLogger {
    pub fn new(total_iterations: usize, log_interval: usize) -> Self {
        Self {
            total_iterations,
            log_interval: log_interval.max(1),
            training_start: Instant::now(),
        }
    }

    /// Whether `iteration` gets a status line
    pub fn should_log(&self, iteration: usize) -> bool {
        iteration % self.log_interval == 0
    }

    pub fn log_iteration(&self, iteration: usize, record: &MetricsRecord) {
        if !self.should_log(iteration) {
            return;
        }

        tracing::info!(
            "iter {}/{} | sup {:.4} | rev {:.4} | ca {:.4} | cd {:.4} | total {:.4} | lr {:.6}",
            iteration,
            self.total_iterations,
            record.get("train/sup_loss").unwrap_or(f64::NAN),
            record.get("train/reverse_loss").unwrap_or(f64::NAN),
            record.get("train/unsup_loss_ca").unwrap_or(f64::NAN),
            record.get("train/unsup_loss_cd").unwrap_or(f64::NAN),
            record.get("train/total_loss").unwrap_or(f64::NAN),
            record.get("lr").unwrap_or(f64::NAN),
        );
    }

    pub fn log_evaluation(
        &self,
        iteration: usize,
        use_momentum_eval: bool,
        record: &MetricsRecord,
        best_eval_acc: f64,
        best_iteration: usize,
    ) {
        tracing::info!(
            "{} iteration, USE_EMA: {}, {}, BEST_EVAL_ACC: {:.4}, at {} iters ({:.1}s elapsed)",
            iteration,
            use_momentum_eval,
            record,
            best_eval_acc,
            best_iteration,
            self.training_start.elapsed().as_secs_f64()
        );
    }

    pub fn log_complete(&self, iterations: usize, best_eval_acc: f64, best_iteration: usize) {
        tracing::info!(
            "Training stopped after {} iterations in {:.1}s | best top-1 {:.2}% at iteration {}",
            iterations,
            self.training_start.elapsed().as_secs_f64(),
            best_eval_acc * 100.0,
            best_iteration
        );
    }
}
