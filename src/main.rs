//! BDA Semi-Supervised Learning CLI
//!
//! Runs the dual-classifier training loop end to end on synthetic data and
//! writes starter configuration files.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use bda_ssl::backend::{backend_name, default_device, EvaluationBackend, TrainingBackend};
use bda_ssl::dataset::{
    generate_synthetic, BatchStream, ImageShape, LabeledBatcher, SyntheticConfig,
    UnlabeledBatcher, UnlabeledEvalBatcher,
};
use bda_ssl::model::{BdaConfig, ConvBackbone, ConvDualClassifier, ModelConfig};
use bda_ssl::training::{sgd_optimizer, BdaTrainer, EvalSets, IterationScheduler, LrSchedule};
use bda_ssl::utils::format_duration;
use bda_ssl::utils::logging::{init_logging, LogConfig};
use bda_ssl::utils::metrics::{JsonLinesSink, MetricsSink, NullSink};

/// Dual-classifier semi-supervised training with complementary labels
#[derive(Parser, Debug)]
#[command(name = "bda_ssl")]
#[command(version)]
#[command(about = "Dual-classifier semi-supervised training with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging (debug level, with module paths)
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Plain log output without colors, for non-interactive runs
    #[arg(long, default_value = "false")]
    plain: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train on a synthetic dataset
    Train {
        /// Training configuration (JSON); the debug preset is used when omitted
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Number of classes of the synthetic problem
        #[arg(long, default_value = "4")]
        num_classes: usize,

        /// Override the number of training iterations
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Labeled batch size
        #[arg(short, long, default_value = "8")]
        batch_size: usize,

        /// Unlabeled samples per labeled sample in each step
        #[arg(long, default_value = "2")]
        uratio: usize,

        /// Side length of the synthetic square images
        #[arg(long, default_value = "16")]
        image_size: usize,

        /// Random seed for data and complementary labels
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Root directory for checkpoints
        #[arg(short, long)]
        output_dir: Option<String>,

        /// Resume from a checkpoint directory (e.g. <output>/<name>/latest_model)
        #[arg(long)]
        resume: Option<PathBuf>,

        /// Append metric records to this JSON-lines file
        #[arg(long)]
        metrics: Option<PathBuf>,
    },

    /// Write a configuration file to start from
    InitConfig {
        /// Output path
        #[arg(short, long, default_value = "bda_config.json")]
        output: PathBuf,

        /// Number of classes
        #[arg(long, default_value = "10")]
        num_classes: usize,

        /// Write the short debug preset instead of the full-length defaults
        #[arg(long, default_value = "false")]
        debug: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.plain {
        LogConfig::production()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            config,
            num_classes,
            iterations,
            batch_size,
            uratio,
            image_size,
            seed,
            output_dir,
            resume,
            metrics,
        } => {
            let mut config = match config {
                Some(path) => BdaConfig::load(&path)?,
                None => BdaConfig::debug(num_classes),
            };
            if let Some(iterations) = iterations {
                config.num_train_iter = iterations;
            }
            if let Some(output_dir) = output_dir {
                config.checkpoint_dir = output_dir;
            }
            config.seed = seed;

            cmd_train(
                config,
                TrainArgs {
                    batch_size,
                    uratio,
                    image_size,
                    resume,
                    metrics,
                },
            )?;
        }

        Commands::InitConfig {
            output,
            num_classes,
            debug,
        } => {
            cmd_init_config(&output, num_classes, debug)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 +------------------------------------------------------------+
 |   BDA Semi-Supervised Learning                             |
 |   Dual classifier + complementary labels with Burn + Rust  |
 +------------------------------------------------------------+
  "#
        .green()
    );
}

struct TrainArgs {
    batch_size: usize,
    uratio: usize,
    image_size: usize,
    resume: Option<PathBuf>,
    metrics: Option<PathBuf>,
}

fn cmd_train(config: BdaConfig, args: TrainArgs) -> Result<()> {
    if args.batch_size == 0 || args.uratio == 0 {
        bail!("batch size and uratio must be greater than 0");
    }
    config.validate()?;

    let device = default_device();
    info!("Backend: {}", backend_name());

    let shape = ImageShape::square(1, args.image_size);
    let synthetic = SyntheticConfig {
        num_classes: config.num_classes,
        shape,
        labeled_per_class: args.batch_size,
        unlabeled_per_class: args.batch_size * args.uratio * 4,
        eval_per_class: 32,
        seed: config.seed,
        ..Default::default()
    };
    let splits = generate_synthetic(&synthetic)?;

    println!("{}", "Dataset:".cyan().bold());
    println!("  Labeled:   {}", splits.labeled.len());
    println!("  Unlabeled: {}", splits.unlabeled.len());
    println!("  Eval:      {}", splits.eval.len());
    println!();

    let eval_sets: EvalSets<EvaluationBackend> = EvalSets::new(
        vec![LabeledBatcher::new(shape).batch(splits.eval.iter().collect(), &device)],
        vec![UnlabeledEvalBatcher::new(shape).batch(splits.unlabeled.iter().collect(), &device)],
    );

    let labeled = BatchStream::<TrainingBackend, _, _, _, _>::new(
        splits.labeled,
        LabeledBatcher::new(shape),
        args.batch_size,
        config.seed,
        device.clone(),
    )
    .endless();
    let unlabeled = BatchStream::<TrainingBackend, _, _, _, _>::new(
        splits.unlabeled,
        UnlabeledBatcher::new(shape),
        args.batch_size * args.uratio,
        config.seed.wrapping_add(1),
        device.clone(),
    )
    .endless();

    let model_config = ModelConfig {
        input_channels: shape.channels,
        conv_filters: vec![16, 32],
        feature_dim: 64,
        ..ModelConfig::new(config.num_classes)
    };
    let model = ConvDualClassifier::<TrainingBackend>::new(&model_config, &device)?;
    let optimizer = sgd_optimizer::<TrainingBackend, ConvBackbone<TrainingBackend>>(&config);
    let scheduler = IterationScheduler::new(config.scheduler.clone());

    println!("{}", "Configuration:".cyan().bold());
    println!("  Iterations:     {}", config.num_train_iter);
    println!("  Eval every:     {}", config.num_eval_iter);
    println!("  Scheduler:      {}", config.scheduler.description());
    println!("  EMA momentum:   {}", config.ema_momentum);
    println!("  Use EMA eval:   {}", config.use_momentum_eval);
    println!("  Checkpoints:    {:?}", config.save_path());
    println!();

    if config.process.is_primary() {
        config.save(&config.save_path().join("config.json"))?;
    }

    let mut trainer = BdaTrainer::new(model, optimizer, scheduler, config, device)?;

    if let Some(resume) = &args.resume {
        let report = trainer.load_model(resume)?;
        if !report.is_complete() {
            println!(
                "{} checkpoint fields not restored: {:?}",
                "Warning:".yellow(),
                report.skipped
            );
        }
    }

    let mut sink: Box<dyn MetricsSink> = match &args.metrics {
        Some(path) => Box::new(JsonLinesSink::create(path)?),
        None => Box::new(NullSink),
    };
    let mut sink = sink.as_mut();

    let start = std::time::Instant::now();
    let summary = trainer.fit(labeled, unlabeled, &eval_sets, &mut sink)?;
    let elapsed = start.elapsed().as_secs_f64();

    let final_record = trainer.evaluate(&eval_sets)?;

    println!();
    println!("{}", "Training complete".green().bold());
    println!("  Iterations run:  {}", summary.iterations_run);
    println!("  Evaluations:     {}", summary.evaluations);
    println!("  Duration:        {}", format_duration(elapsed));
    println!(
        "  Best top-1:      {:.2}% at iteration {}",
        summary.best_eval_acc * 100.0,
        summary.best_iteration
    );
    println!("  Final LR:        {:.6}", trainer.scheduler().current_lr());
    println!("  Final metrics:   {}", final_record);

    Ok(())
}

fn cmd_init_config(output: &Path, num_classes: usize, debug: bool) -> Result<()> {
    let config = if debug {
        BdaConfig::debug(num_classes)
    } else {
        BdaConfig {
            num_classes,
            ..Default::default()
        }
    };
    config.validate()?;
    config.save(output)?;

    println!("{} {:?}", "Configuration written to".green(), output);
    Ok(())
}
