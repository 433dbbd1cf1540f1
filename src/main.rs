/// `bluroom` 命令行入口
///
/// - `train`：从语料目录训练并导出模型产物
/// - `predict`：对一个或多个记录文件推理
/// - `judge`：批量判定样本目录并导出 CSV
/// - `scan`：采集 BLE 信标并写出记录文件

use bluroom::artifacts::JsonArtifactStore;
use bluroom::config::{ServingConfig, TaskKind, TrainerConfig};
use bluroom::judgement::Judge;
use bluroom::scanner::{BeaconScanner, collect_sweeps, save_records};
use bluroom::service::{EstimationService, SharedModel};
use bluroom::training::Trainer;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bluroom", version, about = "BLE/Wi-Fi 指纹房间估计", long_about = None)]
struct Args {
    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 训练并导出模型产物
    Train {
        /// JSON 配置文件
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// 覆盖语料根目录
        #[arg(long, value_name = "DIR")]
        corpus: Option<PathBuf>,
        /// 覆盖产物输出路径
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        /// 训练回归模型（目录名为百分比）
        #[arg(long, default_value_t = false)]
        regression: bool,
        /// 关闭网格搜索
        #[arg(long, default_value_t = false)]
        no_selection: bool,
    },
    /// 对记录文件推理（多个文件按给定顺序拼接）
    Predict {
        #[arg(short, long, value_name = "FILE")]
        model: PathBuf,
        #[arg(required = true, value_name = "FILE")]
        inputs: Vec<PathBuf>,
        /// 报告该类别的概率
        #[arg(long)]
        positive_class: Option<String>,
    },
    /// 批量判定样本目录
    Judge {
        #[arg(short, long, value_name = "FILE")]
        model: PathBuf,
        #[arg(short, long, value_name = "DIR")]
        samples: PathBuf,
        /// 结果 CSV；不指定时输出到标准输出
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
        #[arg(long, default_value_t = 0.8)]
        threshold: f64,
        #[arg(long, default_value = r"\.csv$")]
        pattern: String,
    },
    /// 采集 BLE 信标
    Scan {
        /// 设备名称过滤正则
        #[arg(long, default_value = "^RFstar")]
        pattern: String,
        #[arg(long, default_value_t = 20)]
        seconds: u64,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // RUST_LOG 优先于 --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!("bluroom v{}", bluroom::VERSION);

    let result = match args.command {
        Command::Train {
            config,
            corpus,
            output,
            regression,
            no_selection,
        } => run_train(config, corpus, output, regression, no_selection),
        Command::Predict {
            model,
            inputs,
            positive_class,
        } => run_predict(model, inputs, positive_class),
        Command::Judge {
            model,
            samples,
            output,
            threshold,
            pattern,
        } => run_judge(model, samples, output, threshold, pattern),
        Command::Scan {
            pattern,
            seconds,
            interval_ms,
            output,
        } => run_scan(pattern, seconds, interval_ms, output).await,
    };

    if let Err(e) = result {
        error!("{e}");
        std::process::exit(1);
    }
}

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn run_train(
    config: Option<PathBuf>,
    corpus: Option<PathBuf>,
    output: Option<PathBuf>,
    regression: bool,
    no_selection: bool,
) -> CliResult {
    let mut cfg = match config.as_deref() {
        Some(path) => {
            info!("读取配置 {}", path.display());
            TrainerConfig::from_json(path)?
        }
        None => TrainerConfig::default(),
    }
    .with_env_overrides();

    if let Some(dir) = corpus {
        cfg.corpus_root = dir;
    }
    if let Some(path) = output {
        cfg.output_path = path;
    }
    if regression {
        cfg.task = TaskKind::Regression;
    }
    if no_selection {
        cfg.model_selection = false;
    }

    info!("  语料目录 : {}", cfg.corpus_root.display());
    info!("  产物路径 : {}", cfg.output_path.display());
    info!("  任务类型 : {}", cfg.task);
    info!("  模型选择 : {}", cfg.model_selection);

    let store = JsonArtifactStore::new(cfg.output_path.clone());
    let trainer = Trainer::new(cfg)?;
    let outcome = trainer.run(&store)?;

    println!("{}", outcome.report);
    info!(
        "训练完成：训练集 {} 个，留出集 {} 个，选中 {}",
        outcome.train_samples, outcome.test_samples, outcome.artifacts.manifest.selected
    );
    Ok(())
}

fn run_predict(model: PathBuf, inputs: Vec<PathBuf>, positive_class: Option<String>) -> CliResult {
    let serving = ServingConfig {
        artifact_path: model,
        positive_class,
        ..ServingConfig::default()
    };
    serving.validate()?;

    let shared = SharedModel::load(&JsonArtifactStore::new(serving.artifact_path.clone()))?;
    let service = EstimationService::new(Arc::new(shared), serving);

    let mut contents = Vec::with_capacity(inputs.len());
    for path in &inputs {
        contents.push(std::fs::read(path)?);
    }
    let batches: Vec<&[u8]> = contents.iter().map(|c| c.as_slice()).collect();

    let response = service.estimate(&batches)?;
    println!("{}", serde_json::to_string(&response)?);
    Ok(())
}

fn run_judge(
    model: PathBuf,
    samples: PathBuf,
    output: Option<PathBuf>,
    threshold: f64,
    pattern: String,
) -> CliResult {
    let serving = ServingConfig {
        artifact_path: model,
        confidence_threshold: threshold,
        ..ServingConfig::default()
    };
    serving.validate()?;

    let shared = SharedModel::load(&JsonArtifactStore::new(serving.artifact_path.clone()))?;
    let model = shared.current();
    let filter = regex::Regex::new(&pattern)?;
    let report = Judge::new(&model, serving.confidence_threshold).judge_dir(&samples, &filter)?;

    match output {
        Some(path) => {
            report.write_csv(std::fs::File::create(&path)?)?;
            info!("判定结果已写出 {}", path.display());
        }
        None => report.write_csv(std::io::stdout())?,
    }
    Ok(())
}

async fn run_scan(pattern: String, seconds: u64, interval_ms: u64, output: PathBuf) -> CliResult {
    let scanner = BeaconScanner::new(&pattern, Duration::from_millis(interval_ms))?;
    let (tx, rx) = tokio::sync::mpsc::channel(64);

    let collector = tokio::spawn(collect_sweeps(rx));
    let sweeps = scanner.capture(Duration::from_secs(seconds), tx).await?;
    let observations = collector.await?;

    save_records(&output, &observations)?;
    info!(
        "采集完成：{} 轮，{} 条观测，已写出 {}",
        sweeps,
        observations.len(),
        output.display()
    );
    Ok(())
}
