use anyhow::Context;
use clap::Parser;
use cmdstan_convert::config::toml_config::TomlConfig;
use cmdstan_convert::core::PredictiveSource;
use cmdstan_convert::utils::{logger, validation::Validate};
use cmdstan_convert::{CmdStanPipeline, ConversionEngine, ConversionJob, LocalStorage};
use std::path::Path;

#[derive(Parser)]
#[command(name = "toml-convert")]
#[command(about = "Convert CmdStan output using a TOML job file")]
struct Args {
    /// Path to TOML job file
    #[arg(short, long, default_value = "convert.toml")]
    config: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Override monitoring setting from config
    #[arg(long)]
    monitor: Option<bool>,

    /// Override save_warmup from config
    #[arg(long)]
    save_warmup: Option<bool>,

    /// Dry run - show what would be converted without reading any draws
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // 載入 TOML 配置
    let mut config = match TomlConfig::from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load config file '{}': {}", args.config, e);
            eprintln!("💡 Make sure the file exists and is valid TOML format");
            std::process::exit(1);
        }
    };

    // 初始化日誌
    if config.json_logs() {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }
    tracing::info!("📁 Loaded job file: {}", args.config);

    // 應用命令列覆蓋設定
    if let Some(save_warmup) = args.save_warmup {
        config.inputs.save_warmup = Some(save_warmup);
        tracing::info!("🔧 save_warmup overridden to: {}", save_warmup);
    }

    let job = match config
        .validate()
        .and_then(|_| config.to_job())
        .and_then(|job| job.validate().map(|_| job))
    {
        Ok(job) => job,
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            std::process::exit(e.severity().exit_code());
        }
    };

    tracing::info!("✅ Configuration loaded and validated successfully");
    display_config_summary(&config, &job, &args);

    if args.dry_run {
        tracing::info!("🔍 DRY RUN MODE - No conversion will occur");
        perform_dry_run(&job).with_context(|| format!("dry run of '{}' failed", args.config))?;
        return Ok(());
    }

    let monitor_enabled = args.monitor.unwrap_or_else(|| config.monitoring_enabled());
    if monitor_enabled {
        tracing::info!("🔍 System monitoring enabled");
    }

    let storage = LocalStorage::new(".");
    let pipeline = CmdStanPipeline::new(storage, job);
    let engine = ConversionEngine::new_with_monitoring(pipeline, monitor_enabled);

    match engine.run().await {
        Ok(output_path) => {
            tracing::info!("✅ Conversion completed successfully!");
            println!("✅ Conversion completed successfully!");
            println!("📁 Output saved to: {}", output_path);
        }
        Err(e) => {
            tracing::error!(
                "❌ Conversion failed: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 {}", e.recovery_suggestion());
            std::process::exit(e.severity().exit_code());
        }
    }

    Ok(())
}

fn display_config_summary(config: &TomlConfig, job: &ConversionJob, args: &Args) {
    println!("📋 Job Summary:");
    println!("  Job: {}", config.job.name);
    if let Some(description) = &config.job.description {
        println!("  Description: {}", description);
    }
    println!("  Output files: {}", job.output.len());
    println!("  Save warmup: {}", job.save_warmup);
    println!("  Output: {}", config.output_path());
    println!("  Formats: {}", job.output_formats.join(", "));
    if let Some(archive) = &job.archive_name {
        println!("  Compression: {} (ZIP)", archive);
    }
    if args.dry_run {
        println!("  🔍 DRY RUN MODE ENABLED");
    }
    println!();
}

fn describe_files(label: &str, files: &[String]) -> anyhow::Result<()> {
    if files.is_empty() {
        return Ok(());
    }
    println!("{}:", label);
    for file in files {
        let size = std::fs::metadata(file)
            .with_context(|| format!("cannot access {} file '{}'", label, file))?
            .len();
        println!("  {} ({} bytes)", file, size);
    }
    Ok(())
}

fn perform_dry_run(job: &ConversionJob) -> anyhow::Result<()> {
    println!("🔍 Dry Run Analysis:");
    println!();

    describe_files("📄 Sampler output", &job.output)?;
    describe_files("📄 Prior output", &job.prior)?;

    match &job.posterior_predictive {
        Some(PredictiveSource::Files(files)) => {
            describe_files("📄 Posterior predictive output", files)?
        }
        Some(PredictiveSource::Variables(vars)) => {
            println!("🔮 Posterior predictive variables: {}", vars.join(", "))
        }
        None => {}
    }

    if let Some(path) = &job.observed_data {
        describe_files("📊 Observed data", std::slice::from_ref(path))?;
        if let Some(vars) = &job.observed_data_var {
            println!("  Keeping: {}", vars.join(", "));
        }
    }
    if let Some(ll) = &job.log_likelihood {
        println!("📈 Log likelihood variable: {}", ll);
    }

    if !job.dims.is_empty() {
        println!();
        println!("🏷️ Dimensions:");
        for (var, dims) in &job.dims {
            println!("  {} -> [{}]", var, dims.join(", "));
        }
    }

    println!();
    println!("💾 Output Configuration:");
    println!("  Path: {}", Path::new(&job.output_path).display());
    println!("  Formats: {}", job.output_formats.join(", "));

    println!();
    println!("✅ Dry run analysis complete. Use --verbose for more details during actual run.");
    Ok(())
}
