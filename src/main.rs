use clap::Parser;
use partner_etl::utils::error::ErrorSeverity;
use partner_etl::utils::{logger, validation::Validate};
use partner_etl::{CliConfig, ConfigProvider, LocalEtlEngine, RunOutcome, TomlConfig};
use tokio_util::sync::CancellationToken;

const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() {
    let cli = CliConfig::parse();

    // 初始化日誌
    if cli.log_json {
        logger::init_json_logger(cli.verbose);
    } else {
        logger::init_cli_logger(cli.verbose);
    }

    tracing::info!("Starting partner-etl CLI");

    let exit_code = match &cli.config {
        Some(path) => {
            tracing::info!("📁 Loading configuration from: {}", path);
            match TomlConfig::from_file(path) {
                Ok(mut config) => {
                    // 命令列的 --force-refresh 優先
                    if cli.force_refresh {
                        config.cache.force_refresh = true;
                    }
                    if cli.verbose {
                        tracing::debug!("TOML config: {:?}", config);
                    }
                    run(&config).await
                }
                Err(e) => {
                    eprintln!("❌ Failed to load config file '{}': {}", path, e);
                    eprintln!("💡 {}", e.recovery_suggestion());
                    1
                }
            }
        }
        None => {
            if cli.verbose {
                tracing::debug!("CLI config: {:?}", cli);
            }
            run(&cli).await
        }
    };

    std::process::exit(exit_code);
}

async fn run<C: ConfigProvider + Validate>(config: &C) -> i32 {
    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        return 1;
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("⏹️ Interrupt received, finishing in-flight requests");
            signal_token.cancel();
        }
    });

    let engine = match LocalEtlEngine::from_config(config, cancel).await {
        Ok(engine) => engine,
        Err(e) => return report_error(&e),
    };

    match engine.run().await {
        Ok(report) => {
            println!(
                "✅ {} partner(s) from {} location(s) written to {}",
                report.records.len(),
                report.stats.keys,
                config.output_path()
            );
            match report.outcome() {
                RunOutcome::Cancelled => {
                    eprintln!(
                        "⏹️ Cancelled: {} location(s) unresolved, see {}",
                        report.not_attempted.len() + report.failures.len(),
                        config.failures_path()
                    );
                    EXIT_CANCELLED
                }
                RunOutcome::PartialFailure => {
                    eprintln!(
                        "⚠️ {} location(s) failed, see {}",
                        report.failures.len(),
                        config.failures_path()
                    );
                    0
                }
                _ => 0,
            }
        }
        Err(e) => report_error(&e),
    }
}

fn report_error(e: &partner_etl::EtlError) -> i32 {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ ETL process failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    }
}
