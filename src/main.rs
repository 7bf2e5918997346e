use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobproc_config::{AppConfig, LogFormat};

mod app;
mod shutdown;

use app::Application;
use shutdown::ShutdownManager;

fn cli() -> Command {
    Command::new("jobproc")
        .version(env!("CARGO_PKG_VERSION"))
        .about("插件化作业执行引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/jobproc.toml、jobproc.toml")
                .global(true),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .global(true),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"])
                .global(true),
        )
        .subcommand(Command::new("run").about("启动作业引擎（默认）"))
        .subcommand(
            Command::new("register")
                .about("登记处理器插件包")
                .arg(Arg::new("name").required(true).help("处理器名称"))
                .arg(Arg::new("package").required(true).help("插件包路径")),
        )
        .subcommand(Command::new("processors").about("列出已登记的处理器"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).context("加载配置失败")?;
    apply_cli_overrides(&mut config, &matches);

    init_logging(&config.observability.log_level, config.observability.log_format)?;
    if let Some(addr) = &config.observability.metrics_listen {
        init_metrics(addr)?;
    }

    match matches.subcommand() {
        Some(("register", sub)) => register_processor(config, sub).await,
        Some(("processors", _)) => list_processors(config).await,
        _ => serve(config).await,
    }
}

fn apply_cli_overrides(config: &mut AppConfig, matches: &ArgMatches) {
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };
    }
}

/// 初始化日志系统，RUST_LOG 优先于配置的级别
fn init_logging(log_level: &str, log_format: LogFormat) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
    }

    Ok(())
}

fn init_metrics(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("无效的指标监听地址: {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("启动Prometheus导出器失败")?;
    info!(listen = %addr, "Prometheus指标导出已启用");
    Ok(())
}

async fn serve(config: AppConfig) -> Result<()> {
    info!("启动作业引擎");
    let shutdown_timeout = Duration::from_secs(config.engine.shutdown_timeout_seconds + 5);

    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe().await;
        let app = Arc::clone(&app);
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await?;
    let status = app.admin().engine_status();
    info!(
        active_jobs = ?status.active_job_ids,
        "收到关闭信号，开始优雅关闭..."
    );
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(shutdown_timeout, app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    info!("作业引擎已退出");
    Ok(())
}

async fn register_processor(config: AppConfig, matches: &ArgMatches) -> Result<()> {
    let name = matches
        .get_one::<String>("name")
        .context("缺少处理器名称")?;
    let package = matches
        .get_one::<String>("package")
        .context("缺少插件包路径")?;

    let app = Application::new(config).await?;
    let definition = app
        .registry()
        .register_package(name, package)
        .await
        .with_context(|| format!("登记处理器失败: {name}"))?;

    println!(
        "{}\t{}\t{}",
        definition.processor_name,
        definition.package_path,
        definition.checksum.unwrap_or_default()
    );
    app.stop().await;
    Ok(())
}

async fn list_processors(config: AppConfig) -> Result<()> {
    let app = Application::new(config).await?;
    for definition in app.registry().list().await.context("查询处理器失败")? {
        println!(
            "{}\t{}\t{}\t{}",
            definition.processor_name,
            definition.package_path,
            if definition.active { "active" } else { "inactive" },
            definition.checksum.unwrap_or_default()
        );
    }
    app.stop().await;
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("安装SIGTERM信号处理器失败")?;
        tokio::select! {
            result = signal::ctrl_c() => {
                result.context("安装Ctrl+C信号处理器失败")?;
                info!("收到Ctrl+C信号");
            }
            _ = terminate.recv() => info!("收到SIGTERM信号"),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.context("安装Ctrl+C信号处理器失败")?;
        info!("收到Ctrl+C信号");
    }

    Ok(())
}
