//! Relaycast 主程序
//!
//! 默认启动信令中继；`peer` 子命令运行 H.264 DataChannel 演示端

mod cli;
mod error;
mod http_trace;
mod observability;
mod peer;

use clap::Parser;
use http_trace::http_trace_layer;
use observability::{init_console_logging, init_observability};
use relaycast_common::config::{RelaycastConfig, is_warning};
use signaling::{SignalingServer, create_signaling_router};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{error, info};

macro_rules! bootstrap_info {
    ($($arg:tt)*) => {
        println!($($arg)*);
    };
}

macro_rules! bootstrap_error {
    ($($arg:tt)*) => {
        eprintln!($($arg)*);
    };
}

use cli::{Cli, Commands};
use error::{Error, Result};

/// Application launcher utilities
struct ApplicationLauncher;

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Some(Commands::Test { config_file }) => {
            let config_path =
                ApplicationLauncher::find_config_file(config_file.as_ref().unwrap_or(&cli.config))?;
            ApplicationLauncher::test_config_file(&config_path)
        }
        Some(Commands::Peer(args)) => {
            let config = ApplicationLauncher::load_peer_config(&cli.config)?;
            init_console_logging(&config);

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            runtime.block_on(peer::run_peer(args.clone(), config.media))
        }
        None => {
            let config_path = ApplicationLauncher::find_config_file(&cli.config)?;

            // Create Tokio runtime（before running the application）
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;

            // Run the asynchronous application
            runtime.block_on(ApplicationLauncher::run_application(&config_path))
        }
    }
}

impl ApplicationLauncher {
    /// Find config file with fallback locations
    fn find_config_file(provided_path: &PathBuf) -> Result<PathBuf> {
        // If the provided path is not the default "config.toml", check if it exists
        if provided_path != Path::new("config.toml") {
            if provided_path.exists() {
                bootstrap_info!("Using provided config file: {:?}", provided_path);
                return Ok(provided_path.clone());
            } else {
                bootstrap_error!("Provided config file not found: {:?}", provided_path);
                return Err(Error::custom(format!(
                    "Config file not found: {provided_path:?}"
                )));
            }
        }

        let fallback_paths = [
            // 1. Current working directory
            PathBuf::from("config.toml"),
            // 2. System config directory
            PathBuf::from("/etc/relaycast/config.toml"),
        ];

        bootstrap_info!("Searching for config file in default locations...");

        for path in &fallback_paths {
            if path.exists() {
                bootstrap_info!("Found config file: {:?}", path);
                return Ok(path.clone());
            } else {
                bootstrap_info!("Config not found at: {:?}", path);
            }
        }

        bootstrap_error!("No configuration file found!");
        bootstrap_error!("Please create a config file in one of these locations:");
        for (i, path) in fallback_paths.iter().enumerate() {
            bootstrap_error!("  {}. {:?}", i + 1, path);
        }
        bootstrap_error!("Or specify a custom path with: relaycast --config <path>");

        Err(Error::custom(
            "No configuration file found. Please create one or specify path with --config",
        ))
    }

    /// peer 模式下配置文件可选，找不到时使用默认值
    fn load_peer_config(provided_path: &Path) -> Result<RelaycastConfig> {
        let config = if provided_path.exists() {
            RelaycastConfig::from_file(provided_path)?
        } else if provided_path != Path::new("config.toml") {
            return Err(Error::custom(format!(
                "Config file not found: {provided_path:?}"
            )));
        } else {
            RelaycastConfig::default()
        };

        if let Err(errors) = config.media.validate() {
            let fatal: Vec<_> = errors.iter().filter(|e| !is_warning(e)).collect();
            for entry in &errors {
                bootstrap_error!("  - {}", entry);
            }
            if !fatal.is_empty() {
                return Err(Error::service_validation("[media] 配置无效"));
            }
        }
        Ok(config)
    }

    /// 测试配置文件是否有效
    fn test_config_file(config_path: &Path) -> Result<()> {
        // Initialize basic logging for test command
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::INFO)
            .init();

        match RelaycastConfig::from_file(config_path) {
            Ok(config) => {
                info!("✅ 配置文件解析成功: {:?}", config_path);

                match config.validate() {
                    Ok(()) => {
                        info!("✅ 配置验证通过");
                    }
                    Err(errors) => {
                        error!("❌ 配置验证发现问题:");
                        for (i, err) in errors.iter().enumerate() {
                            if is_warning(err) {
                                info!("  {}. ⚠️  {}", i + 1, err);
                            } else {
                                error!("  {}. ❌ {}", i + 1, err);
                            }
                        }
                        if errors.iter().any(|e| !is_warning(e)) {
                            return Err(Error::service_validation("配置验证失败".to_string()));
                        }
                    }
                }

                info!("✅ 完整配置验证通过");
                Ok(())
            }
            Err(e) => {
                error!("❌ 配置文件解析失败: {}", e);
                Err(Error::service_validation(format!("配置解析失败: {e}")))
            }
        }
    }

    /// 运行应用程序的主入口
    async fn run_application(config_path: &Path) -> Result<()> {
        bootstrap_info!("📄 加载配置文件: {:?}", config_path);

        let config = match RelaycastConfig::from_file(config_path) {
            Ok(config) => {
                bootstrap_info!("✅ 配置加载成功");

                if let Err(errors) = config.validate() {
                    bootstrap_error!("❌ 配置验证发现问题:");
                    let mut has_critical_errors = false;
                    for (i, err) in errors.iter().enumerate() {
                        if is_warning(err) {
                            bootstrap_info!("  {}. ⚠️  {}", i + 1, err);
                        } else {
                            bootstrap_error!("  {}. ❌ {}", i + 1, err);
                            has_critical_errors = true;
                        }
                    }
                    if has_critical_errors {
                        return Err(Error::custom("配置验证失败，请修复上述错误".to_string()));
                    }
                }

                config
            }
            Err(e) => {
                bootstrap_error!("❌ 配置加载失败: {}", e);
                return Err(Error::custom(format!("配置加载失败: {e}")));
            }
        };

        // 初始化日志系统
        let _observability_guard = init_observability(&config)?;

        Self::run_relay(config).await
    }

    /// 启动信令中继并阻塞到收到关闭信号
    async fn run_relay(config: RelaycastConfig) -> Result<()> {
        info!("🚀 启动信令中继: {} ({})", config.name, config.env);

        let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(4);
        setup_ctrl_c_handler(shutdown_tx.clone()).await;

        let server = match SignalingServer::start(&config.signaling) {
            Ok(server) => Arc::new(server),
            Err(e) => {
                error!("❌ 信令服务器启动失败: {}", e);
                return Err(e.into());
            }
        };

        let app = create_signaling_router(server.clone(), &config.signaling.ws_path)?
            .layer(http_trace_layer());

        let bind_addr = config.bind.addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|e| {
                Error::service_startup(format!("Failed to bind to address '{bind_addr}': {e}"))
            })?;
        let local_addr = listener.local_addr()?;

        Self::display_service_info(&config, local_addr);

        let mut shutdown_rx = shutdown_tx.subscribe();
        let serve_result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("HTTP server received shutdown signal");
        })
        .await;

        // 无论 HTTP 服务因何退出，都要排空工作线程池
        server.shutdown().await;

        if let Err(e) = serve_result {
            error!("HTTP server error: {}", e);
            return Err(e.into());
        }

        info!("🛑 信令中继已安全关闭");
        Ok(())
    }

    /// 显示服务信息
    fn display_service_info(config: &RelaycastConfig, local_addr: SocketAddr) {
        info!("✅ 所有服务已启动");
        info!("📡 HTTP 服务器监听在: http://{}", local_addr);
        info!("🔧 可用的端点:");
        info!("  - ws://{}{}", local_addr, config.signaling.ws_path);
        info!("  - http://{}/health", local_addr);
    }
}

/// 设置Ctrl-C信号处理程序
async fn setup_ctrl_c_handler(shutdown_tx: tokio::sync::broadcast::Sender<()>) {
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("无法监听Ctrl-C信号: {}", e);
            return;
        }
        info!("收到Ctrl-C信号，开始优雅关闭...");
        let _ = shutdown_tx.send(());
    });
}
