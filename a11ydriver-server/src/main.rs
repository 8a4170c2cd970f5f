use a11ydriver::config::DEFAULT_IMPLICIT_WAIT_MS;
use a11ydriver::{create_engine, DriverConfig, ProcessLauncher, SessionManager};
use a11ydriver_server::{router, AppState, ExternalHelpers, HelperPrograms};
use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "a11ydriver-server",
    version,
    about = "WebDriver server that drives desktop applications through AT-SPI"
)]
struct Args {
    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1", env = "A11YDRIVER_HOST")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value = "4723", env = "A11YDRIVER_PORT")]
    port: u16,

    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info", env = "A11YDRIVER_LOG_LEVEL")]
    log_level: String,

    /// Implicit wait for sessions that do not set one
    #[arg(long, default_value_t = DEFAULT_IMPLICIT_WAIT_MS, env = "A11YDRIVER_IMPLICIT_WAIT_MS")]
    implicit_wait_ms: u64,

    /// Pause between locate passes
    #[arg(long, default_value = "50", env = "A11YDRIVER_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,

    /// Toolkits whose subtrees appear in page sources
    #[arg(
        long,
        value_delimiter = ',',
        default_value = "Qt,at-spi-registry",
        env = "A11YDRIVER_TOOLKITS"
    )]
    toolkits: Vec<String>,

    /// Delay after focus and press actions
    #[arg(long, default_value = "100", env = "A11YDRIVER_SETTLE_DELAY_MS")]
    settle_delay_ms: u64,

    /// Enable CORS for all origins
    #[arg(long, env = "A11YDRIVER_CORS")]
    cors: bool,

    /// Input synthesis helper
    #[arg(long, default_value_t = HelperPrograms::default().inputsynth, env = "A11YDRIVER_INPUTSYNTH")]
    inputsynth: String,

    /// Screenshot helper
    #[arg(long, default_value_t = HelperPrograms::default().screenshotter, env = "A11YDRIVER_SCREENSHOTTER")]
    screenshotter: String,

    /// Window app-id listing helper
    #[arg(long, default_value_t = HelperPrograms::default().appidlister, env = "A11YDRIVER_APPIDLISTER")]
    appidlister: String,
}

impl Args {
    fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            implicit_wait_ms: self.implicit_wait_ms,
            locate_poll_interval: Duration::from_millis(self.poll_interval_ms),
            toolkit_allow_list: self.toolkits.clone(),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            ..DriverConfig::default()
        }
    }

    fn helper_programs(&self) -> HelperPrograms {
        HelperPrograms {
            inputsynth: self.inputsynth.clone(),
            screenshotter: self.screenshotter.clone(),
            appidlister: self.appidlister.clone(),
        }
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    info!("Starting a11ydriver-server v{}", env!("CARGO_PKG_VERSION"));

    let engine = create_engine()
        .await
        .context("failed to connect to the accessibility bus")?;
    let manager = Arc::new(SessionManager::new(
        engine,
        Arc::new(ProcessLauncher),
        args.driver_config(),
    ));
    let state = AppState {
        manager: manager.clone(),
        helpers: Arc::new(ExternalHelpers::new(args.helper_programs())),
    };

    let mut app = router(state);
    if args.cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Listening on http://{addr}");
    if args.cors {
        info!("CORS enabled for all origins");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Closing {} open session(s)", manager.session_count().await);
    manager.shutdown().await;
    Ok(())
}
