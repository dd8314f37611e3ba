pub mod channels;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod mqtt;
pub mod omnik;
pub mod options;
pub mod portal;
pub mod prelude;
pub mod scheduler;

const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

use crate::prelude::*;
use crate::coordinator::Coordinator;
use crate::mqtt::Mqtt;
use crate::scheduler::Scheduler;

/// Sets up logging. `RUST_LOG` wins over the config's `loglevel`.
pub fn init_logging(default_level: &str) {
    let result = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or(""),
                record.args()
            )
        })
        .write_style(env_logger::WriteStyle::Never)
        .try_init();

    if let Err(e) = result {
        eprintln!("logger already initialised: {}", e);
    }
}

pub async fn app() -> Result<()> {
    let options = Options::new();

    let config = Config::new(options.config_file.clone())?;
    init_logging(config.loglevel());

    info!("omnik-bridge {} starting", CARGO_PKG_VERSION);

    run(options, config).await
}

pub async fn run(options: Options, config: Config) -> Result<()> {
    config.log_summary();

    if options.once {
        println!("{}", poll_once(&config).await?);
        return Ok(());
    }

    let coordinator = Coordinator::new(&config)?;

    let channels = Channels::new();
    let stats = coordinator.stats.clone();

    let mut scheduler = Scheduler::new(&config, coordinator, channels.clone());
    let mqtt = Mqtt::new(config.mqtt().clone(), channels.clone());

    let shutdown = channels.shutdown.clone();
    let runtime = options.runtime.map(std::time::Duration::from_secs);
    tokio::spawn(async move {
        wait_for_shutdown(runtime).await;
        let _ = shutdown.send(());
    });

    // mqtt first, so its subscriptions exist before the first readings go out
    futures::try_join!(mqtt.start(), scheduler.start())?;

    if let Ok(stats) = stats.lock() {
        stats.print_summary();
    }

    info!("shutdown complete");

    Ok(())
}

/// One poll of every configured sensor, as pretty-printed JSON.
pub async fn poll_once(config: &Config) -> Result<String> {
    let mut coordinator = Coordinator::new(config)?;
    let readings = coordinator.poll().await;

    Ok(serde_json::to_string_pretty(&readings)?)
}

async fn wait_for_shutdown(runtime: Option<std::time::Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
        info!("ctrl+c received, shutting down");
    };

    match runtime {
        Some(limit) => {
            tokio::select! {
                _ = ctrl_c => {}
                _ = tokio::time::sleep(limit) => {
                    info!("runtime limit of {}s reached, shutting down", limit.as_secs());
                }
            }
        }
        None => ctrl_c.await,
    }
}
