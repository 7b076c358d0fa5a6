mod args;

use std::process::ExitCode;
use std::sync::Arc;

use args::{get_log_level_filter, parse_args, player_config};
use dash_player::{DashPlayerBuilder, EventLogger, QoeRecorder};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[tokio::main]
async fn main() -> ExitCode {
    let args = parse_args();

    let fmt_layer = tracing_subscriber::fmt::layer()
        .pretty()
        .compact()
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_filter(get_log_level_filter(&args));
    let subscriber = tracing_subscriber::registry().with(fmt_layer);
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set global default subscriber: {e}");
        return ExitCode::FAILURE;
    }

    info!("Starting DASH emulator");
    info!("{:?}", args);

    let config = match player_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let qoe = Arc::new(QoeRecorder::new());
    let player = match DashPlayerBuilder::new(config)
        .listener(Arc::new(EventLogger))
        .listener(qoe.clone())
        .build()
    {
        Ok(player) => Arc::new(player),
        Err(e) => {
            error!("Cannot build the player: {}", e);
            return ExitCode::FAILURE;
        }
    };

    {
        let player = player.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Interrupted, stopping playback");
                    player.stop();
                }
                Err(e) => warn!("Cannot listen for ctrl-c: {}", e),
            }
        });
    }

    let result = player.start(&args.target).await;

    if args.report {
        match serde_json::to_string_pretty(&qoe.report()) {
            Ok(report) => println!("{report}"),
            Err(e) => error!("Cannot serialize the report: {}", e),
        }
    }

    match result {
        Ok(()) => {
            info!("Playback finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Playback failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
