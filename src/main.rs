use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use camfeed::{AlertChannel, AlertCue, CameraFeedSession, Config, SilentCue, TerminalBell};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("camfeed=debug".parse()?))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    let endpoints = config.endpoints()?;
    tracing::info!("loaded {} camera(s)", config.cameras.len());

    let cue: Arc<dyn AlertCue> = if config.alerts.audible {
        Arc::new(TerminalBell)
    } else {
        Arc::new(SilentCue)
    };
    let mut alerts = AlertChannel::new(
        &endpoints,
        config.reconnect.socket,
        config.alerts.history_limit,
        cue,
    );
    alerts.connect();

    let client = reqwest::Client::new();
    let mut sessions = Vec::new();
    for camera in &config.cameras {
        let mut session = CameraFeedSession::new(client.clone(), endpoints.clone(), &config.reconnect);
        session.start(&camera.id, camera.overlay).await;
        sessions.push(session);
    }

    let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(10));
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                for session in &sessions {
                    let frames = session.frames().borrow().as_ref().map_or(0, |f| f.sequence);
                    let labels = session.metadata().borrow().detections.len();
                    tracing::info!(
                        camera = session.camera_id().unwrap_or("-"),
                        status = %session.status(),
                        frames,
                        labels,
                        "feed status"
                    );
                }

                let book = alerts.subscribe().borrow().clone();
                tracing::info!(
                    socket = alerts.status().borrow().state.label(),
                    active = book.active().len(),
                    history = book.history_len(),
                    "alert status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                break;
            }
        }
    }

    for session in &mut sessions {
        session.stop().await;
    }
    alerts.disconnect().await;
    tracing::info!("shutdown complete");

    Ok(())
}
