//! Listen command: stay logged in and log what the server sends.
//!
//! Without a media engine incoming calls cannot be answered, so each
//! invite is logged and hung up.

use serde_json::Map;
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::negotiator::SignalingOnly;
use crate::session::{Session, SessionEvent};

pub async fn run(config: &ClientConfig, channels: Vec<String>) -> ClientResult<()> {
    let session = Session::new(config.session_options()?, SignalingOnly::factory());
    subscribe_events(&session);

    let mut state = session.connection_state();
    tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let current = *state.borrow_and_update();
            info!(state = current.as_str(), "connection state changed");
        }
    });

    if let Err(e) = session.login().await {
        session.logout().await;
        return Err(e);
    }
    println!(
        "listening as {} (Ctrl-C to quit)",
        session.sessid().unwrap_or_default()
    );

    if !channels.is_empty() {
        match session.subscribe(channels).await {
            Ok(result) => info!(result = %result, "subscribed"),
            Err(e) => warn!(error = %e, "subscribe failed"),
        }
    }

    let interrupted = tokio::signal::ctrl_c().await;
    info!("shutting down");
    session.logout().await;
    interrupted.map_err(ClientError::Io)
}

fn subscribe_events(session: &Session) {
    session.events().subscribe("invite", |event: &SessionEvent| {
        if let SessionEvent::Invite(call) = event {
            let options = call.options();
            info!(
                call_id = %call.id(),
                caller_name = ?options.caller_id_name,
                caller_number = ?options.caller_id_number,
                "incoming call, hanging up"
            );
            let mut cause = Map::new();
            cause.insert("cause".into(), "USER_BUSY".into());
            if let Err(e) = call.hangup(cause) {
                warn!(call_id = %call.id(), error = %e, "hangup failed");
            }
        }
    });

    session.events().subscribe("ready", |_: &SessionEvent| {
        info!("client ready");
    });

    for topic in ["info", "broadcast"] {
        session.events().subscribe(topic, move |event: &SessionEvent| match event {
            SessionEvent::Info(params) | SessionEvent::Broadcast(params) => {
                info!(topic, params = %params, "server event");
            }
            _ => {}
        });
    }
}
