//! Login command: authenticate once and report the session id.

use tracing::info;

use crate::config::ClientConfig;
use crate::error::ClientResult;
use crate::negotiator::SignalingOnly;
use crate::session::Session;

pub async fn run(config: &ClientConfig) -> ClientResult<()> {
    let session = Session::new(config.session_options()?, SignalingOnly::factory());

    let outcome = session.login().await;
    if outcome.is_ok() {
        match session.sessid() {
            Some(sessid) => println!("logged in, sessid: {}", sessid),
            None => println!("logged in"),
        }
    }

    session.logout().await;
    info!("session closed");
    outcome.map(|_| ())
}
