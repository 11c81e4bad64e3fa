//! Verto method names.

use std::fmt;

/// Methods exchanged with a Verto server, in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// Authenticate the session.
    Login,
    /// Offer a call (client → server) or announce an incoming one.
    Invite,
    /// Answer a call, or deliver the remote answer.
    Answer,
    /// Hang up a call.
    Bye,
    /// Early or updated remote media description.
    Media,
    /// Re-attach a call after a reconnect.
    Attach,
    /// Call modification (hold, unhold, toggle hold).
    Modify,
    /// Subscribe to event channels.
    Subscribe,
    /// Unsubscribe from event channels.
    Unsubscribe,
    /// In-call information (DTMF, messages).
    Info,
    /// Display identity update.
    Display,
    /// Server finished restoring the session.
    ClientReady,
    /// Publish on an event channel.
    Broadcast,
    /// Event channel delivery.
    Event,
}

impl Method {
    const ALL: [Method; 14] = [
        Method::Login,
        Method::Invite,
        Method::Answer,
        Method::Bye,
        Method::Media,
        Method::Attach,
        Method::Modify,
        Method::Subscribe,
        Method::Unsubscribe,
        Method::Info,
        Method::Display,
        Method::ClientReady,
        Method::Broadcast,
        Method::Event,
    ];

    /// Returns the wire name of the method.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Invite => "verto.invite",
            Self::Answer => "verto.answer",
            Self::Bye => "verto.bye",
            Self::Media => "verto.media",
            Self::Attach => "verto.attach",
            Self::Modify => "verto.modify",
            Self::Subscribe => "verto.subscribe",
            Self::Unsubscribe => "verto.unsubscribe",
            Self::Info => "verto.info",
            Self::Display => "verto.display",
            Self::ClientReady => "verto.clientReady",
            Self::Broadcast => "verto.broadcast",
            Self::Event => "verto.event",
        }
    }

    /// Looks a method up by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == name)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_resolve_back() {
        for method in Method::ALL {
            assert_eq!(Method::from_name(method.as_str()), Some(method));
        }
    }

    #[test]
    fn unknown_name_is_none() {
        assert_eq!(Method::from_name("verto.punt"), None);
        assert_eq!(Method::from_name("INVITE"), None);
    }

    #[test]
    fn client_ready_keeps_camel_case() {
        assert_eq!(Method::ClientReady.to_string(), "verto.clientReady");
    }
}
