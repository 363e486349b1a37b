use std::fmt;

/// Logical handshake progress for the current stream.
///
/// Per connection attempt the only legal path is
/// `Disconnected -> Connecting -> Connected -> AwaitsGreet -> Ready`;
/// any stream termination resets to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ObserverState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    AwaitsGreet,
    Ready,
}

impl ObserverState {
    /// Numeric value exported as a gauge
    pub fn as_metric(&self) -> i64 {
        match self {
            Self::Disconnected => 0,
            Self::Connecting => 1,
            Self::Connected => 2,
            Self::AwaitsGreet => 3,
            Self::Ready => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::AwaitsGreet => "AWAITS_GREET",
            Self::Ready => "READY",
        }
    }

    /// Whether `next` may follow `self`
    pub fn can_transition_to(&self, next: ObserverState) -> bool {
        use ObserverState::*;
        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, AwaitsGreet)
                | (AwaitsGreet, Ready)
        )
    }
}

impl fmt::Display for ObserverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legal_sequence() {
        use ObserverState::*;
        let path = [Disconnected, Connecting, Connected, AwaitsGreet, Ready];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_ready_requires_greet_wait() {
        use ObserverState::*;
        for from in [Disconnected, Connecting, Connected, Ready] {
            assert!(!from.can_transition_to(Ready), "{} -> READY", from);
        }
    }

    #[test]
    fn test_reset_from_anywhere() {
        use ObserverState::*;
        for from in [Disconnected, Connecting, Connected, AwaitsGreet, Ready] {
            assert!(from.can_transition_to(Disconnected));
        }
    }
}
