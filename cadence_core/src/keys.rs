//! Runtime keys for the various kinds of reactor components, plus the
//! capability token gating privileged access to them.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

slotmap::new_key_type! {
    /// Runtime key for a Reactor
    pub struct ReactorKey;
}

slotmap::new_key_type! {
    /// Runtime key for a Port, unique to a reactor hierarchy
    pub struct PortKey;
}

slotmap::new_key_type! {
    /// Runtime key for a MultiPort
    pub struct MultiPortKey;
}

slotmap::new_key_type! {
    /// Runtime key for an Action
    pub struct ActionKey;
}

slotmap::new_key_type! {
    /// Runtime key for a Timer
    pub struct TimerKey;
}

slotmap::new_key_type! {
    /// Runtime key for a Reaction, Mutation, or Procedure
    pub struct ReactionKey;
}

/// An unforgeable capability handed out when a component is registered
/// with its container. Privileged views of a component (writable ports,
/// schedulable actions, trigger managers) are granted only against the
/// matching token.
///
/// Tokens carry no public constructor; they can only be minted by a
/// [`TokenSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Token(u64);

/// Mints fresh [`Token`]s; one per reactor hierarchy.
#[derive(Debug, Default)]
pub struct TokenSource(u64);

impl TokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&mut self) -> Token {
        self.0 += 1;
        Token(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_are_fresh() {
        let mut source = TokenSource::new();
        let a = source.mint();
        let b = source.mint();
        assert_ne!(a, b);
    }
}
