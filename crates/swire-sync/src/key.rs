#![forbid(unsafe_code)]

//! Channel and item identifiers.

use std::fmt;
use std::rc::Rc;

/// The external-storage-facing identifier a cell's value is persisted
/// under, within one channel.
pub type ItemKey = String;

/// Opaque key partitioning registrations and storage backends. The default
/// channel is the absence of a name; channels are fully independent.
///
/// Cheap to clone (interned name behind `Rc`).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelKey(Option<Rc<str>>);

impl ChannelKey {
    /// The unnamed default channel.
    #[must_use]
    pub const fn default_channel() -> Self {
        Self(None)
    }

    /// A named channel.
    #[must_use]
    pub fn named(name: impl AsRef<str>) -> Self {
        Self(Some(Rc::from(name.as_ref())))
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.0.as_deref()
    }

    #[must_use]
    pub fn is_default(&self) -> bool {
        self.0.is_none()
    }
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Some(name) => f.write_str(name),
            None => f.write_str("(default)"),
        }
    }
}

impl From<&str> for ChannelKey {
    fn from(name: &str) -> Self {
        Self::named(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_channel_is_unnamed() {
        let key = ChannelKey::default_channel();
        assert!(key.is_default());
        assert_eq!(key.name(), None);
        assert_eq!(key.to_string(), "(default)");
        assert_eq!(key, ChannelKey::default());
    }

    #[test]
    fn named_channels_compare_by_name() {
        let a = ChannelKey::named("prefs");
        let b = ChannelKey::from("prefs");
        let c = ChannelKey::named("session");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ChannelKey::default_channel());
        assert_eq!(a.to_string(), "prefs");
    }

    #[test]
    fn usable_as_map_key() {
        use std::collections::HashMap;
        let mut map = HashMap::new();
        map.insert(ChannelKey::named("prefs"), 1);
        map.insert(ChannelKey::default_channel(), 2);
        assert_eq!(map.get(&ChannelKey::named("prefs")), Some(&1));
        assert_eq!(map.get(&ChannelKey::default_channel()), Some(&2));
    }
}
