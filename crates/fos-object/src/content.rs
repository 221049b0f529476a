//! Content Kinds and Object State
//!
//! What an embedded object resolved to, why it fell back, and the state bits
//! the host styles it by.

/// Resolved content kind of a load target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ObjectKind {
    /// Type not known yet; a channel must be opened to find out
    #[default]
    Loading,
    Image,
    /// Nested document (sub-navigation)
    Document,
    /// External module instance
    Module,
    /// Unloadable; fallback content is shown
    Null,
}

/// Why a target shows fallback content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FallbackReason {
    /// Show the element's own children
    #[default]
    Alternate,
    /// No handler for the content type
    Unsupported,
    /// Modules are blocked on this platform
    UnsupportedPlatform,
    /// Module disabled globally or for this site
    Disabled,
    Blocklisted,
    Outdated,
    Crashed,
    /// Rejected by content policy
    Suppressed,
    /// Rejected by content policy because of a user type preference
    UserDisabled,
    ClickToPlay,
    VulnerableUpdatable,
    VulnerableNoUpdate,
    PlayPreview,
}

impl FallbackReason {
    /// Placeholder reasons that stand in for a module awaiting activation
    pub fn is_activation_placeholder(self) -> bool {
        matches!(
            self,
            Self::ClickToPlay | Self::VulnerableUpdatable | Self::VulnerableNoUpdate | Self::PlayPreview
        )
    }
}

/// Externally observable state bits of an object element.
///
/// Multiple states can be combined using the `|` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ObjectState(u32);

impl ObjectState {
    pub const EMPTY: Self = Self(0);
    pub const LOADING: Self = Self(1 << 0);
    pub const BROKEN: Self = Self(1 << 1);
    pub const SUPPRESSED: Self = Self(1 << 2);
    pub const USER_DISABLED: Self = Self(1 << 3);
    pub const CLICK_TO_PLAY: Self = Self(1 << 4);
    pub const PLAY_PREVIEW: Self = Self(1 << 5);
    pub const HANDLER_DISABLED: Self = Self(1 << 6);
    pub const HANDLER_BLOCKED: Self = Self(1 << 7);
    pub const HANDLER_CRASHED: Self = Self(1 << 8);
    pub const TYPE_UNSUPPORTED: Self = Self(1 << 9);
    pub const UNSUPPORTED_PLATFORM: Self = Self(1 << 10);
    pub const VULNERABLE_UPDATABLE: Self = Self(1 << 11);
    pub const VULNERABLE_NO_UPDATE: Self = Self(1 << 12);

    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// State bits shown for a fallback reason
    pub fn for_fallback(reason: FallbackReason) -> Self {
        match reason {
            FallbackReason::Suppressed => Self::SUPPRESSED,
            FallbackReason::UserDisabled => Self::USER_DISABLED,
            FallbackReason::ClickToPlay => Self::CLICK_TO_PLAY,
            FallbackReason::PlayPreview => Self::PLAY_PREVIEW,
            FallbackReason::Disabled => Self::BROKEN | Self::HANDLER_DISABLED,
            FallbackReason::Blocklisted => Self::BROKEN | Self::HANDLER_BLOCKED,
            FallbackReason::Crashed => Self::BROKEN | Self::HANDLER_CRASHED,
            FallbackReason::Unsupported => Self::BROKEN | Self::TYPE_UNSUPPORTED,
            FallbackReason::UnsupportedPlatform => Self::BROKEN | Self::UNSUPPORTED_PLATFORM,
            FallbackReason::Outdated | FallbackReason::Alternate => Self::BROKEN,
            FallbackReason::VulnerableUpdatable => Self::VULNERABLE_UPDATABLE,
            FallbackReason::VulnerableNoUpdate => Self::VULNERABLE_NO_UPDATE,
        }
    }
}

impl std::ops::BitOr for ObjectState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitXor for ObjectState {
    type Output = Self;

    fn bitxor(self, rhs: Self) -> Self::Output {
        Self(self.0 ^ rhs.0)
    }
}

/// What an element is able to load.
///
/// Multiple capabilities can be combined using the `|` operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities(u32);

impl Capabilities {
    pub const NONE: Self = Self(0);
    pub const SUPPORT_IMAGES: Self = Self(1 << 0);
    pub const SUPPORT_MODULES: Self = Self(1 << 1);
    pub const SUPPORT_DOCUMENTS: Self = Self(1 << 2);
    pub const SUPPORT_SVG: Self = Self(1 << 3);
    /// Honor the `classid` attribute
    pub const SUPPORT_CLASSID: Self = Self(1 << 4);
    /// Module types may be instantiated without opening a channel first
    pub const SKIP_CHANNEL_FOR_MODULE: Self = Self(1 << 5);

    /// Capabilities every object-loading element has
    pub const BASE: Self = Self(
        Self::SUPPORT_IMAGES.0 | Self::SUPPORT_MODULES.0 | Self::SUPPORT_DOCUMENTS.0 | Self::SUPPORT_SVG.0,
    );

    #[inline]
    pub const fn has(self, cap: Self) -> bool {
        (self.0 & cap.0) != 0
    }

    #[inline]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::BASE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fallback_state_bits() {
        let state = ObjectState::for_fallback(FallbackReason::Blocklisted);
        assert!(state.contains(ObjectState::BROKEN));
        assert!(state.contains(ObjectState::HANDLER_BLOCKED));
        assert!(!state.contains(ObjectState::HANDLER_CRASHED));

        assert_eq!(
            ObjectState::for_fallback(FallbackReason::ClickToPlay),
            ObjectState::CLICK_TO_PLAY
        );
    }

    #[test]
    fn test_state_xor() {
        let a = ObjectState::LOADING;
        let b = ObjectState::BROKEN | ObjectState::TYPE_UNSUPPORTED;
        let changed = a ^ b;
        assert!(changed.contains(ObjectState::LOADING));
        assert!(changed.contains(ObjectState::TYPE_UNSUPPORTED));
        assert!((a ^ a).is_empty());
    }

    #[test]
    fn test_activation_placeholders() {
        assert!(FallbackReason::ClickToPlay.is_activation_placeholder());
        assert!(FallbackReason::PlayPreview.is_activation_placeholder());
        assert!(!FallbackReason::Blocklisted.is_activation_placeholder());
        assert!(!FallbackReason::Alternate.is_activation_placeholder());
    }

    #[test]
    fn test_capabilities() {
        let caps = Capabilities::BASE | Capabilities::SKIP_CHANNEL_FOR_MODULE;
        assert!(caps.has(Capabilities::SUPPORT_IMAGES));
        assert!(caps.has(Capabilities::SKIP_CHANNEL_FOR_MODULE));
        assert!(!caps.has(Capabilities::SUPPORT_CLASSID));
    }
}
