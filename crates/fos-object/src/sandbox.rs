//! Sandbox
//!
//! Document sandbox flags as they affect object loading.

use std::collections::HashSet;

/// Sandbox flags of the owning document.
///
/// An empty set is fully restricted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SandboxFlags {
    pub flags: HashSet<SandboxFlag>,
}

/// Individual sandbox allowance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SandboxFlag {
    AllowForms,
    AllowPopups,
    AllowSameOrigin,
    AllowScripts,
    AllowTopNavigation,
    AllowPlugins,
}

impl SandboxFlags {
    /// Create new sandbox (fully restricted)
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse sandbox attribute
    pub fn parse(attribute: &str) -> Self {
        let mut flags = Self::new();

        for token in attribute.split_whitespace() {
            if let Some(flag) = Self::parse_flag(token) {
                flags.flags.insert(flag);
            }
        }

        flags
    }

    fn parse_flag(token: &str) -> Option<SandboxFlag> {
        Some(match token.to_lowercase().as_str() {
            "allow-forms" => SandboxFlag::AllowForms,
            "allow-popups" => SandboxFlag::AllowPopups,
            "allow-same-origin" => SandboxFlag::AllowSameOrigin,
            "allow-scripts" => SandboxFlag::AllowScripts,
            "allow-top-navigation" => SandboxFlag::AllowTopNavigation,
            "allow-plugins" => SandboxFlag::AllowPlugins,
            _ => return None,
        })
    }

    /// Check if flag is set
    pub fn has(&self, flag: SandboxFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn allows_same_origin(&self) -> bool {
        self.has(SandboxFlag::AllowSameOrigin)
    }

    /// Content loaded under these flags gets an opaque origin
    pub fn sandboxes_origin(&self) -> bool {
        !self.allows_same_origin()
    }
}
