//! Object Loading Configuration

use serde::Deserialize;
use std::time::Duration;

use crate::ObjectError;

/// Object loading configuration.
///
/// Loaded once at startup and shared immutably between loaders.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// MIME type synthesized for applet tags and `java:` class ids
    pub applet_mime: String,

    /// Sliding expiry of a session permission grant (minutes)
    pub session_permission_minutes: u64,

    /// Sliding expiry of a persistent permission grant (days)
    pub persistent_permission_days: u64,

    /// Retry interval of a delayed module stop (milliseconds)
    pub delayed_stop_retry_ms: u64,

    /// Module MIME types that are always stopped on a later event-loop turn
    pub delayed_stop_mimes: Vec<String>,

    /// Module names that must never be stopped late
    pub never_delay_stop: Vec<String>,

    /// Modules cannot run on this platform at all
    pub modules_blocked_on_platform: bool,

    /// Restrict `file:` applet codebases to the document's directory
    pub strict_file_origin_policy: bool,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            applet_mime: "application/x-java-vm".to_string(),
            session_permission_minutes: 60,
            persistent_permission_days: 90,
            delayed_stop_retry_ms: 100,
            delayed_stop_mimes: vec!["audio/x-pn-realaudio-plugin".to_string()],
            never_delay_stop: vec![
                "QuickTime".to_string(),
                "Flip4Mac".to_string(),
                "XStandard plugin".to_string(),
                "CMISS Zinc Plugin".to_string(),
            ],
            modules_blocked_on_platform: false,
            strict_file_origin_policy: true,
        }
    }
}

impl ObjectConfig {
    /// Parse a JSON configuration; missing keys keep their defaults
    pub fn from_json(json: &str) -> Result<Self, ObjectError> {
        let config = serde_json::from_str(json)?;
        Ok(config)
    }

    pub fn session_window(&self) -> Duration {
        Duration::from_secs(self.session_permission_minutes * 60)
    }

    pub fn persistent_window(&self) -> Duration {
        Duration::from_secs(self.persistent_permission_days * 24 * 60 * 60)
    }

    /// Whether a MIME type names the applet runtime
    pub fn is_applet_mime(&self, mime: &str) -> bool {
        let mime = mime.trim().to_ascii_lowercase();
        mime == self.applet_mime
            || mime == "application/x-java-vm"
            || mime.starts_with("application/x-java-applet")
            || mime.starts_with("application/x-java-bean")
    }

    /// Whether stopping an instance of this module must wait for a later turn
    pub fn wants_delayed_stop(&self, mime: &str, module_name: &str, requested: bool) -> bool {
        let delay = requested || self.delayed_stop_mimes.iter().any(|m| m.eq_ignore_ascii_case(mime));
        delay && !self.never_delay_stop.iter().any(|name| module_name.contains(name.as_str()))
    }
}
