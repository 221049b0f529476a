//! Object Events
//!
//! Trusted notifications fired at the element from the task queue.

/// Details of a crashed module instance
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CrashReport {
    pub module_name: String,
    pub module_filename: String,
    pub module_dump_id: String,
    pub browser_dump_id: String,
    pub submitted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEvent {
    ModuleInstantiated,
    /// The running module is outdated according to the blocklist
    ModuleOutdated,
    /// The element left its document
    ModuleRemoved,
    ModuleCrashed(CrashReport),
    /// Content script first touched a placeholder
    ModuleScripted,
}

impl ObjectEvent {
    /// Event name as seen by the document
    pub fn name(&self) -> &'static str {
        match self {
            Self::ModuleInstantiated => "PluginInstantiated",
            Self::ModuleOutdated => "PluginOutdated",
            Self::ModuleRemoved => "PluginRemoved",
            Self::ModuleCrashed(_) => "PluginCrashed",
            Self::ModuleScripted => "PluginScripted",
        }
    }

    /// Crash reports go out while the node is in a document; everything else
    /// only while the document is active
    pub fn requires_active_document(&self) -> bool {
        !matches!(self, Self::ModuleCrashed(_))
    }
}
