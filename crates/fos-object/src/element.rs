//! Element Snapshot
//!
//! The attributes of an object-loading element that drive resolution.

use crate::content::Capabilities;

/// Object-loading element tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementTag {
    Object,
    Embed,
    Applet,
}

impl ElementTag {
    /// What elements with this tag are able to load
    pub fn capabilities(self) -> Capabilities {
        match self {
            Self::Object => Capabilities::BASE | Capabilities::SUPPORT_CLASSID,
            Self::Embed => Capabilities::BASE | Capabilities::SKIP_CHANNEL_FOR_MODULE,
            Self::Applet => Capabilities::BASE,
        }
    }

    /// Local name, used as the request initiator type
    pub fn name(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Embed => "embed",
            Self::Applet => "applet",
        }
    }
}

/// A `<param>` child belonging to this element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: String,
    pub value: String,
}

impl Param {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self { name: name.into(), value: value.into() }
    }
}

/// Attribute snapshot of an object-loading element.
///
/// `params` holds only the `<param>` elements whose nearest object/applet
/// ancestor is this element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementInfo {
    pub tag: ElementTag,
    /// Element lives in the HTML namespace
    pub is_html: bool,
    pub type_attr: Option<String>,
    pub data: Option<String>,
    pub src: Option<String>,
    pub codebase: Option<String>,
    pub classid: Option<String>,
    /// `typemustmatch` attribute present
    pub type_must_match: bool,
    pub params: Vec<Param>,
    /// Has children other than `<param>` that would render
    pub has_significant_children: bool,
}

impl ElementInfo {
    pub fn new(tag: ElementTag) -> Self {
        Self {
            tag,
            is_html: true,
            type_attr: None,
            data: None,
            src: None,
            codebase: None,
            classid: None,
            type_must_match: false,
            params: Vec::new(),
            has_significant_children: false,
        }
    }

    pub fn object() -> Self {
        Self::new(ElementTag::Object)
    }

    pub fn embed() -> Self {
        Self::new(ElementTag::Embed)
    }

    pub fn applet() -> Self {
        Self::new(ElementTag::Applet)
    }

    pub fn with_type(mut self, mime: &str) -> Self {
        self.type_attr = Some(mime.to_string());
        self
    }

    pub fn with_data(mut self, data: &str) -> Self {
        self.data = Some(data.to_string());
        self
    }

    pub fn with_src(mut self, src: &str) -> Self {
        self.src = Some(src.to_string());
        self
    }

    pub fn with_codebase(mut self, codebase: &str) -> Self {
        self.codebase = Some(codebase.to_string());
        self
    }

    pub fn with_classid(mut self, classid: &str) -> Self {
        self.classid = Some(classid.to_string());
        self
    }

    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.push(Param::new(name, value));
        self
    }

    pub fn with_children(mut self) -> Self {
        self.has_significant_children = true;
        self
    }

    pub fn type_must_match(mut self) -> Self {
        self.type_must_match = true;
        self
    }

    pub fn non_html(mut self) -> Self {
        self.is_html = false;
        self
    }

    /// Attribute holding the resource URI for this tag
    pub fn uri_attr(&self) -> Option<&str> {
        match self.tag {
            ElementTag::Object => self.data.as_deref(),
            ElementTag::Embed => self.src.as_deref(),
            ElementTag::Applet => None,
        }
    }

    /// Value of the last `<param name="codebase">` child, trimmed
    pub fn param_codebase(&self) -> Option<String> {
        self.params
            .iter()
            .filter(|p| p.name.trim().eq_ignore_ascii_case("codebase"))
            .last()
            .map(|p| p.value.trim().to_string())
    }
}
