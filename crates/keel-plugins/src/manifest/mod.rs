//! Plugin manifest parsing.
//!
//! Every plugin directory carries a `manifest.toml` naming the plugin and
//! what it ships:
//!
//! ```toml
//! name = "demo"
//! version = "1.0"
//! author = "Keel Developers"
//! description = "Reference plugin"
//! object = "libdemo.so"   # native module, relative to the plugin directory
//! helper = "demo-helper"  # helper binary, resolved via helper search paths
//! httpd = "httpd"         # web assets served under the plugin's URL prefix
//! js = "demo.js"          # script module
//! ```
//!
//! Only `name` is required. Blank optional values are treated as absent.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PluginError;

/// File name of the manifest inside a plugin directory.
pub const MANIFEST_FILE_NAME: &str = "manifest.toml";

/// Declarative description of a plugin directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginManifest {
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    object: Option<String>,
    #[serde(default)]
    helper: Option<String>,
    #[serde(default)]
    httpd: Option<String>,
    #[serde(default)]
    js: Option<String>,
}

impl PluginManifest {
    /// Creates a manifest carrying only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: String::new(),
            author: String::new(),
            description: String::new(),
            object: None,
            helper: None,
            httpd: None,
            js: None,
        }
    }

    /// Sets the version string.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Sets the native module file name.
    #[must_use]
    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    /// Sets the helper binary name.
    #[must_use]
    pub fn with_helper(mut self, helper: impl Into<String>) -> Self {
        self.helper = Some(helper.into());
        self
    }

    /// Sets the web-asset subpath.
    #[must_use]
    pub fn with_httpd(mut self, httpd: impl Into<String>) -> Self {
        self.httpd = Some(httpd.into());
        self
    }

    /// Sets the script module file name.
    #[must_use]
    pub fn with_js(mut self, js: impl Into<String>) -> Self {
        self.js = Some(js.into());
        self
    }

    /// Reads and validates the manifest at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Io`] when the file cannot be read, otherwise
    /// see [`PluginManifest::from_toml_str`].
    pub fn from_path(path: &Path) -> Result<Self, PluginError> {
        let text = fs::read_to_string(path).map_err(|err| PluginError::Io {
            path: path.to_path_buf(),
            source: Arc::new(err),
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Parses and validates manifest text; `origin` is used for diagnostics.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::ManifestParse`] for malformed TOML or a missing
    /// `name`, and [`PluginError::Manifest`] when validation fails.
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, PluginError> {
        let parsed: Self = toml::from_str(text).map_err(|err| PluginError::ManifestParse {
            path: origin.to_path_buf(),
            source: Box::new(err),
        })?;
        let manifest = parsed.normalised();
        manifest.validate(origin)?;
        Ok(manifest)
    }

    fn normalised(self) -> Self {
        Self {
            object: non_blank(self.object),
            helper: non_blank(self.helper),
            httpd: non_blank(self.httpd),
            js: non_blank(self.js),
            ..self
        }
    }

    /// Validates the manifest, returning an error if it is malformed.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::Manifest`] if the name is blank or the native
    /// module is given as an absolute path.
    pub fn validate(&self, origin: &Path) -> Result<(), PluginError> {
        if self.name.trim().is_empty() {
            return Err(PluginError::Manifest {
                path: origin.to_path_buf(),
                message: String::from("plugin name must not be empty"),
            });
        }
        if let Some(object) = &self.object
            && Path::new(object).is_absolute()
        {
            return Err(PluginError::Manifest {
                path: origin.to_path_buf(),
                message: format!(
                    "native module must be relative to the plugin directory, got '{object}'"
                ),
            });
        }
        Ok(())
    }

    /// Plugin name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Plugin version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Plugin author.
    #[must_use]
    pub fn author(&self) -> &str {
        &self.author
    }

    /// Plugin description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Native module file name, relative to the plugin directory.
    #[must_use]
    pub fn object(&self) -> Option<&str> {
        self.object.as_deref()
    }

    /// Helper binary name.
    #[must_use]
    pub fn helper(&self) -> Option<&str> {
        self.helper.as_deref()
    }

    /// Web-asset subpath.
    #[must_use]
    pub fn httpd(&self) -> Option<&str> {
        self.httpd.as_deref()
    }

    /// Script module file name.
    #[must_use]
    pub fn js(&self) -> Option<&str> {
        self.js.as_deref()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
