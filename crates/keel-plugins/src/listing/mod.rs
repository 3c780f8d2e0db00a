//! Read-only HTTP listing of activated plugins.
//!
//! The host's HTTP server is an external collaborator: it asks each
//! registered [`HttpStreamHandler`] whether it serves a request, then asks
//! the accepting handler for the response body. The tracker serves exactly
//! one path, [`PLUGIN_LISTING_PATH`], and only for `GET`.

use tracing::debug;

use crate::error::PluginError;
use crate::module::ModuleLoader;
use crate::record::PluginInfo;
use crate::tracker::PluginTracker;

const LISTING_TARGET: &str = "keel_plugins::listing";

/// Path of the plugin listing endpoint.
pub const PLUGIN_LISTING_PATH: &str = "/plugins/all_plugins.json";

/// Content type of the listing response.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// A response body produced by a stream handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    content_type: &'static str,
    body: String,
}

impl HttpResponse {
    /// Wraps a JSON body.
    #[must_use]
    pub const fn json(body: String) -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE,
            body,
        }
    }

    /// MIME type of the body.
    #[must_use]
    pub const fn content_type(&self) -> &'static str {
        self.content_type
    }

    /// Response body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Consumes the response, returning the body.
    #[must_use]
    pub fn into_body(self) -> String {
        self.body
    }
}

/// A handler the host HTTP server consults for incoming requests.
pub trait HttpStreamHandler: Send + Sync {
    /// Returns `true` when this handler serves `method` on `path`.
    fn verify_path(&self, path: &str, method: &str) -> bool;

    /// Produces the response for an accepted request.
    ///
    /// # Errors
    ///
    /// Returns [`PluginError::UnsupportedRequest`] for a request
    /// [`Self::verify_path`] would reject, or an error raised while
    /// rendering the body.
    fn respond(&self, path: &str, method: &str) -> Result<HttpResponse, PluginError>;
}

/// Serialises plugin metadata as a JSON array.
///
/// # Errors
///
/// Returns [`PluginError::Listing`] when serialisation fails.
pub fn render_listing(plugins: &[PluginInfo]) -> Result<String, PluginError> {
    serde_json::to_string(plugins).map_err(PluginError::Listing)
}

impl<L: ModuleLoader> HttpStreamHandler for PluginTracker<L> {
    fn verify_path(&self, path: &str, method: &str) -> bool {
        method == "GET" && path == PLUGIN_LISTING_PATH
    }

    fn respond(&self, path: &str, method: &str) -> Result<HttpResponse, PluginError> {
        if !self.verify_path(path, method) {
            return Err(PluginError::UnsupportedRequest {
                path: path.to_owned(),
                method: method.to_owned(),
            });
        }
        let snapshot = self.registry_snapshot();
        debug!(target: LISTING_TARGET, plugins = snapshot.len(), "serving plugin listing");
        render_listing(&snapshot).map(HttpResponse::json)
    }
}
