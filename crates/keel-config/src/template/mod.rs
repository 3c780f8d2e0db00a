//! Expansion of path templates found in host configuration.
//!
//! Templates may contain placeholder tokens that are substituted with
//! host-specific locations:
//!
//! - `%B` is the directory the host binary was installed into;
//! - `%h` is the invoking user's home directory;
//! - `%%` is a literal percent sign.
//!
//! Expanded paths are always absolute. Relative results are anchored to the
//! working directory captured in the [`TemplateContext`].

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Host locations substituted into path templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateContext {
    binary_dir: PathBuf,
    home_dir: Option<PathBuf>,
    working_dir: PathBuf,
}

impl TemplateContext {
    /// Builds a context from explicit locations.
    #[must_use]
    pub fn new(
        binary_dir: impl Into<PathBuf>,
        home_dir: Option<PathBuf>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            binary_dir: binary_dir.into(),
            home_dir,
            working_dir: working_dir.into(),
        }
    }

    /// Captures the context of the running process.
    ///
    /// The binary directory falls back to the working directory when the
    /// executable path cannot be determined.
    #[must_use]
    pub fn detect() -> Self {
        let working_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let binary_dir = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| working_dir.clone());
        Self {
            binary_dir,
            home_dir: dirs::home_dir(),
            working_dir,
        }
    }

    /// Directory substituted for `%B`.
    #[must_use]
    pub fn binary_dir(&self) -> &Path {
        &self.binary_dir
    }

    /// Directory substituted for `%h`, when known.
    #[must_use]
    pub fn home_dir(&self) -> Option<&Path> {
        self.home_dir.as_deref()
    }

    /// Directory relative expansions are anchored to.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// Errors raised while expanding a path template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// The template referenced a placeholder that is not recognised.
    #[error("unknown placeholder '%{token}' in path template '{template}'")]
    UnknownToken {
        /// Offending template.
        template: String,
        /// Placeholder character following `%`.
        token: char,
    },
    /// The template ended with a lone `%`.
    #[error("path template '{template}' ends with an incomplete placeholder")]
    Truncated {
        /// Offending template.
        template: String,
    },
    /// The template used `%h` but no home directory is known.
    #[error("path template '{template}' requires a home directory, but none is known")]
    MissingHome {
        /// Offending template.
        template: String,
    },
}

/// Expands `template` into an absolute path.
///
/// # Errors
///
/// Returns a [`TemplateError`] when the template contains an unknown or
/// truncated placeholder, or uses `%h` without a known home directory.
pub fn expand_path_template(
    template: &str,
    context: &TemplateContext,
) -> Result<PathBuf, TemplateError> {
    let mut expanded = String::with_capacity(template.len());
    let mut chars = template.chars();

    while let Some(current) = chars.next() {
        if current != '%' {
            expanded.push(current);
            continue;
        }
        match chars.next() {
            Some('B') => expanded.push_str(&context.binary_dir.to_string_lossy()),
            Some('h') => {
                let home = context
                    .home_dir
                    .as_deref()
                    .ok_or_else(|| TemplateError::MissingHome {
                        template: template.to_owned(),
                    })?;
                expanded.push_str(&home.to_string_lossy());
            }
            Some('%') => expanded.push('%'),
            Some(token) => {
                return Err(TemplateError::UnknownToken {
                    template: template.to_owned(),
                    token,
                });
            }
            None => {
                return Err(TemplateError::Truncated {
                    template: template.to_owned(),
                });
            }
        }
    }

    let path = PathBuf::from(expanded);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(context.working_dir.join(path))
    }
}
