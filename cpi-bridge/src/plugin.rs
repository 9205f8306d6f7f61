//! Plugin name resolution.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("no plugin specified")]
    Empty,
    #[error("plugin '{0}' must be a bare file name inside the plugin directory")]
    OutsideDirectory(String),
}

/// Maps the plugin named in a request to an executable path.
///
/// Without a plugin directory the name is used as the path, exactly as given.
/// With one, only bare file names are accepted and they are looked up inside
/// that directory.
#[derive(Debug, Clone, Default)]
pub struct PluginResolver {
    dir: Option<PathBuf>,
}

impl PluginResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn confined_to(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: Some(dir.into()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn resolve(&self, name: &str) -> Result<PathBuf, ResolveError> {
        if name.is_empty() {
            return Err(ResolveError::Empty);
        }

        let Some(dir) = &self.dir else {
            return Ok(PathBuf::from(name));
        };

        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(file)), None) => Ok(dir.join(file)),
            _ => Err(ResolveError::OutsideDirectory(name.to_string())),
        }
    }
}
