//! Ordered registry of request handlers mounted on context paths.
//!
//! Three kinds of mountable units are supported:
//! - **Archive**: packaged application, unpacked into the temp directory
//! - **Exploded**: application directory with an optional descriptor
//! - **Custom**: any axum [`Router`]
//!
//! Mounts keep insertion order. When two mounts claim the same context path
//! the first one wins and the later one is skipped.

mod archive;
mod exploded;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use axum::Router;

use crate::config::CONTEXT_PATH_ROOT;
use crate::error::{BootstrapError, Result};
use crate::tempdir;

pub use archive::ArchiveSource;
pub use exploded::{AppDescriptor, DESCRIPTOR_FILE, PRIVATE_DIR};

/// Subdirectory of the temp directory holding unpacked archives
pub const APPS_DIR: &str = "apps";

pub enum Mount {
    Archive {
        source: ArchiveSource,
        context_path: String,
    },
    Exploded {
        base: PathBuf,
        descriptor: Option<PathBuf>,
        context_path: String,
    },
    Custom {
        router: Router,
        context_path: String,
    },
}

impl Mount {
    pub fn archive(source: ArchiveSource, context_path: &str) -> Self {
        Mount::Archive {
            source,
            context_path: normalize_context_path(context_path),
        }
    }

    pub fn exploded(base: impl Into<PathBuf>, descriptor: Option<PathBuf>, context_path: &str) -> Self {
        Mount::Exploded {
            base: base.into(),
            descriptor,
            context_path: normalize_context_path(context_path),
        }
    }

    /// Exploded application located relative to the running executable
    pub fn exploded_from_exe_dir(
        relative: impl AsRef<Path>,
        descriptor: Option<PathBuf>,
        context_path: &str,
    ) -> Result<Self> {
        let exe_dir = tempdir::exe_dir().ok_or_else(|| {
            BootstrapError::io(
                "Can't locate the executable directory",
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )
        })?;
        let relative = relative.as_ref();
        let relative = relative.strip_prefix("/").unwrap_or(relative);
        Ok(Self::exploded(exe_dir.join(relative), descriptor, context_path))
    }

    pub fn custom(router: Router, context_path: &str) -> Self {
        Mount::Custom {
            router,
            context_path: normalize_context_path(context_path),
        }
    }

    pub fn context_path(&self) -> &str {
        match self {
            Mount::Archive { context_path, .. }
            | Mount::Exploded { context_path, .. }
            | Mount::Custom { context_path, .. } => context_path,
        }
    }

    pub fn item_type(&self) -> &'static str {
        match self {
            Mount::Archive { .. } => "Archive",
            Mount::Exploded { .. } => "Exploded",
            Mount::Custom { .. } => "Handler",
        }
    }
}

impl std::fmt::Debug for Mount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct(self.item_type());
        match self {
            Mount::Archive { source, .. } => s.field("source", source),
            Mount::Exploded {
                base, descriptor, ..
            } => s.field("base", base).field("descriptor", descriptor),
            Mount::Custom { .. } => &mut s,
        };
        s.field("context_path", &self.context_path()).finish()
    }
}

/// `/` prefixed, no trailing slash except for the root
pub fn normalize_context_path(path: &str) -> String {
    let trimmed = path.trim().trim_matches('/');
    if trimmed.is_empty() {
        CONTEXT_PATH_ROOT.to_string()
    } else {
        format!("/{trimmed}")
    }
}

#[derive(Debug, Default)]
pub struct HandlerRegistry {
    mounts: Vec<Mount>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mount: Mount) {
        tracing::debug!(kind = mount.item_type(), context_path = %mount.context_path(), "Handler registered");
        self.mounts.push(mount);
    }

    pub fn len(&self) -> usize {
        self.mounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mounts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mount> {
        self.mounts.iter()
    }

    /// Build one router from every mount, unpacking archives under `temp_dir`.
    pub fn into_router(self, temp_dir: &Path) -> Result<Router> {
        let apps_dir = temp_dir.join(APPS_DIR);
        let mut router = Router::new();
        let mut claimed = HashSet::new();

        for (index, mount) in self.mounts.into_iter().enumerate() {
            let context_path = mount.context_path().to_string();
            if !claimed.insert(context_path.clone()) {
                tracing::warn!(
                    kind = mount.item_type(),
                    context_path = %context_path,
                    "Context path already mounted, skipping handler"
                );
                continue;
            }

            let is_root = context_path == CONTEXT_PATH_ROOT;
            router = match mount {
                Mount::Custom { router: custom, .. } if is_root => router.merge(custom),
                Mount::Custom { router: custom, .. } => router.nest(&context_path, custom),
                Mount::Archive { source, .. } => {
                    let dest = archive::extraction_dir(&apps_dir, index, &source);
                    archive::extract(&source, &dest)?;
                    let app = static_app(&dest, None)?;
                    mount_static(router, &context_path, app)
                }
                Mount::Exploded {
                    base, descriptor, ..
                } => {
                    let app = static_app(&base, descriptor.as_deref())?;
                    mount_static(router, &context_path, app)
                }
            };
            tracing::info!(context_path = %context_path, "Mounted handler");
        }

        Ok(router)
    }
}

fn static_app(base: &Path, descriptor: Option<&Path>) -> Result<Router> {
    let descriptor = AppDescriptor::load(base, descriptor)?;
    exploded::static_router(base, &descriptor)
}

fn mount_static(router: Router, context_path: &str, app: Router) -> Router {
    if context_path == CONTEXT_PATH_ROOT {
        router.fallback_service(app)
    } else {
        router.nest_service(context_path, app)
    }
}
