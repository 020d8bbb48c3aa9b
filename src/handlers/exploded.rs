//! Static serving of an unpacked web application directory.
//!
//! The optional descriptor (`WEB-INF/app.toml` unless overridden) tunes how
//! the directory is served. Nothing under `WEB-INF/` is ever served.

use std::path::{Path, PathBuf};

use axum::extract::Request;
use axum::http::header::{HeaderValue, CACHE_CONTROL};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Deserialize;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::ConfigError;
use crate::error::{BootstrapError, Result};

/// Private directory of an application
pub const PRIVATE_DIR: &str = "WEB-INF";

/// Descriptor file looked up inside the private directory
pub const DESCRIPTOR_FILE: &str = "app.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AppDescriptor {
    /// Serve `index.html` for directory requests
    pub index: bool,
    /// File served (200) for paths that match nothing, for client-side routing
    pub fallback: Option<String>,
    /// File served with 404 for paths that match nothing
    pub not_found: Option<String>,
    /// Cache-Control value added to responses that don't set one
    pub cache_control: Option<String>,
}

impl Default for AppDescriptor {
    fn default() -> Self {
        Self {
            index: true,
            fallback: None,
            not_found: None,
            cache_control: None,
        }
    }
}

impl AppDescriptor {
    pub fn default_path(base: &Path) -> PathBuf {
        base.join(PRIVATE_DIR).join(DESCRIPTOR_FILE)
    }

    /// Read the descriptor. An explicit path must exist; the default one is optional.
    pub fn load(base: &Path, explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = Self::default_path(base);
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            BootstrapError::io(format!("Can't read descriptor {}", path.display()), e)
        })?;
        let descriptor: AppDescriptor = toml::from_str(&contents).map_err(ConfigError::from)?;
        tracing::debug!(path = %path.display(), ?descriptor, "Loaded application descriptor");
        Ok(descriptor)
    }
}

/// Whether `path` reaches into the private directory once decoded the way
/// `ServeDir` decodes it. Undecodable paths count as private.
fn is_private(path: &str) -> bool {
    let Ok(decoded) = urlencoding::decode(path) else {
        return true;
    };
    decoded
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty())
        .any(|segment| segment.eq_ignore_ascii_case(PRIVATE_DIR))
}

async fn hide_private(request: Request, next: Next) -> Response {
    if is_private(request.uri().path()) {
        tracing::debug!(path = %request.uri().path(), "Refusing private path");
        return StatusCode::NOT_FOUND.into_response();
    }
    next.run(request).await
}

/// Router serving `base` according to `descriptor`.
pub(crate) fn static_router(base: &Path, descriptor: &AppDescriptor) -> Result<Router> {
    if !base.is_dir() {
        return Err(BootstrapError::validation(format!(
            "Application directory {} does not exist",
            base.display()
        )));
    }

    let serve = ServeDir::new(base).append_index_html_on_directories(descriptor.index);
    let router = match (&descriptor.fallback, &descriptor.not_found) {
        (Some(fallback), _) => {
            Router::new().fallback_service(serve.fallback(ServeFile::new(base.join(fallback))))
        }
        (None, Some(not_found)) => Router::new()
            .fallback_service(serve.not_found_service(ServeFile::new(base.join(not_found)))),
        (None, None) => Router::new().fallback_service(serve),
    };

    let router = router.layer(middleware::from_fn(hide_private));

    match &descriptor.cache_control {
        Some(value) => {
            let value = HeaderValue::from_str(value).map_err(|e| {
                BootstrapError::validation(format!("Invalid cache_control '{value}': {e}"))
            })?;
            Ok(router.layer(SetResponseHeaderLayer::if_not_present(CACHE_CONTROL, value)))
        }
        None => Ok(router),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_default_descriptor_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(AppDescriptor::load(dir.path(), None).unwrap(), AppDescriptor::default());
    }

    #[test]
    fn reads_default_descriptor() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(PRIVATE_DIR)).unwrap();
        std::fs::write(
            AppDescriptor::default_path(dir.path()),
            "fallback = \"index.html\"\ncache_control = \"no-cache\"\n",
        )
        .unwrap();

        let descriptor = AppDescriptor::load(dir.path(), None).unwrap();
        assert!(descriptor.index);
        assert_eq!(descriptor.fallback.as_deref(), Some("index.html"));
        assert_eq!(descriptor.cache_control.as_deref(), Some("no-cache"));
    }

    #[test]
    fn explicit_descriptor_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppDescriptor::load(dir.path(), Some(dir.path().join("nope.toml").as_path())).unwrap_err();
        assert!(matches!(err, BootstrapError::Io { .. }));
    }

    #[test]
    fn invalid_descriptor_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "index = \"yes\"").unwrap();
        let err = AppDescriptor::load(dir.path(), Some(path.as_path())).unwrap_err();
        assert!(matches!(err, BootstrapError::Config(ConfigError::Parse(_))));
    }

    #[test]
    fn router_requires_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(static_router(&dir.path().join("missing"), &AppDescriptor::default()).is_err());
        assert!(static_router(dir.path(), &AppDescriptor::default()).is_ok());
    }

    #[test]
    fn bad_cache_control_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = AppDescriptor {
            cache_control: Some("bad\nvalue".to_string()),
            ..AppDescriptor::default()
        };
        assert!(static_router(dir.path(), &descriptor).is_err());
    }

    #[test]
    fn private_paths_are_detected_after_decoding() {
        assert!(is_private("/WEB-INF/app.toml"));
        assert!(is_private("/WEB%2DINF/app.toml"));
        assert!(is_private("/%57EB-INF"));
        assert!(is_private("//WEB-INF/app.toml"));
        assert!(is_private("/web-inf/app.toml"));
        assert!(is_private("/a/%2FWEB-INF%2Fapp.toml"));
        assert!(!is_private("/index.html"));
        assert!(!is_private("/WEB-INF-public/notes.txt"));
    }

    #[tokio::test]
    async fn private_directory_is_never_served() {
        use axum::body::Body;
        use tower::ServiceExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(PRIVATE_DIR)).unwrap();
        std::fs::write(AppDescriptor::default_path(dir.path()), "index = true\n").unwrap();
        std::fs::write(dir.path().join("index.html"), "home").unwrap();
        let router = static_router(dir.path(), &AppDescriptor::default()).unwrap();

        let status = |uri: &'static str| {
            let router = router.clone();
            async move {
                router
                    .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                    .await
                    .unwrap()
                    .status()
            }
        };

        assert_eq!(status("/index.html").await, StatusCode::OK);
        for uri in [
            "/WEB-INF/app.toml",
            "/WEB%2DINF/app.toml",
            "//WEB-INF/app.toml",
            "/%57EB-INF/app.toml",
            "/web-inf/app.toml",
        ] {
            assert_eq!(status(uri).await, StatusCode::NOT_FOUND, "{uri}");
        }
    }

    #[tokio::test]
    async fn private_directory_is_hidden_when_nested() {
        use axum::body::Body;
        use tower::ServiceExt;

        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(PRIVATE_DIR)).unwrap();
        std::fs::write(AppDescriptor::default_path(dir.path()), "index = true\n").unwrap();
        let app = static_router(dir.path(), &AppDescriptor::default()).unwrap();
        let router = Router::new().nest_service("/site", app);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/site/WEB%2DINF/app.toml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
