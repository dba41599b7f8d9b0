//! Module routing
//!
//! The router is built once at startup from every registered module and is
//! read-only afterwards. Dispatch walks the routes in registration order and
//! picks the first whose pattern and method set match.

mod pattern;

use std::sync::Arc;

use axum::http::Method;

use crate::modules::Module;
use crate::request::PathVars;

pub use pattern::{PathPattern, PatternError};

struct Route {
    pattern: PathPattern,
    module: Arc<dyn Module>,
}

impl Route {
    fn accepts(&self, method: &Method) -> bool {
        let methods = self.module.methods();
        methods.is_empty() || methods.contains(method)
    }
}

/// A module selected for a request, with its path variables
pub struct Dispatch {
    /// Module that handles the request
    pub module: Arc<dyn Module>,
    /// Variables captured from the path
    pub vars: PathVars,
}

/// Ordered mapping from route pattern and method set to module
pub struct ModuleRouter {
    routes: Vec<Route>,
}

impl ModuleRouter {
    /// Compile the route of every module
    pub fn new(modules: Vec<Arc<dyn Module>>) -> Result<Self, PatternError> {
        let routes = modules
            .into_iter()
            .map(|module| {
                Ok(Route {
                    pattern: PathPattern::parse(module.path())?,
                    module,
                })
            })
            .collect::<Result<Vec<_>, PatternError>>()?;

        Ok(Self { routes })
    }

    /// Number of registered routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// First module whose pattern and method set match
    pub fn dispatch(&self, method: &Method, path: &str) -> Option<Dispatch> {
        self.routes.iter().find_map(|route| {
            if !route.accepts(method) {
                return None;
            }
            route.pattern.captures(path).map(|vars| Dispatch {
                module: route.module.clone(),
                vars,
            })
        })
    }
}
