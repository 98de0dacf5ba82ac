//! Radix-tree route dispatcher.
//!
//! One tree per HTTP method. O(path-length) lookup. You register a path and
//! a [`Wrapper`], you get the wrapper back with its matched parameters.

use std::collections::HashMap;

use http::Method;
use matchit::Router as MatchitRouter;

use crate::error::Error;
use crate::handler::Wrapper;

/// The application router.
///
/// Build it once at startup and hand it to the [`App`](crate::App) or
/// [`Server`](crate::Server). Each [`Router::on`] call returns `self` so
/// registrations chain naturally.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Wrapper>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers a wrapped handler for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; handlers read them with
    /// `ctx.get_param("name")`.
    ///
    /// # Panics
    ///
    /// Panics if the path is malformed or conflicts with an existing route.
    /// Use [`Router::try_on`] to get the error instead.
    ///
    /// ```rust
    /// # use http::Method;
    /// # use tortilla::{Context, HandlerError, Router, wrap};
    /// # async fn get_user(ctx: Context) -> Result<(), HandlerError> { Ok(()) }
    /// # async fn create_user(ctx: Context) -> Result<(), HandlerError> { Ok(()) }
    /// Router::new()
    ///     .on(Method::GET,  "/users/{id}", wrap(get_user))
    ///     .on(Method::POST, "/users",      wrap(create_user));
    /// ```
    pub fn on(self, method: Method, path: &str, wrapper: Wrapper) -> Self {
        self.try_on(method, path, wrapper)
            .unwrap_or_else(|e| panic!("{e}"))
    }

    pub fn try_on(mut self, method: Method, path: &str, wrapper: Wrapper) -> Result<Self, Error> {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, wrapper)
            .map_err(|e| Error::Definition(format!("invalid route `{path}`: {e}")))?;
        Ok(self)
    }

    pub(crate) fn lookup<'r, 'p>(
        &'r self,
        method: &Method,
        path: &'p str,
    ) -> Option<(&'r Wrapper, Vec<(&'r str, &'p str)>)> {
        let tree = self.routes.get(method)?;
        let matched = tree.at(path).ok()?;
        let params = matched.params.iter().collect();
        Some((matched.value, params))
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_matches_method_and_path() {
        let router = Router::new()
            .on(Method::GET, "/users/{id}", Wrapper::default())
            .on(Method::POST, "/users", Wrapper::default());

        let (_, params) = router.lookup(&Method::GET, "/users/42").unwrap();
        assert_eq!(params, [("id", "42")]);
        assert!(router.lookup(&Method::POST, "/users").is_some());
        assert!(router.lookup(&Method::DELETE, "/users/42").is_none());
        assert!(router.lookup(&Method::GET, "/nope").is_none());
    }

    #[test]
    fn conflicting_routes_are_definition_errors() {
        let router = Router::new().on(Method::GET, "/a", Wrapper::default());
        let err = router.try_on(Method::GET, "/a", Wrapper::default()).err().unwrap();
        assert!(matches!(err, Error::Definition(_)));
    }
}
