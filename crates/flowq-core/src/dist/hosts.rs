//! Host resolution for distributed queries.
//!
//! A resolver turns the user's `query_hosts` expression into a concrete
//! host list. Resolvers are pluggable through a small registry; an
//! expression may pick one explicitly with a `name://` prefix and defaults
//! to the `string` resolver otherwise.

/// Error type for host resolution failures.
#[derive(Debug, Clone, PartialEq)]
pub struct HostResolutionError {
    pub message: String,
}

impl HostResolutionError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for HostResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "host resolution failed: {}", self.message)
    }
}

impl std::error::Error for HostResolutionError {}

/// Maps a host expression to a concrete list of `host[:port]` targets.
pub trait HostResolver: Send + Sync {
    fn name(&self) -> &'static str;
    fn resolve(&self, expr: &str) -> Result<Vec<String>, HostResolutionError>;
}

/// Parses the expression itself as a comma-separated host list.
pub struct StringResolver;

impl HostResolver for StringResolver {
    fn name(&self) -> &'static str {
        "string"
    }

    fn resolve(&self, expr: &str) -> Result<Vec<String>, HostResolutionError> {
        let hosts: Vec<String> = expr
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
        if hosts.is_empty() {
            return Err(HostResolutionError::new("empty host list"));
        }
        Ok(hosts)
    }
}

/// Serves a fixed inventory: `all` selects every host, otherwise the
/// expression names a subset.
pub struct StaticResolver {
    hosts: Vec<String>,
}

impl StaticResolver {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }
}

impl HostResolver for StaticResolver {
    fn name(&self) -> &'static str {
        "static"
    }

    fn resolve(&self, expr: &str) -> Result<Vec<String>, HostResolutionError> {
        if expr == "all" || expr.is_empty() {
            return Ok(self.hosts.clone());
        }
        let mut selected = Vec::new();
        for want in expr.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            match self.hosts.iter().find(|h| *h == want) {
                Some(h) => selected.push(h.clone()),
                None => {
                    return Err(HostResolutionError::new(format!(
                        "host '{}' not in inventory",
                        want
                    )));
                }
            }
        }
        Ok(selected)
    }
}

/// Resolver registry, keyed by resolver name.
pub struct Registry {
    resolvers: Vec<Box<dyn HostResolver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            resolvers: Vec::new(),
        }
    }

    /// Registry with the default `string` resolver.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(StringResolver));
        registry
    }

    pub fn register(&mut self, resolver: Box<dyn HostResolver>) {
        self.resolvers.push(resolver);
    }

    /// Resolves an expression of the form `[name://]expr`; the `string`
    /// resolver handles prefix-less expressions.
    pub fn resolve(&self, expr: &str) -> Result<Vec<String>, HostResolutionError> {
        let (name, rest) = match expr.split_once("://") {
            Some((name, rest)) => (name, rest),
            None => ("string", expr),
        };
        let resolver = self
            .resolvers
            .iter()
            .find(|r| r.name() == name)
            .ok_or_else(|| HostResolutionError::new(format!("unknown resolver '{}'", name)))?;
        resolver.resolve(rest)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_resolver() {
        let hosts = StringResolver.resolve("a:7777, b:7777").unwrap();
        assert_eq!(hosts, vec!["a:7777", "b:7777"]);
        assert!(StringResolver.resolve(" , ").is_err());
    }

    #[test]
    fn test_static_resolver() {
        let r = StaticResolver::new(vec!["a:1".to_string(), "b:1".to_string()]);
        assert_eq!(r.resolve("all").unwrap().len(), 2);
        assert_eq!(r.resolve("b:1").unwrap(), vec!["b:1"]);
        assert!(r.resolve("c:1").is_err());
    }

    #[test]
    fn test_registry_scheme_dispatch() {
        let mut registry = Registry::with_defaults();
        registry.register(Box::new(StaticResolver::new(vec!["x:1".to_string()])));

        assert_eq!(registry.resolve("a:1,b:1").unwrap().len(), 2);
        assert_eq!(registry.resolve("string://a:1").unwrap(), vec!["a:1"]);
        assert_eq!(registry.resolve("static://all").unwrap(), vec!["x:1"]);
        assert!(registry.resolve("nope://x").is_err());
    }
}
