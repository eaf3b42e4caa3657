use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::pattern::{Pattern, Segment, split_path};
use crate::{ConfigurationError, Params, percent_decode};

/// Method constraint of a registered route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Exact(Method),
    /// Matches every method, used when no exact registration exists.
    Any,
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Exact(method)
    }
}

impl From<&Method> for RouteMethod {
    fn from(method: &Method) -> Self {
        RouteMethod::Exact(method.clone())
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Exact(method) => f.write_str(method.as_str()),
            RouteMethod::Any => f.write_str("*"),
        }
    }
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct Match<'r, T> {
    pub value: &'r T,
    pub params: Params,
    pub pattern: &'r str,
}

#[derive(Debug, Clone)]
struct Route<T> {
    pattern: Arc<str>,
    names: Arc<[Arc<str>]>,
    value: T,
}

#[derive(Debug, Clone)]
struct Endpoints<T> {
    by_method: Vec<(Method, Route<T>)>,
    any: Option<Route<T>>,
}

impl<T> Endpoints<T> {
    fn new() -> Self {
        Self { by_method: Vec::new(), any: None }
    }

    fn get(&self, method: &Method) -> Option<&Route<T>> {
        self.by_method.iter().find(|(m, _)| m == method).map(|(_, r)| r).or(self.any.as_ref())
    }

    fn insert(&mut self, method: RouteMethod, route: Route<T>) -> Option<Route<T>> {
        match method {
            RouteMethod::Any => self.any.replace(route),
            RouteMethod::Exact(method) => match self.by_method.iter_mut().find(|(m, _)| *m == method) {
                Some((_, existing)) => Some(std::mem::replace(existing, route)),
                None => {
                    self.by_method.push((method, route));
                    None
                }
            },
        }
    }

    fn is_empty(&self) -> bool {
        self.by_method.is_empty() && self.any.is_none()
    }

    fn methods(&self) -> Vec<RouteMethod> {
        let mut methods: Vec<RouteMethod> = self.by_method.iter().map(|(m, _)| RouteMethod::from(m)).collect();
        if self.any.is_some() {
            methods.push(RouteMethod::Any);
        }
        methods
    }
}

#[derive(Debug, Clone)]
struct Node<T> {
    statics: HashMap<Box<str>, Node<T>>,
    param: Option<Box<Node<T>>>,
    catch_all: Option<Endpoints<T>>,
    endpoints: Endpoints<T>,
}

impl<T> Node<T> {
    fn new() -> Self {
        Self { statics: HashMap::new(), param: None, catch_all: None, endpoints: Endpoints::new() }
    }

    /// Depth first search in priority order static, param, catch-all.
    ///
    /// `select` decides whether a set of endpoints satisfies the lookup; a node whose
    /// endpoints are rejected does not stop the search, so a lower priority branch gets
    /// its chance. Captures pushed by a failed branch are popped before backtracking.
    fn walk<'r, R>(
        &'r self,
        segments: &[&str],
        captures: &mut Vec<String>,
        select: &impl Fn(&'r Endpoints<T>) -> Option<R>,
    ) -> Option<R> {
        let Some((first, rest)) = segments.split_first() else {
            if let Some(found) = select(&self.endpoints) {
                return Some(found);
            }
            let found = self.catch_all.as_ref().and_then(select)?;
            captures.push(String::new());
            return Some(found);
        };

        if let Some(child) = self.statics.get(*first) {
            if let Some(found) = child.walk(rest, captures, select) {
                return Some(found);
            }
        }

        if let Some(child) = self.param.as_deref().filter(|_| !first.is_empty()) {
            captures.push(percent_decode(first).into_owned());
            if let Some(found) = child.walk(rest, captures, select) {
                return Some(found);
            }
            captures.pop();
        }

        let found = self.catch_all.as_ref().and_then(select)?;
        captures.push(percent_decode(&segments.join("/")).into_owned());
        Some(found)
    }
}

/// A segment trie mapping `(method, path)` to values of type `T`.
///
/// Static segments take priority over parameters, parameters over wildcards.
/// Lookup backtracks, so a more specific branch that can not satisfy the
/// method (or has nothing registered) falls through to a less specific one.
#[derive(Debug, Clone)]
pub struct Router<T> {
    root: Node<T>,
    len: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    pub fn new() -> Self {
        Self { root: Node::new(), len: 0 }
    }

    /// Parses `pattern` and registers `value` under it.
    ///
    /// Registering the same pattern and method twice replaces the earlier value.
    pub fn insert<M: Into<RouteMethod>>(&mut self, method: M, pattern: &str, value: T) -> Result<(), ConfigurationError> {
        let pattern = Pattern::parse(pattern)?;
        self.insert_pattern(method, &pattern, value);
        Ok(())
    }

    /// Registers `value` under an already validated pattern, returning the replaced value.
    pub fn insert_pattern<M: Into<RouteMethod>>(&mut self, method: M, pattern: &Pattern, value: T) -> Option<T> {
        let method = method.into();
        let route = Route { pattern: pattern.shared_raw(), names: pattern.shared_names(), value };

        let mut node = &mut self.root;
        let mut greedy = false;
        for segment in pattern.segments() {
            node = match segment {
                Segment::Static(literal) => node.statics.entry(literal.as_str().into()).or_insert_with(Node::new),
                Segment::Param(_) | Segment::Wildcard { greedy: false, .. } => {
                    node.param.get_or_insert_with(|| Box::new(Node::new()))
                }
                Segment::Wildcard { greedy: true, .. } => {
                    greedy = true;
                    break;
                }
            };
        }

        let endpoints =
            if greedy { node.catch_all.get_or_insert_with(Endpoints::new) } else { &mut node.endpoints };

        let replaced = endpoints.insert(method.clone(), route);
        match &replaced {
            Some(_) => debug!(pattern = pattern.as_str(), %method, "route replaced"),
            None => self.len += 1,
        }
        replaced.map(|r| r.value)
    }

    /// Finds the value registered for `method` and `path`.
    ///
    /// An exact method registration wins over an [`RouteMethod::Any`] one on the same node.
    pub fn find(&self, method: &Method, path: &str) -> Option<Match<'_, T>> {
        let segments = split_path(path);
        let mut captures = Vec::new();
        let route = self.root.walk(&segments, &mut captures, &|endpoints| endpoints.get(method))?;

        Some(Match {
            value: &route.value,
            params: Params::from_captures(&route.names, captures),
            pattern: &route.pattern,
        })
    }

    /// Methods registered on the first node that matches `path` regardless of method.
    pub fn allowed_methods(&self, path: &str) -> Vec<RouteMethod> {
        let segments = split_path(path);
        let mut captures = Vec::new();
        self.root
            .walk(&segments, &mut captures, &|endpoints| (!endpoints.is_empty()).then(|| endpoints.methods()))
            .unwrap_or_default()
    }

    /// Number of registered `(method, pattern)` pairs.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
