use crate::http::HttpResponse;
use std::sync::Arc;
use surge_core::CheckSpec;

type Predicate = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// A named pass/fail predicate over a response.
///
/// A request which never produced a response fails every one of its checks.
#[derive(Clone)]
pub struct Check {
    name: String,
    predicate: Predicate,
}

impl Check {
    pub fn new<F>(name: &str, predicate: F) -> Self
    where
        F: Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn status(name: &str, code: u16) -> Self {
        Self::new(name, move |res| res.status == code)
    }

    /// Every condition set on `spec` must hold.
    pub fn from_spec(spec: &CheckSpec) -> Self {
        let status = spec.status;
        let body_contains = spec.body_contains.clone();
        let header_present = spec.header_present.clone();

        Self::new(&spec.name, move |res| {
            status.map_or(true, |code| res.status == code)
                && body_contains
                    .as_deref()
                    .map_or(true, |needle| res.body.contains(needle))
                && header_present
                    .as_deref()
                    .map_or(true, |name| res.header(name).is_some())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn evaluate(&self, response: Option<&HttpResponse>) -> bool {
        response.map_or(false, |res| (self.predicate)(res))
    }
}

impl std::fmt::Debug for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}
