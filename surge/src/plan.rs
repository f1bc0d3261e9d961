//! The per-iteration request plan each virtual user walks through.
use crate::checks::Check;
use crate::http::HttpRequest;
use crate::template::{Template, TemplateContext};
use surge_core::{Method, RequestSpec};

#[derive(Debug, Clone)]
pub struct PlannedRequest {
    pub(crate) name: Option<String>,
    method: Method,
    url: Template,
    headers: Vec<(String, Template)>,
    body: Option<Template>,
    pub(crate) checks: Vec<Check>,
    pub(crate) trend: Option<String>,
}

impl PlannedRequest {
    pub fn new(method: Method, url: &str) -> Self {
        Self {
            name: None,
            method,
            url: Template::parse(url),
            headers: vec![],
            body: None,
            checks: vec![],
            trend: None,
        }
    }

    pub fn get(url: &str) -> Self {
        Self::new(Method::Get, url)
    }

    pub fn from_spec(spec: &RequestSpec) -> Self {
        Self {
            name: spec.name.clone(),
            method: spec.method,
            url: Template::parse(&spec.url),
            headers: spec
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), Template::parse(v)))
                .collect(),
            body: spec.body.as_deref().map(Template::parse),
            checks: spec.checks.iter().map(Check::from_spec).collect(),
            trend: spec.trend.clone(),
        }
    }

    /// Tag the request's samples, additionally recording them under `<metric>{name}`.
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), Template::parse(value)));
        self
    }

    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(Template::parse(body));
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(check);
        self
    }

    /// Also record this request's latency into the custom trend metric `trend`.
    pub fn trend(mut self, trend: &str) -> Self {
        self.trend = Some(trend.to_string());
        self
    }

    pub(crate) fn render(&self, ctx: &TemplateContext) -> HttpRequest {
        HttpRequest {
            method: self.method,
            url: self.url.render(ctx),
            headers: self
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), v.render(ctx)))
                .collect(),
            body: self.body.as_ref().map(|b| b.render(ctx)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RequestPlan {
    pub(crate) requests: Vec<PlannedRequest>,
}

impl RequestPlan {
    pub fn new(requests: Vec<PlannedRequest>) -> Self {
        Self { requests }
    }

    pub fn from_specs(specs: &[RequestSpec]) -> Self {
        Self::new(specs.iter().map(PlannedRequest::from_spec).collect())
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
