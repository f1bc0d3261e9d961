//! `{{...}}` placeholders in request URLs, headers and bodies.
//!
//! Supported placeholders: `{{vu}}`, `{{iteration}}`, `{{uuid}}`, `{{random}}` (a float in
//! `[0, 1)`) and `{{randint:N}}` (uniform in `0..N`). Anything else is left as written.
use rand::Rng;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TemplateContext {
    pub vu: u64,
    pub iteration: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Part {
    Literal(String),
    Vu,
    Iteration,
    Uuid,
    Random,
    RandInt(u64),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    pub fn parse(input: &str) -> Self {
        let mut parts = vec![];
        let mut literal = String::new();
        let mut rest = input;

        while let Some(open) = rest.find("{{") {
            let Some(close) = rest[open + 2..].find("}}") else {
                break;
            };
            let name = rest[open + 2..open + 2 + close].trim();
            let end = open + 2 + close + 2;

            match placeholder(name) {
                Some(part) => {
                    literal.push_str(&rest[..open]);
                    if !literal.is_empty() {
                        parts.push(Part::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(part);
                }
                None => literal.push_str(&rest[..end]),
            }
            rest = &rest[end..];
        }

        literal.push_str(rest);
        if !literal.is_empty() {
            parts.push(Part::Literal(literal));
        }
        Self { parts }
    }

    pub fn is_static(&self) -> bool {
        self.parts.iter().all(|p| matches!(p, Part::Literal(_)))
    }

    pub fn render(&self, ctx: &TemplateContext) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Literal(s) => out.push_str(s),
                Part::Vu => out.push_str(&ctx.vu.to_string()),
                Part::Iteration => out.push_str(&ctx.iteration.to_string()),
                Part::Uuid => out.push_str(&uuid::Uuid::new_v4().to_string()),
                Part::Random => out.push_str(&rand::thread_rng().gen::<f64>().to_string()),
                Part::RandInt(max) => {
                    out.push_str(&rand::thread_rng().gen_range(0..*max).to_string())
                }
            }
        }
        out
    }
}

fn placeholder(name: &str) -> Option<Part> {
    match name {
        "vu" => Some(Part::Vu),
        "iteration" => Some(Part::Iteration),
        "uuid" => Some(Part::Uuid),
        "random" => Some(Part::Random),
        _ => {
            let max = name.strip_prefix("randint:")?.trim().parse::<u64>().ok()?;
            (max > 0).then_some(Part::RandInt(max))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_text_is_untouched() {
        let t = Template::parse("/api/info?x={y}");
        assert!(t.is_static());
        assert_eq!(t.render(&TemplateContext::default()), "/api/info?x={y}");
    }

    #[test]
    fn renders_context_placeholders() {
        let t = Template::parse(r#"{"name":"Product-{{ vu }}-{{iteration}}"}"#);
        assert!(!t.is_static());
        let ctx = TemplateContext { vu: 3, iteration: 41 };
        assert_eq!(t.render(&ctx), r#"{"name":"Product-3-41"}"#);
    }

    #[test]
    fn random_placeholders() {
        let t = Template::parse("{{randint:1000}}");
        for _ in 0..100 {
            let n: u64 = t.render(&TemplateContext::default()).parse().unwrap();
            assert!(n < 1000);
        }

        let t = Template::parse("{{uuid}}");
        let a = t.render(&TemplateContext::default());
        let b = t.render(&TemplateContext::default());
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }

    #[test]
    fn unknown_placeholders_stay_literal() {
        let t = Template::parse("a{{nope}}b{{randint:0}}c{{unterminated");
        assert!(t.is_static());
        assert_eq!(
            t.render(&TemplateContext::default()),
            "a{{nope}}b{{randint:0}}c{{unterminated"
        );
    }
}
