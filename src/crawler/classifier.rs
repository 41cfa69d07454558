//! Product page classification
//!
//! A page is a product page when any of the task's CSS selectors matches at
//! least one of its nodes.

use crate::crawler::parser::Document;
use crate::ConfigError;
use scraper::Selector;

/// One compiled CSS selector, kept with its source text for logging
#[derive(Debug, Clone)]
pub struct SelectorRule {
    source: String,
    selector: Selector,
}

impl SelectorRule {
    pub fn parse(source: &str) -> Result<Self, ConfigError> {
        let selector = Selector::parse(source).map_err(|e| ConfigError::InvalidSelector {
            selector: source.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            source: source.to_string(),
            selector,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }
}

/// A task's selector rules, in configured order
#[derive(Debug, Clone, Default)]
pub struct SelectorRules {
    rules: Vec<SelectorRule>,
}

impl SelectorRules {
    /// Compiles every rule; the first invalid one fails the whole set
    pub fn compile(sources: &[String]) -> Result<Self, ConfigError> {
        let rules = sources
            .iter()
            .map(|source| SelectorRule::parse(source))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SelectorRule> {
        self.rules.iter()
    }
}

/// Returns the first rule matching the document, if any
pub fn matching_rule<'r, D: Document + ?Sized>(
    document: &D,
    rules: &'r SelectorRules,
) -> Option<&'r SelectorRule> {
    rules.iter().find(|rule| document.matches(rule))
}

/// Returns true if any rule matches; an empty rule set never matches
pub fn is_product_page<D: Document + ?Sized>(document: &D, rules: &SelectorRules) -> bool {
    matching_rule(document, rules).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// Records which rules were evaluated
    struct FakeDocument {
        matching: Vec<&'static str>,
        evaluated: RefCell<Vec<String>>,
    }

    impl Document for FakeDocument {
        fn matches(&self, rule: &SelectorRule) -> bool {
            self.evaluated.borrow_mut().push(rule.source().to_string());
            self.matching.contains(&rule.source())
        }

        fn links(&self) -> Vec<String> {
            Vec::new()
        }

        fn html(&self) -> &str {
            ""
        }
    }

    fn rules(sources: &[&str]) -> SelectorRules {
        let sources: Vec<String> = sources.iter().map(|s| s.to_string()).collect();
        SelectorRules::compile(&sources).unwrap()
    }

    fn fake(matching: Vec<&'static str>) -> FakeDocument {
        FakeDocument {
            matching,
            evaluated: RefCell::new(Vec::new()),
        }
    }

    #[test]
    fn test_invalid_selector_is_a_config_error() {
        let result = SelectorRules::compile(&[".ok".to_string(), "div[[".to_string()]);
        match result {
            Err(ConfigError::InvalidSelector { selector, .. }) => assert_eq!(selector, "div[["),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_any_rule_matching_is_enough() {
        let doc = fake(vec![".item"]);
        assert!(is_product_page(&doc, &rules(&[".product", ".item"])));
    }

    #[test]
    fn test_no_rule_matching() {
        let doc = fake(vec![]);
        assert!(!is_product_page(&doc, &rules(&[".product", ".item"])));
    }

    #[test]
    fn test_empty_rule_set_never_matches() {
        let doc = fake(vec![".product"]);
        assert!(!is_product_page(&doc, &SelectorRules::default()));
        assert!(doc.evaluated.borrow().is_empty());
    }

    #[test]
    fn test_evaluation_stops_at_first_match() {
        let doc = fake(vec![".product", ".item"]);
        let rules = rules(&[".product", ".item", ".product-item"]);

        assert_eq!(matching_rule(&doc, &rules).unwrap().source(), ".product");
        assert_eq!(*doc.evaluated.borrow(), vec![".product".to_string()]);
    }
}
