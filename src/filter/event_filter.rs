// src/filter/event_filter.rs
//! Include/exclude rule evaluation

use crate::events::TelemetryEvent;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Shared event predicate
pub type Predicate = Arc<dyn Fn(&TelemetryEvent) -> bool + Send + Sync>;

/// Whether a rule admits or rejects matching events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Include,
    Exclude,
}

/// How composed filters are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeMode {
    And,
    Or,
}

/// A named rule
#[derive(Clone)]
pub struct FilterRule {
    pub name: String,
    pub mode: FilterMode,
    predicate: Predicate,
}

impl FilterRule {
    pub fn evaluate(&self, event: &TelemetryEvent) -> bool {
        (self.predicate)(event)
    }
}

impl fmt::Debug for FilterRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRule")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .finish()
    }
}

/// Event filter built from named rules
///
/// Rule names are labels only: registering a second rule under an existing
/// name keeps both.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    rules: Vec<FilterRule>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Register a rule
    pub fn add_rule<F>(&mut self, name: impl Into<String>, predicate: F, mode: FilterMode) -> &mut Self
    where
        F: Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
    {
        self.add_predicate(name, Arc::new(predicate), mode)
    }

    /// Register an already shared predicate
    pub fn add_predicate(
        &mut self,
        name: impl Into<String>,
        predicate: Predicate,
        mode: FilterMode,
    ) -> &mut Self {
        let name = name.into();
        trace!("Adding {:?} rule '{}'", mode, name);
        self.rules.push(FilterRule {
            name,
            mode,
            predicate,
        });
        self
    }

    /// Builder-style `add_rule`
    pub fn with_rule<F>(mut self, name: impl Into<String>, predicate: F, mode: FilterMode) -> Self
    where
        F: Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
    {
        self.add_rule(name, predicate, mode);
        self
    }

    pub fn include<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
    {
        self.with_rule(name, predicate, FilterMode::Include)
    }

    pub fn exclude<F>(self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&TelemetryEvent) -> bool + Send + Sync + 'static,
    {
        self.with_rule(name, predicate, FilterMode::Exclude)
    }

    /// Decide whether an event is admitted
    ///
    /// Every rule is evaluated, so stateful predicates see each event once
    /// regardless of rule order or earlier outcomes.
    pub fn passes(&self, event: &TelemetryEvent) -> bool {
        let mut has_include = false;
        let mut included = false;
        let mut excluded = false;

        for rule in &self.rules {
            let matched = rule.evaluate(event);
            match rule.mode {
                FilterMode::Include => {
                    has_include = true;
                    included |= matched;
                }
                FilterMode::Exclude => excluded |= matched,
            }
        }

        (!has_include || included) && !excluded
    }

    /// Admitted subset, original order preserved
    pub fn filter(&self, events: &[TelemetryEvent]) -> Vec<TelemetryEvent> {
        events.iter().filter(|e| self.passes(e)).cloned().collect()
    }

    /// Combine filters into one whose single rule ANDs or ORs their verdicts
    pub fn compose(mode: ComposeMode, filters: Vec<EventFilter>) -> EventFilter {
        let name = match mode {
            ComposeMode::And => "composite:and",
            ComposeMode::Or => "composite:or",
        };

        let predicate = move |event: &TelemetryEvent| {
            let verdicts: Vec<bool> = filters.iter().map(|f| f.passes(event)).collect();
            match mode {
                ComposeMode::And => verdicts.iter().all(|v| *v),
                ComposeMode::Or => verdicts.iter().any(|v| *v),
            }
        };

        EventFilter::new().include(name, predicate)
    }

    /// Turn the filter into a plain predicate (e.g. for replay)
    pub fn into_predicate(self) -> Predicate {
        Arc::new(move |event: &TelemetryEvent| self.passes(event))
    }

    pub fn rules(&self) -> &[FilterRule] {
        &self.rules
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn clear(&mut self) {
        self.rules.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventType;

    fn event(category: &str, action: &str, label: Option<&str>) -> TelemetryEvent {
        let mut builder = TelemetryEvent::builder("s", EventType::Stream, category, action);
        if let Some(label) = label {
            builder = builder.label(label);
        }
        builder.build()
    }

    #[test]
    fn test_no_rules_admits_everything() {
        let filter = EventFilter::new();
        assert!(filter.passes(&event("a", "b", None)));
    }

    #[test]
    fn test_truth_table() {
        // (A or B) and not C
        let filter = EventFilter::new()
            .include("A", |e| e.category == "a")
            .include("B", |e| e.action == "b")
            .exclude("C", |e| e.label.as_deref() == Some("c"));

        for a in [false, true] {
            for b in [false, true] {
                for c in [false, true] {
                    let e = event(
                        if a { "a" } else { "x" },
                        if b { "b" } else { "y" },
                        if c { Some("c") } else { None },
                    );
                    assert_eq!(filter.passes(&e), (a || b) && !c, "a={a} b={b} c={c}");
                }
            }
        }
    }

    #[test]
    fn test_duplicate_names_coexist() {
        let mut filter = EventFilter::new();
        filter
            .add_rule("dup", |e: &TelemetryEvent| e.category == "a", FilterMode::Include)
            .add_rule("dup", |e: &TelemetryEvent| e.category == "b", FilterMode::Include);

        assert_eq!(filter.rule_count(), 2);
        assert!(filter.passes(&event("a", "x", None)));
        assert!(filter.passes(&event("b", "x", None)));
        assert!(!filter.passes(&event("c", "x", None)));
    }

    #[test]
    fn test_exclude_rules_all_evaluated() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);

        let filter = EventFilter::new()
            .exclude("always", |_| true)
            .exclude("counting", move |_| {
                c.fetch_add(1, Ordering::SeqCst);
                false
            });

        assert!(!filter.passes(&event("a", "b", None)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filter_preserves_order() {
        let filter = EventFilter::new().exclude("drop-b", |e| e.category == "b");
        let events = vec![
            event("a", "1", None),
            event("b", "2", None),
            event("a", "3", None),
        ];
        let kept = filter.filter(&events);
        let actions: Vec<_> = kept.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["1", "3"]);
    }

    #[test]
    fn test_compose_and_or() {
        let only_a = EventFilter::new().include("a", |e| e.category == "a");
        let only_b_action = EventFilter::new().include("b", |e| e.action == "b");

        let and = EventFilter::compose(ComposeMode::And, vec![only_a.clone(), only_b_action.clone()]);
        let or = EventFilter::compose(ComposeMode::Or, vec![only_a, only_b_action]);

        assert_eq!(and.rule_count(), 1);
        assert!(and.passes(&event("a", "b", None)));
        assert!(!and.passes(&event("a", "x", None)));
        assert!(or.passes(&event("a", "x", None)));
        assert!(or.passes(&event("x", "b", None)));
        assert!(!or.passes(&event("x", "x", None)));
    }

    #[test]
    fn test_into_predicate() {
        let predicate = EventFilter::new()
            .exclude("errors", |e| e.is_error())
            .into_predicate();
        assert!(predicate(&event("a", "b", None)));
    }
}
