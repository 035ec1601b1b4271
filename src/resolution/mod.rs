pub mod resolver;

pub use resolver::{
    MatchType, Resolution, ResolutionReport, ResolveError, Resolver, RuleMatch, RuleSuggestion,
    MIN_SUGGESTION_SIMILARITY,
};
