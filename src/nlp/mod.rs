//! Natural-language front end: from a chat message to an intent, a tool and
//! its parameters.

pub mod classifier;
pub mod context;
pub mod enhanced;
pub mod extractor;
pub mod fuzzy;
pub mod inference;
pub mod processor;
pub mod types;

pub use classifier::IntentClassifier;
pub use context::{ConversationContext, ConversationTopic, Turn};
pub use enhanced::EnhancedLanguageProcessor;
pub use extractor::ParameterExtractor;
pub use processor::LanguageProcessor;
pub use types::{
    EnhancedProcessingResult, FileMatch, Intent, IntentResult, ParameterResult, Params,
    ProcessingResult,
};
