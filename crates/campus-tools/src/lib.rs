// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod builtin;
mod events;
mod registry;
mod tool;

pub use builtin::classify_role::{
    classify_roles, Classification, Classifier, ClassifyRoleTool, KeywordClassifier,
    ModelClassifier,
};
pub use builtin::magic_function::MagicFunctionTool;
pub use builtin::search_school_data::{
    render_sections, Document, Retriever, SearchSchoolDataTool, StaticRetriever, NOTHING_FOUND,
};
pub use builtin::submit_official_absence::{SubmitOfficialAbsenceTool, PERIODS, SUBMITTED};
pub use events::{StreamEvent, StreamSink};
pub use registry::{ConfigError, ToolRegistry};
pub use tool::{Tool, ToolCall, ToolContext, ToolOutput};
