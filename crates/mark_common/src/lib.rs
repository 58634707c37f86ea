//! Shared library for the Mark grading assistant
//!
//! Everything the conversational frontend needs: configuration, error
//! kinds, the LLM client abstraction, the Canvas LMS gateway, rubric
//! normalization, and rubric-driven grading.

pub mod canvas;
pub mod config;
pub mod errors;
pub mod grading;
pub mod llm;
pub mod rubric;
