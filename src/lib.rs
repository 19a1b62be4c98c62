//! Soil Advisor API Library
//!
//! Crop and fertilizer recommendation backend: a deterministic soil health
//! scorer, a classifier-first prediction path with an LLM fallback, and an
//! LLM pipeline that reads uploaded soil test reports.
//!
//! # Modules
//!
//! - `api`: HTTP-facing components.
//! - `core`: Domain logic, models and errors.
//! - `integrations`: External inference service clients.
//! - `classifier`: Random-forest artifacts and label encoders.
//! - `config`: Configuration management.
//! - `document_insight`: Soil report upload, extraction and analysis.
//! - `errors`: Error handling types.
//! - `gemini_client`: Gemini REST client.
//! - `handlers`: HTTP request handlers and routes.
//! - `inference`: Inference client trait and offline client.
//! - `models`: Core data models.
//! - `prediction`: Classifier-first recommendation with LLM fallback.
//! - `retry`: Bounded retry with linear backoff.
//! - `schema`: Shared response schemas and reply parsing.
//! - `soil_health`: Rule-based soil health scoring.

pub mod api;
pub mod core;
pub mod integrations;

pub mod classifier;
pub mod config;
pub mod document_insight;
pub mod errors;
pub mod gemini_client;
pub mod handlers;
pub mod inference;
pub mod models;
pub mod prediction;
pub mod retry;
pub mod schema;
pub mod soil_health;
