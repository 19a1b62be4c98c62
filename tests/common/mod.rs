//! Shared test doubles: a scripted inference client that records every call.
#![allow(dead_code)]

use async_trait::async_trait;
use soil_advisor_api::inference::{GenerationRequest, InferenceClient, InferenceError, RemoteFile};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub const EXTRACTION_JSON: &str = r#"{
  "District_Name": "Satara",
  "Nitrogen": 45,
  "Phosphorus": 32,
  "Potassium": 40,
  "Organic_Carbon": 0.75,
  "pH": 6.8,
  "Rainfall": 900,
  "Sulphur": null,
  "Zinc": 1.2,
  "Iron": null
}"#;

pub const ANALYSIS_JSON: &str = r#"{
  "soil_health_analysis": "Balanced soil with moderate nutrients.",
  "soil_health_score": "72",
  "soil_health_grade": "good",
  "recommended_crop": "Soybean",
  "recommended_fertilizer": "DAP",
  "top_crops": [
    {"crop": "Cotton", "probability": 20},
    {"crop": "Soybean", "probability": 55.5}
  ],
  "top_fertilizers": [{"fertilizer": "DAP", "probability": 60}]
}"#;

pub fn unavailable() -> InferenceError {
    InferenceError::ServiceUnavailable("model overloaded".to_string())
}

/// Replies are consumed in order; an exhausted script answers with HTTP 500.
#[derive(Default)]
pub struct ScriptedClient {
    generate_replies: Mutex<VecDeque<Result<String, InferenceError>>>,
    upload_replies: Mutex<VecDeque<Result<RemoteFile, InferenceError>>>,
    pub generate_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
    pub attachments: Mutex<Vec<Option<String>>>,
    /// Local paths seen by `upload_file`, with whether the file existed then.
    pub uploaded_paths: Mutex<Vec<(PathBuf, bool)>>,
    pub deleted: Mutex<Vec<String>>,
    pub fail_delete: bool,
    /// Holds every `generate` call open this long before replying.
    pub generate_delay: Option<Duration>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_generate(self, replies: Vec<Result<String, InferenceError>>) -> Self {
        *self.generate_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn with_upload(self, replies: Vec<Result<RemoteFile, InferenceError>>) -> Self {
        *self.upload_replies.lock().unwrap() = replies.into();
        self
    }

    pub fn failing_delete(mut self) -> Self {
        self.fail_delete = true;
        self
    }

    pub fn with_generate_delay(mut self, delay: Duration) -> Self {
        self.generate_delay = Some(delay);
        self
    }

    pub fn generate_count(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

pub fn remote_file() -> RemoteFile {
    RemoteFile {
        name: "files/report-123".to_string(),
        uri: "https://files.example.com/report-123".to_string(),
        mime_type: "application/pdf".to_string(),
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, InferenceError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.to_string());
        self.attachments
            .lock()
            .unwrap()
            .push(request.file.map(|f| f.name.clone()));
        if let Some(delay) = self.generate_delay {
            tokio::time::sleep(delay).await;
        }
        self.generate_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(InferenceError::Http {
                    status: 500,
                    body: "no scripted reply".to_string(),
                })
            })
    }

    async fn upload_file(
        &self,
        path: &Path,
        mime_type: &str,
    ) -> Result<RemoteFile, InferenceError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploaded_paths
            .lock()
            .unwrap()
            .push((path.to_path_buf(), path.exists()));
        self.upload_replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(RemoteFile {
                    mime_type: mime_type.to_string(),
                    ..remote_file()
                })
            })
    }

    async fn delete_file(&self, name: &str) -> Result<(), InferenceError> {
        self.deleted.lock().unwrap().push(name.to_string());
        if self.fail_delete {
            return Err(InferenceError::Http {
                status: 404,
                body: "not found".to_string(),
            });
        }
        Ok(())
    }
}
