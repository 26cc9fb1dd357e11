use serde::{Deserialize, Serialize};

/// Frame sent to the classifier service
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyRequest {
    pub image: String,     // Base64-encoded JPEG bytes
    pub timestamp: String, // RFC3339 timestamp
}

/// Classifier verdict for one frame
#[derive(Debug, Serialize, Deserialize)]
pub struct ClassifyReply {
    pub label: Option<String>,
    pub confidence: Option<f32>,
    pub error: Option<String>,
}
