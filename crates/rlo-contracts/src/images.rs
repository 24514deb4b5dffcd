use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Inline image returned by the model, kept in its base64 transport form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    /// Self-contained `data:` URI usable wherever an image reference is expected.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }

    pub fn from_data_url(raw: &str) -> anyhow::Result<Self> {
        let Some(rest) = raw.trim().strip_prefix("data:") else {
            bail!("image url is not a data url");
        };
        let Some((header, data)) = rest.split_once(',') else {
            bail!("data url has no payload separator");
        };
        let Some(mime_type) = header.strip_suffix(";base64") else {
            bail!("data url payload is not base64 encoded");
        };
        if data.is_empty() {
            bail!("data url payload is empty");
        }
        let mime_type = if mime_type.is_empty() {
            "image/png"
        } else {
            mime_type
        };
        Ok(Self::new(mime_type, data))
    }
}
