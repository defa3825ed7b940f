use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateFileRequest {
    #[validate(length(min = 1, max = 255, message = "File name must be 1-255 characters"))]
    pub file_name: String,

    #[validate(length(min = 1, max = 255))]
    pub content_type: String,

    #[validate(range(min = 0, message = "Size must not be negative"))]
    pub size_bytes: i64,

    #[validate(length(min = 1, max = 1024, message = "Storage key is required"))]
    pub storage_key: String,
}
