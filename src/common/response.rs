// Success envelope shared by every handler

use serde::Serialize;

/// `{"success": true, "data": ...}`; failures use `ErrorResponse`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}
