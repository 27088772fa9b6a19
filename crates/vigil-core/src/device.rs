//! Host display surface.

use crate::error::ProctorResult;
use async_trait::async_trait;

/// The exam window. Entering fullscreen is part of starting a session; exiting it
/// is a violation followed by a best-effort re-request.
#[async_trait]
pub trait DisplaySurface: Send + Sync {
    async fn request_fullscreen(&self) -> ProctorResult<()>;
}

/// Surface for hosts without a fullscreen concept (tests, headless runs).
#[derive(Debug, Default, Clone)]
pub struct NullDisplay;

#[async_trait]
impl DisplaySurface for NullDisplay {
    async fn request_fullscreen(&self) -> ProctorResult<()> {
        Ok(())
    }
}
