use std::sync::Arc;

use crate::config::SCOPED_STORAGE_SDK;
use crate::services::platform::PermissionProvider;

pub const WRITE_EXTERNAL_STORAGE: &str = "android.permission.WRITE_EXTERNAL_STORAGE";

#[derive(Clone)]
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self { provider }
    }

    pub fn requires_storage_permission(&self) -> bool {
        self.provider.sdk_int() < SCOPED_STORAGE_SDK
    }

    pub fn has_required_permissions(&self) -> bool {
        if !self.requires_storage_permission() {
            return true;
        }
        self.provider.is_granted(WRITE_EXTERNAL_STORAGE)
    }
}
