use lecture_auth::{DeviceFingerprint, Principal, Role};
use lecture_core::{GroupId, PrincipalId};

/// Authenticated principal for a request, set by the auth middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
    degraded: bool,
}

impl PrincipalContext {
    pub fn new(principal: Principal, degraded: bool) -> Self {
        Self { principal, degraded }
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    pub fn principal_id(&self) -> &PrincipalId {
        &self.principal.principal_id
    }

    pub fn group_id(&self) -> Option<&GroupId> {
        self.principal.group_id.as_ref()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.principal.roles.iter()
    }

    /// Rate limiting for this request ran on local counters.
    pub fn degraded(&self) -> bool {
        self.degraded
    }
}

/// Device signals of the presenting client, set by the device middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceContext {
    device_id: String,
    client_ip: Option<String>,
    fingerprint: DeviceFingerprint,
}

impl DeviceContext {
    pub fn new(device_id: String, client_ip: Option<String>, fingerprint: DeviceFingerprint) -> Self {
        Self {
            device_id,
            client_ip,
            fingerprint,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn client_ip(&self) -> Option<&str> {
        self.client_ip.as_deref()
    }

    pub fn fingerprint(&self) -> &DeviceFingerprint {
        &self.fingerprint
    }
}
