use ulid::Ulid;

/// Capabilities of the caller, injected into every engine operation that cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    device_id: String,
    administrator: bool,
}

impl AuthContext {
    pub fn new(device_id: impl Into<String>, administrator: bool) -> Self {
        Self {
            device_id: device_id.into(),
            administrator,
        }
    }

    /// A regular (non-administrator) device.
    pub fn device(device_id: impl Into<String>) -> Self {
        Self::new(device_id, false)
    }

    pub fn is_administrator(&self) -> bool {
        self.administrator
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// Opaque device token. Unique in practice, not cryptographically guaranteed.
pub fn generate_device_id() -> String {
    format!("dev_{}", Ulid::new().to_string().to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminCheck {
    Granted,
    NotRequested,
    Rejected,
}

/// Grants administrator capability to callers presenting the configured password.
#[derive(Debug, Clone)]
pub struct AdminGate {
    password: Option<String>,
}

impl AdminGate {
    pub fn new(password: Option<String>) -> Self {
        Self {
            password: password.filter(|p| !p.is_empty()),
        }
    }

    /// A wrong password, or any password when none is configured, is rejected.
    pub fn verify(&self, offered: Option<&str>) -> AdminCheck {
        match (offered, &self.password) {
            (None, _) => AdminCheck::NotRequested,
            (Some(candidate), Some(expected)) if constant_time_eq(candidate, expected) => {
                AdminCheck::Granted
            }
            (Some(_), _) => AdminCheck::Rejected,
        }
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_ids_are_distinct_and_prefixed() {
        let a = generate_device_id();
        let b = generate_device_id();
        assert!(a.starts_with("dev_"));
        assert_ne!(a, b);
    }

    #[test]
    fn admin_gate() {
        let gate = AdminGate::new(Some("s3cret".into()));
        assert_eq!(gate.verify(None), AdminCheck::NotRequested);
        assert_eq!(gate.verify(Some("s3cret")), AdminCheck::Granted);
        assert_eq!(gate.verify(Some("wrong")), AdminCheck::Rejected);

        let closed = AdminGate::new(None);
        assert_eq!(closed.verify(None), AdminCheck::NotRequested);
        assert_eq!(closed.verify(Some("anything")), AdminCheck::Rejected);

        // An empty configured password means no administrator at all
        let empty = AdminGate::new(Some(String::new()));
        assert_eq!(empty.verify(Some("")), AdminCheck::Rejected);
    }

    #[test]
    fn context_accessors() {
        let ctx = AuthContext::device("dev_x");
        assert_eq!(ctx.device_id(), "dev_x");
        assert!(!ctx.is_administrator());
        assert!(AuthContext::new("dev_y", true).is_administrator());
    }
}
